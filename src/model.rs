//! Model components.
//!
//! ## Components
//!
//! - [`diffwave`] — DiffWave noise predictor with optional local conditioning
//! - [`encoder`] — class, brain and brain+class conditioning encoders
//! - [`classifier`] — ECoG brain classifiers used by the brain+class encoder
//! - [`conditional`] — encoder + DiffWave wrapper with partial loading and freezing
//! - [`state_dict`] — named parameter snapshots and partial loading

pub mod classifier;
pub mod conditional;
pub mod diffwave;
pub mod encoder;
pub mod layers;
pub mod state_dict;

pub use conditional::DiffWaveConditional;
pub use diffwave::DiffWave;
pub use state_dict::StateDict;
