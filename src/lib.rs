//! Speech synthesis from brain recordings with a conditional DiffWave.
//!
//! A candle-based DiffWave vocoder whose residual layers take a conditioning
//! sequence from one of several encoders. The generator can be pretrained on
//! speech alone, or conditioned on word classes, and then fine-tuned on ECoG
//! recordings with its weights frozen.
//!
//! ## Architecture
//!
//! ```text
//! class one-hot ──→ ClassEncoder ─────────────────────────┐
//! ECoG [C,E,T] ───→ BrainEncoder ─────────────────────────┤
//! ECoG [C,E,T] ───→ BrainClassifier → ClassEncoder ───────┤
//!                                                         ↓ [B, 1, L | 1]
//!              noise ──→ DiffWave (N gated residual layers) ──→ ε̂
//!                                  ↑
//!                          diffusion step t
//! ```
//!
//! ## Modules
//!
//! - [`audio`] — WAV I/O and clip length handling
//! - [`data`] — filename → word mapping, conditioning loaders, datasets
//! - [`model`] — DiffWave, encoders, brain classifiers, conditional wrapper
//! - [`checkpoint`] — safetensors checkpoints with a JSON training-state sidecar
//! - [`scheduler`] — noise schedules, DDPM and fast samplers
//! - [`training`] — optimizer loop with generator freezing
//! - [`pipeline`] — end-to-end inference pipeline

pub mod audio;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod model;
pub mod pipeline;
pub mod scheduler;
pub mod training;

mod error;

pub use error::{Error, IncompatibleKeys, Result};
