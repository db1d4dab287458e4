//! Dataset assembly.
//!
//! - [`words`] — canonical word tokens from dataset filenames
//! - [`class_loader`] — word → one-hot class vector
//! - [`ecog`] — audio file → matching ECoG recording (random or exact match)
//! - [`dataset`] — audio clips paired with conditioning input, batched

pub mod class_loader;
pub mod dataset;
pub mod ecog;
pub mod words;

pub use class_loader::ClassConditionalLoader;
pub use dataset::{Batch, ConditionLoader, SpeechDataset};
pub use ecog::{EcogExactLoader, EcogLoader, EcogRandomLoader, Split};
pub use words::{get_word_from_filepath, word_from_path};
