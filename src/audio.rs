//! Audio I/O utilities.
//!
//! Mono WAV read/write for speech clips.

mod wav;

pub use wav::{Clip, check_sample_rate, fit_length, peak_normalize, read_wav, write_wav};
