//! Word tokens from dataset filenames.
//!
//! Filenames follow `<word><number>_<augmentation>.<ext>`, where both the
//! number and the augmentation suffix are optional:
//!
//! ```text
//! goed.wav             → goed
//! goed7.npy            → goed   (numbering stripped)
//! goed7_pitch2.wav     → goed   (augmentation and numbering stripped)
//! ```

use std::path::Path;

/// Extract the word from a file path.
///
/// - `uses_numbering`: strip trailing digits from the stem
/// - `uses_augmentation`: strip everything from the first `_` onwards
///
/// Augmentation is stripped before numbering, so `goed7_2` keeps its `7`
/// when only augmentation stripping is requested.
pub fn get_word_from_filepath(
    path: impl AsRef<Path>,
    uses_numbering: bool,
    uses_augmentation: bool,
) -> String {
    let stem = path
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut word = stem.as_str();
    if uses_augmentation && let Some(idx) = word.find('_') {
        word = &word[..idx];
    }
    if uses_numbering {
        word = word.trim_end_matches(|c: char| c.is_ascii_digit());
    }
    word.to_string()
}

/// [`get_word_from_filepath`] with numbering and augmentation both stripped.
pub fn word_from_path(path: impl AsRef<Path>) -> String {
    get_word_from_filepath(path, true, true)
}
