//! ECoG recording lookup.
//!
//! Given the path of an audio clip, an [`EcogLoader`] finds the brain
//! recording that goes with it and loads it from a `.npy` array on disk.
//!
//! - [`EcogRandomLoader`] — any recording of the same word from the split
//! - [`EcogExactLoader`] — the recording with the same numbered stem

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::words::get_word_from_filepath;
use crate::{Error, Result};

/// Dataset split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Val,
}

impl Split {
    /// Name of the split list file inside a splits directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Split::Train => "train.csv",
            Split::Val => "val.csv",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => f.write_str("train"),
            Split::Val => f.write_str("val"),
        }
    }
}

/// Finds and loads the ECoG recording for an audio file.
pub trait EcogLoader: Send {
    /// Path of the recording that matches `audio_file_path`.
    fn retrieve_file(&mut self, audio_file_path: &Path, split: Split) -> Result<PathBuf>;

    /// Load the matching recording onto `device`.
    fn load(&mut self, audio_file_path: &Path, split: Split, device: &Device) -> Result<Tensor> {
        let file = self.retrieve_file(audio_file_path, split)?;
        process_ecog(&file, device)
    }
}

/// Load an ECoG array stored as `.npy` as an f32 tensor.
pub fn process_ecog(ecog_file: &Path, device: &Device) -> Result<Tensor> {
    let ecog = Tensor::read_npy(ecog_file).map_err(|e| {
        Error::Dataset(format!("failed to read {}: {e}", ecog_file.display()))
    })?;
    Ok(ecog.to_dtype(DType::F32)?.to_device(device)?)
}

/// Read a comma-separated split list, keeping each entry's part before the
/// first `.`.
pub fn read_split_list(splits_path: &Path, split: Split) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(splits_path.join(split.file_name()))?;
    Ok(text
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.split('.').next().unwrap_or_default().to_string())
        .collect())
}

fn list_npy(path: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.ends_with(".npy") {
            files.push(name);
        }
    }
    // read_dir order is platform dependent; sort so seeded picks reproduce.
    files.sort();
    Ok(files)
}

// ---------------------------------------------------------------------------
// Random
// ---------------------------------------------------------------------------

/// Picks a random recording of the clip's word from the requested split.
///
/// The audio clips carry no numbering in their names, while recordings are
/// numbered (`goed.wav` ↔ `goed1.npy`, `goed7.npy`, ...).
pub struct EcogRandomLoader {
    path: PathBuf,
    train_files: Vec<String>,
    val_files: Vec<String>,
    rng: ChaCha8Rng,
}

impl EcogRandomLoader {
    pub fn new(path: impl AsRef<Path>, splits_path: impl AsRef<Path>, seed: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let splits_path = splits_path.as_ref();
        let train_words: HashSet<String> =
            read_split_list(splits_path, Split::Train)?.into_iter().collect();
        let val_words: HashSet<String> =
            read_split_list(splits_path, Split::Val)?.into_iter().collect();

        let all = list_npy(&path)?;
        let in_split = |words: &HashSet<String>| -> Vec<String> {
            all.iter()
                .filter(|f| words.contains(&get_word_from_filepath(f, false, true)))
                .cloned()
                .collect()
        };
        let train_files = in_split(&train_words);
        let val_files = in_split(&val_words);

        tracing::debug!(
            path = %path.display(),
            train = train_files.len(),
            val = val_files.len(),
            "indexed ECoG recordings"
        );

        Ok(Self {
            path,
            train_files,
            val_files,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn files(&self, split: Split) -> &[String] {
        match split {
            Split::Train => &self.train_files,
            Split::Val => &self.val_files,
        }
    }
}

impl EcogLoader for EcogRandomLoader {
    fn retrieve_file(&mut self, audio_file_path: &Path, split: Split) -> Result<PathBuf> {
        let word = get_word_from_filepath(audio_file_path, false, true);

        let fitting: Vec<String> = self
            .files(split)
            .iter()
            .filter(|f| get_word_from_filepath(f, true, false) == word)
            .cloned()
            .collect();

        if fitting.is_empty() {
            return Err(Error::Dataset(format!(
                "no {split} ECoG files found for {}",
                audio_file_path.display()
            )));
        }

        let pick = &fitting[self.rng.random_range(0..fitting.len())];
        Ok(self.path.join(pick))
    }
}

// ---------------------------------------------------------------------------
// Exact
// ---------------------------------------------------------------------------

/// Loads the recording made together with the clip: `goed7.wav` → `goed7.npy`.
#[derive(Debug, Clone)]
pub struct EcogExactLoader {
    path: PathBuf,
}

impl EcogExactLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl EcogLoader for EcogExactLoader {
    fn retrieve_file(&mut self, audio_file_path: &Path, _split: Split) -> Result<PathBuf> {
        // Numbering identifies the recording, so it must stay.
        let word = get_word_from_filepath(audio_file_path, false, false);
        let file = self.path.join(format!("{word}.npy"));
        if !file.is_file() {
            return Err(Error::Dataset(format!(
                "no ECoG file {} for {}",
                file.display(),
                audio_file_path.display()
            )));
        }
        Ok(file)
    }
}
