//! Audio clips paired with conditioning input.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use super::class_loader::ClassConditionalLoader;
use super::ecog::{EcogExactLoader, EcogLoader, EcogRandomLoader, Split, read_split_list};
use super::words::get_word_from_filepath;
use crate::audio::{check_sample_rate, fit_length, read_wav};
use crate::config::{DataConfig, LoaderConfig};
use crate::{Error, Result};

/// Produces the conditioning input for one audio file.
pub enum ConditionLoader {
    /// One-hot class vector `[n_classes]`.
    Class(ClassConditionalLoader),
    /// ECoG recording `[bands, electrodes, timesteps]`.
    Ecog(Box<dyn EcogLoader>),
}

impl ConditionLoader {
    pub fn from_config(cfg: &LoaderConfig, device: &Device) -> Result<Self> {
        Ok(match cfg {
            LoaderConfig::Class { words_file } => {
                ConditionLoader::Class(ClassConditionalLoader::from_file(words_file, device)?)
            }
            LoaderConfig::EcogRandom {
                path,
                splits_path,
                seed,
            } => ConditionLoader::Ecog(Box::new(EcogRandomLoader::new(path, splits_path, *seed)?)),
            LoaderConfig::EcogExact { path } => {
                ConditionLoader::Ecog(Box::new(EcogExactLoader::new(path)))
            }
        })
    }

    pub fn load(&mut self, audio_file: &Path, split: Split, device: &Device) -> Result<Tensor> {
        match self {
            ConditionLoader::Class(loader) => Ok(loader.call(audio_file)?.squeeze(0)?),
            ConditionLoader::Ecog(loader) => loader.load(audio_file, split, device),
        }
    }
}

/// One training batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[B, 1, audio_len]`
    pub audio: Tensor,
    /// Stacked conditioning input, batch first.
    pub conditioning: Tensor,
    pub files: Vec<PathBuf>,
}

/// The `.wav` clips of one split.
///
/// A clip belongs to the split when its stem, augmentation suffix removed,
/// is listed in the split's `train.csv` / `val.csv`.
pub struct SpeechDataset {
    files: Vec<PathBuf>,
    split: Split,
    loader: ConditionLoader,
    audio_len: usize,
    sample_rate: u32,
    device: Device,
}

impl SpeechDataset {
    pub fn new(
        audio_dir: impl AsRef<Path>,
        splits_path: impl AsRef<Path>,
        split: Split,
        loader: ConditionLoader,
        audio_len: usize,
        sample_rate: u32,
        device: &Device,
    ) -> Result<Self> {
        let listed: HashSet<String> = read_split_list(splits_path.as_ref(), split)?
            .into_iter()
            .collect();

        let mut files = Vec::new();
        for entry in std::fs::read_dir(audio_dir.as_ref())? {
            let path = entry?.path();
            let is_wav = path.extension().is_some_and(|e| e == "wav");
            if is_wav && listed.contains(&get_word_from_filepath(&path, false, true)) {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(Error::Dataset(format!(
                "no {split} audio files in {}",
                audio_dir.as_ref().display()
            )));
        }
        tracing::info!(split = %split, clips = files.len(), "loaded speech dataset");

        Ok(Self {
            files,
            split,
            loader,
            audio_len,
            sample_rate,
            device: device.clone(),
        })
    }

    pub fn from_config(
        cfg: &DataConfig,
        split: Split,
        audio_len: usize,
        sample_rate: u32,
        device: &Device,
    ) -> Result<Self> {
        let loader = ConditionLoader::from_config(&cfg.loader, device)?;
        Self::new(
            &cfg.audio_dir,
            &cfg.splits_path,
            split,
            loader,
            audio_len,
            sample_rate,
            device,
        )
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Index batches covering the dataset once, shuffled when `rng` is given.
    pub fn batch_indices(&self, batch_size: usize, rng: Option<&mut ChaCha8Rng>) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.files.len()).collect();
        if let Some(rng) = rng {
            order.shuffle(rng);
        }
        order
            .chunks(batch_size.max(1))
            .map(<[usize]>::to_vec)
            .collect()
    }

    /// Load clip `idx` as `[1, audio_len]`.
    fn audio(&self, idx: usize) -> Result<Tensor> {
        let clip = read_wav(&self.files[idx])?;
        check_sample_rate(&clip, self.sample_rate)?;
        let samples = fit_length(clip.samples, self.audio_len);
        Ok(Tensor::from_vec(samples, (1, self.audio_len), &self.device)?)
    }

    pub fn batch(&mut self, indices: &[usize]) -> Result<Batch> {
        let mut audio = Vec::with_capacity(indices.len());
        let mut conditioning = Vec::with_capacity(indices.len());
        let mut files = Vec::with_capacity(indices.len());
        for &idx in indices {
            let file = self.files[idx].clone();
            audio.push(self.audio(idx)?);
            conditioning.push(self.loader.load(&file, self.split, &self.device)?);
            files.push(file);
        }
        Ok(Batch {
            audio: Tensor::stack(&audio, 0)?,
            conditioning: Tensor::stack(&conditioning, 0)?,
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_wav;
    use rand::SeedableRng;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio");
        let splits = dir.path().join("splits");
        std::fs::create_dir_all(&audio).unwrap();
        std::fs::create_dir_all(&splits).unwrap();
        write_wav(audio.join("goed.wav"), &[0.5; 10], 16000).unwrap();
        write_wav(audio.join("goed_pitch1.wav"), &[0.25; 4], 16000).unwrap();
        write_wav(audio.join("hoe.wav"), &[0.1; 6], 16000).unwrap();
        write_wav(audio.join("boven.wav"), &[0.1; 6], 16000).unwrap();
        std::fs::write(splits.join("train.csv"), "goed.wav,hoe.wav").unwrap();
        std::fs::write(splits.join("val.csv"), "boven.wav").unwrap();
        dir
    }

    fn class_loader() -> ConditionLoader {
        let words = ["boven", "goed", "hoe"].map(String::from).to_vec();
        ConditionLoader::Class(ClassConditionalLoader::from_words(words, &Device::Cpu).unwrap())
    }

    #[test]
    fn split_membership_includes_augmented_clips() {
        let dir = fixture();
        let ds = SpeechDataset::new(
            dir.path().join("audio"),
            dir.path().join("splits"),
            Split::Train,
            class_loader(),
            8,
            16000,
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(ds.len(), 3);
    }

    #[test]
    fn batch_shapes() {
        let dir = fixture();
        let mut ds = SpeechDataset::new(
            dir.path().join("audio"),
            dir.path().join("splits"),
            Split::Train,
            class_loader(),
            8,
            16000,
            &Device::Cpu,
        )
        .unwrap();
        let batch = ds.batch(&[0, 1, 2]).unwrap();
        assert_eq!(batch.audio.dims(), &[3, 1, 8]);
        assert_eq!(batch.conditioning.dims(), &[3, 3]);
        assert_eq!(batch.files.len(), 3);
    }

    #[test]
    fn shuffled_batches_cover_dataset() {
        let dir = fixture();
        let ds = SpeechDataset::new(
            dir.path().join("audio"),
            dir.path().join("splits"),
            Split::Train,
            class_loader(),
            8,
            16000,
            &Device::Cpu,
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let batches = ds.batch_indices(2, Some(&mut rng));
        assert_eq!(batches.len(), 2);
        let mut all: Vec<usize> = batches.into_iter().flatten().collect();
        all.sort();
        assert_eq!(all, vec![0, 1, 2]);
    }

    #[test]
    fn wrong_sample_rate_rejected() {
        let dir = fixture();
        write_wav(dir.path().join("audio/hoe.wav"), &[0.1; 6], 8000).unwrap();
        let mut ds = SpeechDataset::new(
            dir.path().join("audio"),
            dir.path().join("splits"),
            Split::Train,
            class_loader(),
            8,
            16000,
            &Device::Cpu,
        )
        .unwrap();
        let hoe = ds.files().iter().position(|f| f.ends_with("hoe.wav")).unwrap();
        assert!(ds.batch(&[hoe]).is_err());
    }
}
