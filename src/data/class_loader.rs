//! One-hot class vectors for words.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::encoding::one_hot;

use super::words::word_from_path;
use crate::{Error, Result};

/// Maps a word (or a file path whose name carries the word) to a one-hot
/// vector over a fixed vocabulary.
///
/// The class index of a word is its position in the word list.
#[derive(Debug, Clone)]
pub struct ClassConditionalLoader {
    word_tokens: HashMap<String, u32>,
    num_classes: usize,
    device: Device,
}

impl ClassConditionalLoader {
    /// Load the vocabulary from a comma-separated file. Whitespace around
    /// each word is ignored.
    pub fn from_file(words_file: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let text = std::fs::read_to_string(words_file)?;
        let words: Vec<String> = text.split(',').map(|w| w.trim().to_string()).collect();
        Self::from_words(words, device)
    }

    pub fn from_words(words: Vec<String>, device: &Device) -> Result<Self> {
        if words.is_empty() || words.iter().any(String::is_empty) {
            return Err(Error::Dataset("word list contains an empty entry".into()));
        }
        let word_tokens = words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as u32))
            .collect();
        Ok(Self {
            word_tokens,
            num_classes: words.len(),
            device: device.clone(),
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Class index of the word in `audio_file_path`.
    pub fn index_of(&self, audio_file_path: impl AsRef<Path>) -> Result<u32> {
        let word = word_from_path(audio_file_path);
        self.word_tokens
            .get(&word)
            .copied()
            .ok_or_else(|| Error::Dataset(format!("unrecognized word: {word}")))
    }

    /// One-hot vector `[1, num_classes]` for a single file.
    pub fn call(&self, audio_file_path: impl AsRef<Path>) -> Result<Tensor> {
        let idx = self.index_of(audio_file_path)?;
        let idx = Tensor::new(&[idx], &self.device)?;
        Ok(one_hot(idx, self.num_classes, 1f32, 0f32)?)
    }

    /// Batched lookup.
    ///
    /// Returns `[B, num_classes]` one-hot vectors when `one_hot` is set,
    /// otherwise the raw class indexes as an f32 tensor `[B]`.
    pub fn batch_call<P: AsRef<Path>>(&self, audio_file_list: &[P], one_hot_out: bool) -> Result<Tensor> {
        let idxs = audio_file_list
            .iter()
            .map(|p| self.index_of(p))
            .collect::<Result<Vec<u32>>>()?;
        let idxs = Tensor::new(idxs.as_slice(), &self.device)?;
        if one_hot_out {
            Ok(one_hot(idxs, self.num_classes, 1f32, 0f32)?)
        } else {
            Ok(idxs.to_dtype(DType::F32)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> ClassConditionalLoader {
        let words = ["boven", "goed", "hoe"].map(String::from).to_vec();
        ClassConditionalLoader::from_words(words, &Device::Cpu).unwrap()
    }

    #[test]
    fn single_lookup_is_one_hot() {
        let out = loader().call("audio/goed3_noise1.wav").unwrap();
        assert_eq!(out.dims(), &[1, 3]);
        let v: Vec<Vec<f32>> = out.to_vec2().unwrap();
        assert_eq!(v, vec![vec![0.0, 1.0, 0.0]]);
    }

    #[test]
    fn batch_lookup() {
        let l = loader();
        let files = ["hoe.wav", "boven.wav"];
        let one_hot: Vec<Vec<f32>> = l.batch_call(&files, true).unwrap().to_vec2().unwrap();
        assert_eq!(one_hot, vec![vec![0.0, 0.0, 1.0], vec![1.0, 0.0, 0.0]]);
        let idx: Vec<f32> = l.batch_call(&files, false).unwrap().to_vec1().unwrap();
        assert_eq!(idx, vec![2.0, 0.0]);
    }

    #[test]
    fn unknown_word_is_an_error() {
        let err = loader().call("nee.wav").unwrap_err();
        assert!(err.to_string().contains("nee"));
        assert!(loader().batch_call(&["goed.wav", "nee.wav"], true).is_err());
    }

    #[test]
    fn reads_words_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, "boven,goed,hoe\n").unwrap();
        let l = ClassConditionalLoader::from_file(&path, &Device::Cpu).unwrap();
        assert_eq!(l.num_classes(), 3);
        assert_eq!(l.index_of("hoe.wav").unwrap(), 2);
    }

    #[test]
    fn words_file_tolerates_spaces_after_commas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, "boven, goed,\thoe \n").unwrap();
        let l = ClassConditionalLoader::from_file(&path, &Device::Cpu).unwrap();
        assert_eq!(l.index_of("goed").unwrap(), 1);
        assert_eq!(l.index_of("hoe.wav").unwrap(), 2);
    }
}
