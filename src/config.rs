//! Model, data and training configuration.
//!
//! Every struct deserializes from JSON with per-field defaults, so config
//! files only need to name what differs from the defaults below.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// DiffWave generator hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffWaveConfig {
    pub residual_layers: usize,
    pub residual_channels: usize,
    pub dilation_cycle_length: usize,
    /// Adds the per-layer `local_conditioner` projections.
    pub conditional: bool,
    /// Number of samples per generated clip.
    pub audio_len: usize,
    pub sample_rate: u32,
}

impl Default for DiffWaveConfig {
    fn default() -> Self {
        Self {
            residual_layers: 30,
            residual_channels: 64,
            dilation_cycle_length: 10,
            conditional: true,
            audio_len: 16000,
            sample_rate: 16000,
        }
    }
}

impl DiffWaveConfig {
    /// Dilation of residual layer `i`.
    pub fn dilation(&self, i: usize) -> usize {
        1 << (i % self.dilation_cycle_length.max(1))
    }
}

/// Diffusion noise schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffusionConfig {
    pub beta_start: f64,
    pub beta_end: f64,
    pub num_steps: usize,
    /// Short schedule used for fast sampling.
    pub inference_noise_schedule: Vec<f64>,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            beta_start: 1e-4,
            beta_end: 0.05,
            num_steps: 50,
            inference_noise_schedule: vec![0.0001, 0.001, 0.01, 0.05, 0.2, 0.5],
        }
    }
}

impl DiffusionConfig {
    /// Training betas, `linspace(beta_start, beta_end, num_steps)`.
    pub fn noise_schedule(&self) -> Vec<f64> {
        let n = self.num_steps;
        (0..n)
            .map(|i| {
                self.beta_start
                    + (self.beta_end - self.beta_start) * i as f64 / (n - 1).max(1) as f64
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Encoders
// ---------------------------------------------------------------------------

/// Class label → conditioning sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassEncoderConfig {
    pub n_classes: usize,
    pub c_mid: usize,
    pub c_out: usize,
}

impl Default for ClassEncoderConfig {
    fn default() -> Self {
        Self {
            n_classes: 10,
            c_mid: 64,
            c_out: 128,
        }
    }
}

/// ECoG recording → conditioning sequence, no class bottleneck.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainEncoderConfig {
    /// Flattened size of one recording (bands × electrodes × timesteps).
    pub c_brain_in: usize,
    pub c_mid: usize,
    pub c_out: usize,
}

impl Default for BrainEncoderConfig {
    fn default() -> Self {
        Self {
            c_brain_in: 32,
            c_mid: 64,
            c_out: 128,
        }
    }
}

/// Which brain classifier network sits in front of the class conditioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierVariant {
    /// Flatten + MLP.
    #[default]
    V1,
    /// Conv2d stack with batch norm.
    V2,
    /// Two Conv2d layers and a wide MLP.
    V3,
}

/// ECoG recording → class probabilities → conditioning sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainClassEncoderConfig {
    pub n_classes: usize,
    /// Input nodes for V1, input channels (frequency bands) for V2/V3.
    pub c_brain_in: usize,
    pub c_mid: usize,
    pub c_out: usize,
    pub classifier: ClassifierVariant,
    /// Features entering the first Linear of V2/V3 after flattening.
    pub flat_features: Option<usize>,
}

impl Default for BrainClassEncoderConfig {
    fn default() -> Self {
        Self {
            n_classes: 10,
            c_brain_in: 32,
            c_mid: 64,
            c_out: 128,
            classifier: ClassifierVariant::V1,
            flat_features: None,
        }
    }
}

impl BrainClassEncoderConfig {
    pub fn class_encoder(&self) -> ClassEncoderConfig {
        ClassEncoderConfig {
            n_classes: self.n_classes,
            c_mid: self.c_mid,
            c_out: self.c_out,
        }
    }
}

/// Encoder selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncoderConfig {
    Class(ClassEncoderConfig),
    Brain(BrainEncoderConfig),
    BrainClass(BrainClassEncoderConfig),
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig::Class(ClassEncoderConfig::default())
    }
}

impl EncoderConfig {
    /// Length of the conditioning sequence the encoder emits.
    pub fn c_out(&self) -> usize {
        match self {
            EncoderConfig::Class(c) => c.c_out,
            EncoderConfig::Brain(c) => c.c_out,
            EncoderConfig::BrainClass(c) => c.c_out,
        }
    }
}

/// Encoder + decoder + diffusion settings for one conditional model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub encoder: EncoderConfig,
    pub decoder: DiffWaveConfig,
    pub diffusion: DiffusionConfig,
}

impl ModelConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let cfg: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check that the encoder output can condition the decoder.
    pub fn validate(&self) -> Result<()> {
        let c_out = self.encoder.c_out();
        if self.decoder.conditional && c_out != 1 && c_out != self.decoder.audio_len {
            return Err(Error::Config(format!(
                "encoder c_out {c_out} must be 1 or match decoder audio_len {}",
                self.decoder.audio_len
            )));
        }
        if self.diffusion.num_steps == 0 {
            return Err(Error::Config("diffusion num_steps must be > 0".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

/// How conditioning input is produced for each audio file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoaderConfig {
    /// One-hot class vectors from a comma-separated word list.
    Class { words_file: PathBuf },
    /// A random ECoG recording of the same word from the split.
    EcogRandom {
        path: PathBuf,
        splits_path: PathBuf,
        #[serde(default)]
        seed: u64,
    },
    /// The ECoG recording with the same file stem.
    EcogExact { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub audio_dir: PathBuf,
    /// Directory with `train.csv` and `val.csv`.
    pub splits_path: PathBuf,
    pub loader: LoaderConfig,
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub model: ModelConfig,
    pub data: DataConfig,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    /// Pretrained generator checkpoint to start fine-tuning from.
    #[serde(default)]
    pub pretrained: Option<PathBuf>,
    #[serde(default)]
    pub freeze_generator: bool,
    /// Epochs after which a frozen generator is unfrozen.
    #[serde(default)]
    pub unfreeze_after: Option<usize>,
}

impl TrainConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let cfg: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        cfg.model.validate()?;
        if cfg.batch_size == 0 {
            return Err(Error::Config("batch_size must be > 0".into()));
        }
        Ok(cfg)
    }
}

fn default_learning_rate() -> f64 {
    2e-4
}

fn default_batch_size() -> usize {
    16
}

fn default_epochs() -> usize {
    100
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}
