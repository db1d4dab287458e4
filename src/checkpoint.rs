//! Training checkpoints.
//!
//! A checkpoint is one safetensors file holding the generator under
//! `model.` and, for conditional models, the encoder under `conditioner.`.
//! A file without either prefix is read as a bare generator, which is how
//! unconditional DiffWave weights are usually distributed.
//!
//! A small JSON sidecar (`<name>.json`) records where training stopped.

use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Result;
use crate::model::DiffWaveConditional;
use crate::model::state_dict::{self, StateDict};

const MODEL_PREFIX: &str = "model";
const CONDITIONER_PREFIX: &str = "conditioner";

/// Generator and optional encoder weights.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub model: StateDict,
    pub conditioner: Option<StateDict>,
}

impl Checkpoint {
    pub fn from_model(model: &DiffWaveConditional) -> Result<Self> {
        Ok(Self {
            model: model.generator_state_dict()?,
            conditioner: Some(model.encoder_state_dict()?),
        })
    }

    pub fn load(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let flat = state_dict::load_safetensors(path, device)?;
        let model = state_dict::strip_prefix(&flat, MODEL_PREFIX);
        let conditioner = state_dict::strip_prefix(&flat, CONDITIONER_PREFIX);

        let checkpoint = if model.is_empty() && conditioner.is_empty() {
            Self {
                model: flat,
                conditioner: None,
            }
        } else {
            Self {
                model,
                conditioner: (!conditioner.is_empty()).then_some(conditioner),
            }
        };
        info!(
            path = %path.display(),
            generator_tensors = checkpoint.model.len(),
            conditioner_tensors = checkpoint.conditioner.as_ref().map_or(0, |c| c.len()),
            "loaded checkpoint"
        );
        Ok(checkpoint)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let mut flat = state_dict::with_prefix(&self.model, MODEL_PREFIX);
        if let Some(conditioner) = &self.conditioner {
            flat.extend(state_dict::with_prefix(conditioner, CONDITIONER_PREFIX));
        }
        state_dict::save_safetensors(&flat, path)?;
        info!(path = %path.display(), "saved checkpoint");
        Ok(())
    }
}

/// Progress recorded next to a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub epoch: usize,
    pub step: usize,
    pub train_loss: f32,
    pub val_loss: Option<f32>,
}

impl TrainingState {
    /// `weights.safetensors` → `weights.json`.
    pub fn sidecar_path(checkpoint: &Path) -> PathBuf {
        checkpoint.with_extension("json")
    }

    pub fn save(&self, checkpoint: &Path) -> Result<()> {
        std::fs::write(
            Self::sidecar_path(checkpoint),
            serde_json::to_string_pretty(self)?,
        )?;
        Ok(())
    }

    pub fn load(checkpoint: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(Self::sidecar_path(checkpoint))?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use candle_core::{DType, Tensor};

    fn small_config() -> ModelConfig {
        let mut cfg = ModelConfig::default();
        cfg.decoder.residual_layers = 2;
        cfg.decoder.residual_channels = 4;
        cfg.decoder.audio_len = 128;
        cfg
    }

    #[test]
    fn round_trip_with_conditioner() {
        let dev = Device::Cpu;
        let model = DiffWaveConditional::new(&small_config(), &dev).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt/epoch-1.safetensors");

        Checkpoint::from_model(&model).unwrap().save(&path).unwrap();
        let loaded = Checkpoint::load(&path, &dev).unwrap();
        assert_eq!(loaded.model.len(), model.generator_state_dict().unwrap().len());
        assert_eq!(
            loaded.conditioner.unwrap().len(),
            model.encoder_state_dict().unwrap().len()
        );
    }

    #[test]
    fn unprefixed_file_is_a_generator() {
        let dev = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diffwave.safetensors");
        let mut bare = StateDict::new();
        bare.insert(
            "input_projection.weight".into(),
            Tensor::zeros((4, 1, 1), DType::F32, &dev).unwrap(),
        );
        state_dict::save_safetensors(&bare, &path).unwrap();

        let loaded = Checkpoint::load(&path, &dev).unwrap();
        assert!(loaded.model.contains_key("input_projection.weight"));
        assert!(loaded.conditioner.is_none());
    }

    #[test]
    fn sidecar_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.safetensors");
        let state = TrainingState {
            epoch: 3,
            step: 120,
            train_loss: 0.25,
            val_loss: Some(0.5),
        };
        state.save(&path).unwrap();
        assert!(dir.path().join("last.json").exists());
        assert_eq!(TrainingState::load(&path).unwrap(), state);
    }
}
