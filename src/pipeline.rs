//! End-to-end inference pipeline.
//!
//! 1. Load a trained wrapper (encoder + generator) from a checkpoint
//! 2. Encode the conditioning input once
//! 3. Start from seeded Gaussian noise
//! 4. Run the reverse diffusion loop (DDPM or fast schedule)
//! 5. Return clamped waveforms, one per conditioning input

use std::path::Path;

use candle_core::{Device, Shape, Tensor};
use tracing::{info, instrument};

use crate::checkpoint::Checkpoint;
use crate::config::ModelConfig;
use crate::model::DiffWaveConditional;
use crate::scheduler::{DdpmScheduler, FastScheduler, NoiseSchedule, Scheduler};
use crate::{Error, Result};

/// Sampling options.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Use the short inference schedule instead of every training step.
    pub fast: bool,
    pub seed: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            fast: true,
            seed: 0,
        }
    }
}

/// A trained conditional generator ready for sampling.
pub struct Pipeline {
    model: DiffWaveConditional,
    training: NoiseSchedule,
    inference: NoiseSchedule,
}

impl Pipeline {
    pub fn new(model: DiffWaveConditional) -> Result<Self> {
        let diffusion = &model.config().diffusion;
        Ok(Self {
            training: NoiseSchedule::training(diffusion)?,
            inference: NoiseSchedule::inference(diffusion)?,
            model,
        })
    }

    /// Build the model from `config` and load both halves strictly.
    pub fn load(config: &ModelConfig, checkpoint: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let checkpoint = Checkpoint::load(checkpoint, device)?;
        let conditioner = checkpoint.conditioner.as_ref().ok_or_else(|| {
            Error::WeightLoad("checkpoint has no conditioner weights".into())
        })?;
        let model = DiffWaveConditional::new(config, device)?;
        model.load_state_dict(&checkpoint.model, Some(conditioner), true)?;
        Self::new(model)
    }

    pub fn model(&self) -> &DiffWaveConditional {
        &self.model
    }

    pub fn sample_rate(&self) -> u32 {
        self.model.config().decoder.sample_rate
    }

    /// Synthesise one clip per row of `conditioning` (batch first).
    #[instrument(skip_all, fields(fast = params.fast, seed = params.seed))]
    pub fn generate(&self, conditioning: &Tensor, params: &GenerationParams) -> Result<Vec<Vec<f32>>> {
        let device = self.model.device();
        let b = conditioning.dim(0)?;
        let audio_len = self.model.config().decoder.audio_len;

        let mut scheduler: Box<dyn Scheduler> = if params.fast {
            Box::new(FastScheduler::new(
                &self.training,
                self.inference.clone(),
                params.seed,
            )?)
        } else {
            Box::new(DdpmScheduler::new(self.training.clone(), params.seed))
        };

        let conditioner = self.model.encode(conditioning, false)?;
        let mut audio = scheduler.initial_sample(&Shape::from((b, 1, audio_len)), device)?;
        let timesteps = scheduler.timesteps().to_vec();
        info!(clips = b, steps = timesteps.len(), "sampling");

        for (i, &t) in timesteps.iter().enumerate() {
            let steps = Tensor::full(t, b, device)?;
            let noise = self
                .model
                .generator()
                .forward(&audio, &steps, Some(&conditioner))?;
            audio = scheduler.step(&noise, &audio, i)?;
        }
        Ok(audio.squeeze(1)?.to_vec2::<f32>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassEncoderConfig, DiffWaveConfig, EncoderConfig};
    use candle_core::DType;

    fn config() -> ModelConfig {
        ModelConfig {
            encoder: EncoderConfig::Class(ClassEncoderConfig {
                n_classes: 3,
                c_mid: 4,
                c_out: 24,
            }),
            decoder: DiffWaveConfig {
                residual_layers: 2,
                residual_channels: 4,
                dilation_cycle_length: 2,
                conditional: true,
                audio_len: 24,
                sample_rate: 8000,
            },
            ..Default::default()
        }
    }

    #[test]
    fn generates_bounded_reproducible_audio() {
        let dev = Device::Cpu;
        let pipeline = Pipeline::new(DiffWaveConditional::new(&config(), &dev).unwrap()).unwrap();
        let cond = Tensor::eye(3, DType::F32, &dev).unwrap().narrow(0, 0, 2).unwrap();

        let params = GenerationParams { fast: true, seed: 4 };
        let a = pipeline.generate(&cond, &params).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].len(), 24);
        assert!(a.iter().flatten().all(|s| (-1.0..=1.0).contains(s)));
        assert_eq!(a, pipeline.generate(&cond, &params).unwrap());

        let full = GenerationParams { fast: false, seed: 4 };
        assert_eq!(pipeline.generate(&cond, &full).unwrap().len(), 2);
    }

    #[test]
    fn load_from_checkpoint() {
        let dev = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let trained = DiffWaveConditional::new(&config(), &dev).unwrap();
        Checkpoint::from_model(&trained).unwrap().save(&path).unwrap();

        let pipeline = Pipeline::load(&config(), &path, &dev).unwrap();
        assert_eq!(pipeline.sample_rate(), 8000);

        let bare = dir.path().join("bare.safetensors");
        Checkpoint {
            model: trained.generator_state_dict().unwrap(),
            conditioner: None,
        }
        .save(&bare)
        .unwrap();
        assert!(Pipeline::load(&config(), &bare, &dev).is_err());
    }
}
