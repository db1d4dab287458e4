//! Conditional wrapper: an encoder feeding DiffWave.
//!
//! The encoder and the generator keep their parameters in separate
//! `VarMap`s, so each half can be saved, loaded and frozen on its own.
//!
//! Typical training sequence:
//!
//! 1. Pretrain DiffWave unconditionally, or class-conditionally together
//!    with a [`ClassEncoder`](super::encoder::ClassEncoder).
//! 2. Build a wrapper with a brain encoder and call
//!    [`load_pretrained_generator`](DiffWaveConditional::load_pretrained_generator).
//! 3. Fine-tune with the generator frozen, optionally unfreezing later.

use candle_core::{DType, Device, ModuleT, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use tracing::{info, instrument};

use super::diffwave::DiffWave;
use super::encoder::ConditionEncoder;
use super::encoder::brain_class::{BRAIN_CLASSIFIER, CLASS_CONDITIONER};
use super::state_dict::{self, StateDict, check_missing_only};
use crate::checkpoint::Checkpoint;
use crate::config::ModelConfig;
use crate::{Error, Result};

/// Conditional speech generator.
pub struct DiffWaveConditional {
    encoder: ConditionEncoder,
    speech_generator: DiffWave,
    encoder_vars: VarMap,
    generator_vars: VarMap,
    generator_frozen: bool,
    config: ModelConfig,
    device: Device,
}

impl DiffWaveConditional {
    /// Build a freshly initialised model.
    pub fn new(config: &ModelConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let encoder_vars = VarMap::new();
        let generator_vars = VarMap::new();
        let encoder = ConditionEncoder::new(
            &config.encoder,
            VarBuilder::from_varmap(&encoder_vars, DType::F32, device),
        )?;
        let speech_generator = DiffWave::new(
            &config.decoder,
            config.diffusion.num_steps,
            VarBuilder::from_varmap(&generator_vars, DType::F32, device),
        )?;

        info!(
            encoder_params = param_count(&encoder_vars),
            generator_params = param_count(&generator_vars),
            "built conditional DiffWave"
        );

        Ok(Self {
            encoder,
            speech_generator,
            encoder_vars,
            generator_vars,
            generator_frozen: false,
            config: config.clone(),
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn encoder(&self) -> &ConditionEncoder {
        &self.encoder
    }

    pub fn generator(&self) -> &DiffWave {
        &self.speech_generator
    }

    /// Conditioning input → `[B, 1, c_out]`.
    pub fn encode(&self, conditional_input: &Tensor, train: bool) -> Result<Tensor> {
        Ok(self.encoder.forward_t(conditional_input, train)?)
    }

    /// Predict the noise in `x` at `diffusion_step`, conditioned on the
    /// encoded `conditional_input`.
    pub fn forward_t(
        &self,
        x: &Tensor,
        diffusion_step: &Tensor,
        conditional_input: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let conditioner = self.encode(conditional_input, train)?;
        Ok(self
            .speech_generator
            .forward(x, diffusion_step, Some(&conditioner))?)
    }

    pub fn forward(
        &self,
        x: &Tensor,
        diffusion_step: &Tensor,
        conditional_input: &Tensor,
    ) -> Result<Tensor> {
        self.forward_t(x, diffusion_step, conditional_input, false)
    }

    // -----------------------------------------------------------------------
    // State dicts
    // -----------------------------------------------------------------------

    pub fn encoder_state_dict(&self) -> Result<StateDict> {
        state_dict::state_dict(&self.encoder_vars)
    }

    pub fn generator_state_dict(&self) -> Result<StateDict> {
        state_dict::state_dict(&self.generator_vars)
    }

    /// Load the generator, and the encoder when given.
    pub fn load_state_dict(
        &self,
        generator_state_dict: &StateDict,
        encoder_state_dict: Option<&StateDict>,
        strict: bool,
    ) -> Result<()> {
        state_dict::load_state_dict(&self.generator_vars, generator_state_dict, strict)?;
        if let Some(encoder_state_dict) = encoder_state_dict {
            state_dict::load_state_dict(&self.encoder_vars, encoder_state_dict, strict)?;
        }
        Ok(())
    }

    /// Load generator weights from a pretrained unconditional model.
    ///
    /// Such a model never has the `local_conditioner` projections, so those
    /// may be missing; anything else missing or unexpected is an error.
    pub fn load_pretrained_generator_weights(&self, generator_state_dict: &StateDict) -> Result<()> {
        let keys = state_dict::load_state_dict(&self.generator_vars, generator_state_dict, false)?;
        check_missing_only(&keys, "local_conditioner")
    }

    /// Load a pretraining checkpoint.
    ///
    /// The generator loads as in
    /// [`load_pretrained_generator_weights`](Self::load_pretrained_generator_weights).
    /// With a brain+class encoder, the checkpoint's conditioner also loads
    /// into the class-conditioner half, since it was trained together with
    /// the generator; only `brain_classifier` keys may then be missing.
    #[instrument(skip_all)]
    pub fn load_pretrained_generator(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.load_pretrained_generator_weights(&checkpoint.model)?;

        if let ConditionEncoder::BrainClass(_) = self.encoder {
            let conditioner = checkpoint.conditioner.as_ref().ok_or_else(|| {
                Error::WeightLoad(
                    "brain+class encoder needs a checkpoint with a conditioner".into(),
                )
            })?;
            let conditioner = root_under_class_conditioner(conditioner);
            let keys = state_dict::load_state_dict(&self.encoder_vars, &conditioner, false)?;
            check_missing_only(&keys, BRAIN_CLASSIFIER)?;
            info!("loaded pretrained class conditioner");
        }
        info!("loaded pretrained generator");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Freezing
    // -----------------------------------------------------------------------

    /// Exclude the generator from [`trainable_vars`](Self::trainable_vars).
    ///
    /// With a brain+class encoder the class-conditioner half is frozen too,
    /// as it was trained together with the generator.
    pub fn freeze_generator(&mut self, freeze: bool) {
        self.generator_frozen = freeze;
        info!(frozen = freeze, "generator freeze changed");
    }

    pub fn unfreeze_generator(&mut self) {
        self.freeze_generator(false);
    }

    pub fn is_generator_frozen(&self) -> bool {
        self.generator_frozen
    }

    /// Variables an optimizer should update.
    pub fn trainable_vars(&self) -> Vec<Var> {
        let frozen_prefix = if self.generator_frozen {
            self.encoder
                .generator_coupled_prefix()
                .map(|p| format!("{p}."))
        } else {
            None
        };

        let mut vars: Vec<Var> = {
            let data = self
                .encoder_vars
                .data()
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            data.iter()
                .filter(|(name, _)| {
                    frozen_prefix
                        .as_deref()
                        .is_none_or(|p| !name.starts_with(p))
                })
                .map(|(_, var)| var.clone())
                .collect()
        };
        if !self.generator_frozen {
            vars.extend(self.generator_vars.all_vars());
        }
        vars
    }
}

fn param_count(vars: &VarMap) -> usize {
    vars.all_vars().iter().map(|v| v.elem_count()).sum()
}

/// Class-conditional pretraining saves a bare class encoder; re-root its
/// keys under the class-conditioner half of a brain+class encoder.
fn root_under_class_conditioner(conditioner: &StateDict) -> StateDict {
    let prefix = format!("{CLASS_CONDITIONER}.");
    if conditioner
        .keys()
        .any(|k| k.starts_with(&prefix) || k.starts_with(BRAIN_CLASSIFIER))
    {
        conditioner.clone()
    } else {
        state_dict::with_prefix(conditioner, CLASS_CONDITIONER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BrainClassEncoderConfig, BrainEncoderConfig, ClassEncoderConfig, DiffWaveConfig,
        DiffusionConfig, EncoderConfig,
    };

    fn decoder(conditional: bool) -> DiffWaveConfig {
        DiffWaveConfig {
            residual_layers: 2,
            residual_channels: 4,
            dilation_cycle_length: 2,
            conditional,
            audio_len: 16,
            sample_rate: 16000,
        }
    }

    fn class_cfg() -> ModelConfig {
        ModelConfig {
            encoder: EncoderConfig::Class(ClassEncoderConfig {
                n_classes: 3,
                c_mid: 8,
                c_out: 16,
            }),
            decoder: decoder(true),
            diffusion: DiffusionConfig {
                num_steps: 10,
                ..Default::default()
            },
        }
    }

    fn brain_class_cfg() -> ModelConfig {
        ModelConfig {
            encoder: EncoderConfig::BrainClass(BrainClassEncoderConfig {
                n_classes: 3,
                c_brain_in: 8,
                c_mid: 8,
                c_out: 16,
                ..Default::default()
            }),
            ..class_cfg()
        }
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar()
            .unwrap()
    }

    #[test]
    fn forward_shape() {
        let dev = Device::Cpu;
        let model = DiffWaveConditional::new(&class_cfg(), &dev).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 1, 16), &dev).unwrap();
        let t = Tensor::new(&[1f32, 4.0], &dev).unwrap();
        let cond = Tensor::eye(3, DType::F32, &dev).unwrap().narrow(0, 0, 2).unwrap();
        let out = model.forward(&x, &t, &cond).unwrap();
        assert_eq!(out.dims(), &[2, 1, 16]);
    }

    #[test]
    fn brain_encoder_forward_shape() {
        let dev = Device::Cpu;
        let cfg = ModelConfig {
            encoder: EncoderConfig::Brain(BrainEncoderConfig {
                c_brain_in: 2 * 2 * 3,
                c_mid: 8,
                c_out: 1,
            }),
            ..class_cfg()
        };
        let model = DiffWaveConditional::new(&cfg, &dev).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 1, 16), &dev).unwrap();
        let t = Tensor::new(&[0f32, 9.0], &dev).unwrap();
        let ecog = Tensor::randn(0f32, 1.0, (2, 2, 2, 3), &dev).unwrap();
        assert_eq!(model.forward(&x, &t, &ecog).unwrap().dims(), &[2, 1, 16]);
    }

    #[test]
    fn pretrained_unconditional_generator_loads() {
        let dev = Device::Cpu;
        let uncond_vars = VarMap::new();
        DiffWave::new(
            &decoder(false),
            10,
            VarBuilder::from_varmap(&uncond_vars, DType::F32, &dev),
        )
        .unwrap();
        let pretrained = state_dict::state_dict(&uncond_vars).unwrap();

        let model = DiffWaveConditional::new(&class_cfg(), &dev).unwrap();
        model.load_pretrained_generator_weights(&pretrained).unwrap();
        let loaded = model.generator_state_dict().unwrap();
        assert_eq!(
            max_abs_diff(&loaded["skip_projection.weight"], &pretrained["skip_projection.weight"]),
            0.0
        );

        // The same weights with a key dropped are rejected.
        let mut partial = pretrained.clone();
        partial.remove("skip_projection.weight");
        assert!(matches!(
            model.load_pretrained_generator_weights(&partial),
            Err(Error::IncompatibleKeys(_))
        ));

        // So is an extra key.
        let mut extra = pretrained;
        extra.insert(
            "spectrogram_upsampler.weight".into(),
            Tensor::zeros(1, DType::F32, &dev).unwrap(),
        );
        assert!(model.load_pretrained_generator_weights(&extra).is_err());
    }

    #[test]
    fn class_conditional_checkpoint_feeds_brain_class_encoder() {
        let dev = Device::Cpu;
        let pretrain = DiffWaveConditional::new(&class_cfg(), &dev).unwrap();
        let checkpoint = Checkpoint::from_model(&pretrain).unwrap();

        let finetune = DiffWaveConditional::new(&brain_class_cfg(), &dev).unwrap();
        finetune.load_pretrained_generator(&checkpoint).unwrap();

        let enc = finetune.encoder_state_dict().unwrap();
        assert_eq!(
            max_abs_diff(
                &enc["class_conditioner.projection.weight"],
                &pretrain.encoder_state_dict().unwrap()["projection.weight"]
            ),
            0.0
        );
    }

    #[test]
    fn brain_class_encoder_requires_conditioner() {
        let dev = Device::Cpu;
        let pretrain = DiffWaveConditional::new(&class_cfg(), &dev).unwrap();
        let checkpoint = Checkpoint {
            model: pretrain.generator_state_dict().unwrap(),
            conditioner: None,
        };
        let finetune = DiffWaveConditional::new(&brain_class_cfg(), &dev).unwrap();
        assert!(finetune.load_pretrained_generator(&checkpoint).is_err());
    }

    fn class_checkpoint_with_conditioner(
        edit: impl FnOnce(&mut StateDict),
    ) -> (DiffWaveConditional, Checkpoint) {
        let dev = Device::Cpu;
        let pretrain = DiffWaveConditional::new(&class_cfg(), &dev).unwrap();
        let mut checkpoint = Checkpoint::from_model(&pretrain).unwrap();
        edit(checkpoint.conditioner.as_mut().unwrap());
        let finetune = DiffWaveConditional::new(&brain_class_cfg(), &dev).unwrap();
        (finetune, checkpoint)
    }

    #[test]
    fn class_conditioner_missing_key_is_rejected() {
        let (finetune, checkpoint) = class_checkpoint_with_conditioner(|c| {
            c.remove("projection.bias");
        });
        match finetune.load_pretrained_generator(&checkpoint) {
            Err(Error::IncompatibleKeys(keys)) => {
                assert_eq!(keys.missing_keys, vec!["class_conditioner.projection.bias"]);
                assert!(keys.unexpected_keys.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn class_conditioner_unexpected_key_is_rejected() {
        let (finetune, checkpoint) = class_checkpoint_with_conditioner(|c| {
            c.insert(
                "extra".into(),
                Tensor::zeros(1, DType::F32, &Device::Cpu).unwrap(),
            );
        });
        match finetune.load_pretrained_generator(&checkpoint) {
            Err(Error::IncompatibleKeys(keys)) => {
                assert!(keys.missing_keys.is_empty());
                assert_eq!(keys.unexpected_keys, vec!["class_conditioner.extra"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn strict_round_trip() {
        let dev = Device::Cpu;
        let a = DiffWaveConditional::new(&brain_class_cfg(), &dev).unwrap();
        let b = DiffWaveConditional::new(&brain_class_cfg(), &dev).unwrap();
        b.load_state_dict(
            &a.generator_state_dict().unwrap(),
            Some(&a.encoder_state_dict().unwrap()),
            true,
        )
        .unwrap();
        let (ga, gb) = (a.generator_state_dict().unwrap(), b.generator_state_dict().unwrap());
        assert_eq!(
            max_abs_diff(
                &ga["residual_layers.1.dilated_conv.weight"],
                &gb["residual_layers.1.dilated_conv.weight"]
            ),
            0.0
        );

        // A class encoder's weights do not fit a brain+class encoder strictly.
        let c = DiffWaveConditional::new(&class_cfg(), &dev).unwrap();
        assert!(
            b.load_state_dict(&a.generator_state_dict().unwrap(), Some(&c.encoder_state_dict().unwrap()), true)
                .is_err()
        );
    }

    #[test]
    fn freezing_selects_trainable_vars() {
        let dev = Device::Cpu;
        let mut model = DiffWaveConditional::new(&brain_class_cfg(), &dev).unwrap();
        let all = model.trainable_vars().len();
        let generator = model.generator_vars.all_vars().len();
        let conditioner = model
            .encoder_state_dict().unwrap()
            .keys()
            .filter(|k| k.starts_with("class_conditioner."))
            .count();
        assert_eq!(conditioner, 4);

        model.freeze_generator(true);
        assert!(model.is_generator_frozen());
        assert_eq!(model.trainable_vars().len(), all - generator - conditioner);

        model.unfreeze_generator();
        assert_eq!(model.trainable_vars().len(), all);
    }

    #[test]
    fn freezing_class_encoder_keeps_encoder_trainable() {
        let dev = Device::Cpu;
        let mut model = DiffWaveConditional::new(&class_cfg(), &dev).unwrap();
        model.freeze_generator(true);
        assert_eq!(model.trainable_vars().len(), 4);
    }
}
