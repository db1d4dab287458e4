//! Training loop for the conditional generator.
//!
//! Each step draws a diffusion step `t ~ U[0, T)` and noise `ε` per clip,
//! diffuses the clean audio to `x_t`, and regresses the model's noise
//! prediction onto `ε` with an L1 loss.
//!
//! Freezing works by choosing which variables the optimizer sees, so the
//! optimizer is rebuilt whenever the trainable set changes. Its moment
//! estimates start fresh at that point.

use std::path::PathBuf;

use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, instrument, warn};

use crate::Result;
use crate::checkpoint::{Checkpoint, TrainingState};
use crate::config::TrainConfig;
use crate::data::{Batch, SpeechDataset, Split};
use crate::model::DiffWaveConditional;
use crate::scheduler::{NoiseSchedule, gaussian_noise};

/// Optimizer state plus the model it updates.
pub struct Trainer {
    model: DiffWaveConditional,
    optimizer: AdamW,
    learning_rate: f64,
    schedule: NoiseSchedule,
    rng: ChaCha8Rng,
    step: usize,
}

impl Trainer {
    pub fn new(model: DiffWaveConditional, learning_rate: f64, seed: u64) -> Result<Self> {
        let schedule = NoiseSchedule::training(&model.config().diffusion)?;
        let optimizer = build_optimizer(&model, learning_rate)?;
        Ok(Self {
            model,
            optimizer,
            learning_rate,
            schedule,
            rng: ChaCha8Rng::seed_from_u64(seed),
            step: 0,
        })
    }

    pub fn model(&self) -> &DiffWaveConditional {
        &self.model
    }

    pub fn into_model(self) -> DiffWaveConditional {
        self.model
    }

    /// Optimizer steps taken so far.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Freeze or unfreeze the generator and rebuild the optimizer.
    pub fn set_generator_frozen(&mut self, frozen: bool) -> Result<()> {
        if self.model.is_generator_frozen() == frozen {
            return Ok(());
        }
        self.model.freeze_generator(frozen);
        self.optimizer = build_optimizer(&self.model, self.learning_rate)?;
        Ok(())
    }

    /// L1 noise-prediction loss on one batch.
    pub fn loss(&mut self, batch: &Batch, train: bool) -> Result<Tensor> {
        let audio = &batch.audio;
        let b = audio.dim(0)?;
        let t: Vec<usize> = (0..b)
            .map(|_| self.rng.random_range(0..self.schedule.len()))
            .collect();
        let noise = gaussian_noise(&mut self.rng, audio.shape().clone(), audio.device())?;
        let noisy = self.schedule.q_sample(audio, &t, &noise)?;

        let steps: Vec<f32> = t.iter().map(|&s| s as f32).collect();
        let steps = Tensor::from_vec(steps, b, audio.device())?;
        let predicted = self
            .model
            .forward_t(&noisy, &steps, &batch.conditioning, train)?;
        Ok((predicted - noise)?.abs()?.mean_all()?)
    }

    pub fn train_step(&mut self, batch: &Batch) -> Result<f32> {
        let loss = self.loss(batch, true)?;
        self.optimizer.backward_step(&loss)?;
        self.step += 1;
        Ok(loss.to_scalar::<f32>()?)
    }

    /// Mean loss over a dataset, without updating weights.
    #[instrument(skip_all)]
    pub fn validate(&mut self, dataset: &mut SpeechDataset, batch_size: usize) -> Result<f32> {
        let mut total = 0.0f64;
        let mut count = 0usize;
        for indices in dataset.batch_indices(batch_size, None) {
            let batch = dataset.batch(&indices)?;
            let loss = self.loss(&batch, false)?.to_scalar::<f32>()?;
            total += loss as f64 * indices.len() as f64;
            count += indices.len();
        }
        Ok((total / count.max(1) as f64) as f32)
    }

    /// Run `options.epochs` epochs, validating and checkpointing after each.
    pub fn fit(
        &mut self,
        train: &mut SpeechDataset,
        mut val: Option<&mut SpeechDataset>,
        options: &FitOptions,
    ) -> Result<TrainingState> {
        let mut state = TrainingState::default();
        let mut shuffle = ChaCha8Rng::seed_from_u64(options.seed);

        for epoch in 1..=options.epochs {
            if options.unfreeze_after.is_some_and(|n| epoch > n)
                && self.model.is_generator_frozen()
            {
                info!(epoch, "unfreezing generator");
                self.set_generator_frozen(false)?;
            }

            let mut total = 0.0f64;
            let batches = train.batch_indices(options.batch_size, Some(&mut shuffle));
            let n_batches = batches.len();
            for indices in batches {
                let batch = train.batch(&indices)?;
                total += self.train_step(&batch)? as f64;
            }
            let train_loss = (total / n_batches.max(1) as f64) as f32;

            let val_loss = match val.as_deref_mut() {
                Some(val) => Some(self.validate(val, options.batch_size)?),
                None => None,
            };
            info!(
                epoch,
                step = self.step,
                train_loss,
                val_loss = val_loss.unwrap_or(f32::NAN),
                "epoch done"
            );

            state = TrainingState {
                epoch,
                step: self.step,
                train_loss,
                val_loss,
            };
            if !train_loss.is_finite() {
                warn!(epoch, "training loss is not finite");
            }
            let path = options.checkpoint_dir.join("last.safetensors");
            Checkpoint::from_model(&self.model)?.save(&path)?;
            state.save(&path)?;
        }
        Ok(state)
    }
}

fn build_optimizer(model: &DiffWaveConditional, learning_rate: f64) -> Result<AdamW> {
    let vars = model.trainable_vars();
    info!(
        tensors = vars.len(),
        params = vars.iter().map(|v| v.elem_count()).sum::<usize>(),
        generator_frozen = model.is_generator_frozen(),
        "optimizer trainable set"
    );
    let params = ParamsAdamW {
        lr: learning_rate,
        ..Default::default()
    };
    Ok(AdamW::new(vars, params)?)
}

/// Loop settings for [`Trainer::fit`].
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
    pub unfreeze_after: Option<usize>,
    pub checkpoint_dir: PathBuf,
}

impl From<&TrainConfig> for FitOptions {
    fn from(cfg: &TrainConfig) -> Self {
        Self {
            epochs: cfg.epochs,
            batch_size: cfg.batch_size,
            seed: cfg.seed,
            unfreeze_after: cfg.unfreeze_after,
            checkpoint_dir: cfg.checkpoint_dir.clone(),
        }
    }
}

/// Build datasets and model from `cfg` and train.
#[instrument(skip_all)]
pub fn train(cfg: &TrainConfig, device: &Device) -> Result<TrainingState> {
    let decoder = &cfg.model.decoder;
    let mut train_set = SpeechDataset::from_config(
        &cfg.data,
        Split::Train,
        decoder.audio_len,
        decoder.sample_rate,
        device,
    )?;
    let mut val_set = match SpeechDataset::from_config(
        &cfg.data,
        Split::Val,
        decoder.audio_len,
        decoder.sample_rate,
        device,
    ) {
        Ok(set) => Some(set),
        Err(e) => {
            warn!("no validation set: {e}");
            None
        }
    };

    let mut model = DiffWaveConditional::new(&cfg.model, device)?;
    if let Some(path) = &cfg.pretrained {
        model.load_pretrained_generator(&Checkpoint::load(path, device)?)?;
    }
    model.freeze_generator(cfg.freeze_generator);

    let mut trainer = Trainer::new(model, cfg.learning_rate, cfg.seed)?;
    trainer.fit(&mut train_set, val_set.as_mut(), &FitOptions::from(cfg))
}
