//! DiffWave diffusion schedules and reverse-process samplers.
//!
//! - [`NoiseSchedule`] — training betas and the forward process `q(x_t | x_0)`
//! - [`ddpm`] — ancestral sampling over a beta schedule
//! - [`fast`] — DiffWave fast sampling over a short inference schedule
//!
//! ## Forward process
//!
//! ```text
//! ᾱ_t = Π_{s ≤ t} (1 - β_s)
//! x_t = sqrt(ᾱ_t) * x_0 + sqrt(1 - ᾱ_t) * ε
//! ```
//!
//! The model predicts `ε`. Noise comes from a seeded [`ChaCha8Rng`] so that
//! generation is reproducible on every device.

pub mod ddpm;
pub mod fast;

use std::f32::consts::TAU;

use candle_core::{Device, Shape, Tensor};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::config::DiffusionConfig;
use crate::{Error, Result};

pub use ddpm::DdpmScheduler;
pub use fast::FastScheduler;

/// Common interface for the reverse-process samplers.
pub trait Scheduler {
    /// Diffusion step fed to the model at each iteration, in sampling order.
    fn timesteps(&self) -> &[f32];

    /// Starting sample `x_T ~ N(0, I)`.
    fn initial_sample(&mut self, shape: &Shape, device: &Device) -> Result<Tensor>;

    /// Perform one reverse step.
    ///
    /// - `model_output`: predicted noise
    /// - `sample`: current noisy audio
    /// - `step_index`: position in [`timesteps`](Self::timesteps)
    fn step(&mut self, model_output: &Tensor, sample: &Tensor, step_index: usize)
    -> Result<Tensor>;
}

/// Betas with their cumulative products.
#[derive(Debug, Clone)]
pub struct NoiseSchedule {
    betas: Vec<f64>,
    alphas: Vec<f64>,
    alpha_cumprod: Vec<f64>,
}

impl NoiseSchedule {
    pub fn new(betas: Vec<f64>) -> Result<Self> {
        if betas.is_empty() {
            return Err(Error::Config("noise schedule is empty".into()));
        }
        if let Some(b) = betas.iter().find(|b| !(**b > 0.0 && **b < 1.0)) {
            return Err(Error::Config(format!("beta {b} outside (0, 1)")));
        }
        let alphas: Vec<f64> = betas.iter().map(|b| 1.0 - b).collect();
        let alpha_cumprod = alphas
            .iter()
            .scan(1.0, |acc, a| {
                *acc *= a;
                Some(*acc)
            })
            .collect();
        Ok(Self {
            betas,
            alphas,
            alpha_cumprod,
        })
    }

    /// The schedule the model is trained on.
    pub fn training(cfg: &DiffusionConfig) -> Result<Self> {
        Self::new(cfg.noise_schedule())
    }

    /// The short schedule used for fast sampling.
    pub fn inference(cfg: &DiffusionConfig) -> Result<Self> {
        Self::new(cfg.inference_noise_schedule.clone())
    }

    pub fn len(&self) -> usize {
        self.betas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.betas.is_empty()
    }

    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    pub fn alphas(&self) -> &[f64] {
        &self.alphas
    }

    pub fn alpha_cumprod(&self) -> &[f64] {
        &self.alpha_cumprod
    }

    /// Noise `x_0` to step `t[b]` for every batch element `b`.
    pub fn q_sample(&self, x0: &Tensor, t: &[usize], noise: &Tensor) -> Result<Tensor> {
        let b = x0.dim(0)?;
        if t.len() != b {
            return Err(Error::Config(format!(
                "{} diffusion steps for a batch of {b}",
                t.len()
            )));
        }
        if let Some(&step) = t.iter().find(|&&s| s >= self.len()) {
            return Err(Error::Config(format!(
                "diffusion step {step} out of range for {} steps",
                self.len()
            )));
        }

        let mut dims = vec![1; x0.rank()];
        dims[0] = b;
        let coef = |f: &dyn Fn(f64) -> f64| -> Result<Tensor> {
            let v: Vec<f32> = t.iter().map(|&s| f(self.alpha_cumprod[s]) as f32).collect();
            Ok(Tensor::from_vec(v, dims.as_slice(), x0.device())?.to_dtype(x0.dtype())?)
        };
        let signal = coef(&|ab| ab.sqrt())?;
        let noise_scale = coef(&|ab| (1.0 - ab).sqrt())?;
        Ok((x0.broadcast_mul(&signal)? + noise.broadcast_mul(&noise_scale)?)?)
    }
}

/// Standard normal samples drawn with Box-Muller from `rng`.
pub fn gaussian_noise(
    rng: &mut ChaCha8Rng,
    shape: impl Into<Shape>,
    device: &Device,
) -> Result<Tensor> {
    let shape = shape.into();
    let n = shape.elem_count();
    let mut data = Vec::with_capacity(n + 1);
    while data.len() < n {
        // 1 - U keeps the radius finite
        let u1 = 1.0 - rng.random::<f32>();
        let u2 = rng.random::<f32>();
        let r = (-2.0 * u1.ln()).sqrt();
        data.push(r * (TAU * u2).cos());
        data.push(r * (TAU * u2).sin());
    }
    data.truncate(n);
    Ok(Tensor::from_vec(data, shape, device)?)
}
