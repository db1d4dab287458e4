//! DDPM ancestral sampler.
//!
//! Update rule at reverse step `n`:
//! ```text
//! x = (x - β_n / sqrt(1 - ᾱ_n) * ε̂) / sqrt(α_n)
//! x += σ_n * z,   σ_n² = (1 - ᾱ_{n-1}) / (1 - ᾱ_n) * β_n    (n > 0)
//! x = clamp(x, -1, 1)
//! ```

use candle_core::{Device, Shape, Tensor};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{NoiseSchedule, Scheduler, gaussian_noise};
use crate::{Error, Result};

/// Ancestral sampler over every step of a beta schedule.
pub struct DdpmScheduler {
    schedule: NoiseSchedule,
    /// Model step for each schedule index, ascending.
    steps: Vec<f32>,
    /// `steps` reversed, in sampling order.
    timesteps: Vec<f32>,
    rng: ChaCha8Rng,
}

impl DdpmScheduler {
    /// Sample over the training schedule itself.
    pub fn new(schedule: NoiseSchedule, seed: u64) -> Self {
        let steps = (0..schedule.len()).map(|t| t as f32).collect();
        Self::with_steps(schedule, steps, seed)
    }

    /// Sample over `schedule`, feeding the model `steps[n]` at index `n`.
    pub(crate) fn with_steps(schedule: NoiseSchedule, steps: Vec<f32>, seed: u64) -> Self {
        let timesteps = steps.iter().rev().copied().collect();
        Self {
            schedule,
            steps,
            timesteps,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn schedule(&self) -> &NoiseSchedule {
        &self.schedule
    }

    /// Standard deviation of the noise added at schedule index `n`.
    pub fn sigma(&self, n: usize) -> f64 {
        if n == 0 {
            return 0.0;
        }
        let ab = self.schedule.alpha_cumprod();
        ((1.0 - ab[n - 1]) / (1.0 - ab[n]) * self.schedule.betas()[n]).sqrt()
    }
}

impl Scheduler for DdpmScheduler {
    fn timesteps(&self) -> &[f32] {
        &self.timesteps
    }

    fn initial_sample(&mut self, shape: &Shape, device: &Device) -> Result<Tensor> {
        gaussian_noise(&mut self.rng, shape.clone(), device)
    }

    fn step(
        &mut self,
        model_output: &Tensor,
        sample: &Tensor,
        step_index: usize,
    ) -> Result<Tensor> {
        let len = self.steps.len();
        if step_index >= len {
            return Err(Error::Config(format!(
                "step index {step_index} out of range for {len} steps"
            )));
        }
        let n = len - 1 - step_index;
        let beta = self.schedule.betas()[n];
        let alpha = self.schedule.alphas()[n];
        let alpha_cum = self.schedule.alpha_cumprod()[n];

        let c1 = 1.0 / alpha.sqrt();
        let c2 = beta / (1.0 - alpha_cum).sqrt();
        let mut next = ((sample - (model_output * c2)?)? * c1)?;

        if n > 0 {
            let noise = gaussian_noise(&mut self.rng, sample.shape().clone(), sample.device())?
                .to_dtype(sample.dtype())?;
            next = (next + (noise * self.sigma(n))?)?;
        }
        Ok(next.clamp(-1f32, 1f32)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiffusionConfig;
    use candle_core::DType;

    fn scheduler(seed: u64) -> DdpmScheduler {
        let schedule = NoiseSchedule::training(&DiffusionConfig::default()).unwrap();
        DdpmScheduler::new(schedule, seed)
    }

    #[test]
    fn timesteps_descend() {
        let s = scheduler(0);
        assert_eq!(s.timesteps().len(), 50);
        assert_eq!(s.timesteps()[0], 49.0);
        assert_eq!(s.timesteps()[49], 0.0);
    }

    #[test]
    fn last_step_is_deterministic() {
        let dev = Device::Cpu;
        let mut s = scheduler(0);
        let x = Tensor::full(0.5f32, (1, 1, 8), &dev).unwrap();
        let eps = Tensor::zeros((1, 1, 8), DType::F32, &dev).unwrap();
        // n = 0: x / sqrt(1 - 1e-4), no added noise
        let out: Vec<f32> = s.step(&eps, &x, 49).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let expected = 0.5 / (1.0f32 - 1e-4).sqrt();
        assert!(out.iter().all(|v| (v - expected).abs() < 1e-6));
    }

    #[test]
    fn output_is_clamped() {
        let dev = Device::Cpu;
        let mut s = scheduler(3);
        let x = Tensor::full(0.9f32, (2, 1, 64), &dev).unwrap();
        let eps = Tensor::full(-50f32, (2, 1, 64), &dev).unwrap();
        let out = s.step(&eps, &x, 0).unwrap();
        let max: f32 = out.abs().unwrap().max_all().unwrap().to_scalar().unwrap();
        assert!(max <= 1.0);
        assert!(s.step(&eps, &x, 50).is_err());
    }

    #[test]
    fn same_seed_same_trajectory() {
        let dev = Device::Cpu;
        let shape = Shape::from((1, 1, 16));
        let run = |seed| {
            let mut s = scheduler(seed);
            let x = s.initial_sample(&shape, &dev).unwrap();
            let eps = Tensor::zeros(&shape, DType::F32, &dev).unwrap();
            s.step(&eps, &x, 0)
                .unwrap()
                .flatten_all()
                .unwrap()
                .to_vec1::<f32>()
                .unwrap()
        };
        assert_eq!(run(11), run(11));
        assert_ne!(run(11), run(12));
    }
}
