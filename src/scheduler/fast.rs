//! DiffWave fast sampling.
//!
//! Runs the ancestral update over a short inference schedule. Each inference
//! step is aligned to a fractional training step whose `sqrt(ᾱ)` matches, and
//! the diffusion embedding interpolates between the neighbouring rows:
//!
//! ```text
//! ᾱ_train[t+1] ≤ ᾱ_inf[s] ≤ ᾱ_train[t]
//! step[s] = t + (sqrt(ᾱ_train[t]) - sqrt(ᾱ_inf[s])) / (sqrt(ᾱ_train[t]) - sqrt(ᾱ_train[t+1]))
//! ```

use candle_core::{Device, Shape, Tensor};

use super::{DdpmScheduler, NoiseSchedule, Scheduler};
use crate::{Error, Result};

/// Fractional training step for every inference step.
pub fn align_steps(training: &NoiseSchedule, inference: &NoiseSchedule) -> Result<Vec<f32>> {
    let train_cum = training.alpha_cumprod();
    inference
        .alpha_cumprod()
        .iter()
        .map(|&ab| {
            train_cum
                .windows(2)
                .position(|w| w[1] <= ab && ab <= w[0])
                .map(|t| {
                    let (hi, lo) = (train_cum[t].sqrt(), train_cum[t + 1].sqrt());
                    (t as f64 + (hi - ab.sqrt()) / (hi - lo)) as f32
                })
                .ok_or_else(|| {
                    Error::Config(format!(
                        "inference ᾱ {ab} is outside the training schedule's range"
                    ))
                })
        })
        .collect()
}

/// Ancestral sampler over an inference schedule.
pub struct FastScheduler {
    inner: DdpmScheduler,
}

impl FastScheduler {
    pub fn new(training: &NoiseSchedule, inference: NoiseSchedule, seed: u64) -> Result<Self> {
        let steps = align_steps(training, &inference)?;
        tracing::debug!(?steps, "aligned fast sampling steps");
        Ok(Self {
            inner: DdpmScheduler::with_steps(inference, steps, seed),
        })
    }
}

impl Scheduler for FastScheduler {
    fn timesteps(&self) -> &[f32] {
        self.inner.timesteps()
    }

    fn initial_sample(&mut self, shape: &Shape, device: &Device) -> Result<Tensor> {
        self.inner.initial_sample(shape, device)
    }

    fn step(
        &mut self,
        model_output: &Tensor,
        sample: &Tensor,
        step_index: usize,
    ) -> Result<Tensor> {
        self.inner.step(model_output, sample, step_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiffusionConfig;

    #[test]
    fn default_schedule_aligns() {
        let cfg = DiffusionConfig::default();
        let training = NoiseSchedule::training(&cfg).unwrap();
        let inference = NoiseSchedule::inference(&cfg).unwrap();
        let steps = align_steps(&training, &inference).unwrap();

        assert_eq!(steps.len(), 6);
        // β = 1e-4 coincides with the first training step
        assert!(steps[0].abs() < 1e-4, "first step {}", steps[0]);
        assert!(steps.windows(2).all(|w| w[0] < w[1]));
        assert!(*steps.last().unwrap() < 49.0);
    }

    #[test]
    fn identical_schedules_align_to_integers() {
        let training = NoiseSchedule::new(vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        let steps = align_steps(&training, &training.clone()).unwrap();
        for (i, s) in steps.iter().enumerate() {
            assert!((s - i as f32).abs() < 1e-5, "step {i} → {s}");
        }
    }

    #[test]
    fn out_of_range_schedule_is_an_error() {
        let training = NoiseSchedule::new(vec![1e-4, 1e-3]).unwrap();
        let inference = NoiseSchedule::new(vec![0.5]).unwrap();
        assert!(align_steps(&training, &inference).is_err());
    }

    #[test]
    fn timesteps_in_sampling_order() {
        let cfg = DiffusionConfig::default();
        let training = NoiseSchedule::training(&cfg).unwrap();
        let inference = NoiseSchedule::inference(&cfg).unwrap();
        let s = FastScheduler::new(&training, inference, 0).unwrap();
        let t = s.timesteps();
        assert_eq!(t.len(), 6);
        assert!(t[0] > t[5]);
    }
}
