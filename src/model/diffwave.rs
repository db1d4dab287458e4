//! DiffWave waveform generator.
//!
//! Predicts the noise in a diffused waveform given the diffusion step and an
//! optional conditioning sequence.
//!
//! ```text
//! audio [B, 1, L] ─→ Conv1d(1, C, 1) + ReLU
//!   ─→ N × ResidualBlock(dilation 2^(i mod cycle))  ← step embedding [B, 512]
//!                                                    ← conditioning [B, 1, L | 1]
//!   ─→ Σ skips / √N ─→ Conv1d(C, C, 1) + ReLU ─→ Conv1d(C, 1, 1)
//! ```
//!
//! Conditioning enters each block through a 1×1 `local_conditioner`
//! projection. An unconditional generator has no such projections, so its
//! weights load into a conditional one with only `local_conditioner` keys
//! missing.

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{self as nn, Conv1d, Conv1dConfig, VarBuilder};

use super::layers::conv1d_zeros;
use crate::config::DiffWaveConfig;

const STEP_EMBED_DIM: usize = 128;
const STEP_HIDDEN_DIM: usize = 512;

/// Sinusoidal diffusion-step embedding followed by a two-layer MLP.
///
/// Fractional steps interpolate linearly between neighbouring rows of the
/// table, which fast sampling relies on.
#[derive(Debug, Clone)]
pub struct DiffusionEmbedding {
    table: Tensor, // [max_steps, 128]
    projection1: nn::Linear,
    projection2: nn::Linear,
    max_steps: usize,
}

impl DiffusionEmbedding {
    pub fn new(max_steps: usize, vb: VarBuilder) -> Result<Self> {
        let table = Self::build_table(max_steps, vb.device())?;
        let projection1 = nn::linear(STEP_EMBED_DIM, STEP_HIDDEN_DIM, vb.pp("projection1"))?;
        let projection2 = nn::linear(STEP_HIDDEN_DIM, STEP_HIDDEN_DIM, vb.pp("projection2"))?;
        Ok(Self {
            table,
            projection1,
            projection2,
            max_steps,
        })
    }

    /// `[sin(t·10^(4d/63)), cos(t·10^(4d/63))]` for d in 0..64.
    fn build_table(max_steps: usize, dev: &Device) -> Result<Tensor> {
        let half = STEP_EMBED_DIM / 2;
        let mut data = Vec::with_capacity(max_steps * STEP_EMBED_DIM);
        for step in 0..max_steps {
            let angles: Vec<f64> = (0..half)
                .map(|d| step as f64 * 10f64.powf(d as f64 * 4.0 / 63.0))
                .collect();
            data.extend(angles.iter().map(|a| a.sin() as f32));
            data.extend(angles.iter().map(|a| a.cos() as f32));
        }
        Tensor::from_vec(data, (max_steps, STEP_EMBED_DIM), dev)
    }

    /// Table rows for (possibly fractional) steps `[B]`.
    fn lerp_embedding(&self, steps: &Tensor) -> Result<Tensor> {
        let steps = steps
            .to_dtype(DType::F32)?
            .clamp(0f32, (self.max_steps - 1) as f32)?;
        let low = steps.floor()?;
        let high = steps.ceil()?;
        let frac = (&steps - &low)?.unsqueeze(1)?;
        let low_rows = self.table.index_select(&low.to_dtype(DType::U32)?, 0)?;
        let high_rows = self.table.index_select(&high.to_dtype(DType::U32)?, 0)?;
        let delta = (high_rows - &low_rows)?.broadcast_mul(&frac)?;
        low_rows + delta
    }

    /// Embed diffusion steps `[B]` → `[B, 512]`.
    pub fn forward(&self, steps: &Tensor) -> Result<Tensor> {
        self.lerp_embedding(steps)?
            .apply(&self.projection1)?
            .silu()?
            .apply(&self.projection2)?
            .silu()
    }
}

/// Gated, dilated residual block.
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    dilated_conv: Conv1d,
    diffusion_projection: nn::Linear,
    local_conditioner: Option<Conv1d>,
    output_projection: Conv1d,
    channels: usize,
}

impl ResidualBlock {
    pub fn new(channels: usize, dilation: usize, conditional: bool, vb: VarBuilder) -> Result<Self> {
        let dilated_conv = nn::conv1d(
            channels,
            2 * channels,
            3,
            Conv1dConfig {
                padding: dilation,
                dilation,
                ..Default::default()
            },
            vb.pp("dilated_conv"),
        )?;
        let diffusion_projection =
            nn::linear(STEP_HIDDEN_DIM, channels, vb.pp("diffusion_projection"))?;
        let local_conditioner = if conditional {
            Some(nn::conv1d(
                1,
                2 * channels,
                1,
                Default::default(),
                vb.pp("local_conditioner"),
            )?)
        } else {
            None
        };
        let output_projection = nn::conv1d(
            channels,
            2 * channels,
            1,
            Default::default(),
            vb.pp("output_projection"),
        )?;
        Ok(Self {
            dilated_conv,
            diffusion_projection,
            local_conditioner,
            output_projection,
            channels,
        })
    }

    /// Returns `(residual_out, skip)`, both `[B, C, L]`.
    pub fn forward(
        &self,
        xs: &Tensor,
        diffusion_step: &Tensor,
        conditioner: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        let c = self.channels;
        let step = diffusion_step
            .apply(&self.diffusion_projection)?
            .unsqueeze(2)?;
        let mut ys = xs.broadcast_add(&step)?.apply(&self.dilated_conv)?;
        if let (Some(proj), Some(cond)) = (&self.local_conditioner, conditioner) {
            ys = ys.broadcast_add(&cond.apply(proj)?)?;
        }

        let gate = ys.narrow(1, 0, c)?;
        let filter = ys.narrow(1, c, c)?;
        let ys = (nn::ops::sigmoid(&gate)? * filter.tanh()?)?.apply(&self.output_projection)?;

        let residual = ys.narrow(1, 0, c)?;
        let skip = ys.narrow(1, c, c)?;
        let out = ((xs + residual)? / std::f64::consts::SQRT_2)?;
        Ok((out, skip))
    }
}

/// DiffWave noise predictor.
#[derive(Debug, Clone)]
pub struct DiffWave {
    input_projection: Conv1d,
    diffusion_embedding: DiffusionEmbedding,
    residual_layers: Vec<ResidualBlock>,
    skip_projection: Conv1d,
    output_projection: Conv1d,
    cfg: DiffWaveConfig,
}

impl DiffWave {
    /// `max_steps` is the length of the training noise schedule.
    pub fn new(cfg: &DiffWaveConfig, max_steps: usize, vb: VarBuilder) -> Result<Self> {
        let c = cfg.residual_channels;
        let input_projection = nn::conv1d(1, c, 1, Default::default(), vb.pp("input_projection"))?;
        let diffusion_embedding = DiffusionEmbedding::new(max_steps, vb.pp("diffusion_embedding"))?;

        let mut residual_layers = Vec::with_capacity(cfg.residual_layers);
        for i in 0..cfg.residual_layers {
            residual_layers.push(ResidualBlock::new(
                c,
                cfg.dilation(i),
                cfg.conditional,
                vb.pp(format!("residual_layers.{i}")),
            )?);
        }

        let skip_projection = nn::conv1d(c, c, 1, Default::default(), vb.pp("skip_projection"))?;
        let output_projection = conv1d_zeros(c, 1, vb.pp("output_projection"))?;

        Ok(Self {
            input_projection,
            diffusion_embedding,
            residual_layers,
            skip_projection,
            output_projection,
            cfg: cfg.clone(),
        })
    }

    pub fn config(&self) -> &DiffWaveConfig {
        &self.cfg
    }

    /// Predict noise.
    ///
    /// - `audio`: `[B, 1, L]` noisy waveform
    /// - `diffusion_step`: `[B]` step indices, fractional allowed
    /// - `conditioner`: `[B, 1, L]` or `[B, 1, 1]`; ignored by an
    ///   unconditional generator, and conditioning is skipped when `None`
    pub fn forward(
        &self,
        audio: &Tensor,
        diffusion_step: &Tensor,
        conditioner: Option<&Tensor>,
    ) -> Result<Tensor> {
        if let Some(cond) = conditioner {
            let (len, cond_len) = (audio.dim(2)?, cond.dim(2)?);
            if cond_len != 1 && cond_len != len {
                candle_core::bail!(
                    "conditioning length {cond_len} does not match audio length {len}"
                );
            }
        }

        let xs = audio.apply(&self.input_projection)?.relu()?;
        let step = self.diffusion_embedding.forward(diffusion_step)?;

        let mut xs = xs;
        let mut skip: Option<Tensor> = None;
        for layer in &self.residual_layers {
            let (next, s) = layer.forward(&xs, &step, conditioner)?;
            xs = next;
            skip = Some(match skip {
                Some(acc) => (acc + s)?,
                None => s,
            });
        }

        let n = self.residual_layers.len().max(1) as f64;
        let xs = match skip {
            Some(acc) => (acc / n.sqrt())?,
            None => xs,
        };
        xs.apply(&self.skip_projection)?
            .relu()?
            .apply(&self.output_projection)
    }
}
