//! Brain encoder: ECoG recording → conditioning sequence, without a class
//! bottleneck.

use candle_core::{ModuleT, Result, Tensor};
use candle_nn::{self as nn, Dropout, Linear, VarBuilder};

use crate::config::BrainEncoderConfig;

const LEAKY_SLOPE: f64 = 0.2;

/// `[B, C, E, T]` → flatten → `[B, 1, c_out]`.
#[derive(Debug, Clone)]
pub struct BrainEncoder {
    embedding: Linear,
    dropout: Dropout,
    projection: Linear,
}

impl BrainEncoder {
    pub fn new(cfg: &BrainEncoderConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            embedding: nn::linear(cfg.c_brain_in, cfg.c_mid, vb.pp("embedding"))?,
            dropout: Dropout::new(0.2),
            projection: nn::linear(cfg.c_mid, cfg.c_out, vb.pp("projection"))?,
        })
    }
}

impl ModuleT for BrainEncoder {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = xs.flatten_from(1)?.unsqueeze(1)?;
        let xs = nn::ops::leaky_relu(&xs.apply(&self.embedding)?, LEAKY_SLOPE)?;
        let xs = self.dropout.forward_t(&xs, train)?;
        xs.apply(&self.projection)
    }
}
