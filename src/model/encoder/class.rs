//! Class encoder: class probabilities → conditioning sequence.

use candle_core::{Module, Result, Tensor};
use candle_nn::{self as nn, Linear, VarBuilder};

use crate::config::ClassEncoderConfig;

const LEAKY_SLOPE: f64 = 0.2;

/// Projects a one-hot or probability vector up to the conditioning length.
///
/// `[B, n_classes]` or `[B, 1, n_classes]` → `[B, 1, c_out]`.
#[derive(Debug, Clone)]
pub struct ClassEncoder {
    embedding: Linear,
    projection: Linear,
}

impl ClassEncoder {
    pub fn new(cfg: &ClassEncoderConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            embedding: nn::linear(cfg.n_classes, cfg.c_mid, vb.pp("embedding"))?,
            projection: nn::linear(cfg.c_mid, cfg.c_out, vb.pp("projection"))?,
        })
    }
}

impl Module for ClassEncoder {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = if xs.rank() == 2 { xs.unsqueeze(1)? } else { xs.clone() };
        let xs = nn::ops::leaky_relu(&xs.apply(&self.embedding)?, LEAKY_SLOPE)?;
        xs.apply(&self.projection)
    }
}
