//! Brain classifiers: ECoG recording → class probabilities.
//!
//! Input is `[B, C, E, T]` (batch, frequency bands, electrodes, timesteps),
//! output `[B, n_classes]` after a softmax. Parameter names follow the
//! positions of the layers in each network (`network.<i>.weight`).

use candle_core::{D, Module, ModuleT, Result, Tensor};
use candle_nn::{self as nn, BatchNorm, Dropout, LayerNorm, Linear, VarBuilder};

use super::layers::Conv2dAsym;
use crate::config::{BrainClassEncoderConfig, ClassifierVariant};

/// Flatten → three Linear layers with LayerNorm and dropout.
#[derive(Debug, Clone)]
pub struct BrainClassifierV1 {
    fc1: Linear,
    norm1: LayerNorm,
    drop1: Dropout,
    fc2: Linear,
    norm2: LayerNorm,
    drop2: Dropout,
    fc3: Linear,
}

impl BrainClassifierV1 {
    pub fn new(in_nodes: usize, n_classes: usize, vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp("network");
        let (h1, h2) = (in_nodes / 2, in_nodes / 4);
        Ok(Self {
            fc1: nn::linear(in_nodes, h1, vb.pp("1"))?,
            norm1: nn::layer_norm(h1, 1e-5, vb.pp("3"))?,
            drop1: Dropout::new(0.4),
            fc2: nn::linear(h1, h2, vb.pp("5"))?,
            norm2: nn::layer_norm(h2, 1e-5, vb.pp("7"))?,
            drop2: Dropout::new(0.3),
            fc3: nn::linear(h2, n_classes, vb.pp("9"))?,
        })
    }
}

impl ModuleT for BrainClassifierV1 {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = xs.flatten_from(1)?;
        let xs = xs.apply(&self.fc1)?.relu()?.apply(&self.norm1)?;
        let xs = self.drop1.forward_t(&xs, train)?;
        let xs = xs.apply(&self.fc2)?.relu()?.apply(&self.norm2)?;
        let xs = self.drop2.forward_t(&xs, train)?;
        nn::ops::softmax(&xs.apply(&self.fc3)?, D::Minus1)
    }
}

/// Conv → ReLU → BatchNorm → Dropout.
#[derive(Debug, Clone)]
struct ConvBlock {
    conv: Conv2dAsym,
    bn: BatchNorm,
    drop: Dropout,
}

impl ConvBlock {
    /// Layers sit at `network.<first>` (conv) and `network.<first + 2>` (bn).
    fn new(
        in_c: usize,
        out_c: usize,
        stride: (usize, usize),
        first: usize,
        vb: &VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            conv: Conv2dAsym::square(in_c, out_c, 3, stride, 1, vb.pp(first.to_string()))?,
            bn: nn::batch_norm(out_c, 1e-5, vb.pp((first + 2).to_string()))?,
            drop: Dropout::new(0.1),
        })
    }
}

impl ModuleT for ConvBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = xs.apply(&self.conv)?.relu()?.apply_t(&self.bn, train)?;
        self.drop.forward_t(&xs, train)
    }
}

/// Temporal then spatio-temporal convolutions, max-pool, MLP head.
#[derive(Debug, Clone)]
pub struct BrainClassifierV2 {
    blocks: Vec<ConvBlock>,
    fc1: Linear,
    bn: BatchNorm,
    drop: Dropout,
    fc2: Linear,
}

impl BrainClassifierV2 {
    pub fn new(
        in_channels: usize,
        n_classes: usize,
        flat_features: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let vb = vb.pp("network");
        let blocks = vec![
            // Temporal filtering
            ConvBlock::new(in_channels, 32, (1, 2), 0, &vb)?,
            ConvBlock::new(32, 64, (1, 2), 4, &vb)?,
            ConvBlock::new(64, 128, (1, 2), 8, &vb)?,
            // Spatio-temporal filtering
            ConvBlock::new(128, 256, (2, 3), 12, &vb)?,
            ConvBlock::new(256, 256, (2, 3), 16, &vb)?,
        ];
        Ok(Self {
            blocks,
            fc1: nn::linear(flat_features, 128, vb.pp("22"))?,
            bn: nn::batch_norm(128, 1e-5, vb.pp("24"))?,
            drop: Dropout::new(0.5),
            fc2: nn::linear(128, n_classes, vb.pp("26"))?,
        })
    }
}

impl ModuleT for BrainClassifierV2 {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = xs.clone();
        for block in &self.blocks {
            xs = block.forward_t(&xs, train)?;
        }
        let xs = xs.max_pool2d(2)?.flatten_from(1)?;
        let xs = xs.apply(&self.fc1)?.relu()?.apply_t(&self.bn, train)?;
        let xs = self.drop.forward_t(&xs, train)?;
        nn::ops::softmax(&xs.apply(&self.fc2)?, D::Minus1)
    }
}

/// Two convolutions followed by a wide three-layer MLP.
#[derive(Debug, Clone)]
pub struct BrainClassifierV3 {
    conv1: Conv2dAsym,
    conv2: Conv2dAsym,
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
}

impl BrainClassifierV3 {
    pub fn new(
        in_channels: usize,
        n_classes: usize,
        flat_features: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let vb = vb.pp("network");
        Ok(Self {
            conv1: Conv2dAsym::new(in_channels, 64, (1, 3), (1, 2), (0, 1), vb.pp("0"))?,
            conv2: Conv2dAsym::new(64, 128, (2, 3), (1, 1), (0, 1), vb.pp("2"))?,
            fc1: nn::linear(flat_features, 3200, vb.pp("5"))?,
            fc2: nn::linear(3200, 1600, vb.pp("7"))?,
            fc3: nn::linear(1600, n_classes, vb.pp("9"))?,
        })
    }
}

impl Module for BrainClassifierV3 {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = xs
            .apply(&self.conv1)?
            .relu()?
            .apply(&self.conv2)?
            .relu()?
            .flatten_from(1)?;
        let xs = xs
            .apply(&self.fc1)?
            .relu()?
            .apply(&self.fc2)?
            .relu()?
            .apply(&self.fc3)?;
        nn::ops::softmax(&xs, D::Minus1)
    }
}

/// The classifier selected by [`ClassifierVariant`].
#[derive(Debug, Clone)]
pub enum BrainClassifier {
    V1(BrainClassifierV1),
    V2(BrainClassifierV2),
    V3(BrainClassifierV3),
}

impl BrainClassifier {
    pub fn new(cfg: &BrainClassEncoderConfig, vb: VarBuilder) -> Result<Self> {
        Ok(match cfg.classifier {
            ClassifierVariant::V1 => {
                BrainClassifier::V1(BrainClassifierV1::new(cfg.c_brain_in, cfg.n_classes, vb)?)
            }
            ClassifierVariant::V2 => BrainClassifier::V2(BrainClassifierV2::new(
                cfg.c_brain_in,
                cfg.n_classes,
                cfg.flat_features.unwrap_or(256),
                vb,
            )?),
            ClassifierVariant::V3 => BrainClassifier::V3(BrainClassifierV3::new(
                cfg.c_brain_in,
                cfg.n_classes,
                cfg.flat_features.unwrap_or(6400),
                vb,
            )?),
        })
    }
}

impl ModuleT for BrainClassifier {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            BrainClassifier::V1(m) => m.forward_t(xs, train),
            BrainClassifier::V2(m) => m.forward_t(xs, train),
            BrainClassifier::V3(m) => m.forward(xs),
        }
    }
}
