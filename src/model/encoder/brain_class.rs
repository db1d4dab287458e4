//! Brain + class encoder.
//!
//! Funnels ECoG recordings through a classification bottleneck, then
//! projects the class probabilities up to the conditioning length. The
//! second half is a [`ClassEncoder`], so it can be pretrained together with
//! DiffWave in the class-conditional setting and frozen while the brain
//! classifier is fine-tuned.

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::VarBuilder;

use super::class::ClassEncoder;
use crate::config::BrainClassEncoderConfig;
use crate::model::classifier::BrainClassifier;

/// Parameter prefix of the brain classifier half.
pub const BRAIN_CLASSIFIER: &str = "brain_classifier";
/// Parameter prefix of the class conditioner half.
pub const CLASS_CONDITIONER: &str = "class_conditioner";

/// `[B, C, E, T]` → `[B, n_classes]` → `[B, 1, c_out]`.
#[derive(Debug, Clone)]
pub struct BrainClassEncoder {
    brain_classifier: BrainClassifier,
    class_conditioner: ClassEncoder,
}

impl BrainClassEncoder {
    pub fn new(cfg: &BrainClassEncoderConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            brain_classifier: BrainClassifier::new(cfg, vb.pp(BRAIN_CLASSIFIER))?,
            class_conditioner: ClassEncoder::new(&cfg.class_encoder(), vb.pp(CLASS_CONDITIONER))?,
        })
    }

    /// Class probabilities only.
    pub fn classify(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        self.brain_classifier.forward_t(xs, train)
    }
}

impl ModuleT for BrainClassEncoder {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let probs = self.classify(xs, train)?.unsqueeze(1)?; // [B, n] → [B, 1, n]
        self.class_conditioner.forward(&probs)
    }
}
