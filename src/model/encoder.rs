//! Conditioning encoders.
//!
//! - [`class`] — class probabilities / one-hot vectors
//! - [`brain`] — ECoG recordings, direct projection
//! - [`brain_class`] — ECoG recordings through a brain classifier, then the
//!   class encoder
//!
//! All three emit a `[B, 1, c_out]` sequence for DiffWave's conditioner.

pub mod brain;
pub mod brain_class;
pub mod class;

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::VarBuilder;

pub use brain::BrainEncoder;
pub use brain_class::BrainClassEncoder;
pub use class::ClassEncoder;

use crate::config::EncoderConfig;

/// Any of the conditioning encoders.
#[derive(Debug, Clone)]
pub enum ConditionEncoder {
    Class(ClassEncoder),
    Brain(BrainEncoder),
    BrainClass(BrainClassEncoder),
}

impl ConditionEncoder {
    pub fn new(cfg: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        Ok(match cfg {
            EncoderConfig::Class(c) => ConditionEncoder::Class(ClassEncoder::new(c, vb)?),
            EncoderConfig::Brain(c) => ConditionEncoder::Brain(BrainEncoder::new(c, vb)?),
            EncoderConfig::BrainClass(c) => {
                ConditionEncoder::BrainClass(BrainClassEncoder::new(c, vb)?)
            }
        })
    }

    /// Parameter prefix of the part that is trained together with the
    /// generator during class-conditional pretraining, if any.
    pub fn generator_coupled_prefix(&self) -> Option<&'static str> {
        match self {
            ConditionEncoder::BrainClass(_) => Some(brain_class::CLASS_CONDITIONER),
            _ => None,
        }
    }
}

impl ModuleT for ConditionEncoder {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            ConditionEncoder::Class(m) => m.forward(xs),
            ConditionEncoder::Brain(m) => m.forward_t(xs, train),
            ConditionEncoder::BrainClass(m) => m.forward_t(xs, train),
        }
    }
}
