//! Shared layers.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Init, VarBuilder, init};

/// 2D convolution with independent per-axis kernel, stride and padding.
///
/// `candle_nn::Conv2d` only takes square strides and paddings, while the
/// brain classifiers filter time and electrodes at different rates. Weights
/// load from `weight` `[out, in, kh, kw]` and `bias` `[out]`.
#[derive(Debug, Clone)]
pub struct Conv2dAsym {
    weight: Tensor,
    bias: Tensor,
    stride: (usize, usize),
    padding: (usize, usize),
}

impl Conv2dAsym {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(
            (out_channels, in_channels, kernel.0, kernel.1),
            "weight",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bound = 1.0 / ((in_channels * kernel.0 * kernel.1) as f64).sqrt();
        let bias = vb.get_with_hints(
            out_channels,
            "bias",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        Ok(Self {
            weight,
            bias,
            stride,
            padding,
        })
    }

    /// Square kernel/stride/padding shorthand.
    pub fn square(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: (usize, usize),
        padding: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        Self::new(
            in_channels,
            out_channels,
            (kernel, kernel),
            stride,
            (padding, padding),
            vb,
        )
    }
}

/// Keep every `step`-th element along `dim`, starting at 0.
fn subsample(xs: &Tensor, dim: usize, step: usize) -> Result<Tensor> {
    if step == 1 {
        return Ok(xs.clone());
    }
    let n = xs.dim(dim)?;
    let idx: Vec<u32> = (0..n as u32).step_by(step).collect();
    let idx = Tensor::new(idx.as_slice(), xs.device())?;
    xs.index_select(&idx, dim)
}

impl Module for Conv2dAsym {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (ph, pw) = self.padding;
        let (sh, sw) = self.stride;
        let xs = xs.pad_with_zeros(2, ph, ph)?.pad_with_zeros(3, pw, pw)?;
        let ys = if sh == sw {
            xs.conv2d(&self.weight, 0, sh, 1, 1)?
        } else {
            // Stride-1 output subsampled per axis gives the same positions
            // as a strided convolution.
            let ys = xs.conv2d(&self.weight, 0, 1, 1, 1)?;
            subsample(&subsample(&ys, 2, sh)?, 3, sw)?
        };
        let out = self.bias.dim(0)?;
        ys.broadcast_add(&self.bias.reshape((1, out, 1, 1))?)
    }
}

/// 1x1 `Conv1d` whose weight and bias start at zero.
pub fn conv1d_zeros(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Conv1d> {
    let weight = vb.get_with_hints((out_channels, in_channels, 1), "weight", init::ZERO)?;
    let bias = vb.get_with_hints(out_channels, "bias", init::ZERO)?;
    Ok(Conv1d::new(weight, Some(bias), Conv1dConfig::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn asymmetric_output_shape() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        // kernel (1,3), stride (1,2), padding (0,1): W 100 → 50, H unchanged
        let conv = Conv2dAsym::new(4, 8, (1, 3), (1, 2), (0, 1), vb.pp("c")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 4, 3, 100), &dev).unwrap();
        let y = conv.forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 8, 3, 50]);
    }

    #[test]
    fn matches_strided_conv_on_square_stride() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let conv = Conv2dAsym::square(2, 3, 3, (2, 2), 1, vb.pp("c")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 2, 7, 9), &dev).unwrap();
        let y = conv.forward(&x).unwrap();

        // Same weights through the subsampling path.
        let full = x
            .pad_with_zeros(2, 1, 1)
            .unwrap()
            .pad_with_zeros(3, 1, 1)
            .unwrap()
            .conv2d(&conv.weight, 0, 1, 1, 1)
            .unwrap();
        let sub = subsample(&subsample(&full, 2, 2).unwrap(), 3, 2).unwrap();
        let sub = sub
            .broadcast_add(&conv.bias.reshape((1, 3, 1, 1)).unwrap())
            .unwrap();
        assert_eq!(y.dims(), sub.dims());
        let diff: f32 = (y - sub)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-4, "diff = {diff}");
    }

    #[test]
    fn zero_conv_outputs_zero() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let conv = conv1d_zeros(4, 1, vb.pp("out")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 4, 10), &dev).unwrap();
        let y = conv.forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 1, 10]);
        let sum: f32 = y.abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
        assert_eq!(sum, 0.0);
    }
}
