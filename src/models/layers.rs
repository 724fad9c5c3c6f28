//! Layers candle does not ship
//!
//! `Conv3d` is built from 2D convolutions: the temporal kernel is unrolled
//! into one conv2d per tap over the matching time slices, and the per-tap
//! outputs are summed.

use candle_core::{IndexOp, Module, Result, Tensor};
use candle_nn::{init, VarBuilder};

/// Stride or padding along (time, height, width); height and width must agree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv3dConfig {
    pub stride: (usize, usize),
    pub padding: (usize, usize),
}

impl Conv3dConfig {
    /// `(temporal, spatial)` stride and padding
    pub fn new(stride: (usize, usize), padding: (usize, usize)) -> Self {
        Self { stride, padding }
    }
}

/// Bias-free 3D convolution over `(B, C, T, H, W)`
#[derive(Debug, Clone)]
pub struct Conv3d {
    /// One `(out, in, kh, kw)` kernel per temporal tap
    taps: Vec<Tensor>,
    out_channels: usize,
    config: Conv3dConfig,
}

impl Conv3d {
    /// Loads `weight` of shape `(out, in, kt, kh, kw)`
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize, usize),
        config: Conv3dConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (kt, kh, kw) = kernel;
        let weight = vb.get_with_hints(
            (out_channels, in_channels, kt, kh, kw),
            "weight",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let taps = (0..kt)
            .map(|k| weight.i((.., .., k, .., ..))?.contiguous())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            taps,
            out_channels,
            config,
        })
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

impl Module for Conv3d {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, _c, t, _h, _w) = x.dims5()?;
        let (st, ss) = self.config.stride;
        let (pt, ps) = self.config.padding;
        let kt = self.taps.len();

        let padded_t = t + 2 * pt;
        if padded_t < kt {
            candle_core::bail!("temporal extent {} is shorter than the kernel {}", padded_t, kt)
        }
        let t_out = (padded_t - kt) / st + 1;

        // (B, T, C, H, W) so each tap selects along dim 1
        let x = x.pad_with_zeros(2, pt, pt)?.permute((0, 2, 1, 3, 4))?.contiguous()?;
        let (_, _, c, h, w) = x.dims5()?;

        let mut acc: Option<Tensor> = None;
        for (k, kernel) in self.taps.iter().enumerate() {
            let idx: Vec<u32> = (0..t_out).map(|i| (i * st + k) as u32).collect();
            let idx = Tensor::from_vec(idx, t_out, x.device())?;
            let slices = x.index_select(&idx, 1)?.reshape((b * t_out, c, h, w))?;
            let y = slices.conv2d(kernel, ps, ss, 1, 1)?;
            acc = Some(match acc {
                Some(sum) => (sum + y)?,
                None => y,
            });
        }
        let y = match acc {
            Some(y) => y,
            None => candle_core::bail!("conv3d has no temporal taps"),
        };

        let (_, o, h_out, w_out) = y.dims4()?;
        y.reshape((b, t_out, o, h_out, w_out))?
            .permute((0, 2, 1, 3, 4))?
            .contiguous()
    }
}
