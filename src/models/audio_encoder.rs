//! Audio encoder: small 1D CNN over mel frames

use candle_core::{Module, ModuleT, Result, Tensor, D};
use candle_nn::{batch_norm, conv1d, linear, BatchNorm, Conv1d, Conv1dConfig, Dropout, Linear, VarBuilder};

use crate::config::ArchitectureConfig;

const HIDDEN_CHANNELS: usize = 64;
const OUT_CHANNELS: usize = 128;
const KERNEL_SIZE: usize = 3;

/// Maps `(B, 1, n_mels, frames)` to `(B, embedding_dim)`
///
/// `conv_layers`: Conv1d(n_mels, 64, 3) -> BN -> ReLU -> MaxPool(2) ->
/// Conv1d(64, 128, 3) -> BN -> ReLU -> mean over time.
/// `projection`: Linear(128, 128) -> ReLU -> Dropout.
#[derive(Debug, Clone)]
pub struct AudioEncoder {
    conv1: Conv1d,
    bn1: BatchNorm,
    conv2: Conv1d,
    bn2: BatchNorm,
    projection: Linear,
    dropout: Dropout,
}

impl AudioEncoder {
    /// `vb` points at `audio_encoder`
    pub fn new(config: &ArchitectureConfig, vb: VarBuilder) -> Result<Self> {
        let conv_vb = vb.pp("conv_layers");
        let conv_cfg = Conv1dConfig::default();
        Ok(Self {
            conv1: conv1d(
                config.audio_mel_bins,
                HIDDEN_CHANNELS,
                KERNEL_SIZE,
                conv_cfg,
                conv_vb.pp("0"),
            )?,
            bn1: batch_norm(HIDDEN_CHANNELS, 1e-5, conv_vb.pp("1"))?,
            conv2: conv1d(HIDDEN_CHANNELS, OUT_CHANNELS, KERNEL_SIZE, conv_cfg, conv_vb.pp("4"))?,
            bn2: batch_norm(OUT_CHANNELS, 1e-5, conv_vb.pp("5"))?,
            projection: linear(OUT_CHANNELS, config.embedding_dim, vb.pp("projection").pp("0"))?,
            dropout: Dropout::new(config.encoder_dropout),
        })
    }

    pub fn forward_t(&self, mel: &Tensor, train: bool) -> Result<Tensor> {
        let x = mel.squeeze(1)?;

        let x = self.bn1.forward_t(&self.conv1.forward(&x)?, train)?.relu()?;
        let x = max_pool1d(&x, 2)?;
        let x = self.bn2.forward_t(&self.conv2.forward(&x)?, train)?.relu()?;
        let x = x.mean(D::Minus1)?;

        let x = self.projection.forward(&x)?.relu()?;
        self.dropout.forward(&x, train)
    }
}

/// Non-overlapping max pool over the last axis; a trailing odd element is dropped
fn max_pool1d(x: &Tensor, kernel: usize) -> Result<Tensor> {
    let (b, c, l) = x.dims3()?;
    let out_len = l / kernel;
    x.narrow(2, 0, out_len * kernel)?
        .reshape((b, c, out_len, kernel))?
        .max(D::Minus1)
}
