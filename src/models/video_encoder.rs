//! Video encoder: R(3D)-18 backbone with a 128-d projection head
//!
//! Architecture (torchvision `r3d_18` layout, so pretrained weights load as-is):
//! - stem: Conv3d 3x7x7, stride (1, 2, 2), padding (1, 3, 3) + BN + ReLU
//! - layer1..layer4: two basic blocks each, widths 64/128/256/512,
//!   strides 1/2/2/2 (temporal and spatial), 1x1x1 downsample shortcut
//! - global average pool over (T, H, W)
//! - fc: Linear(512, 128) -> ReLU -> Dropout(0.2)

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{batch_norm, linear, BatchNorm, Dropout, Linear, VarBuilder};

use super::layers::{Conv3d, Conv3dConfig};
use crate::config::ArchitectureConfig;

const BN_EPS: f64 = 1e-5;

/// Conv3d followed by BatchNorm3d (`<prefix>.0` and `<prefix>.1`)
#[derive(Debug, Clone)]
struct ConvBn {
    conv: Conv3d,
    bn: BatchNorm,
}

impl ConvBn {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize, usize),
        config: Conv3dConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            conv: Conv3d::new(in_channels, out_channels, kernel, config, vb.pp("0"))?,
            bn: batch_norm(out_channels, BN_EPS, vb.pp("1"))?,
        })
    }

    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        self.bn.forward_t(&self.conv.forward(x)?, train)
    }
}

/// Two 3x3x3 convolutions with a residual shortcut
#[derive(Debug, Clone)]
struct BasicBlock {
    conv1: ConvBn,
    conv2: ConvBn,
    downsample: Option<ConvBn>,
}

impl BasicBlock {
    fn new(in_channels: usize, out_channels: usize, stride: usize, vb: VarBuilder) -> Result<Self> {
        let conv1 = ConvBn::new(
            in_channels,
            out_channels,
            (3, 3, 3),
            Conv3dConfig::new((stride, stride), (1, 1)),
            vb.pp("conv1"),
        )?;
        let conv2 = ConvBn::new(
            out_channels,
            out_channels,
            (3, 3, 3),
            Conv3dConfig::new((1, 1), (1, 1)),
            vb.pp("conv2"),
        )?;
        let downsample = if stride != 1 || in_channels != out_channels {
            Some(ConvBn::new(
                in_channels,
                out_channels,
                (1, 1, 1),
                Conv3dConfig::new((stride, stride), (0, 0)),
                vb.pp("downsample"),
            )?)
        } else {
            None
        };
        Ok(Self {
            conv1,
            conv2,
            downsample,
        })
    }

    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let out = self.conv1.forward_t(x, train)?.relu()?;
        let out = self.conv2.forward_t(&out, train)?;
        let residual = match &self.downsample {
            Some(down) => down.forward_t(x, train)?,
            None => x.clone(),
        };
        (out + residual)?.relu()
    }
}

/// Maps `(B, T, C, H, W)` frames to `(B, embedding_dim)`
#[derive(Debug, Clone)]
pub struct VideoEncoder {
    stem: ConvBn,
    layers: Vec<[BasicBlock; 2]>,
    fc: Linear,
    dropout: Dropout,
}

impl VideoEncoder {
    /// `vb` points at `video_encoder`
    pub fn new(config: &ArchitectureConfig, vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp("backbone");
        let widths = config.video_widths;

        let stem = ConvBn::new(
            3,
            widths[0],
            (3, 7, 7),
            Conv3dConfig::new((1, 2), (1, 3)),
            vb.pp("stem"),
        )?;

        let mut layers = Vec::with_capacity(4);
        let mut in_channels = widths[0];
        for (i, &width) in widths.iter().enumerate() {
            let stride = if i == 0 { 1 } else { 2 };
            let vb_layer = vb.pp(format!("layer{}", i + 1));
            let first = BasicBlock::new(in_channels, width, stride, vb_layer.pp("0"))?;
            let second = BasicBlock::new(width, width, 1, vb_layer.pp("1"))?;
            layers.push([first, second]);
            in_channels = width;
        }

        let fc = linear(in_channels, config.embedding_dim, vb.pp("fc").pp("0"))?;

        Ok(Self {
            stem,
            layers,
            fc,
            dropout: Dropout::new(config.encoder_dropout),
        })
    }

    pub fn forward_t(&self, frames: &Tensor, train: bool) -> Result<Tensor> {
        // (B, T, C, H, W) -> (B, C, T, H, W)
        let x = frames.transpose(1, 2)?.contiguous()?;
        let mut x = self.stem.forward_t(&x, train)?.relu()?;
        for blocks in &self.layers {
            for block in blocks {
                x = block.forward_t(&x, train)?;
            }
        }
        let pooled = x.mean(4)?.mean(3)?.mean(2)?;
        let x = self.fc.forward(&pooled)?.relu()?;
        self.dropout.forward(&x, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_embedding_shape() {
        let config = ArchitectureConfig::tiny();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = VideoEncoder::new(&config, vb.pp("video_encoder")).unwrap();

        let frames = Tensor::rand(0f32, 1f32, (2, 4, 3, 16, 16), &Device::Cpu).unwrap();
        let out = encoder.forward_t(&frames, false).unwrap();
        assert_eq!(out.dims(), &[2, 128]);

        // ReLU before dropout
        let min: f32 = out.min_all().unwrap().to_scalar().unwrap();
        assert!(min >= 0.0);
    }

    #[test]
    fn test_weight_names_follow_torchvision() {
        let config = ArchitectureConfig::tiny();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        VideoEncoder::new(&config, vb.pp("video_encoder")).unwrap();

        let data = varmap.data().lock().unwrap();
        for name in [
            "video_encoder.backbone.stem.0.weight",
            "video_encoder.backbone.stem.1.running_var",
            "video_encoder.backbone.layer1.0.conv1.0.weight",
            "video_encoder.backbone.layer2.0.downsample.0.weight",
            "video_encoder.backbone.layer4.1.conv2.1.bias",
            "video_encoder.backbone.fc.0.weight",
        ] {
            assert!(data.contains_key(name), "missing {}", name);
        }
        assert!(!data.contains_key("video_encoder.backbone.layer1.0.downsample.0.weight"));
        assert_eq!(
            data["video_encoder.backbone.layer3.0.conv1.0.weight"].dims(),
            &[8, 8, 3, 3, 3]
        );
    }
}
