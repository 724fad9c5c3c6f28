//! Late fusion of the modality embeddings and the two classification heads

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{batch_norm, linear, BatchNorm, Dropout, Linear, VarBuilder};

use crate::config::ArchitectureConfig;

/// Concatenate `(B, 128)` embeddings in the fixed order text, video, audio
pub fn concat_embeddings(text: &Tensor, video: &Tensor, audio: &Tensor) -> Result<Tensor> {
    Tensor::cat(&[text, video, audio], 1)
}

/// Linear -> ReLU -> Dropout -> Linear (`<prefix>.0` and `<prefix>.3`)
#[derive(Debug, Clone)]
pub struct ClassifierHead {
    hidden: Linear,
    dropout: Dropout,
    output: Linear,
}

impl ClassifierHead {
    pub fn new(
        in_dim: usize,
        hidden_dim: usize,
        num_classes: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            hidden: linear(in_dim, hidden_dim, vb.pp("0"))?,
            dropout: Dropout::new(dropout),
            output: linear(hidden_dim, num_classes, vb.pp("3"))?,
        })
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.hidden.forward(x)?.relu()?;
        let x = self.dropout.forward(&x, train)?;
        self.output.forward(&x)
    }
}

/// Fusion block and both heads
#[derive(Debug, Clone)]
pub struct FusionClassifier {
    fusion: Linear,
    fusion_bn: BatchNorm,
    fusion_dropout: Dropout,
    emotion: ClassifierHead,
    sentiment: ClassifierHead,
}

impl FusionClassifier {
    /// `vb` points at the model root (`fusion_layer`, `emotion_classifier`, `sentiment_classifier`)
    pub fn new(config: &ArchitectureConfig, vb: VarBuilder) -> Result<Self> {
        let fusion_vb = vb.pp("fusion_layer");
        Ok(Self {
            fusion: linear(config.concat_dim(), config.fusion_dim, fusion_vb.pp("0"))?,
            fusion_bn: batch_norm(config.fusion_dim, 1e-5, fusion_vb.pp("1"))?,
            fusion_dropout: Dropout::new(config.fusion_dropout),
            emotion: ClassifierHead::new(
                config.fusion_dim,
                config.head_hidden_dim,
                config.num_emotions,
                config.encoder_dropout,
                vb.pp("emotion_classifier"),
            )?,
            sentiment: ClassifierHead::new(
                config.fusion_dim,
                config.head_hidden_dim,
                config.num_sentiments,
                config.encoder_dropout,
                vb.pp("sentiment_classifier"),
            )?,
        })
    }

    /// `(B, 384)` fused input to `(B, fusion_dim)`
    pub fn fuse(&self, combined: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.fusion.forward(combined)?;
        let x = self.fusion_bn.forward_t(&x, train)?.relu()?;
        self.fusion_dropout.forward(&x, train)
    }

    /// `(emotion_logits, sentiment_logits)` from the concatenated embeddings
    pub fn forward_t(&self, combined: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let fused = self.fuse(combined, train)?;
        Ok((
            self.emotion.forward_t(&fused, train)?,
            self.sentiment.forward_t(&fused, train)?,
        ))
    }
}
