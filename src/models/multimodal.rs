//! The assembled multimodal sentiment model

use candle_core::{Device, Result, Tensor};
use candle_nn::VarBuilder;

use super::audio_encoder::AudioEncoder;
use super::fusion::{concat_embeddings, FusionClassifier};
use super::params::ParameterRegistry;
use super::text_encoder::TextEncoder;
use super::video_encoder::VideoEncoder;
use crate::config::ArchitectureConfig;

/// Batched inputs for one forward pass
#[derive(Debug, Clone)]
pub struct ModelInputs {
    /// `(B, L)` u32
    pub input_ids: Tensor,
    /// `(B, L)` u32, 1 for real tokens
    pub attention_mask: Tensor,
    /// `(B, T, 3, H, W)` f32
    pub video_frames: Tensor,
    /// `(B, 1, n_mels, frames)` f32
    pub audio_features: Tensor,
}

/// Raw logits of both heads
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// `(B, num_emotions)`
    pub emotions: Tensor,
    /// `(B, num_sentiments)`
    pub sentiments: Tensor,
}

/// Per-modality embeddings, each `(B, embedding_dim)`
#[derive(Debug, Clone)]
pub struct ModalityEmbeddings {
    pub text: Tensor,
    pub video: Tensor,
    pub audio: Tensor,
}

/// Text + video + audio encoders feeding the fusion classifier
#[derive(Debug)]
pub struct MultimodalSentimentModel {
    config: ArchitectureConfig,
    text_encoder: TextEncoder,
    video_encoder: VideoEncoder,
    audio_encoder: AudioEncoder,
    classifier: FusionClassifier,
    parameters: ParameterRegistry,
    device: Device,
}

impl MultimodalSentimentModel {
    /// Build the graph from `vb` (model root). Parameter groups are tagged here.
    pub fn new(config: &ArchitectureConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            text_encoder: TextEncoder::new(config, vb.pp("text_encoder"))?,
            video_encoder: VideoEncoder::new(config, vb.pp("video_encoder"))?,
            audio_encoder: AudioEncoder::new(config, vb.pp("audio_encoder"))?,
            classifier: FusionClassifier::new(config, vb.clone())?,
            parameters: ParameterRegistry::multimodal(),
            device: vb.device().clone(),
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &ArchitectureConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Frozen / trainable tags of every parameter group
    pub fn parameters(&self) -> &ParameterRegistry {
        &self.parameters
    }

    pub fn embed(&self, inputs: &ModelInputs, train: bool) -> Result<ModalityEmbeddings> {
        Ok(ModalityEmbeddings {
            text: self
                .text_encoder
                .forward(&inputs.input_ids, &inputs.attention_mask)?,
            video: self.video_encoder.forward_t(&inputs.video_frames, train)?,
            audio: self.audio_encoder.forward_t(&inputs.audio_features, train)?,
        })
    }

    /// Classify precomputed embeddings
    pub fn classify(&self, embeddings: &ModalityEmbeddings, train: bool) -> Result<ModelOutput> {
        let combined = concat_embeddings(&embeddings.text, &embeddings.video, &embeddings.audio)?;
        let (emotions, sentiments) = self.classifier.forward_t(&combined, train)?;
        Ok(ModelOutput {
            emotions,
            sentiments,
        })
    }

    /// Full forward pass. `train` enables dropout and batch statistics.
    pub fn forward_t(&self, inputs: &ModelInputs, train: bool) -> Result<ModelOutput> {
        let embeddings = self.embed(inputs, train)?;
        self.classify(&embeddings, train)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    pub(crate) fn tiny_model(varmap: &VarMap) -> MultimodalSentimentModel {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        MultimodalSentimentModel::new(&ArchitectureConfig::tiny(), vb).unwrap()
    }

    pub(crate) fn tiny_inputs(batch: usize) -> ModelInputs {
        let device = Device::Cpu;
        let ids: Vec<u32> = (0..batch * 8).map(|i| if i % 8 < 5 { (i % 50) as u32 + 1 } else { 0 }).collect();
        let mask: Vec<u32> = (0..batch * 8).map(|i| u32::from(i % 8 < 5)).collect();
        ModelInputs {
            input_ids: Tensor::from_vec(ids, (batch, 8), &device).unwrap(),
            attention_mask: Tensor::from_vec(mask, (batch, 8), &device).unwrap(),
            video_frames: Tensor::rand(0f32, 1f32, (batch, 4, 3, 16, 16), &device).unwrap(),
            audio_features: Tensor::randn(0f32, 1f32, (batch, 1, 64, 300), &device).unwrap(),
        }
    }

    #[test]
    fn test_forward_shapes() {
        let varmap = VarMap::new();
        let model = tiny_model(&varmap);
        let output = model.forward_t(&tiny_inputs(2), false).unwrap();
        assert_eq!(output.emotions.dims(), &[2, 7]);
        assert_eq!(output.sentiments.dims(), &[2, 3]);
    }

    #[test]
    fn test_zero_embeddings_classify() {
        let varmap = VarMap::new();
        let model = tiny_model(&varmap);
        let zeros = Tensor::zeros((1, 128), DType::F32, &Device::Cpu).unwrap();
        let output = model
            .classify(
                &ModalityEmbeddings {
                    text: zeros.clone(),
                    video: zeros.clone(),
                    audio: zeros,
                },
                false,
            )
            .unwrap();

        let emotions: Vec<f32> = output.emotions.flatten_all().unwrap().to_vec1().unwrap();
        let sentiments: Vec<f32> = output.sentiments.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(emotions.len(), 7);
        assert_eq!(sentiments.len(), 3);
        assert!(emotions.iter().chain(&sentiments).all(|v| v.is_finite()));
    }

    #[test]
    fn test_trainable_vars_exclude_backbones() {
        let varmap = VarMap::new();
        let model = tiny_model(&varmap);
        let registry = model.parameters();

        let trainable = registry.trainable_vars(&varmap);
        let report = registry.report_varmap(&varmap);
        let trainable_count: usize = trainable.iter().map(|v| v.elem_count()).sum();
        assert_eq!(trainable_count, report.trainable);

        // projections (32*128+128, 16*128+128, 128*128+128), fusion linear + bn affine, two heads
        let expected = (32 * 128 + 128)
            + (16 * 128 + 128)
            + (128 * 128 + 128)
            + (384 * 256 + 256)
            + (2 * 256)
            + (256 * 64 + 64 + 64 * 7 + 7)
            + (256 * 64 + 64 + 64 * 3 + 3);
        assert_eq!(report.trainable, expected);
        assert!(report.total > report.trainable);

        let groups = registry.optimizer_groups(&varmap);
        assert_eq!(groups.len(), 6);
        assert_eq!(groups[0].learning_rate, 8e-6);
    }
}
