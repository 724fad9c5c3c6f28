//! Network architecture hyperparameters
//!
//! `Default` describes the production network (bert-base-uncased text backbone,
//! R(3D)-18 video backbone). `tiny()` keeps the same topology with narrow
//! layers so the full graph can be built and run quickly on a CPU.

use candle_transformers::models::bert::Config as BertConfig;
use std::path::Path;

use crate::core::error::{EmoError, Result};

/// Architecture of the multimodal network
#[derive(Debug, Clone)]
pub struct ArchitectureConfig {
    /// Text backbone configuration
    pub bert: BertConfig,
    /// Hidden size of the text backbone (pooler width)
    pub bert_hidden_size: usize,
    /// Channel widths of the four R(3D)-18 stages
    pub video_widths: [usize; 4],
    /// Mel bins consumed by the audio encoder
    pub audio_mel_bins: usize,
    /// Per-modality embedding width
    pub embedding_dim: usize,
    /// Fused representation width
    pub fusion_dim: usize,
    /// Hidden width of each classification head
    pub head_hidden_dim: usize,
    /// Emotion classes
    pub num_emotions: usize,
    /// Sentiment classes
    pub num_sentiments: usize,
    /// Dropout after the video/audio projections and inside the heads
    pub encoder_dropout: f32,
    /// Dropout after the fusion block
    pub fusion_dropout: f32,
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        Self {
            bert: bert_config(30522, 768, 12, 12, 3072, 512),
            bert_hidden_size: 768,
            video_widths: [64, 128, 256, 512],
            audio_mel_bins: 64,
            embedding_dim: 128,
            fusion_dim: 256,
            head_hidden_dim: 64,
            num_emotions: 7,
            num_sentiments: 3,
            encoder_dropout: 0.2,
            fusion_dropout: 0.3,
        }
    }
}

impl ArchitectureConfig {
    /// Narrow variant with the production topology and output shapes
    pub fn tiny() -> Self {
        Self {
            bert: bert_config(128, 32, 2, 2, 64, 64),
            bert_hidden_size: 32,
            video_widths: [4, 8, 8, 16],
            ..Self::default()
        }
    }

    /// Replace the text backbone configuration with a HuggingFace `config.json`
    pub fn with_bert_config_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| EmoError::Config {
            message: format!("Failed to read BERT config: {}", e),
            path: Some(path.to_path_buf()),
        })?;
        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| EmoError::Config {
                message: format!("Failed to parse BERT config: {}", e),
                path: Some(path.to_path_buf()),
            })?;
        let hidden = value["hidden_size"].as_u64().ok_or_else(|| EmoError::Config {
            message: "BERT config has no hidden_size".to_string(),
            path: Some(path.to_path_buf()),
        })?;

        self.bert = serde_json::from_value(value).map_err(|e| EmoError::Config {
            message: format!("Invalid BERT config: {}", e),
            path: Some(path.to_path_buf()),
        })?;
        self.bert_hidden_size = hidden as usize;
        Ok(self)
    }

    /// Width of the concatenated modality embeddings
    pub fn concat_dim(&self) -> usize {
        self.embedding_dim * 3
    }
}

fn bert_config(
    vocab_size: usize,
    hidden_size: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
    intermediate_size: usize,
    max_position_embeddings: usize,
) -> BertConfig {
    // Remaining fields keep the bert-base-uncased values (gelu, absolute positions)
    let mut config = BertConfig::default();
    config.vocab_size = vocab_size;
    config.hidden_size = hidden_size;
    config.num_hidden_layers = num_hidden_layers;
    config.num_attention_heads = num_attention_heads;
    config.intermediate_size = intermediate_size;
    config.max_position_embeddings = max_position_embeddings;
    config
}
