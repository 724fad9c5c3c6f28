//! # emosense
//!
//! Emotion and sentiment recognition for utterances of a video, from three
//! modalities at once: the transcript (BERT), 30 sampled frames (R(3D)-18)
//! and a log-mel spectrogram of the soundtrack (1D CNN). The three 128-d
//! embeddings are concatenated and classified by two heads, 7 emotions and
//! 3 sentiments.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use emosense::{PipelineConfig, Utterance, UtterancePipeline};
//!
//! let config = PipelineConfig::load("emosense.yaml")?;
//! let pipeline = UtterancePipeline::load(&config, "checkpoints", "tokenizer.json")?;
//!
//! let result = pipeline.process("episode.mp4", &Utterance::new(12.0, 14.5, "Oh my god!"))?;
//! println!("{} ({:.2})", result.emotions[0].label, result.emotions[0].confidence);
//! ```
//!
//! ## Stages
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Segment cut | `media` | clip file, removed on drop |
//! | Frame sampling | `video` | `(30, 3, 224, 224)` in [0, 1] |
//! | Audio features | `audio` | `(1, 64, 300)` normalized log-mel |
//! | Tokenization | `text` | 128 ids + attention mask |
//! | Model | `models` | 7 + 3 logits |
//! | Post-processing | `inference` | probabilities, top labels |
//!
//! The transcoder (`ffmpeg` / `ffprobe`) must be on the `PATH` or configured
//! through [`MediaConfig`].

pub mod audio;
pub mod config;
pub mod core;
pub mod inference;
pub mod media;
pub mod models;
pub mod text;
pub mod video;

pub use crate::config::{ArchitectureConfig, MediaConfig, PipelineConfig};
pub use crate::core::error::{EmoError, PipelineStage, Result};
pub use crate::inference::{
    Emotion, LoadedModel, ModelLoader, Prediction, Sentiment, Utterance, UtterancePipeline,
    UtterancePrediction,
};
pub use crate::models::{ModelInputs, ModelOutput, MultimodalSentimentModel, ParameterRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
