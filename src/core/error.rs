//! Structured error handling for the feature-extraction and fusion pipeline
//!
//! Every failure is terminal for the utterance being processed. Variants
//! identify the stage that failed and carry the underlying cause string.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias with EmoError
pub type Result<T> = std::result::Result<T, EmoError>;

/// Main error type for emosense
#[derive(Error, Debug, Clone)]
pub enum EmoError {
    /// Cutting the utterance clip out of the source video failed
    #[error("Segment extraction failed for {source_path:?} [{start:.3}s - {end:.3}s]: {message}")]
    SegmentExtraction {
        source_path: PathBuf,
        start: f64,
        end: f64,
        message: String,
    },

    /// The clip's video stream could not be opened, or its first frame could not be decoded
    #[error("Video decode error for {path:?}: {message}")]
    VideoDecode { path: PathBuf, message: String },

    /// The video stream opened but produced no frames
    #[error("No frames extracted from {path:?}")]
    NoFramesExtracted { path: PathBuf },

    /// The transcoder could not demux the clip's audio to PCM
    #[error("Audio extraction failed for {path:?}: {message}")]
    AudioExtraction { path: PathBuf, message: String },

    /// Any later audio processing failure
    #[error("Audio feature error ({operation}): {message}")]
    AudioFeature {
        operation: AudioOperation,
        message: String,
    },

    /// Neither the primary nor the fallback weights path exists
    #[error("Model file not found (tried: {})", join_paths(.attempted))]
    ModelFileNotFound { attempted: Vec<PathBuf> },

    /// Weights file exists but does not satisfy the architecture
    #[error("Model loading error: {message}")]
    ModelLoad {
        message: String,
        path: Option<PathBuf>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Caller supplied an invalid argument
    #[error("Invalid input ({field}): {message}")]
    InvalidInput { field: String, message: String },

    /// Tokenizer loading or encoding failed
    #[error("Tokenization error: {message}")]
    Tokenization { message: String },

    /// I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
    },

    /// Tensor shape or backend failure
    #[error("Tensor operation failed: {message}")]
    Tensor { message: String },
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl EmoError {
    /// Pipeline stage the error belongs to
    pub fn stage(&self) -> PipelineStage {
        match self {
            EmoError::SegmentExtraction { .. } => PipelineStage::SegmentExtraction,
            EmoError::VideoDecode { .. } | EmoError::NoFramesExtracted { .. } => {
                PipelineStage::FrameSampling
            }
            EmoError::AudioExtraction { .. } | EmoError::AudioFeature { .. } => {
                PipelineStage::AudioFeatures
            }
            EmoError::Tokenization { .. } => PipelineStage::Tokenization,
            EmoError::ModelFileNotFound { .. } | EmoError::ModelLoad { .. } => {
                PipelineStage::ModelLoading
            }
            EmoError::Tensor { .. } => PipelineStage::Inference,
            EmoError::Config { .. } | EmoError::InvalidInput { .. } | EmoError::Io { .. } => {
                PipelineStage::Setup
            }
        }
    }

    pub(crate) fn video_decode(path: &Path, message: impl Into<String>) -> Self {
        EmoError::VideoDecode {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub(crate) fn audio_feature(operation: AudioOperation, message: impl Into<String>) -> Self {
        EmoError::AudioFeature {
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        EmoError::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Stages of the per-utterance pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Setup,
    SegmentExtraction,
    FrameSampling,
    AudioFeatures,
    Tokenization,
    ModelLoading,
    Inference,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Setup => write!(f, "setup"),
            PipelineStage::SegmentExtraction => write!(f, "segment extraction"),
            PipelineStage::FrameSampling => write!(f, "frame sampling"),
            PipelineStage::AudioFeatures => write!(f, "audio features"),
            PipelineStage::Tokenization => write!(f, "tokenization"),
            PipelineStage::ModelLoading => write!(f, "model loading"),
            PipelineStage::Inference => write!(f, "inference"),
        }
    }
}

/// Audio operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOperation {
    Loading,
    Resampling,
    MelSpectrogram,
    Normalization,
}

impl fmt::Display for AudioOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioOperation::Loading => write!(f, "loading"),
            AudioOperation::Resampling => write!(f, "resampling"),
            AudioOperation::MelSpectrogram => write!(f, "mel spectrogram computation"),
            AudioOperation::Normalization => write!(f, "normalization"),
        }
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for EmoError {
    fn from(err: std::io::Error) -> Self {
        EmoError::Io {
            message: err.to_string(),
            path: None,
        }
    }
}

/// Convert from candle_core::Error
impl From<candle_core::Error> for EmoError {
    fn from(err: candle_core::Error) -> Self {
        EmoError::Tensor {
            message: err.to_string(),
        }
    }
}

/// Convert from serde_yaml::Error
impl From<serde_yaml::Error> for EmoError {
    fn from(err: serde_yaml::Error) -> Self {
        EmoError::Config {
            message: err.to_string(),
            path: None,
        }
    }
}
