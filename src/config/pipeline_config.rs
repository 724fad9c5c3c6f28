//! Pipeline configuration loaded from YAML
//!
//! Every field has a default, so an empty file (or no file at all) yields the
//! production settings: 30 frames of 224x224, a 64x300 mel spectrogram at
//! 16 kHz and 128 text tokens.

use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::ArchitectureConfig;
use crate::core::error::{EmoError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// External transcoder and scratch space
    pub media: MediaConfig,

    /// Frame sampling
    pub video: VideoConfig,

    /// Mel spectrogram extraction
    pub audio: AudioConfig,

    /// Tokenization
    pub text: TextConfig,

    /// Compute device selection
    pub device: DeviceConfig,

    /// Maximum utterances processed concurrently by batch runs
    pub max_parallelism: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            media: MediaConfig::default(),
            video: VideoConfig::default(),
            audio: AudioConfig::default(),
            text: TextConfig::default(),
            device: DeviceConfig::default(),
            max_parallelism: 4,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| EmoError::Config {
            message: format!("Failed to read config file: {}", e),
            path: Some(path.to_path_buf()),
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| EmoError::Config {
            message: format!("Failed to parse config YAML: {}", e),
            path: Some(path.to_path_buf()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break the fixed-shape guarantees
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("video.num_frames", self.video.num_frames),
            ("video.frame_size", self.video.frame_size as usize),
            ("audio.sample_rate", self.audio.sample_rate as usize),
            ("audio.n_mels", self.audio.n_mels),
            ("audio.n_fft", self.audio.n_fft),
            ("audio.hop_length", self.audio.hop_length),
            ("audio.max_frames", self.audio.max_frames),
            ("text.max_length", self.text.max_length),
            ("max_parallelism", self.max_parallelism),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(EmoError::Config {
                    message: format!("{} must be greater than zero", field),
                    path: None,
                });
            }
        }
        self.check_mel_bins(ArchitectureConfig::default().audio_mel_bins)
    }

    /// `validate`, plus the shapes a concrete network accepts
    pub fn validate_for(&self, architecture: &ArchitectureConfig) -> Result<()> {
        self.validate()?;
        self.check_mel_bins(architecture.audio_mel_bins)?;

        let positions = architecture.bert.max_position_embeddings;
        if self.text.max_length > positions {
            return Err(EmoError::Config {
                message: format!(
                    "text.max_length {} exceeds the text backbone's {} positions",
                    self.text.max_length, positions
                ),
                path: None,
            });
        }
        Ok(())
    }

    fn check_mel_bins(&self, expected: usize) -> Result<()> {
        if self.audio.n_mels != expected {
            return Err(EmoError::Config {
                message: format!(
                    "audio.n_mels is {} but the audio encoder takes {} mel bins",
                    self.audio.n_mels, expected
                ),
                path: None,
            });
        }
        Ok(())
    }
}

/// External transcoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// ffmpeg executable (resolved through PATH when not absolute)
    pub ffmpeg_path: PathBuf,
    /// ffprobe executable
    pub ffprobe_path: PathBuf,
    /// Video codec used when re-encoding utterance segments
    pub video_codec: String,
    /// Audio codec used when re-encoding utterance segments
    pub audio_codec: String,
    /// Directory for segment clips and demuxed waveforms
    pub scratch_dir: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            scratch_dir: std::env::temp_dir(),
        }
    }
}

/// Frame sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Frames per sequence (pad/truncate target)
    pub num_frames: usize,
    /// Square output edge in pixels
    pub frame_size: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            num_frames: 30,
            frame_size: 224,
        }
    }
}

/// How the mel spectrogram is standardized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MelNormalization {
    /// One mean/std over the whole tensor (what trained checkpoints expect)
    #[default]
    Global,
    /// Independent mean/std per mel bin
    PerBin,
}

/// Mel spectrogram configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Target sample rate for the demuxed waveform
    pub sample_rate: u32,
    /// Number of mel bins
    pub n_mels: usize,
    /// FFT size
    pub n_fft: usize,
    /// Hop length between frames
    pub hop_length: usize,
    /// Time frames kept (pad/truncate target)
    pub max_frames: usize,
    /// Apply natural-log compression to mel energies
    pub log_mel: bool,
    /// Standardization strategy
    pub normalization: MelNormalization,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            n_mels: 64,
            n_fft: 1024,
            hop_length: 512,
            max_frames: 300,
            log_mel: true,
            normalization: MelNormalization::Global,
        }
    }
}

/// Tokenizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Token sequence length after padding/truncation
    pub max_length: usize,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self { max_length: 128 }
    }
}

/// Compute device selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Use CUDA when available (falls back to CPU)
    pub use_gpu: bool,
    /// CUDA device ordinal
    pub gpu_ordinal: usize,
}

impl DeviceConfig {
    /// Resolve to a candle device
    pub fn device(&self) -> Result<Device> {
        if self.use_gpu {
            Ok(Device::cuda_if_available(self.gpu_ordinal)?)
        } else {
            Ok(Device::Cpu)
        }
    }
}
