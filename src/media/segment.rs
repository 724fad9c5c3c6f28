//! Utterance segment extraction
//!
//! Cuts `[start, end]` out of a source video and re-encodes it with fixed
//! codecs so every downstream decoder sees the same container layout.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::ffmpeg::{format_seconds, Transcoder};
use crate::config::MediaConfig;
use crate::core::error::{EmoError, Result};

/// Time range of an utterance in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    start: f64,
    end: f64,
}

impl TimeRange {
    /// Validate and build a range; `start` must be non-negative and before `end`
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() {
            return Err(EmoError::invalid_input(
                "time_range",
                format!("non-finite bounds [{}, {}]", start, end),
            ));
        }
        if start < 0.0 {
            return Err(EmoError::invalid_input(
                "time_range",
                format!("start {} is negative", start),
            ));
        }
        if start >= end {
            return Err(EmoError::invalid_input(
                "time_range",
                format!("start {} is not before end {}", start, end),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A media file holding one utterance
///
/// Clips created by [`SegmentExtractor`] own their file and delete it on drop.
#[derive(Debug)]
pub struct VideoClip {
    path: PathBuf,
    range: Option<TimeRange>,
    owned: bool,
}

impl VideoClip {
    /// Wrap a clip that already exists on disk; it is never deleted
    pub fn existing<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            range: None,
            owned: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Range this clip was cut from, if it came from a segment extraction
    pub fn range(&self) -> Option<TimeRange> {
        self.range
    }

    /// Keep the file after the clip is dropped
    pub fn persist(mut self) -> PathBuf {
        self.owned = false;
        self.path.clone()
    }
}

impl Drop for VideoClip {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove clip {:?}: {}", self.path, e);
                }
            }
        }
    }
}

/// Cuts utterance clips out of longer source videos
#[derive(Debug, Clone)]
pub struct SegmentExtractor {
    transcoder: Transcoder,
    scratch_dir: PathBuf,
    video_codec: String,
    audio_codec: String,
}

impl SegmentExtractor {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            transcoder: Transcoder::new(config),
            scratch_dir: config.scratch_dir.clone(),
            video_codec: config.video_codec.clone(),
            audio_codec: config.audio_codec.clone(),
        }
    }

    /// Write `range` of `source` to a new clip in the scratch directory
    pub fn extract<P: AsRef<Path>>(&self, source: P, range: TimeRange) -> Result<VideoClip> {
        let source = source.as_ref();
        let fail = |message: String| EmoError::SegmentExtraction {
            source_path: source.to_path_buf(),
            start: range.start(),
            end: range.end(),
            message,
        };

        std::fs::create_dir_all(&self.scratch_dir)
            .map_err(|e| fail(format!("cannot create scratch dir {:?}: {}", self.scratch_dir, e)))?;

        let output = self.scratch_dir.join(segment_file_name(source, range));
        debug!("Extracting {:?} [{:.3}s, {:.3}s] -> {:?}", source, range.start(), range.end(), output);

        let args: Vec<OsString> = vec![
            "-y".into(),
            "-v".into(),
            "error".into(),
            "-i".into(),
            source.as_os_str().to_os_string(),
            "-ss".into(),
            format_seconds(range.start()).into(),
            "-to".into(),
            format_seconds(range.end()).into(),
            "-c:v".into(),
            self.video_codec.clone().into(),
            "-c:a".into(),
            self.audio_codec.clone().into(),
            output.as_os_str().to_os_string(),
        ];

        // Owned from here on, so any partial artifact is removed on failure
        let clip = VideoClip {
            path: output,
            range: Some(range),
            owned: true,
        };

        self.transcoder.run(&args).map_err(fail)?;

        let size = std::fs::metadata(clip.path())
            .map(|m| m.len())
            .map_err(|_| fail(format!("transcoder produced no file at {:?}", clip.path())))?;
        if size == 0 {
            return Err(fail(format!("transcoder produced an empty file at {:?}", clip.path())));
        }

        info!(
            "Extracted {:.3}s segment from {:?} ({} bytes)",
            range.duration(),
            source,
            size
        );
        Ok(clip)
    }
}

/// Unique per invocation: source stem, range in ms and a random fragment
fn segment_file_name(source: &Path, range: TimeRange) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "source".to_string());
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}.mp4",
        stem,
        (range.start() * 1000.0).round() as u64,
        (range.end() * 1000.0).round() as u64,
        &id[..8]
    )
}
