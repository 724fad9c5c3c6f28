//! Media plumbing around the external transcoder
//!
//! - `ffmpeg`: process wrapper for ffmpeg/ffprobe
//! - `segment`: utterance clip extraction with scoped clip lifetime

pub mod ffmpeg;
mod segment;

pub use ffmpeg::{StreamInfo, Transcoder};
pub use segment::{SegmentExtractor, TimeRange, VideoClip};
