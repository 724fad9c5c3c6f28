//! Video frame decoding and fixed-length sampling

pub mod decoder;
mod sampler;

pub use decoder::{FfmpegVideoStream, RawFrame, VideoStream};
pub use sampler::{FrameSampler, FrameSequence};
