//! Fixed-length frame sampling
//!
//! Produces exactly `num_frames` RGB frames of `frame_size x frame_size`,
//! scaled to [0, 1] and laid out (frame, channel, height, width). Short clips
//! are tail-padded with black frames; long clips keep their first frames.

use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;
use tracing::{debug, info};

use super::decoder::{FfmpegVideoStream, RawFrame, VideoStream};
use crate::config::{MediaConfig, VideoConfig};
use crate::core::error::{EmoError, Result};
use crate::media::{Transcoder, VideoClip};

/// Sampled frames of one clip
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frames: Tensor,
    real_frames: usize,
}

impl FrameSequence {
    /// `(num_frames, 3, size, size)` f32 in [0, 1]
    pub fn tensor(&self) -> &Tensor {
        &self.frames
    }

    pub fn into_tensor(self) -> Tensor {
        self.frames
    }

    /// Frames decoded from the clip, before padding
    pub fn real_frames(&self) -> usize {
        self.real_frames
    }

    pub fn num_frames(&self) -> usize {
        self.frames.dims()[0]
    }

    pub fn padded_frames(&self) -> usize {
        self.num_frames() - self.real_frames
    }
}

/// Decodes clips into fixed-length frame tensors
#[derive(Debug, Clone)]
pub struct FrameSampler {
    transcoder: Transcoder,
    num_frames: usize,
    frame_size: u32,
    device: Device,
}

impl FrameSampler {
    pub fn new(media: &MediaConfig, video: &VideoConfig, device: &Device) -> Self {
        Self {
            transcoder: Transcoder::new(media),
            num_frames: video.num_frames,
            frame_size: video.frame_size,
            device: device.clone(),
        }
    }

    /// Sample a clip through the transcoder. The decoder process ends with this call.
    pub fn sample(&self, clip: &VideoClip) -> Result<FrameSequence> {
        let mut stream = FfmpegVideoStream::open(&self.transcoder, clip.path())?;
        self.sample_stream(&mut stream, clip.path())
    }

    /// Sample any frame source; `path` is only used for error reporting
    pub fn sample_stream<S>(&self, stream: &mut S, path: &Path) -> Result<FrameSequence>
    where
        S: VideoStream + ?Sized,
    {
        match stream.read_frame()? {
            Some(_) => stream.rewind()?,
            None => {
                return Err(EmoError::video_decode(
                    path,
                    "could not decode the first frame",
                ))
            }
        }

        let plane = self.frame_size as usize * self.frame_size as usize;
        let frame_len = 3 * plane;
        let mut data: Vec<f32> = Vec::with_capacity(self.num_frames * frame_len);
        let mut real_frames = 0;

        while real_frames < self.num_frames {
            let Some(frame) = stream.read_frame()? else {
                break;
            };
            data.extend(self.frame_to_chw(frame, path)?);
            real_frames += 1;
        }

        if real_frames == 0 {
            return Err(EmoError::NoFramesExtracted {
                path: path.to_path_buf(),
            });
        }

        data.resize(self.num_frames * frame_len, 0.0);
        let size = self.frame_size as usize;
        let frames = Tensor::from_vec(data, (self.num_frames, 3, size, size), &self.device)?;

        if real_frames < self.num_frames {
            debug!(
                "Padded {:?} with {} black frames",
                path,
                self.num_frames - real_frames
            );
        }
        info!("Sampled {} frames from {:?}", real_frames, path);

        Ok(FrameSequence {
            frames,
            real_frames,
        })
    }

    fn frame_to_chw(&self, frame: RawFrame, path: &Path) -> Result<Vec<f32>> {
        let (width, height) = (frame.width(), frame.height());
        let image = RgbImage::from_raw(width, height, frame.into_data())
            .ok_or_else(|| EmoError::video_decode(path, "frame buffer does not match its size"))?;

        let size = self.frame_size;
        let image = if width == size && height == size {
            image
        } else {
            imageops::resize(&image, size, size, FilterType::Triangle)
        };

        let plane = size as usize * size as usize;
        let mut chw = vec![0.0f32; 3 * plane];
        for (i, pixel) in image.pixels().enumerate() {
            for c in 0..3 {
                chw[c * plane + i] = pixel[c] as f32 / 255.0;
            }
        }
        Ok(chw)
    }
}
