//! Audio file loading
//!
//! WAV files are read with hound. Anything else (FLAC, MP3, OGG, ...) goes
//! through symphonia. Samples come back mono f32 in [-1, 1] at the file's own
//! sample rate; resampling is the caller's job.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::core::error::{AudioOperation, EmoError, Result};

fn loading_error(path: &Path, message: impl std::fmt::Display) -> EmoError {
    EmoError::audio_feature(AudioOperation::Loading, format!("{:?}: {}", path, message))
}

/// Decodes audio files to mono samples
pub struct AudioLoader;

impl AudioLoader {
    /// Load any supported file, returning `(samples, sample_rate)`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32)> {
        let path = path.as_ref();
        if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("wav")) {
            return Self::load_wav(path);
        }
        Self::load_with_symphonia(path)
    }

    /// Load a WAV file; a sample that fails to decode fails the whole load
    pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32)> {
        let path = path.as_ref();
        let reader = hound::WavReader::open(path).map_err(|e| loading_error(path, e))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| loading_error(path, e))?,
            hound::SampleFormat::Int => {
                let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| loading_error(path, e))?
            }
        };

        Ok((downmix(samples, spec.channels as usize), spec.sample_rate))
    }

    fn load_with_symphonia(path: &Path) -> Result<(Vec<f32>, u32)> {
        let src = File::open(path).map_err(|e| loading_error(path, e))?;
        let mss = MediaSourceStream::new(Box::new(src), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| loading_error(path, format!("unsupported format: {}", e)))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| loading_error(path, "no decodable audio track"))?;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| loading_error(path, "unknown sample rate"))?;
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
        let track_id = track.id;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| loading_error(path, format!("unsupported codec: {}", e)))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(loading_error(path, format!("packet read failed: {}", e))),
            };
            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let buf = sample_buf.get_or_insert_with(|| {
                        SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
                    });
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
                // Corrupt packets are skipped, as players do
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(loading_error(path, format!("decode failed: {}", e))),
            }
        }

        Ok((downmix(samples, channels), sample_rate))
    }
}

/// Average interleaved channels down to mono
fn downmix(samples: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples;
    }
    samples
        .chunks(channels)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect()
}
