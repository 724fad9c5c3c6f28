//! Sample rate conversion using rubato sinc interpolation

use rubato::{
    calculate_cutoff, Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::core::error::{AudioOperation, EmoError, Result};

/// Default chunk size for processing
const CHUNK_SIZE: usize = 1024;

fn resampling_error(message: impl std::fmt::Display) -> EmoError {
    EmoError::audio_feature(AudioOperation::Resampling, message.to_string())
}

/// Mono sinc resampler
pub struct Resampler;

impl Resampler {
    /// Resample mono audio from `from_sr` to `to_sr`
    pub fn resample(samples: &[f32], from_sr: u32, to_sr: u32) -> Result<Vec<f32>> {
        if from_sr == 0 || to_sr == 0 {
            return Err(resampling_error(format!(
                "invalid sample rates {} -> {}",
                from_sr, to_sr
            )));
        }
        if from_sr == to_sr || samples.is_empty() {
            return Ok(samples.to_vec());
        }

        if samples.len() <= CHUNK_SIZE * 2 {
            return Self::resample_simple(samples, from_sr, to_sr);
        }
        Self::resample_chunked(samples, from_sr, to_sr)
    }

    /// Output length a resample from `from_sr` to `to_sr` aims for
    pub fn expected_len(input_len: usize, from_sr: u32, to_sr: u32) -> usize {
        (input_len as f64 * to_sr as f64 / from_sr as f64).round() as usize
    }

    fn resample_simple(samples: &[f32], from_sr: u32, to_sr: u32) -> Result<Vec<f32>> {
        let sinc_len = 256;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window,
        };

        let mut resampler =
            SincFixedIn::<f32>::new(to_sr as f64 / from_sr as f64, 2.0, params, samples.len(), 1)
                .map_err(resampling_error)?;

        let output = resampler
            .process(&[samples][..], None)
            .map_err(resampling_error)?;
        let output = output.into_iter().next().unwrap_or_default();
        Self::flush(&mut resampler, output, Self::expected_len(samples.len(), from_sr, to_sr))
    }

    fn resample_chunked(samples: &[f32], from_sr: u32, to_sr: u32) -> Result<Vec<f32>> {
        let sinc_len = 128;
        let window = WindowFunction::Blackman2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Quadratic,
            oversampling_factor: 256,
            window,
        };

        let ratio = to_sr as f64 / from_sr as f64;
        let mut resampler =
            SincFixedIn::<f32>::new(ratio, 1.1, params, CHUNK_SIZE, 1).map_err(resampling_error)?;

        let mut output_samples =
            Vec::with_capacity((samples.len() as f64 * ratio * 1.1) as usize);

        let mut chunks = samples.chunks_exact(CHUNK_SIZE);
        for chunk in chunks.by_ref() {
            let output = resampler
                .process(&[chunk][..], None)
                .map_err(resampling_error)?;
            if let Some(out) = output.into_iter().next() {
                output_samples.extend(out);
            }
        }

        let remainder = chunks.remainder();
        if !remainder.is_empty() {
            let output = resampler
                .process_partial(Some(&[remainder][..]), None)
                .map_err(resampling_error)?;
            if let Some(out) = output.into_iter().next() {
                output_samples.extend(out);
            }
        }

        Self::flush(
            &mut resampler,
            output_samples,
            Self::expected_len(samples.len(), from_sr, to_sr),
        )
    }

    /// Push the filter delay out with silence, then align the output to the input:
    /// the first `output_delay` samples are dropped and the length is `expected`.
    fn flush<R>(resampler: &mut R, mut output: Vec<f32>, expected: usize) -> Result<Vec<f32>>
    where
        R: RubatoResampler<f32>,
    {
        let delay = resampler.output_delay();
        while output.len() < delay + expected {
            let tail = resampler
                .process_partial(None::<&[&[f32]]>, None)
                .map_err(resampling_error)?;
            match tail.into_iter().next() {
                Some(out) if !out.is_empty() => output.extend(out),
                _ => break,
            }
        }

        output.drain(..delay.min(output.len()));
        output.resize(expected, 0.0);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_no_change() {
        let samples: Vec<f32> = (0..100).map(|i| (i as f32 * 0.01).sin()).collect();
        let result = Resampler::resample(&samples, 16000, 16000).unwrap();
        assert_eq!(result, samples);
    }

    #[test]
    fn test_zero_rate_is_error() {
        let err = Resampler::resample(&[0.1, 0.2], 0, 16000).unwrap_err();
        assert!(matches!(
            err,
            EmoError::AudioFeature {
                operation: AudioOperation::Resampling,
                ..
            }
        ));
    }

    #[test]
    fn test_downsample_44k_to_16k() {
        let samples: Vec<f32> = (0..44100)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
            .collect();

        let result = Resampler::resample(&samples, 44100, 16000).unwrap();
        assert_eq!(result.len(), Resampler::expected_len(samples.len(), 44100, 16000));
    }

    #[test]
    fn test_chunked_keeps_signal_tail() {
        // 2.5 chunks, so the last input block goes through the partial path
        let samples: Vec<f32> = (0..CHUNK_SIZE * 5 / 2)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48000.0).sin())
            .collect();

        let result = Resampler::resample(&samples, 48000, 16000).unwrap();
        assert_eq!(result.len(), Resampler::expected_len(samples.len(), 48000, 16000));

        let tail = &result[result.len() - 50..];
        let rms = (tail.iter().map(|v| v * v).sum::<f32>() / tail.len() as f32).sqrt();
        assert!(rms > 0.3, "tail rms {}", rms);
    }

    #[test]
    fn test_upsample_short_clip() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin()).collect();
        let result = Resampler::resample(&samples, 8000, 16000).unwrap();
        assert_eq!(result.len(), 2000);
    }
}
