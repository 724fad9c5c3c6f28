//! Mel spectrogram computation
//!
//! torchaudio-compatible power mel spectrogram: periodic Hann window, centred
//! frames with reflect padding, |STFT|^2, HTK mel scale with unnormalized
//! triangular filters. Natural-log compression is optional.

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

use crate::config::AudioConfig;
use crate::core::error::{AudioOperation, EmoError, Result};

/// Energies below this are clamped before the log
const LOG_FLOOR: f32 = 1e-6;

/// Mel spectrogram computer
pub struct MelSpectrogram {
    /// FFT size (also the window length)
    pub n_fft: usize,
    /// Hop length between frames
    pub hop_length: usize,
    /// Number of mel bands
    pub n_mels: usize,
    /// Sample rate the filterbank is built for
    pub sample_rate: u32,
    /// Apply natural-log compression
    pub log_mel: bool,
    /// Mel filterbank, `[n_mels][n_fft / 2 + 1]`
    mel_filters: Vec<Vec<f32>>,
    window: Vec<f32>,
    fft: Arc<dyn rustfft::Fft<f32>>,
}

impl std::fmt::Debug for MelSpectrogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelSpectrogram")
            .field("n_fft", &self.n_fft)
            .field("hop_length", &self.hop_length)
            .field("n_mels", &self.n_mels)
            .field("sample_rate", &self.sample_rate)
            .field("log_mel", &self.log_mel)
            .finish()
    }
}

impl MelSpectrogram {
    /// Create a mel spectrogram computer covering 0 Hz to Nyquist
    pub fn new(sample_rate: u32, n_fft: usize, hop_length: usize, n_mels: usize) -> Self {
        let window = Self::hann_window(n_fft);
        let mel_filters =
            Self::mel_filterbank(n_fft, n_mels, sample_rate, 0.0, sample_rate as f32 / 2.0);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_fft);

        Self {
            n_fft,
            hop_length,
            n_mels,
            sample_rate,
            log_mel: true,
            mel_filters,
            window,
            fft,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(config.sample_rate, config.n_fft, config.hop_length, config.n_mels)
            .with_log(config.log_mel)
    }

    pub fn with_log(mut self, log_mel: bool) -> Self {
        self.log_mel = log_mel;
        self
    }

    /// Frames produced for `audio_len` samples (centred framing)
    pub fn num_frames(&self, audio_len: usize) -> usize {
        audio_len / self.hop_length + 1
    }

    /// Compute the spectrogram as `[n_mels][n_frames]`
    pub fn compute(&self, audio: &[f32]) -> Result<Vec<Vec<f32>>> {
        if audio.is_empty() {
            return Err(EmoError::audio_feature(
                AudioOperation::MelSpectrogram,
                "empty waveform",
            ));
        }

        let power = self.power_spectrum(audio);
        let mut mel = self.apply_mel_filters(&power);
        if self.log_mel {
            for row in mel.iter_mut() {
                for v in row.iter_mut() {
                    *v = v.max(LOG_FLOOR).ln();
                }
            }
        }
        Ok(mel)
    }

    /// |STFT|^2, one row per frame with `n_fft / 2 + 1` bins
    fn power_spectrum(&self, audio: &[f32]) -> Vec<Vec<f32>> {
        let pad = (self.n_fft / 2) as isize;
        let num_frames = self.num_frames(audio.len());
        let mut frames = Vec::with_capacity(num_frames);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.n_fft];

        for i in 0..num_frames {
            let start = (i * self.hop_length) as isize - pad;
            for (j, slot) in buffer.iter_mut().enumerate() {
                let sample = audio[reflect_index(start + j as isize, audio.len())];
                *slot = Complex::new(sample * self.window[j], 0.0);
            }
            self.fft.process(&mut buffer);
            frames.push(
                buffer[..self.n_fft / 2 + 1]
                    .iter()
                    .map(|c| c.norm_sqr())
                    .collect(),
            );
        }
        frames
    }

    fn apply_mel_filters(&self, power: &[Vec<f32>]) -> Vec<Vec<f32>> {
        self.mel_filters
            .iter()
            .map(|filter| {
                power
                    .iter()
                    .map(|frame| filter.iter().zip(frame.iter()).map(|(f, p)| f * p).sum())
                    .collect()
            })
            .collect()
    }

    /// Periodic Hann window
    fn hann_window(size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
            .collect()
    }

    fn hz_to_mel(hz: f32) -> f32 {
        2595.0 * (1.0 + hz / 700.0).log10()
    }

    fn mel_to_hz(mel: f32) -> f32 {
        700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
    }

    /// Triangular filters evenly spaced on the HTK mel scale, peak 1, no area normalization
    fn mel_filterbank(n_fft: usize, n_mels: usize, sr: u32, fmin: f32, fmax: f32) -> Vec<Vec<f32>> {
        let n_freqs = n_fft / 2 + 1;
        let freq_bins: Vec<f32> = (0..n_freqs)
            .map(|i| i as f32 * sr as f32 / n_fft as f32)
            .collect();

        let mel_min = Self::hz_to_mel(fmin);
        let mel_max = Self::hz_to_mel(fmax);
        let hz_points: Vec<f32> = (0..=n_mels + 1)
            .map(|i| {
                Self::mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
            })
            .collect();

        (0..n_mels)
            .map(|m| {
                let (left, center, right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
                freq_bins
                    .iter()
                    .map(|&freq| {
                        let up = (freq - left) / (center - left);
                        let down = (right - freq) / (right - center);
                        up.min(down).max(0.0)
                    })
                    .collect()
            })
            .collect()
    }
}

/// Index into `0..len` reflecting at both edges without repeating the edge sample
fn reflect_index(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    let period = 2 * last;
    let mut m = i.rem_euclid(period);
    if m > last {
        m = period - m;
    }
    m as usize
}
