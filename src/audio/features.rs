//! Fixed-shape log-mel features for one utterance
//!
//! Demuxes the clip's audio track to 16-bit mono PCM, computes a mel
//! spectrogram, standardizes it and pads or truncates the time axis to a
//! fixed frame count. Output is `(1, n_mels, max_frames)`.

use candle_core::{Device, Tensor};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info};

use super::{AudioLoader, MelSpectrogram, Resampler};
use crate::config::{AudioConfig, MediaConfig, MelNormalization};
use crate::core::error::{AudioOperation, EmoError, Result};
use crate::media::{Transcoder, VideoClip};

/// Standard deviations below this are treated as this value
const MIN_STD: f32 = 1e-8;

/// Normalized mel spectrogram of one clip
#[derive(Debug, Clone)]
pub struct MelFeatures {
    mel: Tensor,
    real_frames: usize,
}

impl MelFeatures {
    /// `(1, n_mels, max_frames)` f32
    pub fn tensor(&self) -> &Tensor {
        &self.mel
    }

    pub fn into_tensor(self) -> Tensor {
        self.mel
    }

    /// Spectrogram frames computed from the waveform, before padding or truncation
    pub fn real_frames(&self) -> usize {
        self.real_frames
    }
}

/// Audio modality feature extractor
#[derive(Debug)]
pub struct AudioFeatureExtractor {
    transcoder: Transcoder,
    scratch_dir: PathBuf,
    sample_rate: u32,
    max_frames: usize,
    normalization: MelNormalization,
    mel: MelSpectrogram,
    device: Device,
}

impl AudioFeatureExtractor {
    pub fn new(media: &MediaConfig, audio: &AudioConfig, device: &Device) -> Self {
        Self {
            transcoder: Transcoder::new(media),
            scratch_dir: media.scratch_dir.clone(),
            sample_rate: audio.sample_rate,
            max_frames: audio.max_frames,
            normalization: audio.normalization,
            mel: MelSpectrogram::from_config(audio),
            device: device.clone(),
        }
    }

    /// Features of a clip's audio track. The demuxed waveform is removed on return.
    pub fn extract(&self, clip: &VideoClip) -> Result<MelFeatures> {
        let wav = self.demux(clip.path())?;
        let (samples, sample_rate) = AudioLoader::load_wav(&wav)?;
        drop(wav);
        self.extract_from_waveform(&samples, sample_rate)
    }

    /// Features of a standalone audio file (WAV, FLAC, MP3, OGG)
    pub fn extract_from_audio_file<P: AsRef<Path>>(&self, path: P) -> Result<MelFeatures> {
        let (samples, sample_rate) = AudioLoader::load(path)?;
        self.extract_from_waveform(&samples, sample_rate)
    }

    /// Features of an in-memory mono waveform
    pub fn extract_from_waveform(&self, samples: &[f32], sample_rate: u32) -> Result<MelFeatures> {
        if samples.is_empty() {
            return Err(EmoError::audio_feature(
                AudioOperation::Loading,
                "waveform has no samples",
            ));
        }

        let resampled;
        let samples = if sample_rate != self.sample_rate {
            debug!("Resampling {} Hz -> {} Hz", sample_rate, self.sample_rate);
            resampled = Resampler::resample(samples, sample_rate, self.sample_rate)?;
            &resampled[..]
        } else {
            samples
        };

        let mut mel = self.mel.compute(samples)?;
        let real_frames = mel.first().map(|row| row.len()).unwrap_or(0);

        match self.normalization {
            MelNormalization::Global => normalize_global(&mut mel)?,
            MelNormalization::PerBin => normalize_per_bin(&mut mel)?,
        }

        let n_mels = mel.len();
        let mut data = Vec::with_capacity(n_mels * self.max_frames);
        for row in &mel {
            let kept = row.len().min(self.max_frames);
            data.extend_from_slice(&row[..kept]);
            data.extend(std::iter::repeat(0.0f32).take(self.max_frames - kept));
        }

        let mel = Tensor::from_vec(data, (1, n_mels, self.max_frames), &self.device)?;
        debug!(
            "Mel features: {} frames computed, {} kept",
            real_frames,
            real_frames.min(self.max_frames)
        );

        Ok(MelFeatures { mel, real_frames })
    }

    /// Transcode the clip's audio to a scratch WAV at the target rate
    fn demux(&self, clip: &Path) -> Result<TempPath> {
        let fail = |message: String| EmoError::AudioExtraction {
            path: clip.to_path_buf(),
            message,
        };

        std::fs::create_dir_all(&self.scratch_dir)
            .map_err(|e| fail(format!("cannot create scratch dir {:?}: {}", self.scratch_dir, e)))?;
        let wav = tempfile::Builder::new()
            .prefix("audio_")
            .suffix(".wav")
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| fail(format!("cannot create scratch file: {}", e)))?
            .into_temp_path();

        let args: Vec<OsString> = vec![
            "-y".into(),
            "-v".into(),
            "error".into(),
            "-i".into(),
            clip.as_os_str().to_os_string(),
            "-vn".into(),
            "-acodec".into(),
            "pcm_s16le".into(),
            "-ar".into(),
            self.sample_rate.to_string().into(),
            "-ac".into(),
            "1".into(),
            wav.as_os_str().to_os_string(),
        ];
        self.transcoder.run(&args).map_err(fail)?;

        info!("Demuxed audio of {:?}", clip);
        Ok(wav)
    }
}

/// Mean and unbiased standard deviation, std floored at `MIN_STD`
fn mean_std<'a, I>(values: I, count: usize) -> (f32, f32)
where
    I: Iterator<Item = &'a f32> + Clone,
{
    let mean = values.clone().map(|&v| v as f64).sum::<f64>() / count as f64;
    let var = if count > 1 {
        values.map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / (count - 1) as f64
    } else {
        0.0
    };
    (mean as f32, (var.sqrt() as f32).max(MIN_STD))
}

fn check_finite(mel: &[Vec<f32>]) -> Result<()> {
    if mel.iter().flatten().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(EmoError::audio_feature(
            AudioOperation::Normalization,
            "spectrogram contains non-finite values",
        ))
    }
}

/// Zero mean, unit variance over the whole spectrogram
fn normalize_global(mel: &mut [Vec<f32>]) -> Result<()> {
    check_finite(mel)?;
    let count: usize = mel.iter().map(|row| row.len()).sum();
    let (mean, std) = mean_std(mel.iter().flatten(), count);
    for v in mel.iter_mut().flatten() {
        *v = (*v - mean) / std;
    }
    Ok(())
}

/// Zero mean, unit variance per mel bin
fn normalize_per_bin(mel: &mut [Vec<f32>]) -> Result<()> {
    check_finite(mel)?;
    for row in mel.iter_mut() {
        let (mean, std) = mean_std(row.iter(), row.len());
        for v in row.iter_mut() {
            *v = (*v - mean) / std;
        }
    }
    Ok(())
}
