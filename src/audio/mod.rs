//! Audio modality
//!
//! - Audio file loading (WAV via hound, other containers via symphonia)
//! - Sample rate conversion to 16 kHz
//! - Mel spectrogram computation (64 HTK bands, power, optional log)
//! - Fixed-shape normalized features for the audio encoder

mod features;
mod loader;
mod mel;
mod resampler;

pub use features::{AudioFeatureExtractor, MelFeatures};
pub use loader::AudioLoader;
pub use mel::MelSpectrogram;
pub use resampler::Resampler;
