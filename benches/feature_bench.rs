//! Benchmarks for feature extraction
//!
//! Run with: cargo bench

use candle_core::Device;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::path::Path;
use std::time::Duration;

use emosense::audio::{AudioFeatureExtractor, MelSpectrogram};
use emosense::config::{AudioConfig, MediaConfig, VideoConfig};
use emosense::video::{FrameSampler, RawFrame, VideoStream};
use emosense::Result;

/// In-memory decoder yielding `frames` identical gradient frames
struct GradientStream {
    width: u32,
    height: u32,
    frames: usize,
    position: usize,
}

impl GradientStream {
    fn new(width: u32, height: u32, frames: usize) -> Self {
        Self {
            width,
            height,
            frames,
            position: 0,
        }
    }
}

impl VideoStream for GradientStream {
    fn read_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.position >= self.frames {
            return Ok(None);
        }
        self.position += 1;
        let data = (0..self.width * self.height * 3)
            .map(|i| (i % 256) as u8)
            .collect();
        RawFrame::from_rgb(self.width, self.height, data).map(Some)
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}

fn sine(seconds: f32) -> Vec<f32> {
    let n = (16000.0 * seconds) as usize;
    (0..n)
        .map(|i| (i as f32 / 16000.0 * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5)
        .collect()
}

/// Benchmark mel spectrogram computation
fn bench_mel_spectrogram(c: &mut Criterion) {
    let mel = MelSpectrogram::from_config(&AudioConfig::default());

    let mut group = c.benchmark_group("mel_spectrogram");
    for seconds in [1.0f32, 5.0, 10.0] {
        let audio = sine(seconds);
        group.bench_with_input(BenchmarkId::new("compute", seconds), &audio, |b, audio| {
            b.iter(|| mel.compute(black_box(audio)))
        });
    }
    group.finish();
}

/// Benchmark normalized, fixed-shape audio features (resampling included)
fn bench_audio_features(c: &mut Criterion) {
    let extractor = AudioFeatureExtractor::new(
        &MediaConfig::default(),
        &AudioConfig::default(),
        &Device::Cpu,
    );
    let audio = sine(4.0);

    let mut group = c.benchmark_group("audio_features");
    group.bench_function("16k", |b| {
        b.iter(|| extractor.extract_from_waveform(black_box(&audio), 16000))
    });
    group.bench_function("44k1", |b| {
        b.iter(|| extractor.extract_from_waveform(black_box(&audio), 44100))
    });
    group.finish();
}

/// Benchmark frame resize + layout for common source resolutions
fn bench_frame_sampling(c: &mut Criterion) {
    let sampler = FrameSampler::new(&MediaConfig::default(), &VideoConfig::default(), &Device::Cpu);

    let mut group = c.benchmark_group("frame_sampling");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);
    for (width, height) in [(224u32, 224u32), (640, 360), (1280, 720)] {
        group.bench_with_input(
            BenchmarkId::new("sample_30", format!("{}x{}", width, height)),
            &(width, height),
            |b, &(width, height)| {
                b.iter(|| {
                    let mut stream = GradientStream::new(width, height, 48);
                    sampler.sample_stream(&mut stream, Path::new("bench.mp4"))
                })
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_mel_spectrogram,
    bench_audio_features,
    bench_frame_sampling
);
criterion_main!(benches);
