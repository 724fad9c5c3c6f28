//! Integration tests for emosense
//!
//! The transcoder is replaced by small shell scripts so that segment cutting,
//! frame decoding and audio demuxing run through the real process plumbing.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use serial_test::serial;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use emosense::audio::AudioFeatureExtractor;
use emosense::inference::{Utterance, UtterancePipeline};
use emosense::media::{SegmentExtractor, TimeRange, VideoClip};
use emosense::text::TextTokenizer;
use emosense::video::FrameSampler;
use emosense::{ArchitectureConfig, EmoError, ModelLoader, MultimodalSentimentModel, PipelineConfig};

const TOKENIZER_JSON: &str = r#"{
    "version": "1.0",
    "truncation": null,
    "padding": null,
    "added_tokens": [],
    "normalizer": {"type": "Lowercase"},
    "pre_tokenizer": {"type": "Whitespace"},
    "post_processor": {
        "type": "BertProcessing",
        "sep": ["[SEP]", 3],
        "cls": ["[CLS]", 2]
    },
    "decoder": null,
    "model": {
        "type": "WordLevel",
        "vocab": {"[PAD]": 0, "[UNK]": 1, "[CLS]": 2, "[SEP]": 3,
                  "oh": 4, "my": 5, "god": 6, "no": 7, "way": 8},
        "unk_token": "[UNK]"
    }
}"#;

const FRAME_WIDTH: usize = 32;
const FRAME_HEIGHT: usize = 24;

#[cfg(unix)]
fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

/// 1 s of a 440 Hz tone at 16 kHz
fn write_tone(path: &Path) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..16000 {
        let t = i as f32 / 16000.0;
        let sample = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5;
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn probe_script() -> String {
    format!(
        r#"echo '{{"streams":[{{"width":{},"height":{},"codec_name":"h264","avg_frame_rate":"30/1"}}]}}'"#,
        FRAME_WIDTH, FRAME_HEIGHT
    )
}

/// Stand-in transcoder directory: ffmpeg cuts, decodes `frames` frames and demuxes a tone
#[cfg(unix)]
struct FakeTranscoder {
    dir: tempfile::TempDir,
}

#[cfg(unix)]
impl FakeTranscoder {
    fn new(frames: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let tone = dir.path().join("tone.wav");
        write_tone(&tone);

        let frame_bytes = FRAME_WIDTH * FRAME_HEIGHT * 3 * frames;
        write_script(
            &dir.path().join("ffmpeg"),
            &format!(
                r#"for last in "$@"; do :; done
case "$*" in
  *rawvideo*) head -c {bytes} /dev/zero ;;
  *-vn*) cp "{tone}" "$last" ;;
  *) printf 'clip' > "$last" ;;
esac"#,
                bytes = frame_bytes,
                tone = tone.display()
            ),
        );
        write_script(&dir.path().join("ffprobe"), &probe_script());
        std::fs::create_dir(dir.path().join("scratch")).unwrap();
        Self { dir }
    }

    fn failing() -> Self {
        Self::with_scripts("echo 'moov atom not found' >&2\nexit 1", "exit 1")
    }

    /// Decodes `frames` frames, then dies with an error
    fn failing_midstream(frames: usize) -> Self {
        let bytes = FRAME_WIDTH * FRAME_HEIGHT * 3 * frames;
        Self::with_scripts(
            &format!("head -c {} /dev/zero\necho 'corrupt packet' >&2\nexit 1", bytes),
            &probe_script(),
        )
    }

    /// Demux succeeds but leaves an unparseable WAV behind
    fn garbage_wav() -> Self {
        Self::with_scripts(
            r#"for last in "$@"; do :; done
printf 'RIFFnot really a wave file' > "$last""#,
            &probe_script(),
        )
    }

    fn with_scripts(ffmpeg: &str, ffprobe: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        write_script(&dir.path().join("ffmpeg"), ffmpeg);
        write_script(&dir.path().join("ffprobe"), ffprobe);
        std::fs::create_dir(dir.path().join("scratch")).unwrap();
        Self { dir }
    }

    fn scratch(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.media.ffmpeg_path = self.dir.path().join("ffmpeg");
        config.media.ffprobe_path = self.dir.path().join("ffprobe");
        config.media.scratch_dir = self.scratch();
        config.video.num_frames = 8;
        config.video.frame_size = 32;
        config.text.max_length = 8;
        config.max_parallelism = 2;
        config
    }

    fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch()).unwrap().count()
    }
}

fn export(varmap: &VarMap) -> HashMap<String, Tensor> {
    varmap
        .data()
        .lock()
        .unwrap()
        .iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
        .collect()
}

/// Save freshly initialized tiny weights to `dir/model.safetensors`
fn write_tiny_weights(dir: &Path) {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    MultimodalSentimentModel::new(&ArchitectureConfig::tiny(), vb).unwrap();
    candle_core::safetensors::save(&export(&varmap), dir.join("model.safetensors")).unwrap();
}

#[cfg(unix)]
fn tiny_pipeline(config: &PipelineConfig) -> (UtterancePipeline, tempfile::TempDir) {
    let model_dir = tempfile::tempdir().unwrap();
    write_tiny_weights(model_dir.path());
    let tokenizer_path = model_dir.path().join("tokenizer.json");
    std::fs::write(&tokenizer_path, TOKENIZER_JSON).unwrap();

    let model = ModelLoader::new(&Device::Cpu)
        .with_architecture(ArchitectureConfig::tiny())
        .load(model_dir.path())
        .unwrap();
    let tokenizer = TextTokenizer::load(&tokenizer_path, config.text.max_length).unwrap();
    (UtterancePipeline::new(config, tokenizer, model).unwrap(), model_dir)
}

#[cfg(unix)]
#[test]
#[serial]
fn test_segment_clip_is_removed_on_drop() {
    let fake = FakeTranscoder::new(12);
    let extractor = SegmentExtractor::new(&fake.config().media);

    let clip = extractor
        .extract("episode.mp4", TimeRange::new(1.0, 2.5).unwrap())
        .unwrap();
    assert!(clip.path().starts_with(fake.scratch()));
    assert!(clip.path().is_file());
    let name = clip.path().file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("episode_1000_2500_"), "{}", name);

    drop(clip);
    assert_eq!(fake.scratch_entries(), 0);
}

#[cfg(unix)]
#[test]
#[serial]
fn test_concurrent_clips_do_not_collide() {
    let fake = FakeTranscoder::new(12);
    let extractor = SegmentExtractor::new(&fake.config().media);
    let range = TimeRange::new(0.0, 1.0).unwrap();

    let a = extractor.extract("episode.mp4", range).unwrap();
    let b = extractor.extract("episode.mp4", range).unwrap();
    assert_ne!(a.path(), b.path());
    assert_eq!(fake.scratch_entries(), 2);
}

#[cfg(unix)]
#[test]
#[serial]
fn test_failing_transcoder_reports_stderr() {
    let fake = FakeTranscoder::failing();
    let extractor = SegmentExtractor::new(&fake.config().media);

    let err = extractor
        .extract("broken.mp4", TimeRange::new(0.0, 1.0).unwrap())
        .unwrap_err();
    assert!(matches!(err, EmoError::SegmentExtraction { .. }));
    assert!(err.to_string().contains("moov atom not found"));
    assert_eq!(fake.scratch_entries(), 0);
}

#[cfg(unix)]
#[test]
#[serial]
fn test_short_clip_frames_are_zero_padded() {
    let fake = FakeTranscoder::new(5);
    let config = fake.config();
    let sampler = FrameSampler::new(&config.media, &config.video, &Device::Cpu);

    let frames = sampler.sample(&VideoClip::existing("clip.mp4")).unwrap();
    assert_eq!(frames.tensor().dims(), &[8, 3, 32, 32]);
    assert_eq!(frames.real_frames(), 5);
    assert_eq!(frames.padded_frames(), 3);
}

#[cfg(unix)]
#[test]
#[serial]
fn test_long_clip_keeps_first_frames() {
    let fake = FakeTranscoder::new(40);
    let config = fake.config();
    let sampler = FrameSampler::new(&config.media, &config.video, &Device::Cpu);

    let frames = sampler.sample(&VideoClip::existing("clip.mp4")).unwrap();
    assert_eq!(frames.real_frames(), 8);
    assert_eq!(frames.padded_frames(), 0);
}

#[cfg(unix)]
#[test]
#[serial]
fn test_undecodable_clip_is_video_decode_error() {
    let fake = FakeTranscoder::failing();
    let config = fake.config();
    let sampler = FrameSampler::new(&config.media, &config.video, &Device::Cpu);

    let err = sampler.sample(&VideoClip::existing("clip.mp4")).unwrap_err();
    assert!(matches!(err, EmoError::VideoDecode { .. }));
}

#[cfg(unix)]
#[test]
#[serial]
fn test_decoder_failure_midstream_discards_frames() {
    let fake = FakeTranscoder::failing_midstream(5);
    let config = fake.config();
    let sampler = FrameSampler::new(&config.media, &config.video, &Device::Cpu);

    let err = sampler.sample(&VideoClip::existing("clip.mp4")).unwrap_err();
    assert!(matches!(err, EmoError::VideoDecode { .. }));
    assert!(err.to_string().contains("corrupt packet"), "{}", err);
}

#[cfg(unix)]
#[test]
#[serial]
fn test_unparseable_demuxed_wav_is_removed() {
    let fake = FakeTranscoder::garbage_wav();
    let config = fake.config();
    let extractor = AudioFeatureExtractor::new(&config.media, &config.audio, &Device::Cpu);

    let err = extractor.extract(&VideoClip::existing("clip.mp4")).unwrap_err();
    assert!(matches!(err, EmoError::AudioFeature { .. }));
    assert_eq!(fake.scratch_entries(), 0);
}

#[cfg(unix)]
#[test]
#[serial]
fn test_demuxed_audio_features_and_cleanup() {
    let fake = FakeTranscoder::new(12);
    let config = fake.config();
    let extractor = AudioFeatureExtractor::new(&config.media, &config.audio, &Device::Cpu);

    let mel = extractor.extract(&VideoClip::existing("clip.mp4")).unwrap();
    assert_eq!(mel.tensor().dims(), &[1, 64, 300]);
    // 16000 samples, hop 512, centred frames
    assert_eq!(mel.real_frames(), 32);
    assert_eq!(fake.scratch_entries(), 0);
}

#[cfg(unix)]
#[test]
#[serial]
fn test_failed_demux_is_audio_extraction_error() {
    let fake = FakeTranscoder::failing();
    let config = fake.config();
    let extractor = AudioFeatureExtractor::new(&config.media, &config.audio, &Device::Cpu);

    let err = extractor.extract(&VideoClip::existing("clip.mp4")).unwrap_err();
    assert!(matches!(err, EmoError::AudioExtraction { .. }));
    assert_eq!(fake.scratch_entries(), 0);
}

#[test]
fn test_missing_weights_name_both_locations() {
    let dir = tempfile::tempdir().unwrap();
    let err = ModelLoader::new(&Device::Cpu).load(dir.path()).unwrap_err();

    let msg = err.to_string();
    assert!(matches!(err, EmoError::ModelFileNotFound { .. }));
    assert!(msg.contains(&dir.path().join("model.pth").display().to_string()));
    assert!(msg.contains(&dir.path().join("model/model.pth").display().to_string()));
}

#[cfg(unix)]
#[test]
#[serial]
fn test_end_to_end_utterance() {
    let fake = FakeTranscoder::new(12);
    let (pipeline, _model_dir) = tiny_pipeline(&fake.config());

    let result = pipeline
        .process("episode.mp4", &Utterance::new(3.0, 4.2, "Oh my god"))
        .unwrap();

    assert_eq!(result.text, "Oh my god");
    assert_eq!(result.emotions.len(), 3);
    assert_eq!(result.sentiments.len(), 3);
    let total: f32 = result.probabilities.emotion_probs.iter().sum();
    assert!((total - 1.0).abs() < 1e-4);
    assert_eq!(fake.scratch_entries(), 0);

    let json = serde_json::to_value(&result).unwrap();
    assert!(json["emotions"][0]["label"].is_string());
}

#[cfg(unix)]
#[test]
#[serial]
fn test_batch_results_follow_input_order() {
    let fake = FakeTranscoder::new(6);
    let (pipeline, _model_dir) = tiny_pipeline(&fake.config());

    let utterances = vec![
        Utterance::new(0.0, 1.0, "oh no"),
        Utterance::new(5.0, 4.0, "no way"),
        Utterance::new(2.0, 3.0, "my god"),
    ];
    let results = pipeline.process_batch("episode.mp4", &utterances);

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().text, "oh no");
    assert!(matches!(results[1], Err(EmoError::InvalidInput { .. })));
    assert_eq!(results[2].as_ref().unwrap().text, "my god");
    assert_eq!(fake.scratch_entries(), 0);
}
