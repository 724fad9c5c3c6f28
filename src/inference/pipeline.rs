//! Per-utterance inference pipeline
//!
//! For each utterance of a source video:
//! 1. Cut the `[start, end]` segment into a scratch clip
//! 2. Sample 30 frames and compute the log-mel spectrogram from the clip
//! 3. Tokenize the transcript
//! 4. Run the multimodal model and turn the logits into probabilities
//!
//! The clip is removed once both modality extractors are done with it.
//! Batches extract features on scoped threads and share one forward pass per group.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use super::model_loader::{LoadedModel, ModelLoader};
use super::prediction::{Emotion, Prediction, Scored, Sentiment};
use crate::audio::AudioFeatureExtractor;
use crate::config::PipelineConfig;
use crate::core::error::{EmoError, Result};
use crate::media::{SegmentExtractor, TimeRange, VideoClip};
use crate::models::ModelInputs;
use crate::text::TextTokenizer;
use crate::video::FrameSampler;

/// Labels reported per utterance
const REPORTED_LABELS: usize = 3;

/// One transcribed speech turn of a source video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Transcript
    pub text: String,
}

impl Utterance {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Prediction for one utterance, with its most likely labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtterancePrediction {
    pub start: f64,
    pub end: f64,
    pub text: String,
    /// Top emotions, most likely first
    pub emotions: Vec<Scored<Emotion>>,
    /// Top sentiments, most likely first
    pub sentiments: Vec<Scored<Sentiment>>,
    /// Full distributions
    pub probabilities: Prediction,
}

impl UtterancePrediction {
    fn new(utterance: &Utterance, prediction: Prediction) -> Self {
        Self {
            start: utterance.start,
            end: utterance.end,
            text: utterance.text.clone(),
            emotions: prediction.top_emotions(REPORTED_LABELS),
            sentiments: prediction.top_sentiments(REPORTED_LABELS),
            probabilities: prediction,
        }
    }
}

/// Feature extraction and inference for utterances of source videos
pub struct UtterancePipeline {
    segments: SegmentExtractor,
    frames: FrameSampler,
    audio: AudioFeatureExtractor,
    tokenizer: TextTokenizer,
    model: LoadedModel,
    max_parallelism: usize,
}

impl UtterancePipeline {
    /// Assemble a pipeline around an already loaded model; features are built on the model's device
    pub fn new(config: &PipelineConfig, tokenizer: TextTokenizer, model: LoadedModel) -> Result<Self> {
        config.validate_for(model.model().config())?;
        let device = model.device().clone();
        Ok(Self {
            segments: SegmentExtractor::new(&config.media),
            frames: FrameSampler::new(&config.media, &config.video, &device),
            audio: AudioFeatureExtractor::new(&config.media, &config.audio, &device),
            tokenizer,
            model,
            max_parallelism: config.max_parallelism,
        })
    }

    /// Load weights from `model_dir` and the tokenizer from `tokenizer_path`
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        config: &PipelineConfig,
        model_dir: P,
        tokenizer_path: Q,
    ) -> Result<Self> {
        let device = config.device.device()?;
        let model = ModelLoader::new(&device).load(model_dir)?;
        let tokenizer = TextTokenizer::load(tokenizer_path, config.text.max_length)?;
        Self::new(config, tokenizer, model)
    }

    pub fn model(&self) -> &LoadedModel {
        &self.model
    }

    /// Cut, featurize and classify one utterance of `video`
    pub fn process<P: AsRef<Path>>(&self, video: P, utterance: &Utterance) -> Result<UtterancePrediction> {
        let inputs = self.featurize(video.as_ref(), utterance)?;
        let prediction = self.classify(&inputs)?;
        Ok(UtterancePrediction::new(utterance, prediction))
    }

    /// Classify an already extracted clip with its transcript
    pub fn process_clip(&self, clip: &VideoClip, text: &str) -> Result<Prediction> {
        let inputs = self.clip_inputs(clip, text)?;
        self.classify(&inputs)
    }

    /// Model inputs of one utterance; the clip is gone when this returns
    fn featurize(&self, video: &Path, utterance: &Utterance) -> Result<ModelInputs> {
        let range = TimeRange::new(utterance.start, utterance.end)?;
        let clip = self.segments.extract(video, range)?;
        self.clip_inputs(&clip, &utterance.text)
    }

    fn clip_inputs(&self, clip: &VideoClip, text: &str) -> Result<ModelInputs> {
        let frames = self.frames.sample(clip)?;
        let mel = self.audio.extract(clip)?;
        debug!(
            "Features for {:?}: {} real frames, {} mel frames",
            clip.path(),
            frames.real_frames(),
            mel.real_frames()
        );

        let tokens = self.tokenizer.encode(text)?;
        let (input_ids, attention_mask) = tokens.to_tensors(self.model.device())?;

        Ok(ModelInputs {
            input_ids,
            attention_mask,
            video_frames: frames.into_tensor().unsqueeze(0)?,
            audio_features: mel.into_tensor().unsqueeze(0)?,
        })
    }

    fn classify(&self, inputs: &ModelInputs) -> Result<Prediction> {
        let output = self.model.predict(inputs)?;
        let prediction = Prediction::from_logits(&output.emotions, &output.sentiments)?;
        log_prediction(&prediction);
        Ok(prediction)
    }

    /// One forward pass over equal-shape inputs, one prediction per item
    fn classify_batch(&self, items: &[ModelInputs]) -> Result<Vec<Prediction>> {
        let output = self.model.predict(&stack_inputs(items)?)?;
        let predictions = Prediction::from_batch_logits(&output.emotions, &output.sentiments)?;
        if predictions.len() != items.len() {
            return Err(EmoError::Tensor {
                message: format!(
                    "{} predictions for a batch of {}",
                    predictions.len(),
                    items.len()
                ),
            });
        }
        predictions.iter().for_each(log_prediction);
        Ok(predictions)
    }

    /// Process utterances `max_parallelism` at a time: features are extracted
    /// concurrently, then each group is classified in one forward pass.
    /// Results keep the input order; one failure does not affect the others.
    pub fn process_batch<P: AsRef<Path>>(
        &self,
        video: P,
        utterances: &[Utterance],
    ) -> Vec<Result<UtterancePrediction>> {
        self.process_batch_with(video, utterances, |_| {})
    }

    /// Like `process_batch`, calling `on_done` with each finished utterance's index
    pub fn process_batch_with<P, F>(
        &self,
        video: P,
        utterances: &[Utterance],
        on_done: F,
    ) -> Vec<Result<UtterancePrediction>>
    where
        P: AsRef<Path>,
        F: Fn(usize) + Sync,
    {
        let video = video.as_ref();
        let mut results = Vec::with_capacity(utterances.len());

        for (chunk_index, chunk) in utterances.chunks(self.max_parallelism).enumerate() {
            let offset = chunk_index * self.max_parallelism;
            let features: Vec<Result<ModelInputs>> = std::thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|utterance| scope.spawn(move || self.featurize(video, utterance)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                    .collect()
            });

            let mut slots: Vec<Option<Result<UtterancePrediction>>> = Vec::with_capacity(chunk.len());
            let mut ready = Vec::new();
            let mut inputs = Vec::new();
            for (i, feature) in features.into_iter().enumerate() {
                match feature {
                    Ok(item) => {
                        ready.push(i);
                        inputs.push(item);
                        slots.push(None);
                    }
                    Err(e) => slots.push(Some(Err(e))),
                }
            }

            if !inputs.is_empty() {
                match self.classify_batch(&inputs) {
                    Ok(predictions) => {
                        for (&i, prediction) in ready.iter().zip(predictions) {
                            slots[i] = Some(Ok(UtterancePrediction::new(&chunk[i], prediction)));
                        }
                    }
                    Err(e) => {
                        for &i in &ready {
                            slots[i] = Some(Err(e.clone()));
                        }
                    }
                }
            }

            for (i, slot) in slots.into_iter().enumerate() {
                on_done(offset + i);
                results.push(slot.unwrap_or_else(|| {
                    Err(EmoError::Tensor {
                        message: "utterance left unclassified".to_string(),
                    })
                }));
            }
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            "Processed {} utterances ({} failed)",
            utterances.len(),
            failed
        );
        results
    }
}

fn log_prediction(prediction: &Prediction) {
    let emotion = prediction.primary_emotion();
    let sentiment = prediction.primary_sentiment();
    info!(
        "Predicted {} ({:.2}) / {} ({:.2})",
        emotion.label, emotion.confidence, sentiment.label, sentiment.confidence
    );
}

/// Batch precomputed features of equal shape into one forward pass
pub fn stack_inputs(items: &[ModelInputs]) -> Result<ModelInputs> {
    let cat = |f: fn(&ModelInputs) -> &Tensor| -> Result<Tensor> {
        let tensors: Vec<&Tensor> = items.iter().map(f).collect();
        Ok(Tensor::cat(&tensors, 0)?)
    };
    Ok(ModelInputs {
        input_ids: cat(|i| &i.input_ids)?,
        attention_mask: cat(|i| &i.attention_mask)?,
        video_frames: cat(|i| &i.video_frames)?,
        audio_features: cat(|i| &i.audio_features)?,
    })
}
