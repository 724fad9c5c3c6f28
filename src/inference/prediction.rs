//! Label vocabularies and probability post-processing

use candle_core::{Tensor, D};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::{EmoError, Result};

/// Emotion labels in logit order
pub const EMOTION_LABELS: [&str; 7] = [
    "anger", "disgust", "fear", "joy", "neutral", "sadness", "surprise",
];

/// Sentiment labels in logit order
pub const SENTIMENT_LABELS: [&str; 3] = ["negative", "neutral", "positive"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Anger,
    Disgust,
    Fear,
    Joy,
    Neutral,
    Sadness,
    Surprise,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Anger,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Joy,
        Emotion::Neutral,
        Emotion::Sadness,
        Emotion::Surprise,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        EMOTION_LABELS[self.index()]
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Negative,
    Neutral,
    Positive,
}

impl Sentiment {
    pub const ALL: [Sentiment; 3] = [Sentiment::Negative, Sentiment::Neutral, Sentiment::Positive];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        SENTIMENT_LABELS[self.index()]
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A label with its probability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scored<L> {
    pub label: L,
    pub confidence: f32,
}

/// Emotion and sentiment distributions of one utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Probabilities in `EMOTION_LABELS` order
    pub emotion_probs: Vec<f32>,
    /// Probabilities in `SENTIMENT_LABELS` order
    pub sentiment_probs: Vec<f32>,
}

impl Prediction {
    /// Softmax over raw logits of shape `(7,)` / `(3,)`, or `(1, 7)` / `(1, 3)`
    pub fn from_logits(emotion_logits: &Tensor, sentiment_logits: &Tensor) -> Result<Self> {
        let emotion_probs = softmax_vec(emotion_logits)?;
        let sentiment_probs = softmax_vec(sentiment_logits)?;
        Self::from_probs(emotion_probs, sentiment_probs)
    }

    /// One prediction per row of batched `(B, 7)` / `(B, 3)` logits
    pub fn from_batch_logits(emotion_logits: &Tensor, sentiment_logits: &Tensor) -> Result<Vec<Self>> {
        let emotions = candle_nn::ops::softmax(emotion_logits, D::Minus1)?.to_vec2::<f32>()?;
        let sentiments = candle_nn::ops::softmax(sentiment_logits, D::Minus1)?.to_vec2::<f32>()?;
        if emotions.len() != sentiments.len() {
            return Err(EmoError::invalid_input(
                "logits",
                format!("{} emotion rows but {} sentiment rows", emotions.len(), sentiments.len()),
            ));
        }
        emotions
            .into_iter()
            .zip(sentiments)
            .map(|(e, s)| Self::from_probs(e, s))
            .collect()
    }

    fn from_probs(emotion_probs: Vec<f32>, sentiment_probs: Vec<f32>) -> Result<Self> {
        if emotion_probs.len() != EMOTION_LABELS.len() {
            return Err(EmoError::invalid_input(
                "emotion_logits",
                format!("expected {} classes, got {}", EMOTION_LABELS.len(), emotion_probs.len()),
            ));
        }
        if sentiment_probs.len() != SENTIMENT_LABELS.len() {
            return Err(EmoError::invalid_input(
                "sentiment_logits",
                format!("expected {} classes, got {}", SENTIMENT_LABELS.len(), sentiment_probs.len()),
            ));
        }
        Ok(Self {
            emotion_probs,
            sentiment_probs,
        })
    }

    /// The `k` most likely emotions, most likely first
    pub fn top_emotions(&self, k: usize) -> Vec<Scored<Emotion>> {
        top_k(&self.emotion_probs, k)
            .into_iter()
            .filter_map(|(i, p)| Emotion::from_index(i).map(|label| Scored { label, confidence: p }))
            .collect()
    }

    /// The `k` most likely sentiments, most likely first
    pub fn top_sentiments(&self, k: usize) -> Vec<Scored<Sentiment>> {
        top_k(&self.sentiment_probs, k)
            .into_iter()
            .filter_map(|(i, p)| Sentiment::from_index(i).map(|label| Scored { label, confidence: p }))
            .collect()
    }

    pub fn primary_emotion(&self) -> Scored<Emotion> {
        self.top_emotions(1)
            .into_iter()
            .next()
            .unwrap_or(Scored { label: Emotion::Neutral, confidence: 0.0 })
    }

    pub fn primary_sentiment(&self) -> Scored<Sentiment> {
        self.top_sentiments(1)
            .into_iter()
            .next()
            .unwrap_or(Scored { label: Sentiment::Neutral, confidence: 0.0 })
    }
}

fn softmax_vec(logits: &Tensor) -> Result<Vec<f32>> {
    let logits = match logits.rank() {
        1 => logits.clone(),
        2 if logits.dim(0)? == 1 => logits.squeeze(0)?,
        _ => {
            return Err(EmoError::invalid_input(
                "logits",
                format!("expected one row of logits, got shape {:?}", logits.dims()),
            ))
        }
    };
    Ok(candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec1::<f32>()?)
}

/// Indices and values of the `k` largest entries; ties keep label order
fn top_k(probs: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    indexed.truncate(k);
    indexed
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_label_order() {
        assert_eq!(Emotion::from_index(0), Some(Emotion::Anger));
        assert_eq!(Emotion::from_index(6), Some(Emotion::Surprise));
        assert_eq!(Emotion::from_index(7), None);
        assert_eq!(Sentiment::Positive.as_str(), "positive");
        for (i, e) in Emotion::ALL.iter().enumerate() {
            assert_eq!(e.as_str(), EMOTION_LABELS[i]);
        }
    }

    #[test]
    fn test_softmax_and_top_k() {
        let emotions = Tensor::new(&[[0f32, 0., 0., 3., 1., 0., 0.]], &Device::Cpu).unwrap();
        let sentiments = Tensor::new(&[2f32, 0., 0.], &Device::Cpu).unwrap();
        let prediction = Prediction::from_logits(&emotions, &sentiments).unwrap();

        let sum: f32 = prediction.emotion_probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);

        let top = prediction.top_emotions(3);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].label, Emotion::Joy);
        assert_eq!(top[1].label, Emotion::Neutral);
        // equal probabilities fall back to label order
        assert_eq!(top[2].label, Emotion::Anger);
        assert_eq!(prediction.primary_sentiment().label, Sentiment::Negative);
    }

    #[test]
    fn test_wrong_class_count() {
        let emotions = Tensor::new(&[0f32, 1.], &Device::Cpu).unwrap();
        let sentiments = Tensor::new(&[0f32, 1., 2.], &Device::Cpu).unwrap();
        assert!(Prediction::from_logits(&emotions, &sentiments).is_err());
    }

    #[test]
    fn test_batch_logits() {
        let emotions = Tensor::zeros((2, 7), candle_core::DType::F32, &Device::Cpu).unwrap();
        let sentiments = Tensor::zeros((2, 3), candle_core::DType::F32, &Device::Cpu).unwrap();
        let predictions = Prediction::from_batch_logits(&emotions, &sentiments).unwrap();
        assert_eq!(predictions.len(), 2);
        assert!((predictions[1].sentiment_probs[2] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_serializes_labels_lowercase() {
        let json = serde_json::to_string(&Scored { label: Emotion::Joy, confidence: 0.5 }).unwrap();
        assert_eq!(json, r#"{"label":"joy","confidence":0.5}"#);
    }
}
