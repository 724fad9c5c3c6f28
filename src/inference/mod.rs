//! Inference entry points
//!
//! - `ModelLoader`: resolve and strictly load trained weights
//! - `Prediction`: label vocabularies and softmax post-processing
//! - `UtterancePipeline`: segment → features → model, one utterance or a batch

mod model_loader;
mod pipeline;
mod prediction;

pub use model_loader::{LoadedModel, ModelLoader, BERT_CONFIG_FILE, WEIGHT_CANDIDATES};
pub use pipeline::{stack_inputs, Utterance, UtterancePipeline, UtterancePrediction};
pub use prediction::{
    Emotion, Prediction, Scored, Sentiment, EMOTION_LABELS, SENTIMENT_LABELS,
};
