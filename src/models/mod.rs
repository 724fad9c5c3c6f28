//! Neural network components
//!
//! - Text encoder (BERT + projection)
//! - Video encoder (R(3D)-18 + projection)
//! - Audio encoder (1D CNN + projection)
//! - Fusion block with emotion and sentiment heads
//! - Parameter groups with frozen / trainable tags

mod audio_encoder;
mod fusion;
pub mod layers;
mod multimodal;
pub mod params;
mod text_encoder;
mod video_encoder;

pub use audio_encoder::AudioEncoder;
pub use fusion::{concat_embeddings, ClassifierHead, FusionClassifier};
pub use multimodal::{ModalityEmbeddings, ModelInputs, ModelOutput, MultimodalSentimentModel};
pub use params::{
    Component, ComponentCount, OptimizerGroup, ParamTag, ParameterGroup, ParameterRegistry,
    ParameterReport,
};
pub use text_encoder::TextEncoder;
pub use video_encoder::VideoEncoder;

#[cfg(test)]
pub(crate) use multimodal::tests::{tiny_inputs, tiny_model};
