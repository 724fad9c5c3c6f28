//! Core framework-level components
//!
//! - `error`: typed error taxonomy shared by every pipeline stage

pub mod error;

pub use error::{AudioOperation, EmoError, PipelineStage, Result};
