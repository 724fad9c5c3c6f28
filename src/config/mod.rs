//! Configuration types
//!
//! - `PipelineConfig`: runtime settings (transcoder, shapes, device), YAML-backed
//! - `ArchitectureConfig`: network hyperparameters

mod architecture;
mod pipeline_config;

pub use architecture::ArchitectureConfig;
pub use pipeline_config::{
    AudioConfig, DeviceConfig, MediaConfig, MelNormalization, PipelineConfig, TextConfig,
    VideoConfig,
};
