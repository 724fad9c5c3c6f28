//! Trained weight resolution and strict loading
//!
//! A model directory holds the weights at `model.pth` or, as a fallback,
//! `model/model.pth`. Safetensors exports at the same two locations are
//! accepted after the PyTorch files. Every tensor the architecture asks for
//! must be present with the expected shape.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ArchitectureConfig;
use crate::core::error::{EmoError, Result};
use crate::models::{
    Component, ModelInputs, ModelOutput, MultimodalSentimentModel, ParameterReport,
};

/// Weight file names relative to the model directory, in lookup order
pub const WEIGHT_CANDIDATES: [&str; 4] = [
    "model.pth",
    "model/model.pth",
    "model.safetensors",
    "model/model.safetensors",
];

/// Optional HuggingFace BERT config overriding the default text backbone
pub const BERT_CONFIG_FILE: &str = "bert_config.json";

/// A model with loaded weights, in inference mode
///
/// Read-only; clones share the same weights.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    model: Arc<MultimodalSentimentModel>,
    weights_path: PathBuf,
    report: ParameterReport,
}

impl LoadedModel {
    /// Forward pass with dropout off and BatchNorm on running statistics
    pub fn predict(&self, inputs: &ModelInputs) -> Result<ModelOutput> {
        Ok(self.model.forward_t(inputs, false)?)
    }

    pub fn model(&self) -> &MultimodalSentimentModel {
        &self.model
    }

    pub fn device(&self) -> &Device {
        self.model.device()
    }

    pub fn weights_path(&self) -> &Path {
        &self.weights_path
    }

    /// Parameter counts of the loaded weights
    pub fn parameter_report(&self) -> &ParameterReport {
        &self.report
    }
}

/// Loads trained weights into the multimodal architecture
#[derive(Debug, Clone)]
pub struct ModelLoader {
    architecture: ArchitectureConfig,
    device: Device,
}

impl ModelLoader {
    pub fn new(device: &Device) -> Self {
        Self {
            architecture: ArchitectureConfig::default(),
            device: device.clone(),
        }
    }

    pub fn with_architecture(mut self, architecture: ArchitectureConfig) -> Self {
        self.architecture = architecture;
        self
    }

    /// All paths tried for `model_dir`, in lookup order
    pub fn candidate_paths(model_dir: &Path) -> Vec<PathBuf> {
        WEIGHT_CANDIDATES.iter().map(|c| model_dir.join(c)).collect()
    }

    /// First existing weight file
    pub fn resolve(model_dir: &Path) -> Result<PathBuf> {
        let attempted = Self::candidate_paths(model_dir);
        match attempted.iter().find(|p| p.is_file()) {
            Some(path) => Ok(path.clone()),
            None => Err(EmoError::ModelFileNotFound { attempted }),
        }
    }

    /// Resolve, read and strictly load the weights in `model_dir`
    pub fn load<P: AsRef<Path>>(&self, model_dir: P) -> Result<LoadedModel> {
        let model_dir = model_dir.as_ref();
        let weights_path = Self::resolve(model_dir)?;

        let architecture = match model_dir.join(BERT_CONFIG_FILE) {
            path if path.is_file() => {
                info!("Using text backbone config {:?}", path);
                self.architecture.clone().with_bert_config_file(&path)?
            }
            _ => self.architecture.clone(),
        };

        let tensors = self.read_tensors(&weights_path)?;
        Self {
            architecture,
            device: self.device.clone(),
        }
        .load_tensors(tensors, &weights_path)
    }

    /// Strictly load an in-memory state dict; `origin` is used for reporting
    pub fn load_tensors(
        &self,
        tensors: HashMap<String, Tensor>,
        origin: &Path,
    ) -> Result<LoadedModel> {
        let load_error = |message: String| EmoError::ModelLoad {
            message,
            path: Some(origin.to_path_buf()),
        };

        let unknown: Vec<&String> = tensors
            .keys()
            .filter(|name| Component::of(name).is_none())
            .collect();
        if !unknown.is_empty() {
            warn!(
                "{} tensors in {:?} belong to no model component (e.g. {})",
                unknown.len(),
                origin,
                unknown[0]
            );
        }

        let mut on_device = HashMap::with_capacity(tensors.len());
        for (name, tensor) in tensors {
            let tensor = tensor
                .to_dtype(DType::F32)
                .and_then(|t| t.to_device(&self.device))
                .map_err(|e| load_error(format!("cannot move {} to device: {}", name, e)))?;
            on_device.insert(name, tensor);
        }

        let report = self.architecture_report(&on_device);
        let tensor_count = on_device.len();
        let vb = VarBuilder::from_tensors(on_device, DType::F32, &self.device);
        let model = MultimodalSentimentModel::new(&self.architecture, vb)
            .map_err(|e| load_error(format!("weights do not match the architecture: {}", e)))?;

        info!(
            "Loaded {} tensors from {:?} on {:?} ({} parameters)",
            tensor_count, origin, self.device, report.total
        );

        Ok(LoadedModel {
            model: Arc::new(model),
            weights_path: origin.to_path_buf(),
            report,
        })
    }

    fn architecture_report(&self, tensors: &HashMap<String, Tensor>) -> ParameterReport {
        crate::models::ParameterRegistry::multimodal()
            .report(tensors.iter().map(|(name, t)| (name.as_str(), t.elem_count())))
    }

    fn read_tensors(&self, path: &Path) -> Result<HashMap<String, Tensor>> {
        let load_error = |e: candle_core::Error| EmoError::ModelLoad {
            message: format!("cannot read weights: {}", e),
            path: Some(path.to_path_buf()),
        };

        let is_safetensors = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("safetensors"));
        if is_safetensors {
            candle_core::safetensors::load(path, &Device::Cpu).map_err(load_error)
        } else {
            Ok(candle_core::pickle::read_all(path)
                .map_err(load_error)?
                .into_iter()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{tiny_inputs, tiny_model};
    use candle_nn::VarMap;

    fn export(varmap: &VarMap) -> HashMap<String, Tensor> {
        varmap
            .data()
            .lock()
            .unwrap()
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect()
    }

    fn tiny_loader() -> ModelLoader {
        ModelLoader::new(&Device::Cpu).with_architecture(ArchitectureConfig::tiny())
    }

    #[test]
    fn test_missing_weights_name_every_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = tiny_loader().load(dir.path()).unwrap_err();

        match &err {
            EmoError::ModelFileNotFound { attempted } => {
                assert_eq!(attempted.len(), 4);
                assert_eq!(attempted[0], dir.path().join("model.pth"));
                assert_eq!(attempted[1], dir.path().join("model/model.pth"));
            }
            other => panic!("unexpected error: {}", other),
        }
        let msg = err.to_string();
        assert!(msg.contains("model.pth"));
        assert!(msg.contains("model/model.pth"));
    }

    #[test]
    fn test_fallback_subpath_and_roundtrip() {
        let varmap = VarMap::new();
        let reference = tiny_model(&varmap);

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("model")).unwrap();
        let path = dir.path().join("model/model.safetensors");
        candle_core::safetensors::save(&export(&varmap), &path).unwrap();

        let loaded = tiny_loader().load(dir.path()).unwrap();
        assert_eq!(loaded.weights_path(), path.as_path());

        let inputs = tiny_inputs(1);
        let expected = reference.forward_t(&inputs, false).unwrap();
        let actual = loaded.predict(&inputs).unwrap();
        let diff: f32 = (expected.emotions - actual.emotions)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_missing_tensor_is_load_error() {
        let varmap = VarMap::new();
        tiny_model(&varmap);
        let mut tensors = export(&varmap);
        tensors.remove("fusion_layer.0.weight");

        let err = tiny_loader()
            .load_tensors(tensors, Path::new("memory"))
            .unwrap_err();
        assert!(matches!(err, EmoError::ModelLoad { .. }));
        assert!(err.to_string().contains("fusion_layer.0.weight"));
    }

    #[test]
    fn test_wrong_shape_is_load_error() {
        let varmap = VarMap::new();
        tiny_model(&varmap);
        let mut tensors = export(&varmap);
        tensors.insert(
            "emotion_classifier.3.weight".to_string(),
            Tensor::zeros((5, 64), DType::F32, &Device::Cpu).unwrap(),
        );

        let err = tiny_loader()
            .load_tensors(tensors, Path::new("memory"))
            .unwrap_err();
        assert!(matches!(err, EmoError::ModelLoad { .. }));
    }

    #[test]
    fn test_primary_path_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.pth"), b"not a pickle").unwrap();
        std::fs::write(dir.path().join("model.safetensors"), b"unused").unwrap();

        assert_eq!(
            ModelLoader::resolve(dir.path()).unwrap(),
            dir.path().join("model.pth")
        );
        let err = tiny_loader().load(dir.path()).unwrap_err();
        assert!(matches!(err, EmoError::ModelLoad { .. }));
    }

    #[test]
    fn test_report_counts_loaded_tensors() {
        let varmap = VarMap::new();
        let model = tiny_model(&varmap);
        let loaded = tiny_loader()
            .load_tensors(export(&varmap), Path::new("memory"))
            .unwrap();
        assert_eq!(
            loaded.parameter_report(),
            &model.parameters().report_varmap(&varmap)
        );
    }
}
