//! Parameter groups and their frozen / trainable tags
//!
//! Every parameter of the multimodal network belongs to a named group (a
//! dotted name prefix). Tags are fixed when the network is built; the
//! optimizer side asks the registry which variables it may update.

use candle_core::Var;
use candle_nn::VarMap;
use serde::Serialize;
use std::fmt;

/// Whether the optimizer may update a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamTag {
    Frozen,
    Trainable,
}

/// Top-level components of the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    TextEncoder,
    VideoEncoder,
    AudioEncoder,
    FusionLayer,
    EmotionClassifier,
    SentimentClassifier,
}

impl Component {
    pub const ALL: [Component; 6] = [
        Component::TextEncoder,
        Component::VideoEncoder,
        Component::AudioEncoder,
        Component::FusionLayer,
        Component::EmotionClassifier,
        Component::SentimentClassifier,
    ];

    /// Weight-name prefix of the component
    pub fn prefix(&self) -> &'static str {
        match self {
            Component::TextEncoder => "text_encoder",
            Component::VideoEncoder => "video_encoder",
            Component::AudioEncoder => "audio_encoder",
            Component::FusionLayer => "fusion_layer",
            Component::EmotionClassifier => "emotion_classifier",
            Component::SentimentClassifier => "sentiment_classifier",
        }
    }

    /// Learning rate the component was fine-tuned with
    pub fn learning_rate(&self) -> f64 {
        match self {
            Component::TextEncoder => 8e-6,
            Component::VideoEncoder | Component::AudioEncoder => 8e-5,
            Component::FusionLayer
            | Component::EmotionClassifier
            | Component::SentimentClassifier => 5e-4,
        }
    }

    /// Component owning a parameter name, if any
    pub fn of(name: &str) -> Option<Component> {
        Self::ALL
            .into_iter()
            .find(|c| has_prefix(name, c.prefix()))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A named set of parameters sharing one tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterGroup {
    pub prefix: String,
    pub tag: ParamTag,
}

impl ParameterGroup {
    pub fn frozen(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            tag: ParamTag::Frozen,
        }
    }

    pub fn trainable(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            tag: ParamTag::Trainable,
        }
    }
}

/// `name` equals `prefix` or lies below it in the dotted hierarchy
fn has_prefix(name: &str, prefix: &str) -> bool {
    name == prefix
        || (name.starts_with(prefix) && name.as_bytes().get(prefix.len()) == Some(&b'.'))
}

/// Normalization statistics; stored with the weights but never optimized
pub fn is_buffer(name: &str) -> bool {
    ["running_mean", "running_var", "num_batches_tracked"]
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

/// Trainable variables of one component with their learning rate
#[derive(Debug)]
pub struct OptimizerGroup {
    pub component: Component,
    pub learning_rate: f64,
    pub vars: Vec<Var>,
}

/// Parameter counts of one component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComponentCount {
    pub total: usize,
    pub trainable: usize,
    pub frozen: usize,
}

/// Per-component parameter counts, buffers excluded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterReport {
    pub components: Vec<(Component, ComponentCount)>,
    pub total: usize,
    pub trainable: usize,
}

impl ParameterReport {
    pub fn component(&self, component: Component) -> Option<&ComponentCount> {
        self.components
            .iter()
            .find(|(c, _)| *c == component)
            .map(|(_, count)| count)
    }
}

impl fmt::Display for ParameterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<22} {:>12} {:>12}", "component", "parameters", "trainable")?;
        for (component, count) in &self.components {
            writeln!(
                f,
                "{:<22} {:>12} {:>12}",
                component.prefix(),
                count.total,
                count.trainable
            )?;
        }
        write!(f, "{:<22} {:>12} {:>12}", "total", self.total, self.trainable)
    }
}

/// Resolves tags for parameter names, longest matching prefix first
#[derive(Debug, Clone)]
pub struct ParameterRegistry {
    groups: Vec<ParameterGroup>,
}

impl ParameterRegistry {
    pub fn new(mut groups: Vec<ParameterGroup>) -> Self {
        groups.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { groups }
    }

    /// Groups of the multimodal network: pretrained backbones frozen, everything after them trainable
    pub fn multimodal() -> Self {
        Self::new(vec![
            ParameterGroup::frozen("text_encoder.bert"),
            ParameterGroup::trainable("text_encoder.projection"),
            ParameterGroup::frozen("video_encoder.backbone"),
            ParameterGroup::trainable("video_encoder.backbone.fc"),
            ParameterGroup::frozen("audio_encoder.conv_layers"),
            ParameterGroup::trainable("audio_encoder.projection"),
            ParameterGroup::trainable("fusion_layer"),
            ParameterGroup::trainable("emotion_classifier"),
            ParameterGroup::trainable("sentiment_classifier"),
        ])
    }

    pub fn groups(&self) -> &[ParameterGroup] {
        &self.groups
    }

    /// Tag of a parameter, `None` when no group covers it
    pub fn tag(&self, name: &str) -> Option<ParamTag> {
        self.groups
            .iter()
            .find(|g| has_prefix(name, &g.prefix))
            .map(|g| g.tag)
    }

    pub fn is_trainable(&self, name: &str) -> bool {
        !is_buffer(name) && self.tag(name) == Some(ParamTag::Trainable)
    }

    /// Trainable variables, ordered by name
    pub fn trainable_vars(&self, varmap: &VarMap) -> Vec<Var> {
        self.sorted_vars(varmap)
            .into_iter()
            .filter(|(name, _)| self.is_trainable(name))
            .map(|(_, var)| var)
            .collect()
    }

    /// Trainable variables grouped per component, for per-group learning rates
    pub fn optimizer_groups(&self, varmap: &VarMap) -> Vec<OptimizerGroup> {
        let vars = self.sorted_vars(varmap);
        Component::ALL
            .into_iter()
            .map(|component| OptimizerGroup {
                component,
                learning_rate: component.learning_rate(),
                vars: vars
                    .iter()
                    .filter(|(name, _)| {
                        Component::of(name) == Some(component) && self.is_trainable(name)
                    })
                    .map(|(_, var)| var.clone())
                    .collect(),
            })
            .filter(|group| !group.vars.is_empty())
            .collect()
    }

    /// Count parameters per component from `(name, element_count)` pairs
    pub fn report<'a, I>(&self, params: I) -> ParameterReport
    where
        I: IntoIterator<Item = (&'a str, usize)>,
    {
        let mut components: Vec<(Component, ComponentCount)> = Component::ALL
            .into_iter()
            .map(|c| (c, ComponentCount::default()))
            .collect();
        let (mut total, mut trainable) = (0, 0);

        for (name, count) in params {
            if is_buffer(name) {
                continue;
            }
            total += count;
            let is_trainable = self.is_trainable(name);
            if is_trainable {
                trainable += count;
            }
            if let Some(component) = Component::of(name) {
                if let Some((_, entry)) = components.iter_mut().find(|(c, _)| *c == component) {
                    entry.total += count;
                    if is_trainable {
                        entry.trainable += count;
                    } else {
                        entry.frozen += count;
                    }
                }
            }
        }

        ParameterReport {
            components,
            total,
            trainable,
        }
    }

    /// Report over the variables of a `VarMap`
    pub fn report_varmap(&self, varmap: &VarMap) -> ParameterReport {
        let vars = self.sorted_vars(varmap);
        self.report(vars.iter().map(|(name, var)| (name.as_str(), var.elem_count())))
    }

    fn sorted_vars(&self, varmap: &VarMap) -> Vec<(String, Var)> {
        let data = varmap
            .data()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut vars: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        vars
    }
}
