//! Model capabilities and the fallback model registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Video,
    /// Accepts any of the above.
    Multimodal,
}

/// A model the fallback strategy may route to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapability {
    pub id: String,
    pub modalities: Vec<Modality>,
}

impl ModelCapability {
    pub fn new(id: impl Into<String>, modalities: impl Into<Vec<Modality>>) -> Self {
        Self {
            id: id.into(),
            modalities: modalities.into(),
        }
    }

    /// True if every required modality is covered.
    pub fn supports(&self, required: &[Modality]) -> bool {
        self.modalities.contains(&Modality::Multimodal)
            || required.iter().all(|m| self.modalities.contains(m))
    }
}

/// Source of models able to serve a modality set.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Compatible model ids, most preferred first.
    async fn compatible_models(&self, modalities: &[Modality]) -> Vec<String>;
}

/// Registry over a fixed capability table, usually from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticModelRegistry {
    models: Vec<ModelCapability>,
}

impl StaticModelRegistry {
    pub fn new(models: Vec<ModelCapability>) -> Self {
        Self { models }
    }

    pub fn models(&self) -> &[ModelCapability] {
        &self.models
    }
}

#[async_trait]
impl ModelRegistry for StaticModelRegistry {
    async fn compatible_models(&self, modalities: &[Modality]) -> Vec<String> {
        self.models
            .iter()
            .filter(|model| model.supports(modalities))
            .map(|model| model.id.clone())
            .collect()
    }
}
