use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// Per-model generation bounds. The registry is the only place a model
/// identifier is interpreted; callers extend support by adding entries,
/// never by branching on identifier strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPreset {
    pub name: String,
    pub kind: MediaKind,
    pub max_steps: u32,
    pub max_size: u32,
    pub default_steps: u32,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelPreset>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelPreset>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_presets),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelPreset> {
        self.models.get(name)
    }

    /// Fail-fast lookup: unknown identifiers are a caller-contract
    /// violation and must be rejected before any network attempt.
    pub fn require(&self, name: &str) -> Result<ModelPreset, String> {
        if let Some(preset) = self.models.get(name) {
            return Ok(preset.clone());
        }
        let available = self
            .models
            .keys()
            .map(String::as_str)
            .collect::<Vec<&str>>()
            .join(", ");
        Err(format!("unknown model '{name}' (available: [{available}])"))
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelPreset> {
        self.models.values()
    }

    pub fn by_kind(&self, kind: MediaKind) -> Vec<ModelPreset> {
        self.models
            .values()
            .filter(|preset| preset.kind == kind)
            .cloned()
            .collect()
    }
}

pub fn default_presets() -> IndexMap<String, ModelPreset> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, kind: MediaKind, max_steps: u32, max_size: u32, default_steps: u32| {
        map.insert(
            name.to_string(),
            ModelPreset {
                name: name.to_string(),
                kind,
                max_steps,
                max_size,
                default_steps,
            },
        );
    };

    insert(
        "black-forest-labs/FLUX.1-schnell",
        MediaKind::Image,
        16,
        1024,
        4,
    );
    insert(
        "stabilityai/stable-diffusion-2-1",
        MediaKind::Image,
        50,
        768,
        20,
    );
    insert(
        "damo-vilab/text-to-video-ms-1.7b",
        MediaKind::Video,
        30,
        576,
        25,
    );

    map
}
