mod registry;

pub use registry::{default_presets, MediaKind, ModelPreset, ModelRegistry};
