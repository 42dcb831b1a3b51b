use serde::{Deserialize, Serialize};

use crate::models::{MediaKind, ModelPreset};

/// Smallest edge the interactive surface offers; the clamp never goes below
/// it regardless of what a preset declares.
pub const MIN_DIMENSION: u32 = 384;

/// Slider step the interactive surface exposes for width/height. The clamp
/// itself only enforces the inclusive bounds; quantization stays a UI concern.
pub const DIMENSION_STEP: u32 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f32,
    pub seed: Option<i64>,
    pub provider: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            model: model.into(),
            width: 768,
            height: 768,
            steps: 20,
            guidance_scale: 7.5,
            seed: None,
            provider: None,
        }
    }

    /// Normalizes the request against a preset's declared bounds.
    ///
    /// Pure and idempotent: `r.clamped(p).clamped(p) == r.clamped(p)`.
    /// A negative seed is the "let the provider choose" sentinel and maps
    /// to `None`; a blank negative prompt maps to `None`.
    pub fn clamped(&self, preset: &ModelPreset) -> GenerationRequest {
        let max_size = preset.max_size.max(MIN_DIMENSION);
        let mut clamped = self.clone();
        clamped.steps = self.steps.clamp(1, preset.max_steps.max(1));
        clamped.width = self.width.clamp(MIN_DIMENSION, max_size);
        clamped.height = self.height.clamp(MIN_DIMENSION, max_size);
        clamped.seed = self.seed.filter(|value| *value >= 0);
        clamped.negative_prompt = self
            .negative_prompt
            .as_ref()
            .filter(|value| !value.trim().is_empty())
            .cloned();
        clamped
    }
}

/// Token plus optional provider routing hint. A missing token is the
/// recognized "unauthenticated" mode, not an error.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    pub token: Option<String>,
    pub provider: Option<String>,
}

impl Credential {
    pub fn new(token: Option<String>, provider: Option<String>) -> Self {
        Self { token, provider }
    }

    pub fn has_token(&self) -> bool {
        self.token
            .as_deref()
            .map(|token| !token.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaBytes {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl MediaBytes {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactPayload {
    Remote(MediaBytes),
    Placeholder(MediaBytes),
    Empty,
}

impl ArtifactPayload {
    pub fn label(&self) -> &'static str {
        match self {
            ArtifactPayload::Remote(_) => "remote",
            ArtifactPayload::Placeholder(_) => "placeholder",
            ArtifactPayload::Empty => "empty",
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            ArtifactPayload::Remote(media) | ArtifactPayload::Placeholder(media) => &media.bytes,
            ArtifactPayload::Empty => &[],
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            ArtifactPayload::Remote(media) | ArtifactPayload::Placeholder(media) => {
                Some(media.mime_type.as_str())
            }
            ArtifactPayload::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }
}

/// Terminal outcome of one generation. Constructed by the engine, handed to
/// the gallery and the caller, immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub kind: MediaKind,
    pub artifact: ArtifactPayload,
    pub model: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use crate::models::{MediaKind, ModelPreset};

    use super::{ArtifactPayload, Credential, GenerationRequest, MediaBytes, MIN_DIMENSION};

    fn preset(max_steps: u32, max_size: u32) -> ModelPreset {
        ModelPreset {
            name: "test/model".to_string(),
            kind: MediaKind::Image,
            max_steps,
            max_size,
            default_steps: max_steps.min(20),
        }
    }

    #[test]
    fn clamp_is_idempotent() {
        let preset = preset(16, 1024);
        let mut request = GenerationRequest::new("a boat", "test/model");
        request.steps = 50;
        request.width = 4096;
        request.height = 100;
        request.seed = Some(-1);
        request.negative_prompt = Some("   ".to_string());

        let once = request.clamped(&preset);
        let twice = once.clamped(&preset);
        assert_eq!(once, twice);
    }

    #[test]
    fn clamp_bounds_steps_and_dimensions() {
        let preset = preset(16, 1024);
        let mut request = GenerationRequest::new("a boat", "test/model");
        request.steps = 50;
        request.width = 4096;
        request.height = 100;

        let clamped = request.clamped(&preset);
        assert_eq!(clamped.steps, 16);
        assert_eq!(clamped.width, 1024);
        assert_eq!(clamped.height, MIN_DIMENSION);
    }

    #[test]
    fn clamp_raises_zero_steps_to_one() {
        let preset = preset(16, 1024);
        let mut request = GenerationRequest::new("a boat", "test/model");
        request.steps = 0;
        assert_eq!(request.clamped(&preset).steps, 1);
    }

    #[test]
    fn negative_seed_means_unset() {
        let preset = preset(16, 1024);
        let mut request = GenerationRequest::new("a boat", "test/model");
        request.seed = Some(-1);
        assert_eq!(request.clamped(&preset).seed, None);

        request.seed = Some(7);
        assert_eq!(request.clamped(&preset).seed, Some(7));
    }

    #[test]
    fn blank_negative_prompt_is_dropped() {
        let preset = preset(16, 1024);
        let mut request = GenerationRequest::new("a boat", "test/model");
        request.negative_prompt = Some("  ".to_string());
        assert_eq!(request.clamped(&preset).negative_prompt, None);

        request.negative_prompt = Some("blurry".to_string());
        assert_eq!(
            request.clamped(&preset).negative_prompt.as_deref(),
            Some("blurry")
        );
    }

    #[test]
    fn credential_without_token_is_unauthenticated() {
        assert!(!Credential::default().has_token());
        assert!(!Credential::new(Some("   ".to_string()), None).has_token());
        assert!(Credential::new(Some("hf_abc".to_string()), None).has_token());
    }

    #[test]
    fn artifact_payload_exposes_bytes_and_kind_label() {
        let media = MediaBytes::new(vec![1, 2, 3], "image/png");
        let remote = ArtifactPayload::Remote(media.clone());
        assert_eq!(remote.label(), "remote");
        assert_eq!(remote.bytes(), &[1, 2, 3]);
        assert_eq!(remote.mime_type(), Some("image/png"));

        let empty = ArtifactPayload::Empty;
        assert_eq!(empty.label(), "empty");
        assert!(empty.is_empty());
        assert_eq!(empty.mime_type(), None);
    }
}
