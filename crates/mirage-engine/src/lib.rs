use std::env;
use std::io::Cursor;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use mirage_contracts::events::EventLog;
use mirage_contracts::models::{MediaKind, ModelPreset, ModelRegistry};
use mirage_contracts::requests::{
    ArtifactPayload, Credential, GenerationRequest, GenerationResult, MediaBytes,
};
use mirage_contracts::session::SessionGallery;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const DEFAULT_API_BASE: &str = "https://router.huggingface.co";
const DEFAULT_ROUTE: &str = "hf-inference";

const DEMO_MODE_STATUS: &str =
    "demo mode: no credential configured; set HF_TOKEN to generate with a real model.";
const NO_BACKEND_STATUS: &str =
    "remote generation is unavailable in this runtime; showing a local placeholder.";

const CLIP_WIDTH: u32 = 256;
const CLIP_HEIGHT: u32 = 144;
const CLIP_FRAMES: u32 = 24;
const CLIP_FRAME_MS: u32 = 100;

const BORDER_INSET: u32 = 40;
const BORDER_THICKNESS: u32 = 2;
// 5 glyph columns plus one column of spacing.
const GLYPH_ADVANCE: u32 = 6;

/// The consumed remote capability. Implementations report failures as plain
/// error messages; no structured error codes are assumed anywhere above.
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;
    fn text_to_image(
        &self,
        request: &GenerationRequest,
        token: &str,
        provider: Option<&str>,
    ) -> Result<MediaBytes>;
    fn text_to_video(
        &self,
        request: &GenerationRequest,
        token: &str,
        provider: Option<&str>,
    ) -> Result<MediaBytes>;
}

/// Blocking client for the Hugging Face inference router. A provider
/// override swaps the first path segment; without one the default
/// `hf-inference` route decides where the call lands.
pub struct HfRouterBackend {
    api_base: String,
    http: HttpClient,
}

impl HfRouterBackend {
    pub fn new() -> Self {
        Self {
            api_base: env::var("MIRAGE_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            http: HttpClient::new(),
        }
    }

    fn model_endpoint(&self, provider: Option<&str>, model: &str) -> String {
        let route = provider.unwrap_or(DEFAULT_ROUTE);
        format!("{}/{}/models/{}", self.api_base, route, model)
    }

    fn post_generation(
        &self,
        endpoint: &str,
        token: &str,
        payload: &Value,
        label: &str,
    ) -> Result<MediaBytes> {
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .json(payload)
            .send()
            .with_context(|| format!("{label} request failed ({endpoint})"))?;
        media_bytes_or_error(label, response)
    }
}

impl Default for HfRouterBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for HfRouterBackend {
    fn name(&self) -> &str {
        "hf-router"
    }

    fn text_to_image(
        &self,
        request: &GenerationRequest,
        token: &str,
        provider: Option<&str>,
    ) -> Result<MediaBytes> {
        let mut parameters = map_object(json!({
            "guidance_scale": request.guidance_scale,
            "num_inference_steps": request.steps,
            "width": request.width,
            "height": request.height,
        }));
        if let Some(negative) = &request.negative_prompt {
            parameters.insert(
                "negative_prompt".to_string(),
                Value::String(negative.clone()),
            );
        }
        if let Some(seed) = request.seed {
            parameters.insert("seed".to_string(), Value::Number(seed.into()));
        }
        let payload = json!({
            "inputs": request.prompt,
            "parameters": parameters,
        });
        let endpoint = self.model_endpoint(provider, &request.model);
        self.post_generation(&endpoint, token, &payload, "text-to-image")
    }

    fn text_to_video(
        &self,
        request: &GenerationRequest,
        token: &str,
        provider: Option<&str>,
    ) -> Result<MediaBytes> {
        let payload = json!({ "inputs": request.prompt });
        let endpoint = self.model_endpoint(provider, &request.model);
        self.post_generation(&endpoint, token, &payload, "text-to-video")
    }
}

fn media_bytes_or_error(label: &str, response: HttpResponse) -> Result<MediaBytes> {
    let status = response.status();
    let code = status.as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = response
        .bytes()
        .with_context(|| format!("{label} response body read failed"))?;
    if !status.is_success() {
        let text = String::from_utf8_lossy(&body);
        bail!(
            "{label} request failed ({code}): {}",
            truncate_text(&text, 512)
        );
    }
    if content_type.starts_with("image/") || content_type.starts_with("video/") {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or(content_type.as_str())
            .trim()
            .to_string();
        return Ok(MediaBytes::new(body.to_vec(), mime));
    }
    let parsed: Value = serde_json::from_slice(&body)
        .with_context(|| format!("{label} returned neither media bytes nor JSON"))?;
    decode_media_payload(label, &parsed)
}

fn decode_media_payload(label: &str, payload: &Value) -> Result<MediaBytes> {
    if let Some(encoded) = payload.get("image").and_then(Value::as_str) {
        return decode_base64_media(label, encoded, "image/png");
    }
    if let Some(encoded) = payload.get("video").and_then(Value::as_str) {
        return decode_base64_media(label, encoded, "video/mp4");
    }
    if let Some(encoded) = payload
        .get("images")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(Value::as_str)
    {
        return decode_base64_media(label, encoded, "image/png");
    }
    if let Some(encoded) = payload
        .get("data")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("b64_json"))
        .and_then(Value::as_str)
    {
        return decode_base64_media(label, encoded, "image/png");
    }
    bail!("{label} response carried no media payload");
}

fn decode_base64_media(label: &str, encoded: &str, mime: &str) -> Result<MediaBytes> {
    let bytes = BASE64
        .decode(encoded.trim())
        .with_context(|| format!("{label} media payload is not valid base64"))?;
    if bytes.is_empty() {
        bail!("{label} media payload decoded to zero bytes");
    }
    Ok(MediaBytes::new(bytes, mime))
}

/// Matches the provider error shape that means "this provider override does
/// not serve this model/operation", the one failure worth a single automatic
/// retry. Message-text sniffing only: the router guarantees nothing more
/// structured. Swap the rule here, not in the orchestration.
pub fn is_route_rejection(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let text = cause.to_string().to_ascii_lowercase();
        text.contains("not allowed") || text.contains("route")
    })
}

trait GenerationOps {
    fn kind(&self) -> MediaKind;
    fn remote(
        &self,
        backend: &dyn InferenceBackend,
        token: &str,
        provider: Option<&str>,
    ) -> Result<MediaBytes>;
    fn placeholder(&self) -> Result<MediaBytes>;
}

struct ImageGeneration<'a> {
    request: &'a GenerationRequest,
}

impl GenerationOps for ImageGeneration<'_> {
    fn kind(&self) -> MediaKind {
        MediaKind::Image
    }

    fn remote(
        &self,
        backend: &dyn InferenceBackend,
        token: &str,
        provider: Option<&str>,
    ) -> Result<MediaBytes> {
        backend.text_to_image(self.request, token, provider)
    }

    fn placeholder(&self) -> Result<MediaBytes> {
        render_placeholder_image(&self.request.prompt, self.request.width, self.request.height)
    }
}

struct VideoGeneration<'a> {
    request: &'a GenerationRequest,
}

impl GenerationOps for VideoGeneration<'_> {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn remote(
        &self,
        backend: &dyn InferenceBackend,
        token: &str,
        provider: Option<&str>,
    ) -> Result<MediaBytes> {
        backend.text_to_video(self.request, token, provider)
    }

    fn placeholder(&self) -> Result<MediaBytes> {
        render_placeholder_clip(&self.request.prompt, self.request.seed)
    }
}

/// One interactive session: credential, capability table, optional remote
/// backend, gallery, event log. One generation in flight at a time; every
/// outcome lands in the gallery and in `events.jsonl`.
pub struct StudioSession {
    session_id: String,
    events: EventLog,
    registry: ModelRegistry,
    backend: Option<Box<dyn InferenceBackend>>,
    credential: Credential,
    gallery: SessionGallery,
}

impl StudioSession {
    pub fn new(events_path: impl Into<PathBuf>, credential: Credential) -> Result<Self> {
        Self::with_backend(
            events_path,
            credential,
            Some(Box::new(HfRouterBackend::new())),
        )
    }

    /// `backend: None` models a runtime without the remote capability; every
    /// generation then degrades to a placeholder.
    pub fn with_backend(
        events_path: impl Into<PathBuf>,
        credential: Credential,
        backend: Option<Box<dyn InferenceBackend>>,
    ) -> Result<Self> {
        let session_id = Uuid::new_v4().to_string();
        let events = EventLog::new(events_path.into(), session_id.clone());
        events.emit(
            "session_started",
            map_object(json!({
                "authenticated": credential.has_token(),
                "backend": backend.as_deref().map(|value| value.name()).unwrap_or("none"),
            })),
        )?;
        Ok(Self {
            session_id,
            events,
            registry: ModelRegistry::new(None),
            backend,
            credential,
            gallery: SessionGallery::new(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn set_credential(&mut self, credential: Credential) {
        self.credential = credential;
    }

    pub fn gallery(&self) -> &SessionGallery {
        &self.gallery
    }

    pub fn event_log(&self) -> EventLog {
        self.events.clone()
    }

    pub fn default_video_model(&self) -> Option<String> {
        self.registry
            .by_kind(MediaKind::Video)
            .first()
            .map(|preset| preset.name.clone())
    }

    pub fn clear_gallery(&mut self) -> Result<()> {
        let cleared = self.gallery.len();
        self.gallery.clear();
        self.events.emit(
            "gallery_cleared",
            map_object(json!({ "entries": cleared })),
        )?;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        self.events.emit(
            "session_finished",
            map_object(json!({ "generations": self.gallery.len() })),
        )?;
        Ok(())
    }

    /// Errors only on caller-contract violations (blank prompt, unknown or
    /// wrong-kind model). Remote failures never escape: they degrade into
    /// the returned result's status.
    pub fn generate_image(&mut self, request: &GenerationRequest) -> Result<GenerationResult> {
        let preset = self.require_preset(request, MediaKind::Image)?;
        let clamped = request.clamped(&preset);
        let ops = ImageGeneration { request: &clamped };
        self.orchestrate(&ops, &clamped)
    }

    pub fn generate_video(&mut self, request: &GenerationRequest) -> Result<GenerationResult> {
        let preset = self.require_preset(request, MediaKind::Video)?;
        let clamped = request.clamped(&preset);
        let ops = VideoGeneration { request: &clamped };
        self.orchestrate(&ops, &clamped)
    }

    fn require_preset(&self, request: &GenerationRequest, kind: MediaKind) -> Result<ModelPreset> {
        if request.prompt.trim().is_empty() {
            bail!("prompt must not be empty");
        }
        let preset = self
            .registry
            .require(&request.model)
            .map_err(anyhow::Error::msg)?;
        if preset.kind != kind {
            bail!(
                "model '{}' is not registered for {} generation",
                preset.name,
                kind.as_str()
            );
        }
        Ok(preset)
    }

    fn orchestrate(
        &mut self,
        ops: &dyn GenerationOps,
        request: &GenerationRequest,
    ) -> Result<GenerationResult> {
        let kind = ops.kind();
        let provider_override = request
            .provider
            .clone()
            .or_else(|| self.credential.provider.clone());
        self.events.emit(
            "generation_requested",
            map_object(json!({
                "kind": kind.as_str(),
                "model": request.model,
                "provider": provider_override.as_deref(),
                "steps": request.steps,
                "width": request.width,
                "height": request.height,
            })),
        )?;

        let result = match (self.backend.as_deref(), self.credential.has_token()) {
            (Some(backend), true) => {
                let token = self.credential.token.clone().unwrap_or_default();
                self.attempt_remote(
                    ops,
                    request,
                    backend,
                    token.trim(),
                    provider_override.as_deref(),
                )?
            }
            (_, false) => {
                self.emit_degraded(kind, request, "no credential")?;
                self.degraded(ops, request, DEMO_MODE_STATUS.to_string())
            }
            (None, true) => {
                self.emit_degraded(kind, request, "no backend")?;
                self.degraded(ops, request, NO_BACKEND_STATUS.to_string())
            }
        };

        self.events.emit(
            "artifact_created",
            map_object(json!({
                "kind": kind.as_str(),
                "artifact": result.artifact.label(),
                "artifact_id": short_id(&request.prompt, self.gallery.len() as u64),
                "bytes": result.artifact.bytes().len(),
                "status": result.status.as_str(),
            })),
        )?;
        self.gallery.append(result.clone());
        Ok(result)
    }

    fn attempt_remote(
        &self,
        ops: &dyn GenerationOps,
        request: &GenerationRequest,
        backend: &dyn InferenceBackend,
        token: &str,
        provider: Option<&str>,
    ) -> Result<GenerationResult> {
        match ops.remote(backend, token, provider) {
            Ok(media) => Ok(self.remote_result(ops, request, media, String::new())),
            Err(err) => {
                let error_text = error_chain_text(&err, 2048);
                if is_route_rejection(&err) && provider.is_some() {
                    // One retry, one direction: drop the override and let the
                    // default route decide. Never more than two attempts.
                    self.events.emit(
                        "route_fallback",
                        map_object(json!({
                            "kind": ops.kind().as_str(),
                            "model": request.model,
                            "provider": provider,
                            "error": error_text,
                        })),
                    )?;
                    match ops.remote(backend, token, None) {
                        Ok(media) => {
                            let status = format!(
                                "provider '{}' rejected the route; retried via the default router.",
                                provider.unwrap_or_default()
                            );
                            Ok(self.remote_result(ops, request, media, status))
                        }
                        Err(retry_err) => {
                            let retry_text = error_chain_text(&retry_err, 2048);
                            self.emit_degraded(ops.kind(), request, &retry_text)?;
                            Ok(self.degraded(
                                ops,
                                request,
                                format!("generation failed: {retry_text}"),
                            ))
                        }
                    }
                } else {
                    self.emit_degraded(ops.kind(), request, &error_text)?;
                    Ok(self.degraded(ops, request, format!("generation failed: {error_text}")))
                }
            }
        }
    }

    fn remote_result(
        &self,
        ops: &dyn GenerationOps,
        request: &GenerationRequest,
        media: MediaBytes,
        status: String,
    ) -> GenerationResult {
        GenerationResult {
            kind: ops.kind(),
            artifact: ArtifactPayload::Remote(media),
            model: request.model.clone(),
            status,
        }
    }

    /// Last line of defense: synthesis failures degrade further to the
    /// empty artifact instead of propagating.
    fn degraded(
        &self,
        ops: &dyn GenerationOps,
        request: &GenerationRequest,
        status: String,
    ) -> GenerationResult {
        match ops.placeholder() {
            Ok(media) => GenerationResult {
                kind: ops.kind(),
                artifact: ArtifactPayload::Placeholder(media),
                model: request.model.clone(),
                status,
            },
            Err(err) => GenerationResult {
                kind: ops.kind(),
                artifact: ArtifactPayload::Empty,
                model: request.model.clone(),
                status: format!(
                    "{status} placeholder unavailable: {}",
                    error_chain_text(&err, 512)
                ),
            },
        }
    }

    fn emit_degraded(
        &self,
        kind: MediaKind,
        request: &GenerationRequest,
        reason: &str,
    ) -> Result<()> {
        self.events.emit(
            "generation_degraded",
            map_object(json!({
                "kind": kind.as_str(),
                "model": request.model,
                "reason": reason,
            })),
        )?;
        Ok(())
    }
}

fn render_placeholder_image(prompt: &str, width: u32, height: u32) -> Result<MediaBytes> {
    let width = width.max(64);
    let height = height.max(64);
    let mut image = RgbImage::new(width, height);
    let w = width as f32;
    let h = height as f32;
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let fx = x as f32 / w;
        let fy = y as f32 / h;
        let r = (180.0 + 60.0 * fx) as u8;
        let g = (120.0 + 80.0 * fy) as u8;
        let b = (200.0 - 80.0 * ((x + y) as f32 / (w + h))) as u8;
        *pixel = Rgb([r, g, b]);
    }
    draw_border(&mut image, BORDER_INSET, BORDER_THICKNESS);

    let font_size = (width / 28).max(16);
    let scale = (font_size / 8).max(1);
    let line_height = (font_size + 6) as i64;
    let lines = wrap_prompt_lines(prompt, width, scale);
    let mut pen_y = height as i64 / 2 - (lines.len() as i64 * line_height) / 2;
    for line in &lines {
        let line_width = text_width(line, scale) as i64;
        draw_text_line(&mut image, line, (width as i64 - line_width) / 2, pen_y, scale);
        pen_y += line_height;
    }

    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("placeholder png encode failed")?;
    Ok(MediaBytes::new(bytes, "image/png"))
}

fn render_placeholder_clip(prompt: &str, seed: Option<i64>) -> Result<MediaBytes> {
    let (tint_r, tint_g, tint_b) = color_from_prompt(prompt, seed.unwrap_or_default() as u64);
    let mut bytes = Vec::new();
    let mut encoder = GifEncoder::new(&mut bytes);
    encoder
        .set_repeat(Repeat::Infinite)
        .context("placeholder clip encoder rejected repeat")?;
    for index in 0..CLIP_FRAMES {
        let phase = index as f32 / CLIP_FRAMES as f32;
        let mut frame = RgbaImage::new(CLIP_WIDTH, CLIP_HEIGHT);
        for (x, y, pixel) in frame.enumerate_pixels_mut() {
            let fx = x as f32 / CLIP_WIDTH as f32;
            let fy = y as f32 / CLIP_HEIGHT as f32;
            let drift = (fx + fy + phase).fract();
            let r = tint_r as f32 * 0.55 + 255.0 * drift * 0.45;
            let g = tint_g as f32 * 0.55 + 255.0 * fy * 0.45;
            let b = tint_b as f32 * 0.55 + 255.0 * (1.0 - drift) * 0.45;
            *pixel = Rgba([r as u8, g as u8, b as u8, 255]);
        }
        encoder
            .encode_frame(Frame::from_parts(
                frame,
                0,
                0,
                Delay::from_numer_denom_ms(CLIP_FRAME_MS, 1),
            ))
            .context("placeholder clip frame encode failed")?;
    }
    drop(encoder);
    if bytes.is_empty() {
        bail!("placeholder clip encoder produced no bytes");
    }
    Ok(MediaBytes::new(bytes, "image/gif"))
}

/// Greedy word packing: a word joins the current line only while the
/// measured line width stays under `width - 120`. Words are never split; a
/// single oversized word still gets its own line.
fn wrap_prompt_lines(text: &str, width: u32, scale: u32) -> Vec<String> {
    let limit = width.saturating_sub(120);
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let candidate = if line.is_empty() {
            word.to_string()
        } else {
            format!("{line} {word}")
        };
        if text_width(&candidate, scale) < limit {
            line = candidate;
        } else {
            if !line.is_empty() {
                lines.push(line);
            }
            line = word.to_string();
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn text_width(text: &str, scale: u32) -> u32 {
    let glyphs = text.chars().count() as u32;
    if glyphs == 0 {
        0
    } else {
        (glyphs * GLYPH_ADVANCE - 1) * scale
    }
}

fn draw_border(image: &mut RgbImage, inset: u32, thickness: u32) {
    let (width, height) = image.dimensions();
    if width <= inset * 2 + thickness * 2 || height <= inset * 2 + thickness * 2 {
        return;
    }
    let white = Rgb([255, 255, 255]);
    for t in 0..thickness {
        let left = inset + t;
        let right = width - 1 - inset - t;
        let top = inset + t;
        let bottom = height - 1 - inset - t;
        for x in left..=right {
            image.put_pixel(x, top, white);
            image.put_pixel(x, bottom, white);
        }
        for y in top..=bottom {
            image.put_pixel(left, y, white);
            image.put_pixel(right, y, white);
        }
    }
}

fn draw_text_line(image: &mut RgbImage, text: &str, origin_x: i64, origin_y: i64, scale: u32) {
    let mut pen_x = origin_x;
    for ch in text.chars() {
        let columns = glyph_columns(ch);
        for (col, bits) in columns.iter().enumerate() {
            for row in 0..7u32 {
                if bits & (1 << row) != 0 {
                    fill_block(
                        image,
                        pen_x + (col as u32 * scale) as i64,
                        origin_y + (row * scale) as i64,
                        scale,
                    );
                }
            }
        }
        pen_x += (GLYPH_ADVANCE * scale) as i64;
    }
}

fn fill_block(image: &mut RgbImage, x: i64, y: i64, scale: u32) {
    let (width, height) = image.dimensions();
    let white = Rgb([255, 255, 255]);
    for dy in 0..scale as i64 {
        for dx in 0..scale as i64 {
            let px = x + dx;
            let py = y + dy;
            if px >= 0 && py >= 0 && (px as u32) < width && (py as u32) < height {
                image.put_pixel(px as u32, py as u32, white);
            }
        }
    }
}

// Column-major 5x7 glyphs for ASCII 0x20..=0x5F, least-significant bit on
// top. Lowercase maps to uppercase; anything else renders as '?'.
fn glyph_columns(ch: char) -> [u8; 5] {
    const GLYPHS: [[u8; 5]; 64] = [
        [0x00, 0x00, 0x00, 0x00, 0x00], // space
        [0x00, 0x00, 0x5F, 0x00, 0x00], // !
        [0x00, 0x07, 0x00, 0x07, 0x00], // "
        [0x14, 0x7F, 0x14, 0x7F, 0x14], // #
        [0x24, 0x2A, 0x7F, 0x2A, 0x12], // $
        [0x23, 0x13, 0x08, 0x64, 0x62], // %
        [0x36, 0x49, 0x55, 0x22, 0x50], // &
        [0x00, 0x05, 0x03, 0x00, 0x00], // '
        [0x00, 0x1C, 0x22, 0x41, 0x00], // (
        [0x00, 0x41, 0x22, 0x1C, 0x00], // )
        [0x14, 0x08, 0x3E, 0x08, 0x14], // *
        [0x08, 0x08, 0x3E, 0x08, 0x08], // +
        [0x00, 0x50, 0x30, 0x00, 0x00], // ,
        [0x08, 0x08, 0x08, 0x08, 0x08], // -
        [0x00, 0x60, 0x60, 0x00, 0x00], // .
        [0x20, 0x10, 0x08, 0x04, 0x02], // /
        [0x3E, 0x51, 0x49, 0x45, 0x3E], // 0
        [0x00, 0x42, 0x7F, 0x40, 0x00], // 1
        [0x42, 0x61, 0x51, 0x49, 0x46], // 2
        [0x21, 0x41, 0x45, 0x4B, 0x31], // 3
        [0x18, 0x14, 0x12, 0x7F, 0x10], // 4
        [0x27, 0x45, 0x45, 0x45, 0x39], // 5
        [0x3C, 0x4A, 0x49, 0x49, 0x30], // 6
        [0x01, 0x71, 0x09, 0x05, 0x03], // 7
        [0x36, 0x49, 0x49, 0x49, 0x36], // 8
        [0x06, 0x49, 0x49, 0x29, 0x1E], // 9
        [0x00, 0x36, 0x36, 0x00, 0x00], // :
        [0x00, 0x56, 0x36, 0x00, 0x00], // ;
        [0x00, 0x08, 0x14, 0x22, 0x41], // <
        [0x14, 0x14, 0x14, 0x14, 0x14], // =
        [0x41, 0x22, 0x14, 0x08, 0x00], // >
        [0x02, 0x01, 0x51, 0x09, 0x06], // ?
        [0x32, 0x49, 0x79, 0x41, 0x3E], // @
        [0x7E, 0x11, 0x11, 0x11, 0x7E], // A
        [0x7F, 0x49, 0x49, 0x49, 0x36], // B
        [0x3E, 0x41, 0x41, 0x41, 0x22], // C
        [0x7F, 0x41, 0x41, 0x22, 0x1C], // D
        [0x7F, 0x49, 0x49, 0x49, 0x41], // E
        [0x7F, 0x09, 0x09, 0x01, 0x01], // F
        [0x3E, 0x41, 0x41, 0x51, 0x32], // G
        [0x7F, 0x08, 0x08, 0x08, 0x7F], // H
        [0x00, 0x41, 0x7F, 0x41, 0x00], // I
        [0x20, 0x40, 0x41, 0x3F, 0x01], // J
        [0x7F, 0x08, 0x14, 0x22, 0x41], // K
        [0x7F, 0x40, 0x40, 0x40, 0x40], // L
        [0x7F, 0x02, 0x04, 0x02, 0x7F], // M
        [0x7F, 0x04, 0x08, 0x10, 0x7F], // N
        [0x3E, 0x41, 0x41, 0x41, 0x3E], // O
        [0x7F, 0x09, 0x09, 0x09, 0x06], // P
        [0x3E, 0x41, 0x51, 0x21, 0x5E], // Q
        [0x7F, 0x09, 0x19, 0x29, 0x46], // R
        [0x46, 0x49, 0x49, 0x49, 0x31], // S
        [0x01, 0x01, 0x7F, 0x01, 0x01], // T
        [0x3F, 0x40, 0x40, 0x40, 0x3F], // U
        [0x1F, 0x20, 0x40, 0x20, 0x1F], // V
        [0x7F, 0x20, 0x18, 0x20, 0x7F], // W
        [0x63, 0x14, 0x08, 0x14, 0x63], // X
        [0x03, 0x04, 0x78, 0x04, 0x03], // Y
        [0x61, 0x51, 0x49, 0x45, 0x43], // Z
        [0x00, 0x00, 0x7F, 0x41, 0x41], // [
        [0x02, 0x04, 0x08, 0x10, 0x20], // backslash
        [0x41, 0x41, 0x7F, 0x00, 0x00], // ]
        [0x04, 0x02, 0x01, 0x02, 0x04], // ^
        [0x40, 0x40, 0x40, 0x40, 0x40], // _
    ];

    let upper = ch.to_ascii_uppercase();
    let index = (upper as usize).wrapping_sub(0x20);
    if index < GLYPHS.len() {
        GLYPHS[index]
    } else {
        GLYPHS[(b'?' - 0x20) as usize]
    }
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str, idx: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use anyhow::anyhow;
    use mirage_contracts::models::MediaKind;
    use mirage_contracts::requests::{Credential, GenerationRequest, MediaBytes};
    use serde_json::Value;

    use super::{
        is_route_rejection, render_placeholder_clip, render_placeholder_image, text_width,
        wrap_prompt_lines, InferenceBackend, StudioSession,
    };

    const PNG_MAGIC: [u8; 4] = [0x89, b'P', b'N', b'G'];

    #[derive(Clone, Copy, Debug)]
    enum ScriptedResponse {
        Succeed,
        RejectRoute,
        Fail(&'static str),
    }

    struct ScriptedBackend {
        calls: AtomicUsize,
        script: Vec<ScriptedResponse>,
        seen_steps: Mutex<Vec<u32>>,
        seen_providers: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<ScriptedResponse>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script,
                seen_steps: Mutex::new(Vec::new()),
                seen_providers: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn respond(
            &self,
            request: &GenerationRequest,
            provider: Option<&str>,
        ) -> anyhow::Result<MediaBytes> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_steps.lock().unwrap().push(request.steps);
            self.seen_providers
                .lock()
                .unwrap()
                .push(provider.map(str::to_string));
            let response = self
                .script
                .get(idx)
                .or_else(|| self.script.last())
                .copied()
                .unwrap_or(ScriptedResponse::Succeed);
            match response {
                ScriptedResponse::Succeed => {
                    Ok(MediaBytes::new(PNG_MAGIC.to_vec(), "image/png"))
                }
                ScriptedResponse::RejectRoute => Err(anyhow!(
                    "text-to-image request failed (403): Not allowed to POST to this route"
                )),
                ScriptedResponse::Fail(message) => Err(anyhow!("{message}")),
            }
        }
    }

    impl InferenceBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn text_to_image(
            &self,
            request: &GenerationRequest,
            _token: &str,
            provider: Option<&str>,
        ) -> anyhow::Result<MediaBytes> {
            self.respond(request, provider)
        }

        fn text_to_video(
            &self,
            request: &GenerationRequest,
            _token: &str,
            provider: Option<&str>,
        ) -> anyhow::Result<MediaBytes> {
            self.respond(request, provider)
        }
    }

    fn session_with(
        temp: &tempfile::TempDir,
        credential: Credential,
        script: Vec<ScriptedResponse>,
    ) -> (StudioSession, &'static ScriptedBackend) {
        let backend: &'static ScriptedBackend = Box::leak(Box::new(ScriptedBackend::new(script)));
        let session = StudioSession::with_backend(
            temp.path().join("events.jsonl"),
            credential,
            Some(Box::new(BackendHandle(backend))),
        )
        .expect("session");
        (session, backend)
    }

    struct BackendHandle(&'static ScriptedBackend);

    impl InferenceBackend for BackendHandle {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn text_to_image(
            &self,
            request: &GenerationRequest,
            token: &str,
            provider: Option<&str>,
        ) -> anyhow::Result<MediaBytes> {
            self.0.text_to_image(request, token, provider)
        }

        fn text_to_video(
            &self,
            request: &GenerationRequest,
            token: &str,
            provider: Option<&str>,
        ) -> anyhow::Result<MediaBytes> {
            self.0.text_to_video(request, token, provider)
        }
    }

    fn authed() -> Credential {
        Credential::new(Some("hf_test".to_string()), None)
    }

    fn image_request(prompt: &str) -> GenerationRequest {
        GenerationRequest::new(prompt, "black-forest-labs/FLUX.1-schnell")
    }

    #[test]
    fn no_credential_degrades_without_touching_the_backend() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, backend) =
            session_with(&temp, Credential::default(), vec![ScriptedResponse::Succeed]);

        let result = session.generate_image(&image_request("A cat"))?;
        assert_eq!(backend.calls(), 0);
        assert_eq!(result.artifact.label(), "placeholder");
        assert!(result.status.contains("demo mode"));
        assert_eq!(result.artifact.mime_type(), Some("image/png"));
        assert!(result.artifact.bytes().starts_with(&PNG_MAGIC));
        Ok(())
    }

    #[test]
    fn unknown_model_fails_fast_before_any_remote_call() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, backend) =
            session_with(&temp, authed(), vec![ScriptedResponse::Succeed]);

        let request = GenerationRequest::new("a boat", "nope/never");
        let err = session.generate_image(&request).unwrap_err();
        assert!(err.to_string().contains("unknown model 'nope/never'"));
        assert_eq!(backend.calls(), 0);
        Ok(())
    }

    #[test]
    fn video_generation_rejects_image_models() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, backend) =
            session_with(&temp, authed(), vec![ScriptedResponse::Succeed]);

        let err = session
            .generate_video(&image_request("a boat"))
            .unwrap_err();
        assert!(err.to_string().contains("not registered for video"));
        assert_eq!(backend.calls(), 0);
        Ok(())
    }

    #[test]
    fn blank_prompt_is_a_contract_violation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, _backend) =
            session_with(&temp, authed(), vec![ScriptedResponse::Succeed]);
        assert!(session.generate_image(&image_request("   ")).is_err());
        Ok(())
    }

    #[test]
    fn remote_success_returns_remote_artifact_with_clean_status() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, backend) =
            session_with(&temp, authed(), vec![ScriptedResponse::Succeed]);

        let result = session.generate_image(&image_request("a boat"))?;
        assert_eq!(backend.calls(), 1);
        assert_eq!(result.artifact.label(), "remote");
        assert!(result.status.is_empty());
        Ok(())
    }

    #[test]
    fn steps_are_clamped_before_the_backend_sees_them() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, backend) =
            session_with(&temp, authed(), vec![ScriptedResponse::Succeed]);

        let mut request = image_request("a boat");
        request.steps = 50;
        session.generate_image(&request)?;
        assert_eq!(backend.seen_steps.lock().unwrap().as_slice(), &[16]);
        Ok(())
    }

    #[test]
    fn route_rejection_with_override_retries_once_without_provider() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, backend) = session_with(
            &temp,
            authed(),
            vec![ScriptedResponse::RejectRoute, ScriptedResponse::Succeed],
        );

        let mut request = image_request("a boat");
        request.provider = Some("acme".to_string());
        let result = session.generate_image(&request)?;

        assert_eq!(backend.calls(), 2);
        assert_eq!(
            backend.seen_providers.lock().unwrap().as_slice(),
            &[Some("acme".to_string()), None]
        );
        assert_eq!(result.artifact.label(), "remote");
        assert!(result.status.contains("default router"));
        Ok(())
    }

    #[test]
    fn credential_provider_counts_as_an_override() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let credential = Credential::new(Some("hf_test".to_string()), Some("acme".to_string()));
        let (mut session, backend) = session_with(
            &temp,
            credential,
            vec![ScriptedResponse::RejectRoute, ScriptedResponse::Succeed],
        );

        let result = session.generate_image(&image_request("a boat"))?;
        assert_eq!(backend.calls(), 2);
        assert_eq!(result.artifact.label(), "remote");
        Ok(())
    }

    #[test]
    fn route_rejection_retries_at_most_once() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, backend) =
            session_with(&temp, authed(), vec![ScriptedResponse::RejectRoute]);

        let mut request = image_request("a boat");
        request.provider = Some("acme".to_string());
        let result = session.generate_image(&request)?;

        assert_eq!(backend.calls(), 2);
        assert_eq!(result.artifact.label(), "placeholder");
        assert!(result.status.contains("generation failed"));
        Ok(())
    }

    #[test]
    fn route_rejection_without_override_does_not_retry() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, backend) =
            session_with(&temp, authed(), vec![ScriptedResponse::RejectRoute]);

        let result = session.generate_image(&image_request("a boat"))?;
        assert_eq!(backend.calls(), 1);
        assert_eq!(result.artifact.label(), "placeholder");
        Ok(())
    }

    #[test]
    fn non_route_errors_do_not_retry() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, backend) = session_with(
            &temp,
            authed(),
            vec![ScriptedResponse::Fail("model is overloaded")],
        );

        let mut request = image_request("a boat");
        request.provider = Some("acme".to_string());
        let result = session.generate_image(&request)?;

        assert_eq!(backend.calls(), 1);
        assert_eq!(result.artifact.label(), "placeholder");
        assert!(result.status.contains("model is overloaded"));
        Ok(())
    }

    #[test]
    fn results_land_in_the_gallery_most_recent_first() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, _backend) =
            session_with(&temp, Credential::default(), vec![ScriptedResponse::Succeed]);

        session.generate_image(&image_request("first"))?;
        session.generate_image(&image_request("second"))?;

        assert_eq!(session.gallery().len(), 2);
        let recent = session.gallery().recent(2);
        assert!(recent[0].created_at >= recent[1].created_at);

        session.clear_gallery()?;
        assert!(session.gallery().is_empty());
        Ok(())
    }

    #[test]
    fn video_without_credential_yields_gif_placeholder() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, backend) =
            session_with(&temp, Credential::default(), vec![ScriptedResponse::Succeed]);

        let model = session.default_video_model().expect("video preset");
        let result = session.generate_video(&GenerationRequest::new("a cat surfing", model))?;

        assert_eq!(backend.calls(), 0);
        assert_eq!(result.kind, MediaKind::Video);
        assert_eq!(result.artifact.label(), "placeholder");
        assert_eq!(result.artifact.mime_type(), Some("image/gif"));
        assert!(result.artifact.bytes().starts_with(b"GIF8"));
        Ok(())
    }

    #[test]
    fn degraded_generation_event_order_contract() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let mut session =
            StudioSession::with_backend(&events_path, Credential::default(), None)?;
        session.generate_image(&image_request("a boat"))?;
        session.finish()?;

        let raw = std::fs::read_to_string(&events_path)?;
        let types: Vec<String> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(
            types,
            vec![
                "session_started",
                "generation_requested",
                "generation_degraded",
                "artifact_created",
                "session_finished",
            ]
        );
        Ok(())
    }

    #[test]
    fn placeholder_image_is_deterministic_png() -> anyhow::Result<()> {
        let first = render_placeholder_image("A cat", 768, 768)?;
        let second = render_placeholder_image("A cat", 768, 768)?;
        assert!(first.bytes.starts_with(&PNG_MAGIC));
        assert!(!first.bytes.is_empty());
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.mime_type, "image/png");
        Ok(())
    }

    #[test]
    fn placeholder_clip_is_an_animated_gif() -> anyhow::Result<()> {
        let clip = render_placeholder_clip("a cat surfing", Some(7))?;
        assert!(clip.bytes.starts_with(b"GIF8"));
        assert_eq!(clip.mime_type, "image/gif");
        Ok(())
    }

    #[test]
    fn wrap_packs_greedily_without_splitting_words() {
        let prompt = "astronaut riding a horse photorealistic golden hour";
        let lines = wrap_prompt_lines(prompt, 512, 2);
        assert!(!lines.is_empty());

        let limit = 512u32 - 120;
        for line in &lines {
            assert!(text_width(line, 2) < limit, "line too wide: {line}");
        }
        let rejoined: Vec<&str> = lines.iter().flat_map(|line| line.split(' ')).collect();
        let original: Vec<&str> = prompt.split_whitespace().collect();
        assert_eq!(rejoined, original);
    }

    #[test]
    fn wrap_keeps_an_oversized_word_on_its_own_line() {
        let lines = wrap_prompt_lines("supercalifragilisticexpialidocious", 384, 4);
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn route_rejection_predicate_matches_router_messages() {
        assert!(is_route_rejection(&anyhow!(
            "text-to-image request failed (403): Not allowed to POST to this route"
        )));
        assert!(is_route_rejection(&anyhow!(
            "provider has no route for this model"
        )));
        assert!(!is_route_rejection(&anyhow!("model is overloaded")));
        assert!(!is_route_rejection(&anyhow!("connection reset by peer")));
    }
}
