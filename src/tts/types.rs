use serde::{Deserialize, Serialize};

// ── Voice Catalogue Entries ────────────────────────────

/// Tunable parameter ranges a voice supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// `[min, max]` accepted speed multipliers.
    pub speed_range: [f32; 2],
    /// `[min, max]` accepted pitch multipliers.
    pub pitch_range: [f32; 2],
    pub default_speed: f32,
    pub default_pitch: f32,
    pub supports_emotion: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            speed_range: [0.5, 1.5],
            pitch_range: [0.8, 1.2],
            default_speed: 1.0,
            default_pitch: 1.0,
            supports_emotion: false,
        }
    }
}

/// One synthesis profile exposed by a provider. Immutable snapshot owned by
/// the catalogue; created at bootstrap or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceOption {
    pub id: String,
    pub name: String,
    /// Provider tag; canonicalised when the catalogue is indexed.
    #[serde(default)]
    pub provider: String,
    /// IETF tag or comma-separated list, e.g. `"zh-CN"` or `"zh-CN,en-US"`.
    #[serde(default)]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_style: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emotions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub settings: VoiceSettings,
}

// ── Provider Status (for facade queries) ───────────────

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    /// Canonical provider id.
    pub id: String,
    pub label: String,
    pub enabled: bool,
    pub default_voice_id: String,
    pub supports_preview: bool,
}

// ── Synthesis Requests / Results ───────────────────────

/// One batch synthesis call. Lifetime = one dispatch.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub text: String,
    pub voice_id: String,
    pub provider: String,
    pub emotion: String,
    /// Positive multiplier; non-positive values are replaced or clamped at
    /// driver entry.
    pub speed: f32,
    pub pitch: f32,
    pub format: String,
    pub instructions: String,
    /// Catalogue entry the facade resolved for `voice_id`, when known.
    pub resolved_voice: Option<VoiceOption>,
}

impl Default for SpeechRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            voice_id: String::new(),
            provider: String::new(),
            emotion: String::new(),
            speed: 1.0,
            pitch: 1.0,
            format: String::new(),
            instructions: String::new(),
            resolved_voice: None,
        }
    }
}

/// Complete audio artifact produced by a batch driver.
#[derive(Debug, Clone, Serialize)]
pub struct SpeechResult {
    pub voice_id: String,
    pub provider: String,
    pub audio_base64: String,
    pub mime_type: String,
    pub speed: f32,
    pub pitch: f32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub emotion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

/// Parameters for opening a streaming session. Consumed once by stream
/// start; text arrives incrementally afterwards.
#[derive(Debug, Clone)]
pub struct SpeechStreamRequest {
    pub voice_id: String,
    pub provider: String,
    pub emotion: String,
    pub speed: f32,
    pub pitch: f32,
    pub format: String,
    pub instructions: String,
    /// Optional first text segment, appended right after the session opens.
    pub initial_text: String,
    pub resolved_voice: Option<VoiceOption>,
}

impl Default for SpeechStreamRequest {
    fn default() -> Self {
        Self {
            voice_id: String::new(),
            provider: String::new(),
            emotion: String::new(),
            speed: 1.0,
            pitch: 1.0,
            format: String::new(),
            instructions: String::new(),
            initial_text: String::new(),
            resolved_voice: None,
        }
    }
}

/// Immutable session facts, fixed when the stream opens.
#[derive(Debug, Clone, Serialize)]
pub struct SpeechStreamMetadata {
    pub voice_id: String,
    pub provider: String,
    pub format: String,
    pub mime_type: String,
    pub sample_rate: u32,
    pub speed: f32,
    pub pitch: f32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub emotion: String,
}

/// One audio frame from a streaming session. `sequence` is strictly
/// increasing per session and starts at 1; `audio` is never empty.
#[derive(Debug, Clone)]
pub struct SpeechStreamChunk {
    pub sequence: u64,
    pub audio: Vec<u8>,
}

// ── Encoding / MIME Mapping ────────────────────────────

/// Map a vendor encoding name to the MIME type handed to clients.
/// Unknown encodings fall back to `audio/mpeg`.
pub fn encoding_to_mime(encoding: &str) -> &'static str {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "mp3" | "mpeg" => "audio/mpeg",
        "wav" | "wave" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "pcm" => "audio/wave",
        _ => "audio/mpeg",
    }
}

/// Inverse of [`encoding_to_mime`] on the supported set.
pub fn mime_to_encoding(mime: &str) -> &'static str {
    let mime = mime.trim().to_ascii_lowercase();
    if mime.contains("mpeg") || mime.contains("mp3") {
        "mp3"
    } else if mime.contains("ogg") || mime.contains("opus") {
        "ogg"
    } else if mime == "audio/wave" {
        "pcm"
    } else if mime.contains("wav") {
        "wav"
    } else {
        "mp3"
    }
}
