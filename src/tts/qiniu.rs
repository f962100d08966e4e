use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::error::TtsError;
use super::normalize::normalize;
use super::provider::{SpeechDriver, PROVIDER_QINIU};
use super::types::{encoding_to_mime, SpeechRequest, SpeechResult, VoiceOption, VoiceSettings};
use crate::config;

/// Budget for one `/voice/list` refresh.
const VOICE_LIST_TIMEOUT: Duration = Duration::from_secs(8);
/// Error bodies are reported with at most this many bytes.
const BODY_SNIPPET_LIMIT: usize = 4096;

/// JSON keys that may carry base64 audio, in match priority order.
const AUDIO_KEYS: [&str; 7] = [
    "data",
    "audio_base64",
    "audio",
    "audio_data",
    "audioBytes",
    "audio_bytes",
    "audioContent",
];
/// JSON keys whose string value hints the audio encoding; hints propagate
/// downward while walking the tree.
const ENCODING_KEYS: [&str; 4] = ["encoding", "format", "mime_type", "mime"];

// ── Config ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct QiniuConfig {
    pub base_url: String,
    pub backup_url: String,
    pub api_key: String,
    pub model: String,
    pub response_format: String,
    pub default_voice: String,
}

impl QiniuConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: config::env_or(
                &["TTS_QINIU_API_BASE_URL"],
                "https://openai.qiniu.com/v1",
            ),
            backup_url: config::env_or(
                &["TTS_QINIU_API_BACKUP_URL"],
                "https://api.qnaigc.com/v1",
            ),
            api_key: config::env_or(
                &["TTS_QINIU_API_KEY", "QINIU_API_KEY", "QINIU_TTS_API_KEY"],
                "",
            ),
            model: config::env_or(&["TTS_QINIU_MODEL_ID"], "tts"),
            response_format: config::env_or(&["TTS_QINIU_RESPONSE_FORMAT"], "mp3"),
            default_voice: config::env_or(
                &["TTS_QINIU_DEFAULT_VOICE"],
                "qiniu_zh_female_tmjxxy",
            ),
        }
    }
}

// ── Wire Types ─────────────────────────────────────────

#[derive(Serialize)]
struct SynthBody {
    #[serde(skip_serializing_if = "String::is_empty")]
    model: String,
    audio: AudioSection,
    request: RequestSection,
}

#[derive(Serialize)]
struct AudioSection {
    encoding: String,
    speed_ratio: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pitch_ratio: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_type: Option<String>,
}

#[derive(Serialize)]
struct RequestSection {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    emotion: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize, Default)]
struct ErrorDetail {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct RemoteVoice {
    #[serde(default)]
    voice_name: String,
    #[serde(default)]
    voice_type: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    category: String,
}

// ── Driver ─────────────────────────────────────────────

/// Single-shot synthesis against an OpenAI-style `POST {base}/voice/tts`
/// endpoint, with primary/backup base-URL fallback and voice rotation on
/// "invalid voice" rejections.
pub struct QiniuDriver {
    client: Client,
    config: QiniuConfig,
}

impl QiniuDriver {
    pub fn new(config: QiniuConfig, client: Client) -> Self {
        Self { client, config }
    }

    pub fn from_env(client: Client) -> Self {
        Self::new(QiniuConfig::from_env(), client)
    }

    fn endpoint(base: &str, path: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    /// POST to the primary base; on transport error or 5xx, retry once
    /// against the backup when it is distinct. 4xx answers come back
    /// unchanged so voice rotation can inspect them.
    async fn post_tts(&self, body: &SynthBody) -> Result<reqwest::Response, TtsError> {
        let primary = Self::endpoint(&self.config.base_url, "/voice/tts");
        let first = self
            .client
            .post(&primary)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await;

        let retriable = match &first {
            Ok(resp) => resp.status().is_server_error(),
            Err(_) => true,
        };
        let backup_distinct = !self.config.backup_url.trim().is_empty()
            && self.config.backup_url.trim_end_matches('/')
                != self.config.base_url.trim_end_matches('/');
        if !retriable || !backup_distinct {
            return first.map_err(|e| {
                TtsError::Transport(format!("request to {} failed: {}", primary, e))
            });
        }

        match &first {
            Ok(resp) => warn!(status = %resp.status(), "qiniu primary endpoint failed; trying backup"),
            Err(e) => warn!(error = %e, "qiniu primary endpoint unreachable; trying backup"),
        }
        let backup = Self::endpoint(&self.config.backup_url, "/voice/tts");
        let second = self
            .client
            .post(&backup)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| TtsError::Transport(format!("request to {} failed: {}", backup, e)))?;
        if second.status().is_success() {
            info!(endpoint = %backup, "qiniu backup endpoint answered after primary failure");
        }
        Ok(second)
    }

    /// Voice candidates in rotation order: requested, configured default,
    /// then empty (let the vendor pick), de-duplicated case-insensitively.
    fn voice_candidates(&self, requested: &str) -> Vec<String> {
        let mut candidates = Vec::new();
        for voice in [requested.trim(), self.config.default_voice.trim(), ""] {
            let seen = candidates
                .iter()
                .any(|c: &String| c.eq_ignore_ascii_case(voice));
            if !seen {
                candidates.push(voice.to_string());
            }
        }
        candidates
    }

    fn build_body(&self, text: &str, req: &SpeechRequest, voice: &str) -> SynthBody {
        let speed = if req.speed > 0.0 { req.speed } else { 1.0 };
        let pitch = if req.pitch > 0.0 { req.pitch } else { 1.0 };
        let format = if req.format.trim().is_empty() {
            self.config.response_format.clone()
        } else {
            req.format.trim().to_string()
        };
        SynthBody {
            model: self.config.model.clone(),
            audio: AudioSection {
                encoding: format,
                speed_ratio: speed,
                pitch_ratio: (pitch != 1.0).then_some(pitch),
                voice_type: (!voice.is_empty()).then(|| voice.to_string()),
            },
            request: RequestSection {
                text: text.to_string(),
                emotion: (!req.emotion.trim().is_empty()).then(|| req.emotion.trim().to_string()),
            },
        }
    }

    async fn fetch_voice_list(&self) -> Result<Vec<VoiceOption>, TtsError> {
        let url = Self::endpoint(&self.config.base_url, "/voice/list");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .timeout(VOICE_LIST_TIMEOUT)
            .send()
            .await
            .map_err(|e| TtsError::Transport(format!("request to {} failed: {}", url, e)))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.bytes().await.unwrap_or_default();
            return Err(TtsError::Remote(format!(
                "voice list returned status {}: {}",
                status.as_u16(),
                snippet(&body)
            )));
        }
        let items: Vec<RemoteVoice> = resp
            .json()
            .await
            .map_err(|e| TtsError::Protocol(format!("unparsable voice list: {}", e)))?;
        Ok(items
            .into_iter()
            .filter(|v| !v.voice_type.trim().is_empty())
            .map(|v| VoiceOption {
                id: v.voice_type.clone(),
                name: if v.voice_name.trim().is_empty() {
                    v.voice_type
                } else {
                    v.voice_name
                },
                provider: PROVIDER_QINIU.to_string(),
                language: "zh-CN".to_string(),
                description: (!v.category.trim().is_empty()).then_some(v.category),
                sample_url: (!v.url.trim().is_empty()).then_some(v.url),
                default_style: None,
                emotions: Vec::new(),
                model: None,
                format: None,
                sample_rate: None,
                settings: VoiceSettings::default(),
            })
            .collect())
    }

    /// Built-in list used when the vendor's catalogue is unreachable.
    fn seed_voices(&self) -> Vec<VoiceOption> {
        let seed = [
            ("qiniu_zh_female_tmjxxy", "甜美小暄", "温柔女声"),
            ("qiniu_zh_female_wwxkjx", "温婉小静", "知性女声"),
            ("qiniu_zh_female_glktss", "干练珂珂", "播报女声"),
            ("qiniu_zh_male_ljfdxz", "磊落晓泽", "磁性男声"),
            ("qiniu_zh_male_whxkxg", "温和小光", "暖心男声"),
            ("qiniu_zh_male_cxkjns", "沉稳君昂", "新闻男声"),
        ];
        seed.iter()
            .map(|(id, name, category)| VoiceOption {
                id: id.to_string(),
                name: name.to_string(),
                provider: PROVIDER_QINIU.to_string(),
                language: "zh-CN".to_string(),
                description: Some(category.to_string()),
                sample_url: None,
                default_style: None,
                emotions: Vec::new(),
                model: None,
                format: None,
                sample_rate: None,
                settings: VoiceSettings::default(),
            })
            .collect()
    }
}

#[async_trait]
impl SpeechDriver for QiniuDriver {
    fn id(&self) -> &'static str {
        PROVIDER_QINIU
    }

    fn label(&self) -> &'static str {
        "Qiniu OpenAI-Compatible TTS"
    }

    fn enabled(&self) -> bool {
        !self.config.api_key.trim().is_empty()
    }

    fn default_voice_id(&self) -> String {
        self.config.default_voice.clone()
    }

    async fn ensure_voices(&self) -> Vec<VoiceOption> {
        match self.fetch_voice_list().await {
            Ok(voices) if !voices.is_empty() => voices,
            Ok(_) => self.seed_voices(),
            Err(e) => {
                warn!(error = %e, "qiniu voice list unavailable; using seed voices");
                self.seed_voices()
            }
        }
    }

    async fn synthesize(&self, req: &SpeechRequest) -> Result<SpeechResult, TtsError> {
        if !self.enabled() {
            return Err(TtsError::Disabled);
        }
        let text = normalize(&req.text);
        if text.is_empty() {
            return Err(TtsError::empty_text());
        }

        let mut last_voice_error = String::new();
        for candidate in self.voice_candidates(&req.voice_id) {
            let body = self.build_body(&text, req, &candidate);
            let resp = self.post_tts(&body).await?;
            let status = resp.status();

            if status.is_success() {
                let format = body.audio.encoding.clone();
                let (audio_base64, mime_type) = decode_response(resp, &format).await?;
                return Ok(SpeechResult {
                    voice_id: candidate,
                    provider: PROVIDER_QINIU.to_string(),
                    audio_base64,
                    mime_type,
                    speed: body.audio.speed_ratio,
                    pitch: body.audio.pitch_ratio.unwrap_or(1.0),
                    emotion: req.emotion.trim().to_string(),
                    duration_ms: None,
                    audio_url: None,
                });
            }

            let bytes = resp.bytes().await.unwrap_or_default();
            if let Some(message) = invalid_voice_message(&bytes) {
                warn!(voice = %candidate, message = %message, "qiniu rejected voice; rotating to next candidate");
                last_voice_error = message;
                continue;
            }
            return Err(TtsError::Remote(format!(
                "provider returned status {}: {}",
                status.as_u16(),
                snippet(&bytes)
            )));
        }
        Err(TtsError::Remote(last_voice_error))
    }
}

// ── Response Decoding ──────────────────────────────────

/// Turn a 2xx vendor response into `(audio_base64, mime_type)`.
///
/// JSON bodies are walked for the first plausible base64 audio field, with
/// encoding hints picked up along the way; anything else is raw audio.
async fn decode_response(
    resp: reqwest::Response,
    fallback_format: &str,
) -> Result<(String, String), TtsError> {
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| TtsError::Transport(format!("failed to read response body: {}", e)))?;
    if bytes.is_empty() {
        return Err(TtsError::Protocol("provider returned an empty body".to_string()));
    }

    let looks_json =
        content_type.contains("json") || matches!(bytes.first(), Some(&b'{') | Some(&b'['));
    if looks_json {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => {
                if let Some(message) = provider_error_in(&value) {
                    return Err(TtsError::Remote(message));
                }
                let (audio, hint) = find_audio(&value, None).ok_or_else(|| {
                    TtsError::Protocol("no audio payload in provider response".to_string())
                })?;
                let encoding = hint.unwrap_or_else(|| fallback_format.to_string());
                return Ok((audio, resolve_mime(&encoding)));
            }
            Err(e) => {
                if content_type.contains("json") {
                    return Err(TtsError::Protocol(format!("unparsable json response: {}", e)));
                }
                // The body merely began with a brace; treat it as raw audio.
            }
        }
    }

    let mime = if content_type.starts_with("audio/") {
        content_type
            .split(';')
            .next()
            .unwrap_or(&content_type)
            .trim()
            .to_string()
    } else {
        encoding_to_mime(fallback_format).to_string()
    };
    Ok((BASE64.encode(&bytes), mime))
}

/// A hint may already be a full MIME type (from `mime`/`mime_type` keys).
fn resolve_mime(hint: &str) -> String {
    if hint.contains('/') {
        hint.trim().to_ascii_lowercase()
    } else {
        encoding_to_mime(hint).to_string()
    }
}

/// Depth-first search for the first plausible base64 audio string under a
/// known audio key. Encoding hints found in enclosing objects propagate
/// into the subtree.
fn find_audio(value: &Value, hint: Option<String>) -> Option<(String, Option<String>)> {
    match value {
        Value::Object(map) => {
            let hint = ENCODING_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::to_string)
                .or(hint);
            for key in AUDIO_KEYS {
                if let Some(candidate) = map.get(key) {
                    match candidate {
                        // "data" is a generic bucket, so a bare string under
                        // it needs the stricter length check.
                        Value::String(s) if plausible_base64(s, key == "data") => {
                            return Some((s.clone(), hint.clone()));
                        }
                        Value::Object(_) | Value::Array(_) => {
                            if let Some(found) = find_audio(candidate, hint.clone()) {
                                return Some(found);
                            }
                        }
                        _ => {}
                    }
                }
            }
            for (key, nested) in map {
                if AUDIO_KEYS.contains(&key.as_str()) {
                    continue;
                }
                if let Some(found) = find_audio(nested, hint.clone()) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(|item| find_audio(item, hint.clone())),
        _ => None,
    }
}

fn plausible_base64(s: &str, strict: bool) -> bool {
    let min_len = if strict { 32 } else { 4 };
    s.len() >= min_len
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

/// A numeric `code != 0` anywhere in the tree is a provider failure.
fn provider_error_in(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(code) = map.get("code").and_then(Value::as_i64) {
                if code != 0 {
                    let message = map
                        .get("message")
                        .or_else(|| map.get("msg"))
                        .and_then(Value::as_str)
                        .unwrap_or("provider reported failure");
                    return Some(format!("{} (code {})", message, code));
                }
            }
            map.values().find_map(provider_error_in)
        }
        Value::Array(items) => items.iter().find_map(provider_error_in),
        _ => None,
    }
}

/// When the body is `{"error":{type,message}}` and the combined text says
/// the voice was rejected, return the vendor message so the caller can
/// rotate candidates.
fn invalid_voice_message(body: &[u8]) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_slice(body).ok()?;
    let combined =
        format!("{} {}", parsed.error.kind, parsed.error.message).to_ascii_lowercase();
    let about_voice = combined.contains("voice");
    let rejected = combined.contains("invalid")
        || combined.contains("not found")
        || combined.contains("unsupported");
    if about_voice && rejected {
        let message = parsed.error.message.trim();
        if message.is_empty() {
            Some(parsed.error.kind)
        } else {
            Some(message.to_string())
        }
    } else {
        None
    }
}

/// UTF-8-safe truncation of an error body for reporting.
fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.len() <= BODY_SNIPPET_LIMIT {
        return trimmed.to_string();
    }
    let mut end = BODY_SNIPPET_LIMIT;
    while end > 0 && !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn find_audio_walks_nested_data_arrays() {
        let body = json!({"data": [{"audio": "SGVsbG8=", "encoding": "mp3"}]});
        let (audio, hint) = find_audio(&body, None).expect("audio field");
        assert_eq!(audio, "SGVsbG8=");
        assert_eq!(hint.as_deref(), Some("mp3"));
    }

    #[test]
    fn find_audio_prefers_outer_hint_when_inner_missing() {
        let body = json!({"format": "wav", "result": {"audio_base64": "UklGRgAA"}});
        let (_, hint) = find_audio(&body, None).expect("audio field");
        assert_eq!(hint.as_deref(), Some("wav"));
    }

    #[test]
    fn bare_data_string_needs_strict_length() {
        let short = json!({"data": "SGVsbG8="});
        assert!(find_audio(&short, None).is_none(), "8 chars under data is too short");
        let long = json!({"data": "A".repeat(40)});
        assert!(find_audio(&long, None).is_some());
    }

    #[test]
    fn non_base64_strings_are_rejected()  {
        let body = json!({"audio": "not base64 at all!"});
        assert!(find_audio(&body, None).is_none());
    }

    #[test]
    fn provider_error_detected_anywhere_in_tree() {
        let body = json!({"result": {"code": 42, "message": "quota exceeded"}});
        let message = provider_error_in(&body).expect("error");
        assert!(message.contains("quota exceeded"));
        assert!(message.contains("42"));

        let ok = json!({"code": 0, "data": "x"});
        assert!(provider_error_in(&ok).is_none());
    }

    #[test]
    fn invalid_voice_detection_requires_both_halves() {
        let rejected = br#"{"error":{"type":"invalid_request","message":"voice not found"}}"#;
        assert_eq!(
            invalid_voice_message(rejected).as_deref(),
            Some("voice not found")
        );

        let unrelated = br#"{"error":{"type":"invalid_request","message":"text too long"}}"#;
        assert!(invalid_voice_message(unrelated).is_none());

        let no_voice_word = br#"{"error":{"type":"server_error","message":"boom"}}"#;
        assert!(invalid_voice_message(no_voice_word).is_none());
    }

    #[test]
    fn snippet_truncates_on_char_boundary() {
        let body = "好".repeat(3000);
        let cut = snippet(body.as_bytes());
        assert!(cut.len() <= BODY_SNIPPET_LIMIT + '…'.len_utf8());
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn voice_candidates_deduplicate_case_insensitively() {
        let driver = QiniuDriver::new(
            QiniuConfig {
                base_url: "http://localhost".into(),
                backup_url: String::new(),
                api_key: "k".into(),
                model: "tts".into(),
                response_format: "mp3".into(),
                default_voice: "Voice_A".into(),
            },
            Client::new(),
        );
        assert_eq!(driver.voice_candidates("voice_a"), vec!["voice_a", ""]);
        assert_eq!(
            driver.voice_candidates("other"),
            vec!["other", "Voice_A", ""]
        );
        assert_eq!(driver.voice_candidates(""), vec!["", "Voice_A"]);
    }
}
