use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, USER_AGENT};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use super::catalog::override_from_env;
use super::error::TtsError;
use super::normalize::normalize;
use super::provider::{SpeechDriver, PROVIDER_COSYVOICE};
use super::stream::{read_loop, SpeechStreamSession, WsStream, READ_DEADLINE};
use super::types::{
    encoding_to_mime, SpeechRequest, SpeechResult, SpeechStreamMetadata, SpeechStreamRequest,
    VoiceOption, VoiceSettings,
};
use crate::config;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(8);
/// How long the opening caller waits for the task to report readiness.
/// Elapsing is not fatal; the session keeps working in the background.
const READY_TIMEOUT: Duration = Duration::from_secs(3);

const SPEED_RANGE: (f32, f32) = (0.5, 1.6);
const PITCH_RANGE: (f32, f32) = (0.7, 1.4);

const VENDOR_UA: &str = "auralis-gateway/0.2 (dashscope-duplex)";

// ── Config ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CosyVoiceConfig {
    pub ws_url: String,
    pub api_key: String,
    pub workspace: String,
    pub data_inspection: String,
    pub model: String,
    pub default_voice: String,
    pub format: String,
    pub sample_rate: u32,
    pub volume: u32,
}

impl CosyVoiceConfig {
    pub fn from_env() -> Self {
        Self {
            ws_url: config::env_or(
                &["COSYVOICE_WS_URL"],
                "wss://dashscope.aliyuncs.com/api-ws/v1/inference",
            ),
            api_key: config::env_or(&["COSYVOICE_API_KEY", "DASHSCOPE_API_KEY"], ""),
            workspace: config::env_or(&["COSYVOICE_WORKSPACE"], ""),
            data_inspection: config::env_or(&["COSYVOICE_DATA_INSPECTION"], ""),
            model: config::env_or(&["COSYVOICE_MODEL"], "cosyvoice-v1"),
            default_voice: config::env_or(&["COSYVOICE_DEFAULT_VOICE"], "longwan"),
            format: config::env_or(&["COSYVOICE_FORMAT"], "mp3"),
            sample_rate: config::env_u32_or(&["COSYVOICE_SAMPLE_RATE"], 22050),
            volume: config::env_u32_or(&["COSYVOICE_VOLUME"], 50).min(100),
        }
    }
}

// ── Protocol Frames ────────────────────────────────────

/// Wrap one control action in the vendor's duplex envelope.
pub(crate) fn control_frame(action: &str, task_id: &str, payload: Value) -> Message {
    Message::Text(
        json!({
            "header": {
                "action": action,
                "task_id": task_id,
                "streaming": "duplex",
            },
            "payload": payload,
        })
        .to_string(),
    )
}

/// Server-to-client text events. Audio travels as separate binary frames.
pub(crate) enum ServerEvent {
    Started,
    Meta,
    Finished,
    Failed { code: String, message: String },
    Other,
}

impl ServerEvent {
    pub(crate) fn parse(raw: &str) -> Self {
        #[derive(Default, Deserialize)]
        struct Frame {
            #[serde(default)]
            header: Header,
        }
        #[derive(Default, Deserialize)]
        struct Header {
            #[serde(default)]
            event: String,
            #[serde(default)]
            error_code: String,
            #[serde(default)]
            error_message: String,
        }
        let frame: Frame = serde_json::from_str(raw).unwrap_or_default();
        match frame.header.event.as_str() {
            "task-started" => ServerEvent::Started,
            "meta" | "meta-info" => ServerEvent::Meta,
            "task-finished" => ServerEvent::Finished,
            "task-failed" => ServerEvent::Failed {
                code: frame.header.error_code,
                message: frame.header.error_message,
            },
            _ => ServerEvent::Other,
        }
    }
}

// ── Task Parameters ────────────────────────────────────

/// Fully-resolved synthesis parameters for one task.
struct TaskParams {
    voice: String,
    model: String,
    format: String,
    sample_rate: u32,
    volume: u32,
    speed: f32,
    pitch: f32,
    emotion: String,
    instruction: String,
}

// ── Driver ─────────────────────────────────────────────

/// Batch and streaming synthesis over the vendor's task-oriented duplex
/// WebSocket protocol.
pub struct CosyVoiceDriver {
    config: CosyVoiceConfig,
    /// Only used to fetch a catalogue override URL.
    http: reqwest::Client,
}

impl CosyVoiceDriver {
    pub fn new(config: CosyVoiceConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    pub fn from_env(http: reqwest::Client) -> Self {
        Self::new(CosyVoiceConfig::from_env(), http)
    }

    fn clamp(value: f32, range: (f32, f32)) -> f32 {
        value.clamp(range.0, range.1)
    }

    fn task_params(
        &self,
        voice_id: &str,
        resolved: Option<&VoiceOption>,
        speed: f32,
        pitch: f32,
        emotion: &str,
        format: &str,
        instructions: &str,
    ) -> TaskParams {
        let voice = if voice_id.trim().is_empty() {
            self.config.default_voice.clone()
        } else {
            voice_id.trim().to_string()
        };
        let model = resolved
            .and_then(|v| v.model.clone())
            .filter(|m| !m.trim().is_empty())
            .or_else(|| {
                (!self.config.model.trim().is_empty()).then(|| self.config.model.clone())
            })
            .unwrap_or_else(|| "cosyvoice-v3".to_string());
        let format = [format, self.config.format.as_str(), "mp3"]
            .iter()
            .map(|f| f.trim())
            .find(|f| !f.is_empty())
            .unwrap_or("mp3")
            .to_string();
        let sample_rate = resolved
            .and_then(|v| v.sample_rate)
            .filter(|&r| r > 0)
            .or_else(|| (self.config.sample_rate > 0).then_some(self.config.sample_rate))
            .unwrap_or(22050);
        TaskParams {
            voice,
            model,
            format,
            sample_rate,
            volume: self.config.volume.min(100),
            speed: Self::clamp(speed, SPEED_RANGE),
            pitch: Self::clamp(pitch, PITCH_RANGE),
            emotion: emotion.trim().to_string(),
            instruction: instructions.trim().to_string(),
        }
    }

    fn run_task_payload(&self, params: &TaskParams) -> Value {
        let mut parameters = serde_json::Map::new();
        parameters.insert("text_type".into(), json!("PlainText"));
        parameters.insert("voice".into(), json!(params.voice));
        parameters.insert("format".into(), json!(params.format));
        parameters.insert("sample_rate".into(), json!(params.sample_rate));
        parameters.insert("volume".into(), json!(params.volume));
        parameters.insert("rate".into(), json!(params.speed));
        parameters.insert("pitch".into(), json!(params.pitch));
        if !params.emotion.is_empty() {
            parameters.insert("emotion".into(), json!(params.emotion));
        }
        if !params.instruction.is_empty() {
            parameters.insert("instruction".into(), json!(params.instruction));
        }
        json!({
            "task_group": "audio",
            "task": "tts",
            "function": "SpeechSynthesizer",
            "model": params.model,
            "parameters": Value::Object(parameters),
            "input": {},
        })
    }

    async fn connect(&self) -> Result<WsStream, TtsError> {
        let mut request = self
            .config
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| TtsError::InvalidInput(format!("bad websocket url: {}", e)))?;
        let headers = request.headers_mut();
        let auth = HeaderValue::from_str(&format!("bearer {}", self.config.api_key))
            .map_err(|_| TtsError::InvalidInput("api key is not a valid header value".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        if !self.config.workspace.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.config.workspace) {
                headers.insert("X-DashScope-WorkSpace", value);
            }
        }
        if !self.config.data_inspection.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.config.data_inspection) {
                headers.insert("X-DashScope-DataInspection", value);
            }
        }
        headers.insert(USER_AGENT, HeaderValue::from_static(VENDOR_UA));

        let (stream, _) = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| TtsError::Timeout("websocket handshake timed out".to_string()))?
            .map_err(|e| TtsError::Transport(format!("websocket handshake failed: {}", e)))?;
        Ok(stream)
    }

    /// Open a duplex session: connect, start the task, spawn the reader,
    /// then hand the caller a session handle. A task that has already
    /// failed still yields a handle; the failure is observable through the
    /// closed channel and the error slot.
    pub async fn open_stream(
        &self,
        req: &SpeechStreamRequest,
    ) -> Result<SpeechStreamSession, TtsError> {
        if !self.enabled() {
            return Err(TtsError::Disabled);
        }
        let params = self.task_params(
            &req.voice_id,
            req.resolved_voice.as_ref(),
            req.speed,
            req.pitch,
            &req.emotion,
            &req.format,
            &req.instructions,
        );

        let ws = self.connect().await?;
        let (write, read) = ws.split();
        let writer = Arc::new(Mutex::new(write));
        let task_id = Uuid::new_v4().to_string();

        {
            let mut sink = writer.lock().await;
            sink.send(control_frame("run-task", &task_id, self.run_task_payload(&params)))
                .await
                .map_err(|e| TtsError::Transport(format!("websocket write failed: {}", e)))?;
        }

        let metadata = SpeechStreamMetadata {
            voice_id: params.voice.clone(),
            provider: PROVIDER_COSYVOICE.to_string(),
            format: params.format.clone(),
            mime_type: encoding_to_mime(&params.format).to_string(),
            sample_rate: params.sample_rate,
            speed: params.speed,
            pitch: params.pitch,
            emotion: params.emotion.clone(),
        };
        let (session, wiring, ready_rx) =
            SpeechStreamSession::new(metadata, task_id, writer);
        tokio::spawn(read_loop(read, wiring));

        match tokio::time::timeout(READY_TIMEOUT, ready_rx).await {
            Ok(Ok(())) => {}
            // Reader ended before signalling; the session surface reports it.
            Ok(Err(_)) => debug!("cosyvoice task ended before readiness"),
            Err(_) => debug!("cosyvoice readiness wait elapsed; continuing"),
        }

        if !req.initial_text.trim().is_empty() {
            if let Err(e) = session.append_text(&req.initial_text).await {
                session.close().await;
                return Err(e);
            }
        }
        Ok(session)
    }

    fn seed_voices(&self) -> Vec<VoiceOption> {
        let settings = VoiceSettings {
            speed_range: [SPEED_RANGE.0, SPEED_RANGE.1],
            pitch_range: [PITCH_RANGE.0, PITCH_RANGE.1],
            default_speed: 1.0,
            default_pitch: 1.0,
            supports_emotion: false,
        };
        let emotional = VoiceSettings {
            supports_emotion: true,
            ..settings.clone()
        };
        let seed = [
            ("longwan", "龙婉", "zh-CN", "温润女声", &settings),
            ("longcheng", "龙橙", "zh-CN", "沉稳男声", &settings),
            ("longhua", "龙华", "zh-CN", "活力女声", &emotional),
            ("longxiaochun", "龙小淳", "zh-CN", "亲切女声", &emotional),
            ("longshu", "龙书", "zh-CN", "书卷男声", &settings),
            ("loongstella", "Stella", "zh-CN,en-US", "双语女声", &settings),
        ];
        seed.iter()
            .map(|(id, name, language, description, settings)| VoiceOption {
                id: id.to_string(),
                name: name.to_string(),
                provider: PROVIDER_COSYVOICE.to_string(),
                language: language.to_string(),
                description: Some(description.to_string()),
                sample_url: None,
                default_style: None,
                emotions: if settings.supports_emotion {
                    vec![
                        "neutral".to_string(),
                        "happy".to_string(),
                        "sad".to_string(),
                        "angry".to_string(),
                    ]
                } else {
                    Vec::new()
                },
                model: Some(self.config.model.clone()),
                format: Some(self.config.format.clone()),
                sample_rate: Some(self.config.sample_rate),
                settings: (*settings).clone(),
            })
            .collect()
    }
}

#[async_trait]
impl SpeechDriver for CosyVoiceDriver {
    fn id(&self) -> &'static str {
        PROVIDER_COSYVOICE
    }

    fn label(&self) -> &'static str {
        "Aliyun CosyVoice"
    }

    fn enabled(&self) -> bool {
        !self.config.api_key.trim().is_empty()
    }

    fn default_voice_id(&self) -> String {
        self.config.default_voice.clone()
    }

    async fn ensure_voices(&self) -> Vec<VoiceOption> {
        if let Some(voices) = override_from_env(
            &self.http,
            &["COSYVOICE_VOICE_CATALOG"],
            &["COSYVOICE_VOICE_CATALOG_URL"],
        )
        .await
        {
            return voices;
        }
        self.seed_voices()
    }

    /// Batch synthesis over the same duplex protocol: start the task, push
    /// the whole text, finish, and collect every binary frame in between.
    async fn synthesize(&self, req: &SpeechRequest) -> Result<SpeechResult, TtsError> {
        if !self.enabled() {
            return Err(TtsError::Disabled);
        }
        let text = normalize(&req.text);
        if text.is_empty() {
            return Err(TtsError::empty_text());
        }
        let params = self.task_params(
            &req.voice_id,
            req.resolved_voice.as_ref(),
            req.speed,
            req.pitch,
            &req.emotion,
            &req.format,
            &req.instructions,
        );

        let ws = self.connect().await?;
        let (mut write, mut read) = ws.split();
        let task_id = Uuid::new_v4().to_string();
        write
            .send(control_frame("run-task", &task_id, self.run_task_payload(&params)))
            .await
            .map_err(|e| TtsError::Transport(format!("websocket write failed: {}", e)))?;

        let mut audio: Vec<u8> = Vec::new();
        let mut started = false;
        loop {
            let frame = tokio::time::timeout(READ_DEADLINE, read.next())
                .await
                .map_err(|_| TtsError::Timeout("cosyvoice read deadline exceeded".to_string()))?
                .ok_or_else(|| {
                    TtsError::Transport("connection closed before task finished".to_string())
                })?
                .map_err(|e| TtsError::Transport(format!("websocket read failed: {}", e)))?;
            match frame {
                Message::Binary(data) => audio.extend_from_slice(&data),
                Message::Text(raw) => match ServerEvent::parse(&raw) {
                    ServerEvent::Started => {
                        if !started {
                            started = true;
                            write
                                .send(control_frame(
                                    "continue-task",
                                    &task_id,
                                    json!({"input": {"text": text.as_str()}}),
                                ))
                                .await
                                .map_err(|e| {
                                    TtsError::Transport(format!("websocket write failed: {}", e))
                                })?;
                            write
                                .send(control_frame(
                                    "finish-task",
                                    &task_id,
                                    json!({"input": {}}),
                                ))
                                .await
                                .map_err(|e| {
                                    TtsError::Transport(format!("websocket write failed: {}", e))
                                })?;
                        }
                    }
                    ServerEvent::Finished => break,
                    ServerEvent::Failed { code, message } => {
                        return Err(TtsError::Remote(format!(
                            "cosyvoice task failed: {} ({})",
                            message, code
                        )));
                    }
                    ServerEvent::Meta | ServerEvent::Other => {}
                },
                Message::Close(_) => {
                    return Err(TtsError::Transport(
                        "connection closed before task finished".to_string(),
                    ));
                }
                _ => {}
            }
        }
        let _ = write.close().await;

        if audio.is_empty() {
            warn!(voice = %params.voice, "cosyvoice task finished without audio");
            return Err(TtsError::Protocol(
                "cosyvoice returned no audio".to_string(),
            ));
        }
        Ok(SpeechResult {
            voice_id: params.voice,
            provider: PROVIDER_COSYVOICE.to_string(),
            audio_base64: BASE64.encode(&audio),
            mime_type: encoding_to_mime(&params.format).to_string(),
            speed: params.speed,
            pitch: params.pitch,
            emotion: params.emotion,
            duration_ms: None,
            audio_url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> CosyVoiceDriver {
        CosyVoiceDriver::new(
            CosyVoiceConfig {
                ws_url: "ws://127.0.0.1:1/inference".into(),
                api_key: "key".into(),
                workspace: String::new(),
                data_inspection: String::new(),
                model: "cosyvoice-v1".into(),
                default_voice: "longwan".into(),
                format: "mp3".into(),
                sample_rate: 22050,
                volume: 50,
            },
            reqwest::Client::new(),
        )
    }

    #[test]
    fn parameters_are_clamped_at_entry() {
        let d = driver();
        let params = d.task_params("", None, 9.0, 0.0, "", "", "");
        assert_eq!(params.speed, 1.6);
        assert_eq!(params.pitch, 0.7);
        assert_eq!(params.voice, "longwan");
        assert_eq!(params.sample_rate, 22050);
        assert_eq!(params.format, "mp3");
    }

    #[test]
    fn resolved_voice_overrides_model_and_rate() {
        let d = driver();
        let voice = VoiceOption {
            id: "longhua".into(),
            name: "龙华".into(),
            provider: PROVIDER_COSYVOICE.into(),
            language: "zh-CN".into(),
            description: None,
            sample_url: None,
            default_style: None,
            emotions: Vec::new(),
            model: Some("cosyvoice-v2".into()),
            format: None,
            sample_rate: Some(24000),
            settings: VoiceSettings::default(),
        };
        let params = d.task_params("longhua", Some(&voice), 1.0, 1.0, "", "", "");
        assert_eq!(params.model, "cosyvoice-v2");
        assert_eq!(params.sample_rate, 24000);
    }

    #[test]
    fn server_events_parse_by_name() {
        let started = r#"{"header":{"task_id":"t","event":"task-started"}}"#;
        assert!(matches!(ServerEvent::parse(started), ServerEvent::Started));
        let failed =
            r#"{"header":{"event":"task-failed","error_code":"E42","error_message":"boom"}}"#;
        match ServerEvent::parse(failed) {
            ServerEvent::Failed { code, message } => {
                assert_eq!(code, "E42");
                assert_eq!(message, "boom");
            }
            _ => panic!("expected task-failed"),
        }
        assert!(matches!(ServerEvent::parse("not json"), ServerEvent::Other));
    }
}
