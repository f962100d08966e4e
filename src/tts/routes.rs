//! The `/tts` HTTP boundary exported to the hosting router.

use std::convert::Infallible;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use super::client::TtsGateway;
use super::error::TtsError;
use super::types::{ProviderStatus, SpeechRequest, SpeechResult, VoiceOption};

/// Preview bodies clamp into the widest driver ranges.
const PREVIEW_SPEED_RANGE: (f32, f32) = (0.5, 1.6);
const PREVIEW_PITCH_RANGE: (f32, f32) = (0.7, 1.4);

const BODY_LIMIT: u64 = 64 * 1024;

// ── Payloads ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub text: String,
    #[serde(default)]
    pub voice_id: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub emotion: String,
    #[serde(default)]
    pub speed: Option<f32>,
    #[serde(default)]
    pub pitch: Option<f32>,
    #[serde(default)]
    pub format: String,
}

#[derive(Serialize)]
struct VoicesResponse {
    enabled: bool,
    default_voice: String,
    default_provider: String,
    providers: Vec<ProviderStatus>,
    voices: Vec<VoiceOption>,
}

#[derive(Serialize)]
struct PreviewResponse {
    speech: SpeechResult,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ── Filters ────────────────────────────────────────────

/// `GET /tts/voices` and `POST /tts/preview`. Compose with
/// [`handle_rejection`] before serving.
pub fn tts_routes(
    gateway: Arc<TtsGateway>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let voices = warp::path!("tts" / "voices")
        .and(warp::get())
        .and(with_gateway(gateway.clone()))
        .and_then(voices_handler);
    let preview = warp::path!("tts" / "preview")
        .and(warp::post())
        .and(warp::body::content_length_limit(BODY_LIMIT))
        .and(warp::body::json())
        .and(with_gateway(gateway))
        .and_then(preview_handler);
    voices.or(preview)
}

fn with_gateway(
    gateway: Arc<TtsGateway>,
) -> impl Filter<Extract = (Arc<TtsGateway>,), Error = Infallible> + Clone {
    warp::any().map(move || gateway.clone())
}

async fn voices_handler(gateway: Arc<TtsGateway>) -> Result<impl Reply, Rejection> {
    let body = VoicesResponse {
        enabled: gateway.enabled(),
        default_voice: gateway.default_voice_id().await,
        default_provider: gateway.default_provider_id().await,
        providers: gateway.providers().await,
        voices: gateway.voices().await,
    };
    Ok(warp::reply::json(&body))
}

async fn preview_handler(
    body: PreviewRequest,
    gateway: Arc<TtsGateway>,
) -> Result<impl Reply, Rejection> {
    if body.text.trim().is_empty() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "text cannot be empty"));
    }

    let emotion = body.emotion.trim().to_string();
    let mut req = SpeechRequest {
        text: body.text,
        voice_id: body.voice_id,
        provider: body.provider,
        speed: body
            .speed
            .unwrap_or(1.0)
            .clamp(PREVIEW_SPEED_RANGE.0, PREVIEW_SPEED_RANGE.1),
        pitch: body
            .pitch
            .unwrap_or(1.0)
            .clamp(PREVIEW_PITCH_RANGE.0, PREVIEW_PITCH_RANGE.1),
        format: body.format,
        ..Default::default()
    };
    if !emotion.is_empty() {
        req.instructions = format!("Please speak with a {} tone.", emotion);
        req.emotion = emotion;
    }

    match gateway.synthesize(req).await {
        Ok(speech) => Ok(warp::reply::with_status(
            warp::reply::json(&PreviewResponse { speech }),
            StatusCode::OK,
        )),
        Err(err) => Ok(error_reply(status_for(&err), &err.to_string())),
    }
}

fn error_reply(
    status: StatusCode,
    message: &str,
) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&ErrorResponse {
            error: message.to_string(),
        }),
        status,
    )
}

fn status_for(err: &TtsError) -> StatusCode {
    match err {
        TtsError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
        TtsError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Map filter rejections onto the same JSON error shape the handlers use.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("invalid request payload: {}", e))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::BAD_REQUEST, "request payload too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };
    Ok(error_reply(status, &message))
}
