use async_trait::async_trait;

use super::error::TtsError;
use super::types::{ProviderStatus, SpeechRequest, SpeechResult, VoiceOption};

// ── Canonical Provider Ids ─────────────────────────────

/// OpenAI-style HTTP driver.
pub const PROVIDER_QINIU: &str = "qiniu-openai";
/// Duplex WebSocket driver.
pub const PROVIDER_COSYVOICE: &str = "aliyun-cosyvoice";

/// Map the aliases callers actually send to the canonical driver ids.
/// Anything unrecognised passes through trimmed and lowercased so the
/// facade can report it back verbatim.
pub fn normalize_provider_id(raw: &str) -> String {
    let id = raw.trim().to_ascii_lowercase();
    match id.as_str() {
        "" | "qiniu" | "qiniu_openai" | "qiniuopenai" | "qiniu-openai" => {
            PROVIDER_QINIU.to_string()
        }
        "aliyun" | "ali" | "aliyun_cosyvoice" | "aliyun-cosyvoice" | "cosyvoice"
        | "cosy-voice" => PROVIDER_COSYVOICE.to_string(),
        _ => id,
    }
}

// ── Driver Trait ───────────────────────────────────────

/// Common capability every synthesis driver exposes. The facade dispatches
/// by matching on canonical provider id; this trait is the seam the
/// catalogue bootstrap iterates over.
#[async_trait]
pub trait SpeechDriver: Send + Sync {
    /// Canonical identifier for this driver.
    fn id(&self) -> &'static str;

    /// Human-readable label for status listings.
    fn label(&self) -> &'static str;

    /// A driver is enabled iff it has credentials to reach its vendor.
    fn enabled(&self) -> bool;

    /// The voice used when a request names none.
    fn default_voice_id(&self) -> String;

    /// Produce this driver's voice list: remote refresh where the vendor
    /// offers one, static seed data otherwise.
    async fn ensure_voices(&self) -> Vec<VoiceOption>;

    /// One request, one complete audio artifact.
    async fn synthesize(&self, req: &SpeechRequest) -> Result<SpeechResult, TtsError>;

    fn status(&self) -> ProviderStatus {
        ProviderStatus {
            id: self.id().to_string(),
            label: self.label().to_string(),
            enabled: self.enabled(),
            default_voice_id: self.default_voice_id(),
            supports_preview: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_canonical_ids() {
        for alias in ["", "qiniu", "qiniu_openai", "QiniuOpenAI", "qiniu-openai"] {
            assert_eq!(normalize_provider_id(alias), PROVIDER_QINIU, "alias {:?}", alias);
        }
        for alias in ["aliyun", "ali", "Aliyun_CosyVoice", "cosyvoice", "cosy-voice"] {
            assert_eq!(
                normalize_provider_id(alias),
                PROVIDER_COSYVOICE,
                "alias {:?}",
                alias
            );
        }
    }

    #[test]
    fn unknown_ids_pass_through_lowercased() {
        assert_eq!(normalize_provider_id("  ElevenLabs "), "elevenlabs");
    }
}
