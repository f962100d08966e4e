use std::collections::HashMap;
use std::time::Duration;

use tracing::{info, warn};

use super::provider::{normalize_provider_id, SpeechDriver};
use super::types::VoiceOption;
use crate::config;

/// How long one driver may spend producing its voice list at bootstrap.
const ENSURE_VOICES_TIMEOUT: Duration = Duration::from_secs(8);
/// Fetch budget for a catalogue override URL.
const OVERRIDE_FETCH_TIMEOUT: Duration = Duration::from_secs(8);

// ── Override Sources ───────────────────────────────────

/// Inputs the catalogue is assembled from besides the drivers themselves.
/// Split out of the env so tests can assemble catalogues directly.
#[derive(Debug, Default)]
pub struct CatalogSources {
    /// When present, replaces the driver-aggregated list entirely.
    pub override_voices: Option<Vec<VoiceOption>>,
    /// `TTS_DEFAULT_VOICE`; ignored when it resolves to nothing.
    pub preferred_default: String,
}

impl CatalogSources {
    pub async fn from_env(client: &reqwest::Client) -> Self {
        Self {
            override_voices: override_from_env(
                client,
                &["TTS_VOICE_CATALOG", "VOICE_CATALOG"],
                &["TTS_VOICE_CATALOG_URL", "VOICE_CATALOG_URL"],
            )
            .await,
            preferred_default: config::env_or(&["TTS_DEFAULT_VOICE"], ""),
        }
    }
}

/// Resolve a catalogue override: inline JSON first, then a JSON URL.
/// Entries without a provider tag are invalid and skipped. Returns `None`
/// when no override is configured or the configured one is unusable.
pub(crate) async fn override_from_env(
    client: &reqwest::Client,
    inline_vars: &[&str],
    url_vars: &[&str],
) -> Option<Vec<VoiceOption>> {
    if let Some(inline) = config::env_first(inline_vars) {
        return parse_override(&inline, inline_vars[0]);
    }
    let url = config::env_first(url_vars)?;
    let body = match client
        .get(&url)
        .timeout(OVERRIDE_FETCH_TIMEOUT)
        .send()
        .await
        .and_then(|r| r.error_for_status())
    {
        Ok(resp) => match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %url, error = %e, "voice catalog override fetch failed; keeping driver voices");
                return None;
            }
        },
        Err(e) => {
            warn!(url = %url, error = %e, "voice catalog override fetch failed; keeping driver voices");
            return None;
        }
    };
    parse_override(&body, url_vars[0])
}

pub(crate) fn parse_override(json: &str, source: &str) -> Option<Vec<VoiceOption>> {
    let parsed: Vec<VoiceOption> = match serde_json::from_str(json) {
        Ok(voices) => voices,
        Err(e) => {
            warn!(source, error = %e, "unparsable voice catalog override; keeping driver voices");
            return None;
        }
    };
    let total = parsed.len();
    let valid: Vec<VoiceOption> = parsed
        .into_iter()
        .filter(|v| {
            let ok = !v.id.trim().is_empty() && !v.provider.trim().is_empty();
            if !ok {
                warn!(source, voice = %v.id, "override voice without id/provider tag skipped");
            }
            ok
        })
        .collect();
    info!(source, kept = valid.len(), total, "voice catalog override active");
    Some(valid)
}

// ── Catalogue ──────────────────────────────────────────

/// Unified, de-duplicated, case-insensitively indexed union of every
/// enabled driver's voices (or of the override that replaces them).
/// Written only at bootstrap/refresh, read everywhere else; refreshes swap
/// the whole value behind the facade's lock.
#[derive(Debug, Default)]
pub struct VoiceCatalog {
    /// Insertion order preserved for enumeration.
    voices: Vec<VoiceOption>,
    /// lowercased voice id → canonical provider id
    provider_by_voice: HashMap<String, String>,
    /// lowercased voice id → full option
    voice_by_id: HashMap<String, VoiceOption>,
    default_voice_id: String,
    default_provider_id: String,
    /// canonical provider id → default voice id
    provider_defaults: HashMap<String, String>,
}

impl VoiceCatalog {
    /// Assemble the catalogue from the environment and the enabled drivers.
    pub async fn bootstrap(client: &reqwest::Client, drivers: &[&dyn SpeechDriver]) -> Self {
        let sources = CatalogSources::from_env(client).await;
        Self::assemble(drivers, sources).await
    }

    /// Assemble from explicit sources. The driver aggregation order defines
    /// enumeration order; an override replaces the aggregation entirely.
    pub async fn assemble(drivers: &[&dyn SpeechDriver], sources: CatalogSources) -> Self {
        let mut aggregated: Vec<VoiceOption> = Vec::new();
        for driver in drivers {
            if !driver.enabled() {
                continue;
            }
            match tokio::time::timeout(ENSURE_VOICES_TIMEOUT, driver.ensure_voices()).await {
                Ok(voices) => aggregated.extend(voices),
                Err(_) => {
                    warn!(provider = driver.id(), "voice listing timed out; provider contributes no voices");
                }
            }
        }

        if let Some(override_voices) = sources.override_voices {
            aggregated = override_voices;
        }

        let mut catalog = Self::index(aggregated);

        // Global default precedence: explicit env choice, then the first
        // enabled driver's default, then the first aggregated voice.
        let mut chosen = String::new();
        let preferred = sources.preferred_default.trim();
        if !preferred.is_empty() {
            if catalog.lookup(preferred).is_some() {
                chosen = preferred.to_string();
            } else {
                warn!(voice = preferred, "TTS_DEFAULT_VOICE not in catalog; ignoring");
            }
        }
        if chosen.is_empty() {
            chosen = drivers
                .iter()
                .filter(|d| d.enabled())
                .map(|d| d.default_voice_id())
                .find(|v| catalog.lookup(v).is_some())
                .unwrap_or_default();
        }
        if chosen.is_empty() {
            chosen = catalog.voices.first().map(|v| v.id.clone()).unwrap_or_default();
        }
        let chosen_provider = catalog.provider_of(&chosen).unwrap_or_default().to_string();
        catalog.default_provider_id = chosen_provider;
        catalog.default_voice_id = chosen;

        // Per-provider defaults: the driver's own default when indexed,
        // else that provider's first aggregated voice.
        for driver in drivers {
            let canonical = driver.id().to_string();
            let reported = driver.default_voice_id();
            let default = if catalog.provider_of(&reported) == Some(canonical.as_str()) {
                reported
            } else {
                catalog
                    .voices
                    .iter()
                    .find(|v| normalize_provider_id(&v.provider) == canonical)
                    .map(|v| v.id.clone())
                    .unwrap_or_default()
            };
            if !default.is_empty() {
                catalog.provider_defaults.insert(canonical, default);
            }
        }

        catalog
    }

    fn index(aggregated: Vec<VoiceOption>) -> Self {
        let mut catalog = Self::default();
        for mut voice in aggregated {
            let key = voice.id.trim().to_ascii_lowercase();
            if key.is_empty() || catalog.voice_by_id.contains_key(&key) {
                continue;
            }
            voice.provider = normalize_provider_id(&voice.provider);
            catalog
                .provider_by_voice
                .insert(key.clone(), voice.provider.clone());
            catalog.voice_by_id.insert(key, voice.clone());
            catalog.voices.push(voice);
        }
        catalog
    }

    // ── Read-only views ────────────────────────────────

    pub fn voices(&self) -> &[VoiceOption] {
        &self.voices
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Case-insensitive voice lookup.
    pub fn lookup(&self, voice_id: &str) -> Option<&VoiceOption> {
        self.voice_by_id.get(&voice_id.trim().to_ascii_lowercase())
    }

    /// Canonical provider id owning `voice_id`, if the voice is known.
    pub fn provider_of(&self, voice_id: &str) -> Option<&str> {
        self.provider_by_voice
            .get(&voice_id.trim().to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn default_voice_id(&self) -> &str {
        &self.default_voice_id
    }

    pub fn default_provider_id(&self) -> &str {
        &self.default_provider_id
    }

    /// Default voice for one provider, when that provider has any voice.
    pub fn provider_default(&self, provider_id: &str) -> Option<&str> {
        self.provider_defaults.get(provider_id).map(String::as_str)
    }
}
