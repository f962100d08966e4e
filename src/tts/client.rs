use std::time::Duration;

use reqwest::Client;
use tokio::sync::RwLock;
use tracing::info;

use super::catalog::VoiceCatalog;
use super::cosyvoice::CosyVoiceDriver;
use super::error::TtsError;
use super::provider::{normalize_provider_id, SpeechDriver, PROVIDER_COSYVOICE, PROVIDER_QINIU};
use super::qiniu::QiniuDriver;
use super::stream::SpeechStreamSession;
use super::types::{
    ProviderStatus, SpeechRequest, SpeechResult, SpeechStreamRequest, VoiceOption,
};

/// Per-request budget for the shared HTTP client.
const HTTP_TIMEOUT: Duration = Duration::from_secs(45);

// ── Gateway Facade ─────────────────────────────────────

/// Aggregates the drivers, owns the voice catalogue, resolves
/// `{provider, voice}`, and dispatches each request to the right driver by
/// canonical provider id.
pub struct TtsGateway {
    http: Client,
    qiniu: QiniuDriver,
    cosyvoice: CosyVoiceDriver,
    /// Written at bootstrap and refresh only; refresh swaps the whole value.
    catalog: RwLock<VoiceCatalog>,
}

impl TtsGateway {
    pub async fn from_env() -> Self {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        let qiniu = QiniuDriver::from_env(http.clone());
        let cosyvoice = CosyVoiceDriver::from_env(http.clone());
        Self::with_drivers(http, qiniu, cosyvoice).await
    }

    /// Build from explicit drivers; used directly by tests.
    pub async fn with_drivers(http: Client, qiniu: QiniuDriver, cosyvoice: CosyVoiceDriver) -> Self {
        let catalog = VoiceCatalog::bootstrap(&http, &[&qiniu, &cosyvoice]).await;
        info!(
            voices = catalog.voices().len(),
            default_provider = %catalog.default_provider_id(),
            "voice catalog ready"
        );
        Self {
            http,
            qiniu,
            cosyvoice,
            catalog: RwLock::new(catalog),
        }
    }

    /// The gateway is enabled iff any driver is.
    pub fn enabled(&self) -> bool {
        self.qiniu.enabled() || self.cosyvoice.enabled()
    }

    pub async fn default_voice_id(&self) -> String {
        self.catalog.read().await.default_voice_id().to_string()
    }

    pub async fn default_provider_id(&self) -> String {
        self.catalog.read().await.default_provider_id().to_string()
    }

    pub async fn voices(&self) -> Vec<VoiceOption> {
        self.catalog.read().await.voices().to_vec()
    }

    pub async fn providers(&self) -> Vec<ProviderStatus> {
        let catalog = self.catalog.read().await;
        self.drivers()
            .into_iter()
            .map(|driver| {
                let mut status = driver.status();
                if let Some(voice) = catalog.provider_default(driver.id()) {
                    status.default_voice_id = voice.to_string();
                }
                status
            })
            .collect()
    }

    /// Re-run catalogue aggregation and publish the new index atomically.
    pub async fn refresh_voices(&self) {
        let next = VoiceCatalog::bootstrap(&self.http, &[&self.qiniu, &self.cosyvoice]).await;
        *self.catalog.write().await = next;
    }

    fn drivers(&self) -> Vec<&dyn SpeechDriver> {
        vec![&self.qiniu, &self.cosyvoice]
    }

    /// Provider resolution: explicit id, else the requested voice's
    /// provider, else the global default.
    async fn resolve_provider(&self, provider: &str, voice_id: &str) -> Result<String, TtsError> {
        let mut raw = provider.trim().to_string();
        if raw.is_empty() && !voice_id.trim().is_empty() {
            if let Some(owner) = self.catalog.read().await.provider_of(voice_id) {
                raw = owner.to_string();
            }
        }
        if raw.is_empty() {
            raw = self.catalog.read().await.default_provider_id().to_string();
        }
        if raw.is_empty() {
            // An empty catalogue means no driver contributed anything.
            return Err(TtsError::Disabled);
        }
        Ok(normalize_provider_id(&raw))
    }

    async fn prepare<R>(&self, req: &mut R, canonical: &str, driver: &dyn SpeechDriver)
    where
        R: RequestFields,
    {
        req.set_provider(canonical.to_string());
        if req.voice_id().trim().is_empty() {
            req.set_voice_id(driver.default_voice_id());
        }
        let resolved = self.catalog.read().await.lookup(req.voice_id()).cloned();
        req.set_resolved_voice(resolved);
    }

    /// Batch synthesis through whichever driver owns the request.
    pub async fn synthesize(&self, mut req: SpeechRequest) -> Result<SpeechResult, TtsError> {
        if req.text.trim().is_empty() {
            return Err(TtsError::empty_text());
        }
        let canonical = self.resolve_provider(&req.provider, &req.voice_id).await?;
        let driver: &dyn SpeechDriver = match canonical.as_str() {
            PROVIDER_QINIU => &self.qiniu,
            PROVIDER_COSYVOICE => &self.cosyvoice,
            other => return Err(TtsError::UnsupportedProvider(other.to_string())),
        };
        if !driver.enabled() {
            return Err(TtsError::Disabled);
        }
        self.prepare(&mut req, &canonical, driver).await;
        driver.synthesize(&req).await
    }

    /// Streaming synthesis; only the duplex driver supports it.
    pub async fn stream(
        &self,
        mut req: SpeechStreamRequest,
    ) -> Result<SpeechStreamSession, TtsError> {
        let canonical = self.resolve_provider(&req.provider, &req.voice_id).await?;
        match canonical.as_str() {
            PROVIDER_COSYVOICE => {}
            PROVIDER_QINIU => return Err(TtsError::StreamingUnsupported(canonical)),
            other => return Err(TtsError::UnsupportedProvider(other.to_string())),
        }
        if !self.cosyvoice.enabled() {
            return Err(TtsError::Disabled);
        }
        self.prepare(&mut req, &canonical, &self.cosyvoice).await;
        self.cosyvoice.open_stream(&req).await
    }
}

// ── Request Field Access ───────────────────────────────

/// The two request shapes share the resolution path; this keeps `prepare`
/// writing to both without duplicating it.
trait RequestFields {
    fn voice_id(&self) -> &str;
    fn set_voice_id(&mut self, voice_id: String);
    fn set_provider(&mut self, provider: String);
    fn set_resolved_voice(&mut self, voice: Option<VoiceOption>);
}

impl RequestFields for SpeechRequest {
    fn voice_id(&self) -> &str {
        &self.voice_id
    }
    fn set_voice_id(&mut self, voice_id: String) {
        self.voice_id = voice_id;
    }
    fn set_provider(&mut self, provider: String) {
        self.provider = provider;
    }
    fn set_resolved_voice(&mut self, voice: Option<VoiceOption>) {
        self.resolved_voice = voice;
    }
}

impl RequestFields for SpeechStreamRequest {
    fn voice_id(&self) -> &str {
        &self.voice_id
    }
    fn set_voice_id(&mut self, voice_id: String) {
        self.voice_id = voice_id;
    }
    fn set_provider(&mut self, provider: String) {
        self.provider = provider;
    }
    fn set_resolved_voice(&mut self, voice: Option<VoiceOption>) {
        self.resolved_voice = voice;
    }
}
