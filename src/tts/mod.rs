pub mod catalog;
pub mod client;
pub mod cosyvoice;
pub mod error;
pub mod normalize;
pub mod provider;
pub mod qiniu;
pub mod routes;
pub mod stream;
pub mod types;

#[cfg(test)]
mod tests;

pub use catalog::VoiceCatalog;
pub use client::TtsGateway;
pub use cosyvoice::{CosyVoiceConfig, CosyVoiceDriver};
pub use error::TtsError;
pub use normalize::normalize;
pub use provider::{normalize_provider_id, SpeechDriver, PROVIDER_COSYVOICE, PROVIDER_QINIU};
pub use qiniu::{QiniuConfig, QiniuDriver};
pub use routes::{handle_rejection, tts_routes};
pub use stream::SpeechStreamSession;
pub use types::{
    encoding_to_mime, mime_to_encoding, ProviderStatus, SpeechRequest, SpeechResult,
    SpeechStreamChunk, SpeechStreamMetadata, SpeechStreamRequest, VoiceOption, VoiceSettings,
};
