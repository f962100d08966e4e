pub mod config;
pub mod tts;

pub use tts::{SpeechStreamSession, TtsError, TtsGateway};
