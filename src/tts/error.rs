use thiserror::Error;

// ── Error Types ────────────────────────────────────────

/// Gateway-wide error taxonomy. Drivers surface a concrete kind; the HTTP
/// boundary maps kinds to status codes (`Disabled` → 503, `InvalidInput`
/// → 400, everything else → 500).
#[derive(Debug, Clone, Error)]
pub enum TtsError {
    /// No API key configured, or no enabled driver exists at all.
    #[error("tts: speech synthesis is not configured")]
    Disabled,

    /// The caller supplied something unusable (empty text, bad parameters).
    #[error("tts: {0}")]
    InvalidInput(String),

    /// The requested provider id resolves to no known driver.
    #[error("tts: unsupported provider {0}")]
    UnsupportedProvider(String),

    /// The requested provider cannot open duplex sessions.
    #[error("tts: streaming is not supported by provider {0}")]
    StreamingUnsupported(String),

    /// The vendor answered with an error status or error payload.
    #[error("tts: {0}")]
    Remote(String),

    /// Connect/send/receive failed before a usable vendor answer.
    #[error("tts: {0}")]
    Transport(String),

    /// The vendor answered 2xx but the payload was unusable
    /// (no audio field, zero-byte result, malformed frame).
    #[error("tts: {0}")]
    Protocol(String),

    /// A configured deadline elapsed.
    #[error("tts: {0}")]
    Timeout(String),

    /// The caller cancelled the operation or closed the session.
    #[error("tts: operation cancelled")]
    Cancelled,
}

impl TtsError {
    /// Shorthand for the ubiquitous empty-text rejection.
    pub(crate) fn empty_text() -> Self {
        TtsError::InvalidInput("text cannot be empty".to_string())
    }
}
