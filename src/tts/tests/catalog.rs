use async_trait::async_trait;

use crate::tts::catalog::{CatalogSources, VoiceCatalog};
use crate::tts::{
    SpeechDriver, SpeechRequest, SpeechResult, TtsError, VoiceOption, PROVIDER_COSYVOICE,
    PROVIDER_QINIU,
};

// ── Fake Drivers ────────────────────────────────────────────

struct FakeDriver {
    id: &'static str,
    enabled: bool,
    default_voice: String,
    voices: Vec<VoiceOption>,
}

#[async_trait]
impl SpeechDriver for FakeDriver {
    fn id(&self) -> &'static str {
        self.id
    }
    fn label(&self) -> &'static str {
        "Fake"
    }
    fn enabled(&self) -> bool {
        self.enabled
    }
    fn default_voice_id(&self) -> String {
        self.default_voice.clone()
    }
    async fn ensure_voices(&self) -> Vec<VoiceOption> {
        self.voices.clone()
    }
    async fn synthesize(&self, _req: &SpeechRequest) -> Result<SpeechResult, TtsError> {
        Err(TtsError::Disabled)
    }
}

fn voice(id: &str, provider: &str) -> VoiceOption {
    VoiceOption {
        id: id.to_string(),
        name: id.to_string(),
        provider: provider.to_string(),
        language: "zh-CN".to_string(),
        description: None,
        sample_url: None,
        default_style: None,
        emotions: Vec::new(),
        model: None,
        format: None,
        sample_rate: None,
        settings: Default::default(),
    }
}

fn qiniu_fake(voices: Vec<VoiceOption>) -> FakeDriver {
    FakeDriver {
        id: PROVIDER_QINIU,
        enabled: true,
        default_voice: "Qiniu_A".to_string(),
        voices,
    }
}

fn cosy_fake(voices: Vec<VoiceOption>) -> FakeDriver {
    FakeDriver {
        id: PROVIDER_COSYVOICE,
        enabled: true,
        default_voice: "longwan".to_string(),
        voices,
    }
}

// ── Indexing ────────────────────────────────────────────────

#[tokio::test]
async fn index_is_case_insensitive_and_canonicalises_providers() {
    // Raw alias tags on the voices must come out canonical.
    let qiniu = qiniu_fake(vec![voice("Qiniu_A", "qiniu")]);
    let cosy = cosy_fake(vec![voice("longwan", "cosyvoice")]);
    let catalog =
        VoiceCatalog::assemble(&[&qiniu, &cosy], CatalogSources::default()).await;

    assert_eq!(catalog.voices().len(), 2);
    assert_eq!(catalog.provider_of("QINIU_a"), Some(PROVIDER_QINIU));
    assert_eq!(catalog.provider_of("LONGWAN"), Some(PROVIDER_COSYVOICE));
    assert_eq!(catalog.lookup("qiniu_a").map(|v| v.provider.as_str()), Some(PROVIDER_QINIU));
    for v in catalog.voices() {
        assert!(!v.id.is_empty());
        assert_eq!(
            catalog.provider_of(&v.id),
            Some(v.provider.as_str()),
            "index provider must match the canonical voice provider"
        );
    }
}

#[tokio::test]
async fn duplicate_ids_keep_the_first_entry() {
    let qiniu = qiniu_fake(vec![voice("Qiniu_A", "qiniu"), voice("shared", "qiniu")]);
    let cosy = cosy_fake(vec![voice("SHARED", "cosyvoice"), voice("longwan", "cosyvoice")]);
    let catalog =
        VoiceCatalog::assemble(&[&qiniu, &cosy], CatalogSources::default()).await;

    assert_eq!(catalog.voices().len(), 3, "case-insensitive duplicate dropped");
    assert_eq!(catalog.provider_of("shared"), Some(PROVIDER_QINIU));
    let ids: Vec<&str> = catalog.voices().iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["Qiniu_A", "shared", "longwan"], "insertion order preserved");
}

#[tokio::test]
async fn disabled_drivers_contribute_nothing() {
    let mut qiniu = qiniu_fake(vec![voice("Qiniu_A", "qiniu")]);
    qiniu.enabled = false;
    let catalog = VoiceCatalog::assemble(&[&qiniu], CatalogSources::default()).await;

    assert!(catalog.is_empty());
    assert_eq!(catalog.default_voice_id(), "");
    assert_eq!(catalog.default_provider_id(), "");
}

// ── Default Selection ───────────────────────────────────────

#[tokio::test]
async fn preferred_default_wins_when_indexed() {
    let qiniu = qiniu_fake(vec![voice("Qiniu_A", "qiniu")]);
    let cosy = cosy_fake(vec![voice("longwan", "cosyvoice")]);
    let sources = CatalogSources {
        override_voices: None,
        preferred_default: "LongWan".to_string(),
    };
    let catalog = VoiceCatalog::assemble(&[&qiniu, &cosy], sources).await;

    assert_eq!(catalog.default_voice_id(), "LongWan");
    assert_eq!(catalog.default_provider_id(), PROVIDER_COSYVOICE);
}

#[tokio::test]
async fn unknown_preferred_default_is_ignored() {
    let qiniu = qiniu_fake(vec![voice("Qiniu_A", "qiniu")]);
    let sources = CatalogSources {
        override_voices: None,
        preferred_default: "no_such_voice".to_string(),
    };
    let catalog = VoiceCatalog::assemble(&[&qiniu], sources).await;

    // Falls through to the first enabled driver's default.
    assert_eq!(catalog.default_voice_id(), "Qiniu_A");
    assert_eq!(catalog.default_provider_id(), PROVIDER_QINIU);
}

#[tokio::test]
async fn driver_default_missing_from_index_falls_to_first_voice() {
    let mut qiniu = qiniu_fake(vec![voice("other_voice", "qiniu")]);
    qiniu.default_voice = "not_listed".to_string();
    let catalog = VoiceCatalog::assemble(&[&qiniu], CatalogSources::default()).await;

    assert_eq!(catalog.default_voice_id(), "other_voice");
    assert_eq!(
        catalog.provider_default(PROVIDER_QINIU),
        Some("other_voice"),
        "per-provider default falls back to the provider's first voice"
    );
}

#[tokio::test]
async fn per_provider_defaults_prefer_the_drivers_choice() {
    let qiniu = qiniu_fake(vec![voice("other", "qiniu"), voice("Qiniu_A", "qiniu")]);
    let cosy = cosy_fake(vec![voice("longwan", "cosyvoice")]);
    let catalog =
        VoiceCatalog::assemble(&[&qiniu, &cosy], CatalogSources::default()).await;

    assert_eq!(catalog.provider_default(PROVIDER_QINIU), Some("Qiniu_A"));
    assert_eq!(catalog.provider_default(PROVIDER_COSYVOICE), Some("longwan"));
}

// ── Overrides ───────────────────────────────────────────────

#[tokio::test]
async fn override_replaces_aggregated_voices_entirely() {
    let qiniu = qiniu_fake(vec![voice("Qiniu_A", "qiniu")]);
    let cosy = cosy_fake(vec![voice("longwan", "cosyvoice")]);
    let sources = CatalogSources {
        override_voices: Some(vec![voice("custom_voice", "cosyvoice")]),
        preferred_default: String::new(),
    };
    let catalog = VoiceCatalog::assemble(&[&qiniu, &cosy], sources).await;

    assert_eq!(catalog.voices().len(), 1, "override replaces, never merges");
    assert_eq!(catalog.default_voice_id(), "custom_voice");
    assert_eq!(catalog.default_provider_id(), PROVIDER_COSYVOICE);
    assert!(catalog.lookup("qiniu_a").is_none());
}

#[test]
fn override_entries_without_provider_are_invalid() {
    let json = r#"[
        {"id": "good", "name": "Good", "provider": "cosyvoice"},
        {"id": "bad_no_provider", "name": "Bad"}
    ]"#;
    let voices = crate::tts::catalog::parse_override(json, "test").expect("parses");
    assert_eq!(voices.len(), 1);
    assert_eq!(voices[0].id, "good");
}

#[test]
fn unparsable_override_is_discarded() {
    assert!(crate::tts::catalog::parse_override("not json", "test").is_none());
}
