//! TOML configuration file loading
//!
//! Supports `~/.config/voicedesk/config.toml` as a persistent config source.
//! All fields are optional — the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{GenerationConfig, RecognitionConfig, SynthesisConfig};
use crate::session::DialogueMarkers;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoicedeskConfigFile {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Streaming speech recognition tuning
    #[serde(default)]
    pub recognition: RecognitionConfig,

    /// Text generation tuning
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Speech synthesis tuning
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Per-session behaviour
    #[serde(default)]
    pub session: SessionFileConfig,

    /// `LiveKit` access token issuing
    #[serde(default)]
    pub livekit: LiveKitFileConfig,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_permissive: Option<bool>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub deepgram: Option<String>,
    pub google: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub generation_timeout_secs: Option<u64>,
    pub synthesis_timeout_secs: Option<u64>,
    pub event_capacity: Option<usize>,
    /// Path to a file replacing the built-in system prompt
    pub system_prompt_path: Option<PathBuf>,
    /// Replacement opening greeting
    pub greeting: Option<String>,
    #[serde(default)]
    pub markers: Option<DialogueMarkers>,
}

/// `LiveKit` configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveKitFileConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub token_ttl_secs: Option<u64>,
}

/// Default config file location: `~/.config/voicedesk/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voicedesk").join("config.toml"))
}

/// Load the config file from `VOICEDESK_CONFIG` or the default location
///
/// A missing file yields defaults; a malformed file is logged and ignored.
#[must_use]
pub fn load_config_file() -> VoicedeskConfigFile {
    let path = std::env::var("VOICEDESK_CONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(default_config_path);

    let Some(path) = path else {
        return VoicedeskConfigFile::default();
    };

    match load_from_path(&path) {
        Ok(Some(fc)) => {
            tracing::info!(path = %path.display(), "loaded config file");
            fc
        }
        Ok(None) => VoicedeskConfigFile::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to load config file, using defaults");
            VoicedeskConfigFile::default()
        }
    }
}

/// Parse a config file, returning `None` when it does not exist
///
/// # Errors
///
/// Returns error if the file exists but cannot be read or parsed
pub fn load_from_path(path: &Path) -> crate::Result<Option<VoicedeskConfigFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(Some(toml::from_str(&contents)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let fc: VoicedeskConfigFile = toml::from_str("").unwrap();
        assert!(fc.server.port.is_none());
        assert_eq!(fc.recognition, RecognitionConfig::default());
        assert!(fc.session.markers.is_none());
    }

    #[test]
    fn partial_sections_overlay_defaults() {
        let fc: VoicedeskConfigFile = toml::from_str(
            r#"
            [server]
            port = 8080

            [recognition]
            language = "en-US"
            keepalive_secs = 5

            [generation]
            temperature = 0.2

            [session.markers]
            protocol_prefix = "CASE"
            "#,
        )
        .unwrap();

        assert_eq!(fc.server.port, Some(8080));
        assert_eq!(fc.recognition.options.language, "en-US");
        assert_eq!(fc.recognition.options.model, "nova-2");
        assert_eq!(fc.recognition.keepalive_secs, 5);
        assert!((fc.generation.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(fc.generation.max_output_tokens, 500);

        let markers = fc.session.markers.unwrap();
        assert_eq!(markers.protocol_prefix, "CASE");
        assert_eq!(markers.acceptance_phrases, DialogueMarkers::default().acceptance_phrases);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from_path(&dir.path().join("nope.toml")).unwrap().is_none());
    }

    #[test]
    fn malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(load_from_path(&path).is_err());
    }
}
