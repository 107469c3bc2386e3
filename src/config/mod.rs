//! Configuration management for voicedesk

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::providers::RecognitionOptions;
use crate::session::DialogueMarkers;
use crate::{Error, Result};

/// Default Deepgram live transcription endpoint
pub const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Default Gemini REST base URL
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default `ElevenLabs` REST base URL
pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";

/// voicedesk configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Streaming recognition configuration
    pub recognition: RecognitionConfig,

    /// Text generation configuration
    pub generation: GenerationConfig,

    /// Speech synthesis configuration
    pub synthesis: SynthesisConfig,

    /// Per-session behaviour
    pub session: SessionConfig,

    /// `LiveKit` token configuration
    pub livekit: LiveKitConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allow any origin, method, and header; same-origin only when off
    pub cors_permissive: bool,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Deepgram API key (streaming STT)
    pub deepgram: Option<SecretString>,

    /// Google API key (Gemini generation)
    pub google: Option<SecretString>,

    /// `ElevenLabs` API key (TTS)
    pub elevenlabs: Option<SecretString>,
}

/// Streaming recognition configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    #[serde(flatten)]
    pub options: RecognitionOptions,

    /// Live transcription WebSocket endpoint
    pub endpoint: String,

    /// Idle interval between keep-alive frames
    pub keepalive_secs: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            options: RecognitionOptions::default(),
            endpoint: DEEPGRAM_LISTEN_URL.to_string(),
            keepalive_secs: 8,
        }
    }
}

/// Text generation configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// Keeps replies short enough to speak
    pub max_output_tokens: u32,
    pub endpoint: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash-exp".to_string(),
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 500,
            endpoint: GEMINI_BASE_URL.to_string(),
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub voice_id: Option<String>,
    pub model: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
    pub output_format: String,
    pub endpoint: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            voice_id: None,
            model: "eleven_turbo_v2_5".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.5,
            use_speaker_boost: true,
            output_format: "mp3_44100_128".to_string(),
            endpoint: ELEVENLABS_BASE_URL.to_string(),
        }
    }
}

/// Per-session behaviour
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bounded wait for one generation call
    pub generation_timeout: Duration,

    /// Bounded wait for one synthesis call
    pub synthesis_timeout: Duration,

    /// Buffered events per output channel
    pub event_capacity: usize,

    /// System prompt placed first in every session history
    pub system_prompt: String,

    /// Greeting spoken on session start
    pub greeting: String,

    /// Phrases used to derive phase and facts from replies
    pub markers: DialogueMarkers,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(30),
            synthesis_timeout: Duration::from_secs(30),
            event_capacity: 64,
            system_prompt: crate::prompt::SYSTEM_PROMPT.to_string(),
            greeting: crate::prompt::GREETING.to_string(),
            markers: DialogueMarkers::default(),
        }
    }
}

/// `LiveKit` access token configuration
#[derive(Debug, Clone)]
pub struct LiveKitConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<SecretString>,
    pub token_ttl: Duration,
}

impl LiveKitConfig {
    /// Whether tokens can be issued
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }
}

impl Default for LiveKitConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:7880".to_string(),
            api_key: None,
            api_secret: None,
            token_ttl: Duration::from_secs(6 * 60 * 60),
        }
    }
}

impl Config {
    /// Load configuration from the process environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if a prompt override cannot be read
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration with precedence env > toml > default
    ///
    /// # Errors
    ///
    /// Returns error if a prompt override cannot be read or a numeric
    /// environment variable does not parse
    pub fn resolve(
        fc: file::VoicedeskConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let secret = |key: &str, file_value: Option<String>| {
            env(key).or(file_value).map(SecretString::from)
        };

        let server = ServerConfig {
            host: env("HOST")
                .or(fc.server.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_env(&env, "PORT")?.or(fc.server.port).unwrap_or(3000),
            cors_permissive: fc.server.cors_permissive.unwrap_or(true),
        };

        let api_keys = ApiKeys {
            deepgram: secret("DEEPGRAM_API_KEY", fc.api_keys.deepgram),
            google: secret("GOOGLE_API_KEY", fc.api_keys.google),
            elevenlabs: secret("ELEVENLABS_API_KEY", fc.api_keys.elevenlabs),
        };

        let mut recognition = fc.recognition;
        if let Some(model) = env("VOICEDESK_STT_MODEL") {
            recognition.options.model = model;
        }
        if let Some(language) = env("VOICEDESK_STT_LANGUAGE") {
            recognition.options.language = language;
        }

        let mut generation = fc.generation;
        if let Some(model) = env("VOICEDESK_LLM_MODEL") {
            generation.model = model;
        }

        let mut synthesis = fc.synthesis;
        if let Some(voice_id) = env("ELEVENLABS_VOICE_ID") {
            synthesis.voice_id = Some(voice_id);
        }
        if let Some(model) = env("VOICEDESK_TTS_MODEL") {
            synthesis.model = model;
        }

        let defaults = SessionConfig::default();
        let prompt_path = env("VOICEDESK_SYSTEM_PROMPT")
            .map(PathBuf::from)
            .or(fc.session.system_prompt_path);
        let session = SessionConfig {
            generation_timeout: parse_env(&env, "VOICEDESK_GENERATION_TIMEOUT_SECS")?
                .or(fc.session.generation_timeout_secs)
                .map_or(defaults.generation_timeout, Duration::from_secs),
            synthesis_timeout: parse_env(&env, "VOICEDESK_SYNTHESIS_TIMEOUT_SECS")?
                .or(fc.session.synthesis_timeout_secs)
                .map_or(defaults.synthesis_timeout, Duration::from_secs),
            event_capacity: fc
                .session
                .event_capacity
                .filter(|c| *c > 0)
                .unwrap_or(defaults.event_capacity),
            system_prompt: crate::prompt::load_or_default(
                prompt_path.as_deref(),
                crate::prompt::SYSTEM_PROMPT,
            )?,
            greeting: fc.session.greeting.unwrap_or(defaults.greeting),
            markers: fc.session.markers.unwrap_or(defaults.markers),
        };

        let livekit_defaults = LiveKitConfig::default();
        let livekit = LiveKitConfig {
            url: env("LIVEKIT_URL")
                .or(fc.livekit.url)
                .unwrap_or(livekit_defaults.url),
            api_key: env("LIVEKIT_API_KEY").or(fc.livekit.api_key),
            api_secret: secret("LIVEKIT_API_SECRET", fc.livekit.api_secret),
            token_ttl: fc
                .livekit
                .token_ttl_secs
                .map_or(livekit_defaults.token_ttl, Duration::from_secs),
        };

        Ok(Self {
            server,
            api_keys,
            recognition,
            generation,
            synthesis,
            session,
            livekit,
        })
    }

    /// Names of required settings that are missing
    #[must_use]
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.api_keys.deepgram.is_none() {
            missing.push("DEEPGRAM_API_KEY");
        }
        if self.api_keys.google.is_none() {
            missing.push("GOOGLE_API_KEY");
        }
        if self.api_keys.elevenlabs.is_none() {
            missing.push("ELEVENLABS_API_KEY");
        }
        if self.synthesis.voice_id.is_none() {
            missing.push("ELEVENLABS_VOICE_ID");
        }
        missing
    }

    /// Check that every provider has the credentials it needs
    ///
    /// # Errors
    ///
    /// Returns error naming all missing settings
    pub fn validate(&self) -> Result<()> {
        if !self.livekit.is_configured() {
            tracing::warn!("LIVEKIT_API_KEY/LIVEKIT_API_SECRET not set, token endpoint disabled");
        }

        let missing = self.missing_required();
        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::Config(format!(
            "missing required settings: {}",
            missing.join(", ")
        )))
    }
}

/// Parse an optional numeric environment variable
fn parse_env<T: std::str::FromStr>(
    env: impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    env(key)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key} is not a valid number: {v}")))
        })
        .transpose()
}
