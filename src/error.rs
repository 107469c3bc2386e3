//! Error types for voicedesk

use std::time::Duration;

use thiserror::Error;

/// Result type alias for voicedesk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running voice sessions
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Speech recognition provider failed (connect, send, decode)
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Text generation provider failed or returned an unusable reply
    #[error("generation error: {0}")]
    Generation(String),

    /// Speech synthesis provider failed
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// A provider call exceeded its bounded wait
    #[error("{provider} provider timed out after {after:?}")]
    ProviderTimeout {
        provider: &'static str,
        after: Duration,
    },

    /// A session with this identifier is already registered
    #[error("session already exists: {0}")]
    DuplicateSession(String),

    /// No session with this identifier is registered
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session has been shut down and accepts no further input
    #[error("session closed: {0}")]
    SessionClosed(String),

    /// Empty or whitespace-only final transcript
    #[error("utterance is empty")]
    InvalidUtterance,

    /// Access token signing error
    #[error("token error: {0}")]
    Token(String),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error originated in one of the external providers
    #[must_use]
    pub const fn is_provider(&self) -> bool {
        matches!(
            self,
            Self::Recognition(_)
                | Self::Generation(_)
                | Self::Synthesis(_)
                | Self::ProviderTimeout { .. }
                | Self::Http(_)
                | Self::WebSocket(_)
        )
    }
}
