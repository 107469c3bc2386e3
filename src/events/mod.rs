//! Typed per-session output channels
//!
//! Each session publishes synthesized audio, reply text with metadata, and
//! provider faults on three `broadcast` channels. The transport layer
//! subscribes to whichever it relays. Publishing is best-effort: a channel
//! with no subscribers drops the event, and errors never reach the caller.

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::session::Metadata;

/// Synthesized audio ready to be played to the caller
#[derive(Debug, Clone)]
pub struct AudioEvent {
    pub session_id: String,
    pub audio: Bytes,
}

/// Assistant reply text and the facts derived from it
#[derive(Debug, Clone, Serialize)]
pub struct TextEvent {
    pub session_id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// Which provider reported a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultSource {
    Recognition,
    Generation,
    Synthesis,
}

/// Provider failure reported upward from a session
#[derive(Debug, Clone, Serialize)]
pub struct ProviderFault {
    pub session_id: String,
    pub source: FaultSource,
    pub message: String,
}

/// Sending half of a session's output channels
#[derive(Debug, Clone)]
pub struct SessionOutputs {
    session_id: String,
    audio: broadcast::Sender<AudioEvent>,
    text: broadcast::Sender<TextEvent>,
    faults: broadcast::Sender<ProviderFault>,
}

impl SessionOutputs {
    /// Create channels buffering up to `capacity` events each
    #[must_use]
    pub fn new(session_id: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            session_id: session_id.into(),
            audio: broadcast::channel(capacity).0,
            text: broadcast::channel(capacity).0,
            faults: broadcast::channel(capacity).0,
        }
    }

    #[must_use]
    pub fn subscribe_audio(&self) -> broadcast::Receiver<AudioEvent> {
        self.audio.subscribe()
    }

    #[must_use]
    pub fn subscribe_text(&self) -> broadcast::Receiver<TextEvent> {
        self.text.subscribe()
    }

    #[must_use]
    pub fn subscribe_faults(&self) -> broadcast::Receiver<ProviderFault> {
        self.faults.subscribe()
    }

    /// Publish synthesized audio
    pub fn emit_audio(&self, audio: Bytes) {
        let bytes = audio.len();
        let event = AudioEvent {
            session_id: self.session_id.clone(),
            audio,
        };
        if self.audio.send(event).is_err() {
            tracing::debug!(session_id = %self.session_id, bytes, "no audio subscribers, event dropped");
        }
    }

    /// Publish a reply with its metadata
    pub fn emit_text(&self, text: String, metadata: Metadata) {
        let event = TextEvent {
            session_id: self.session_id.clone(),
            text,
            metadata,
        };
        if self.text.send(event).is_err() {
            tracing::debug!(session_id = %self.session_id, "no text subscribers, event dropped");
        }
    }

    /// Report a provider failure
    pub fn emit_fault(&self, source: FaultSource, message: impl Into<String>) {
        let event = ProviderFault {
            session_id: self.session_id.clone(),
            source,
            message: message.into(),
        };
        if self.faults.send(event).is_err() {
            tracing::debug!(session_id = %self.session_id, ?source, "no fault subscribers, event dropped");
        }
    }
}
