//! Per-call session state: ordered history, dialogue phase, and validation flag

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a history message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry of the dialogue history. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Ordinal dialogue stage inferred from generated text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Greeting and caller identification
    #[default]
    #[serde(rename = "PHASE_1")]
    Greeting,
    /// Consumer unit identifier validation
    #[serde(rename = "PHASE_2")]
    Identification,
    /// Issue analysis and handling
    #[serde(rename = "PHASE_3")]
    Resolution,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "PHASE_1",
            Self::Identification => "PHASE_2",
            Self::Resolution => "PHASE_3",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PHASE_1" => Ok(Self::Greeting),
            "PHASE_2" => Ok(Self::Identification),
            "PHASE_3" => Ok(Self::Resolution),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

/// The durable-for-the-call record owned by one session
///
/// `history` can only grow; nothing in this type reorders or removes
/// messages, and a system message is only accepted as the first entry.
#[derive(Debug, Clone)]
pub struct SessionState {
    session_id: String,
    history: Vec<Message>,
    /// Current dialogue phase (monotonic in practice, not enforced)
    pub phase: Phase,
    /// Set once the assistant confirms the caller's identifier
    pub identifier_validated: bool,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl SessionState {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            history: Vec::new(),
            phase: Phase::default(),
            identifier_validated: false,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Append a message to the end of the history
    ///
    /// Returns `false` (and leaves the history untouched) for a system
    /// message that would not be the first entry.
    pub fn append(&mut self, message: Message) -> bool {
        if message.role == Role::System && !self.history.is_empty() {
            tracing::warn!(
                session_id = %self.session_id,
                "rejected system message after history start"
            );
            return false;
        }
        self.history.push(message);
        true
    }

    /// Point-in-time summary for status reporting
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            phase: self.phase,
            identifier_validated: self.identifier_validated,
            message_count: self.history.len(),
            uptime: self.uptime(),
        }
    }
}

/// Status view of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub phase: Phase,
    pub identifier_validated: bool,
    pub message_count: usize,
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_defaults() {
        let state = SessionState::new("call-1");
        assert_eq!(state.session_id(), "call-1");
        assert_eq!(state.phase, Phase::Greeting);
        assert!(!state.identifier_validated);
        assert!(state.history().is_empty());
    }

    #[test]
    fn system_message_only_first() {
        let mut state = SessionState::new("call-1");
        assert!(state.append(Message::system("prompt")));
        assert!(state.append(Message::assistant("hi")));
        assert!(!state.append(Message::system("late prompt")));

        assert_eq!(state.history().len(), 2);
        assert_eq!(state.history()[0].content, "prompt");
    }

    #[test]
    fn history_is_a_growing_prefix() {
        let mut state = SessionState::new("call-1");
        state.append(Message::system("prompt"));
        let before: Vec<Message> = state.history().to_vec();

        state.append(Message::user("hello"));
        state.append(Message::assistant("hi there"));

        assert!(state.history().starts_with(&before));
        assert_eq!(state.history()[2].role, Role::Assistant);
    }

    #[test]
    fn phase_round_trips_through_str() {
        for phase in [Phase::Greeting, Phase::Identification, Phase::Resolution] {
            assert_eq!(phase.as_str().parse::<Phase>(), Ok(phase));
        }
        assert!("FASE_9".parse::<Phase>().is_err());
    }

    #[test]
    fn phase_serializes_as_ordinal_name() {
        let json = serde_json::to_string(&Phase::Identification).unwrap();
        assert_eq!(json, "\"PHASE_2\"");
    }

    #[test]
    fn snapshot_counts_messages() {
        let mut state = SessionState::new("call-1");
        state.append(Message::system("prompt"));
        state.append(Message::assistant("greeting"));
        state.phase = Phase::Resolution;

        let snap = state.snapshot();
        assert_eq!(snap.message_count, 2);
        assert_eq!(snap.phase, Phase::Resolution);
        assert_eq!(snap.session_id, "call-1");
    }
}
