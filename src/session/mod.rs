//! Voice session core
//!
//! A [`VoiceSession`] owns one call: its [`SessionState`], the
//! [`TranscriptAggregator`] fed by the recognition stream, and the
//! [`TurnProcessor`] that runs at most one generate → synthesize turn at a
//! time. The [`SessionRegistry`] maps identifiers to live sessions.

mod aggregator;
mod facts;
mod orchestrator;
mod registry;
mod state;
mod turn;

pub use aggregator::{AggregatorOutcome, DiscardReason, TranscriptAggregator};
pub use facts::{
    DialogueMarkers, FactExtractor, Facts, Metadata, PHASE_KEY, PROTOCOL_KEY, extract_facts,
    phase_hint,
};
pub use orchestrator::{RecognitionOutcome, SessionSettings, VoiceSession};
pub use registry::SessionRegistry;
pub use state::{Message, Phase, Role, SessionSnapshot, SessionState};
pub use turn::{TurnGuard, TurnPermit, TurnProcessor, TurnProcessorParts};
