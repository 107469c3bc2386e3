//! Transcript aggregation: from recognition events to completed utterances

use super::turn::{TurnGuard, TurnPermit};
use crate::Error;
use crate::providers::RecognitionEvent;

/// Why a final transcript did not start a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Empty or whitespace-only text
    Empty,
    /// Another turn is still in flight; overlap is dropped, not queued
    TurnInFlight,
    /// The session no longer accepts input
    SessionClosed,
}

/// Result of feeding one event to the aggregator
#[derive(Debug)]
pub enum AggregatorOutcome {
    /// Interim hypothesis stored for live display
    Interim,
    /// A completed utterance, holding the acquired turn permit
    Utterance { text: String, permit: TurnPermit },
    /// A final that will not be processed
    Discarded(DiscardReason),
}

/// Collapses the partial/final event stream of one audio stream
#[derive(Debug)]
pub struct TranscriptAggregator {
    interim: String,
    guard: TurnGuard,
}

impl TranscriptAggregator {
    #[must_use]
    pub const fn new(guard: TurnGuard) -> Self {
        Self {
            interim: String::new(),
            guard,
        }
    }

    /// Latest interim hypothesis (empty between utterances)
    #[must_use]
    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// Feed one recognition event
    ///
    /// Interim text replaces the previous hypothesis. A final clears it and
    /// becomes an utterance only if it has content and the turn guard can be
    /// taken right now.
    pub fn accept(&mut self, event: RecognitionEvent) -> AggregatorOutcome {
        if !event.is_final {
            tracing::trace!(text = %event.text, "interim transcript");
            self.interim = event.text;
            return AggregatorOutcome::Interim;
        }

        self.interim.clear();

        let text = event.text.trim();
        if text.is_empty() {
            tracing::debug!(reason = %Error::InvalidUtterance, "final transcript discarded");
            return AggregatorOutcome::Discarded(DiscardReason::Empty);
        }

        tracing::debug!(text, confidence = ?event.confidence, "final transcript");

        match self.guard.try_acquire() {
            Some(permit) => AggregatorOutcome::Utterance {
                text: text.to_string(),
                permit,
            },
            None => AggregatorOutcome::Discarded(DiscardReason::TurnInFlight),
        }
    }
}
