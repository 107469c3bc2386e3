//! Turn processing: one generate-then-synthesize cycle per accepted utterance

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::facts::{FactExtractor, phase_hint};
use super::state::{Message, SessionState};
use crate::events::{FaultSource, SessionOutputs};
use crate::providers::{GenerationResult, SpeechSynthesizer, TextGenerator};
use crate::{Error, Result};

/// Per-session in-flight flag: at most one turn runs at a time
#[derive(Debug, Clone, Default)]
pub struct TurnGuard {
    in_flight: Arc<AtomicBool>,
}

impl TurnGuard {
    /// Take the guard if no turn is in flight; never waits
    #[must_use]
    pub fn try_acquire(&self) -> Option<TurnPermit> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TurnPermit {
                in_flight: Arc::clone(&self.in_flight),
            })
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Proof of holding the turn guard; releases it when dropped
#[derive(Debug)]
#[must_use = "dropping the permit releases the turn guard immediately"]
pub struct TurnPermit {
    in_flight: Arc<AtomicBool>,
}

impl Drop for TurnPermit {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Drives the generate → synthesize cycle for one session
pub struct TurnProcessor {
    session_id: String,
    state: Arc<RwLock<SessionState>>,
    generator: Arc<dyn TextGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    extractor: FactExtractor,
    outputs: SessionOutputs,
    generation_timeout: Duration,
    synthesis_timeout: Duration,
}

/// Construction parameters for [`TurnProcessor`]
pub struct TurnProcessorParts {
    pub session_id: String,
    pub state: Arc<RwLock<SessionState>>,
    pub generator: Arc<dyn TextGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub extractor: FactExtractor,
    pub outputs: SessionOutputs,
    pub generation_timeout: Duration,
    pub synthesis_timeout: Duration,
}

impl TurnProcessor {
    #[must_use]
    pub fn new(parts: TurnProcessorParts) -> Self {
        Self {
            session_id: parts.session_id,
            state: parts.state,
            generator: parts.generator,
            synthesizer: parts.synthesizer,
            extractor: parts.extractor,
            outputs: parts.outputs,
            generation_timeout: parts.generation_timeout,
            synthesis_timeout: parts.synthesis_timeout,
        }
    }

    /// Run one turn, logging and reporting any provider failure
    ///
    /// The permit is held for the whole turn and released on every exit
    /// path, including failures and panics.
    pub async fn process(&self, permit: TurnPermit, utterance: String) {
        let started = Instant::now();
        tracing::info!(session_id = %self.session_id, utterance = %utterance, "turn started");

        match self.run(permit, utterance).await {
            Ok(reply) => {
                tracing::info!(
                    session_id = %self.session_id,
                    elapsed_ms = started.elapsed().as_millis(),
                    chars = reply.text.len(),
                    "turn complete"
                );
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    elapsed_ms = started.elapsed().as_millis(),
                    error = %e,
                    "turn aborted"
                );
                self.outputs.emit_fault(fault_source(&e), e.to_string());
            }
        }
    }

    /// Run one turn, returning the reply on success
    ///
    /// Messages appended before a failure stay in history: a failed
    /// synthesis keeps the assistant reply but emits nothing.
    ///
    /// # Errors
    ///
    /// Returns error if generation or synthesis fails or times out
    pub async fn run(&self, permit: TurnPermit, utterance: String) -> Result<GenerationResult> {
        let _permit = permit;

        let history = {
            let mut state = self.state.write().await;
            state.append(Message::user(utterance));
            state.history().to_vec()
        };

        let reply = bounded(
            "generation",
            self.generation_timeout,
            self.generator.generate(&history),
        )
        .await
        .map_err(|e| tagged(e, FaultSource::Generation))?;

        tracing::debug!(session_id = %self.session_id, reply = %reply.text, "generation complete");

        let facts = self.extractor.extract(&reply.text);
        {
            let mut state = self.state.write().await;
            if let Some(phase) = phase_hint(&reply.metadata) {
                if phase != state.phase {
                    tracing::info!(session_id = %self.session_id, from = %state.phase, to = %phase, "phase changed");
                }
                state.phase = phase;
            }
            if facts.validated && !state.identifier_validated {
                tracing::info!(session_id = %self.session_id, "identifier validated");
                state.identifier_validated = true;
            }
            state.append(Message::assistant(reply.text.clone()));
        }

        let audio = bounded(
            "synthesis",
            self.synthesis_timeout,
            self.synthesizer.speak(&reply.text),
        )
        .await
        .map_err(|e| tagged(e, FaultSource::Synthesis))?;

        self.outputs.emit_audio(audio);
        self.outputs.emit_text(reply.text.clone(), reply.metadata.clone());

        Ok(reply)
    }
}

/// Await a provider call for at most `after`
pub(crate) async fn bounded<T>(
    provider: &'static str,
    after: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| Error::ProviderTimeout { provider, after })?
}

/// Normalize errors from a provider call to that provider's variant
fn tagged(error: Error, source: FaultSource) -> Error {
    match (error, source) {
        (e @ (Error::ProviderTimeout { .. } | Error::Generation(_) | Error::Synthesis(_)), _) => e,
        (e, FaultSource::Generation) => Error::Generation(e.to_string()),
        (e, FaultSource::Synthesis) => Error::Synthesis(e.to_string()),
        (e, FaultSource::Recognition) => Error::Recognition(e.to_string()),
    }
}

fn fault_source(error: &Error) -> FaultSource {
    match error {
        Error::Synthesis(_) => FaultSource::Synthesis,
        Error::ProviderTimeout { provider, .. } if *provider == "synthesis" => FaultSource::Synthesis,
        Error::Recognition(_) => FaultSource::Recognition,
        _ => FaultSource::Generation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_exclusive() {
        let guard = TurnGuard::default();
        let permit = guard.try_acquire().unwrap();

        assert!(guard.is_in_flight());
        assert!(guard.try_acquire().is_none());
        assert!(guard.clone().try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_in_flight());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn permit_released_on_unwind() {
        let guard = TurnGuard::default();
        let cloned = guard.clone();

        let result = std::panic::catch_unwind(move || {
            let _permit = cloned.try_acquire().unwrap();
            panic!("fault inside turn");
        });

        assert!(result.is_err());
        assert!(!guard.is_in_flight());
    }

    #[tokio::test]
    async fn bounded_times_out() {
        let result: Result<()> = bounded("generation", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(Error::ProviderTimeout {
                provider: "generation",
                ..
            })
        ));
    }

    #[test]
    fn errors_tagged_by_provider() {
        let e = tagged(Error::WebSocket("x".into()), FaultSource::Synthesis);
        assert!(matches!(e, Error::Synthesis(_)));
        assert_eq!(fault_source(&e), FaultSource::Synthesis);

        let timeout = Error::ProviderTimeout {
            provider: "synthesis",
            after: Duration::from_secs(1),
        };
        assert_eq!(fault_source(&timeout), FaultSource::Synthesis);
        assert_eq!(
            fault_source(&Error::Generation("x".into())),
            FaultSource::Generation
        );
    }
}
