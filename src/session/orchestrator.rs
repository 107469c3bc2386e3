//! Per-call orchestrator: recognition stream, transcript aggregation, turns
//!
//! ```text
//! audio ─▶ RecognitionStream ─▶ pump ─▶ TranscriptAggregator
//!                                              │ final + guard acquired
//!                                              ▼
//!                     TurnProcessor (spawned) ─▶ generate ─▶ synthesize ─▶ outputs
//! ```
//!
//! The pump never awaits a turn. A final that arrives while a turn is in
//! flight finds the guard taken and is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::aggregator::{AggregatorOutcome, DiscardReason, TranscriptAggregator};
use super::facts::FactExtractor;
use super::state::{Message, SessionSnapshot, SessionState};
use super::turn::{TurnGuard, TurnProcessor, TurnProcessorParts, bounded};
use crate::events::{AudioEvent, FaultSource, ProviderFault, SessionOutputs, TextEvent};
use crate::providers::{
    RecognitionEvent, RecognitionOptions, RecognitionStream, RecognitionUpdate, SessionProviders,
    SpeechRecognizer, SpeechSynthesizer,
};
use crate::{Config, Error, Result};

/// Settings shared by every session a registry creates
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub system_prompt: String,
    pub greeting: String,
    pub recognition: RecognitionOptions,
    pub extractor: FactExtractor,
    pub generation_timeout: Duration,
    pub synthesis_timeout: Duration,
    pub event_capacity: usize,
}

impl SessionSettings {
    /// Build settings from loaded configuration
    ///
    /// # Errors
    ///
    /// Returns error if the dialogue markers do not compile
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            system_prompt: config.session.system_prompt.clone(),
            greeting: config.session.greeting.clone(),
            recognition: config.recognition.options.clone(),
            extractor: FactExtractor::new(config.session.markers.clone())?,
            generation_timeout: config.session.generation_timeout,
            synthesis_timeout: config.session.synthesis_timeout,
            event_capacity: config.session.event_capacity,
        })
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        let session = crate::config::SessionConfig::default();
        Self {
            system_prompt: session.system_prompt,
            greeting: session.greeting,
            recognition: RecognitionOptions::default(),
            extractor: FactExtractor::default(),
            generation_timeout: session.generation_timeout,
            synthesis_timeout: session.synthesis_timeout,
            event_capacity: session.event_capacity,
        }
    }
}

/// What happened to one recognition event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionOutcome {
    /// Interim text stored
    Interim,
    /// A turn was started for this final
    TurnStarted,
    /// The final was dropped
    Discarded(DiscardReason),
}

/// One live voice call
pub struct VoiceSession {
    id: String,
    settings: SessionSettings,
    state: Arc<RwLock<SessionState>>,
    guard: TurnGuard,
    aggregator: Mutex<TranscriptAggregator>,
    processor: Arc<TurnProcessor>,
    recognizer: Arc<dyn SpeechRecognizer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    outputs: SessionOutputs,
    stream: Mutex<Option<Box<dyn RecognitionStream>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    current_turn: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    closing: watch::Sender<bool>,
}

impl VoiceSession {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        providers: SessionProviders,
        settings: SessionSettings,
    ) -> Arc<Self> {
        let id = id.into();
        let state = Arc::new(RwLock::new(SessionState::new(id.clone())));
        let guard = TurnGuard::default();
        let outputs = SessionOutputs::new(id.clone(), settings.event_capacity);
        let (closing, _) = watch::channel(false);

        let processor = Arc::new(TurnProcessor::new(TurnProcessorParts {
            session_id: id.clone(),
            state: Arc::clone(&state),
            generator: providers.generator,
            synthesizer: Arc::clone(&providers.synthesizer),
            extractor: settings.extractor.clone(),
            outputs: outputs.clone(),
            generation_timeout: settings.generation_timeout,
            synthesis_timeout: settings.synthesis_timeout,
        }));

        Arc::new(Self {
            aggregator: Mutex::new(TranscriptAggregator::new(guard.clone())),
            id,
            settings,
            state,
            guard,
            processor,
            recognizer: providers.recognizer,
            synthesizer: providers.synthesizer,
            outputs,
            stream: Mutex::new(None),
            pump: Mutex::new(None),
            current_turn: Mutex::new(None),
            closed: AtomicBool::new(false),
            closing,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Open the recognition stream, seed the history, and speak the greeting
    ///
    /// Any failure aborts initialization and releases what was opened.
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be opened or the greeting cannot
    /// be synthesized
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SessionClosed(self.id.clone()));
        }

        tracing::info!(session_id = %self.id, "initializing session");

        let (stream, updates) = self.recognizer.open(&self.settings.recognition).await?;
        *self.stream.lock().await = Some(stream);
        *self.pump.lock().await = Some(spawn_pump(Arc::downgrade(self), updates));

        if let Err(e) = self.greet().await {
            tracing::error!(session_id = %self.id, error = %e, "session initialization failed");
            let _ = self.release_stream().await;
            return Err(e);
        }

        tracing::info!(session_id = %self.id, "session initialized");
        Ok(())
    }

    async fn greet(&self) -> Result<()> {
        let greeting = self.settings.greeting.clone();
        {
            let mut state = self.state.write().await;
            if !state.append(Message::system(self.settings.system_prompt.clone())) {
                return Err(Error::Config(
                    "system prompt must open the session history".to_string(),
                ));
            }
            state.append(Message::assistant(greeting.clone()));
        }

        let audio = bounded(
            "synthesis",
            self.settings.synthesis_timeout,
            self.synthesizer.speak(&greeting),
        )
        .await?;
        self.outputs.emit_audio(audio);
        Ok(())
    }

    /// Forward caller audio to the recognition stream
    ///
    /// # Errors
    ///
    /// Returns error if the session is closed or the provider rejects the audio
    pub async fn send_audio(&self, audio: Bytes) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SessionClosed(self.id.clone()));
        }
        let stream = self.stream.lock().await;
        let Some(stream) = stream.as_ref() else {
            return Err(Error::SessionClosed(self.id.clone()));
        };
        stream.send(audio).await
    }

    /// Feed one recognition event through the aggregator
    ///
    /// A final that wins the turn guard starts a turn in the background;
    /// this call returns without waiting for it.
    pub async fn handle_recognition(&self, event: RecognitionEvent) -> RecognitionOutcome {
        if self.closed.load(Ordering::Acquire) {
            return RecognitionOutcome::Discarded(DiscardReason::SessionClosed);
        }

        let outcome = self.aggregator.lock().await.accept(event);
        match outcome {
            AggregatorOutcome::Interim => RecognitionOutcome::Interim,
            AggregatorOutcome::Discarded(reason) => {
                if reason == DiscardReason::TurnInFlight {
                    tracing::info!(session_id = %self.id, "final transcript dropped, turn in flight");
                }
                RecognitionOutcome::Discarded(reason)
            }
            AggregatorOutcome::Utterance { text, permit } => {
                // shutdown sets `closed` before it takes this lock to await the turn
                let mut current = self.current_turn.lock().await;
                if self.closed.load(Ordering::Acquire) {
                    drop(permit);
                    return RecognitionOutcome::Discarded(DiscardReason::SessionClosed);
                }
                let processor = Arc::clone(&self.processor);
                *current = Some(tokio::spawn(async move {
                    processor.process(permit, text).await;
                }));
                RecognitionOutcome::TurnStarted
            }
        }
    }

    async fn handle_update(&self, update: RecognitionUpdate) {
        match update {
            RecognitionUpdate::Transcript(event) => {
                self.handle_recognition(event).await;
            }
            RecognitionUpdate::Error(message) => {
                tracing::warn!(session_id = %self.id, error = %message, "recognition provider error");
                self.outputs.emit_fault(FaultSource::Recognition, message);
            }
            RecognitionUpdate::Closed => {
                tracing::info!(session_id = %self.id, "recognition stream closed by provider");
            }
        }
    }

    /// Latest interim transcript, for live display
    pub async fn interim_transcript(&self) -> String {
        self.aggregator.lock().await.interim().to_string()
    }

    /// Status summary of the session
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.read().await.snapshot()
    }

    /// Copy of the message history
    pub async fn history(&self) -> Vec<Message> {
        self.state.read().await.history().to_vec()
    }

    #[must_use]
    pub fn is_turn_in_flight(&self) -> bool {
        self.guard.is_in_flight()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Receiver that flips to `true` once [`Self::shutdown`] starts
    #[must_use]
    pub fn watch_closed(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }

    #[must_use]
    pub fn subscribe_audio(&self) -> broadcast::Receiver<AudioEvent> {
        self.outputs.subscribe_audio()
    }

    #[must_use]
    pub fn subscribe_text(&self) -> broadcast::Receiver<TextEvent> {
        self.outputs.subscribe_text()
    }

    #[must_use]
    pub fn subscribe_faults(&self) -> broadcast::Receiver<ProviderFault> {
        self.outputs.subscribe_faults()
    }

    /// Wait for the running turn, if any, to finish
    pub async fn wait_idle(&self) {
        let handle = self.current_turn.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(session_id = %self.id, error = %e, "turn task failed");
            }
        }
    }

    /// Stop accepting input and release the recognition stream
    ///
    /// An in-flight turn is allowed to finish; it is never cancelled.
    ///
    /// # Errors
    ///
    /// Returns error if the provider fails to close the stream cleanly
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::info!(session_id = %self.id, "shutting down session");
        self.closing.send_replace(true);

        let result = self.release_stream().await;
        self.wait_idle().await;

        tracing::info!(session_id = %self.id, "session shut down");
        result
    }

    async fn release_stream(&self) -> Result<()> {
        let stream = self.stream.lock().await.take();
        let result = match stream {
            Some(stream) => stream.close().await.inspect_err(|e| {
                tracing::warn!(session_id = %self.id, error = %e, "failed to close recognition stream");
            }),
            None => Ok(()),
        };

        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        result
    }
}

/// Forward recognition updates into the session until the stream ends
fn spawn_pump(
    session: Weak<VoiceSession>,
    mut updates: mpsc::Receiver<RecognitionUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            let Some(session) = session.upgrade() else {
                break;
            };
            session.handle_update(update).await;
        }
        tracing::debug!("recognition pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream, StreamExt};

    use super::*;
    use crate::providers::{GenerationResult, TextGenerator};

    struct SilentRecognizer;

    struct SilentStream;

    #[async_trait]
    impl RecognitionStream for SilentStream {
        async fn send(&self, _audio: Bytes) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl SpeechRecognizer for SilentRecognizer {
        async fn open(
            &self,
            _options: &RecognitionOptions,
        ) -> Result<(Box<dyn RecognitionStream>, mpsc::Receiver<RecognitionUpdate>)> {
            let (_tx, rx) = mpsc::channel(1);
            Ok((Box::new(SilentStream), rx))
        }
    }

    struct FixedGenerator;

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn generate(&self, _history: &[Message]) -> Result<GenerationResult> {
            Ok(GenerationResult::from_text("Certo.", &FactExtractor::default()))
        }
    }

    struct BytesSynthesizer;

    #[async_trait]
    impl SpeechSynthesizer for BytesSynthesizer {
        async fn speak(&self, text: &str) -> Result<Bytes> {
            Ok(Bytes::from(text.to_string()))
        }

        async fn speak_stream(&self, text: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
            let audio = self.speak(text).await?;
            Ok(stream::iter([Ok(audio)]).boxed())
        }
    }

    fn session() -> Arc<VoiceSession> {
        let providers = SessionProviders {
            recognizer: Arc::new(SilentRecognizer),
            generator: Arc::new(FixedGenerator),
            synthesizer: Arc::new(BytesSynthesizer),
        };
        VoiceSession::new("unit", providers, SessionSettings::default())
    }

    #[tokio::test]
    async fn final_racing_shutdown_is_discarded() {
        let session = session();
        session.initialize().await.unwrap();

        // park a final behind the aggregator lock, past the first closed check
        let aggregator = session.aggregator.lock().await;
        let pending = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
                session
                    .handle_recognition(RecognitionEvent::final_text("olá"))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        session.shutdown().await.unwrap();
        drop(aggregator);

        assert_eq!(
            pending.await.unwrap(),
            RecognitionOutcome::Discarded(DiscardReason::SessionClosed)
        );
        assert!(!session.is_turn_in_flight());
        assert!(session.current_turn.lock().await.is_none());
        assert_eq!(session.history().await.len(), 2);
    }

    #[tokio::test]
    async fn shutdown_flips_close_signal() {
        let session = session();
        session.initialize().await.unwrap();
        let mut closed = session.watch_closed();
        assert!(!*closed.borrow());

        session.shutdown().await.unwrap();

        tokio_test::assert_ok!(closed.changed().await);
        assert!(*closed.borrow());
        // late subscribers see the final state
        assert!(*session.watch_closed().borrow());
    }

    #[tokio::test]
    async fn system_prompt_must_come_first() {
        let session = session();
        session
            .state
            .write()
            .await
            .append(Message::user("cedo demais"));

        assert!(matches!(
            session.initialize().await,
            Err(Error::Config(_))
        ));
        assert_eq!(session.history().await.len(), 1);
    }
}
