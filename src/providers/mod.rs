//! Provider adapters for speech recognition, text generation, and speech synthesis
//!
//! The session core only sees the three traits defined here. Vendor modules
//! translate them to their wire protocols and carry no dialogue logic.

pub mod deepgram;
pub mod elevenlabs;
pub mod gemini;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::session::{FactExtractor, Message, Metadata};
use crate::{Config, Result};

pub use deepgram::DeepgramRecognizer;
pub use elevenlabs::ElevenLabsSynthesizer;
pub use gemini::GeminiGenerator;

/// Buffered recognition updates per stream before the adapter applies backpressure
pub const RECOGNITION_CHANNEL_CAPACITY: usize = 256;

/// One hypothesis emitted by the recognition provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    pub text: String,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl RecognitionEvent {
    /// Interim (non-final) hypothesis
    #[must_use]
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence: None,
        }
    }

    /// Final hypothesis for a completed utterance
    #[must_use]
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence: None,
        }
    }
}

/// Message delivered on a recognition stream's update channel
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionUpdate {
    /// Interim or final transcript
    Transcript(RecognitionEvent),
    /// Provider-side failure (connection, decode); the stream may still be open
    Error(String),
    /// The provider closed the stream
    Closed,
}

/// Options used when opening a recognition stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionOptions {
    pub model: String,
    pub language: String,
    pub smart_format: bool,
    pub interim_results: bool,
    pub punctuate: bool,
    pub utterance_end_ms: u32,
    pub vad_events: bool,
    /// Raw audio encoding hint (e.g. "linear16"); omit for containerized audio
    pub encoding: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            model: "nova-2".to_string(),
            language: "pt-BR".to_string(),
            smart_format: true,
            interim_results: true,
            punctuate: true,
            utterance_end_ms: 1000,
            vad_events: true,
            encoding: None,
            sample_rate: None,
            channels: None,
        }
    }
}

/// Reply produced by the generation provider
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub text: String,
    /// Best-effort facts derived from `text`; may be empty
    pub metadata: Metadata,
}

impl GenerationResult {
    /// Build a result, deriving metadata from the text
    #[must_use]
    pub fn from_text(text: impl Into<String>, extractor: &FactExtractor) -> Self {
        let text = text.into();
        let metadata = extractor.extract(&text).metadata();
        Self { text, metadata }
    }
}

/// An open recognition stream
#[async_trait]
pub trait RecognitionStream: Send + Sync {
    /// Send a chunk of caller audio
    async fn send(&self, audio: Bytes) -> Result<()>;

    /// Release the stream; no further updates are delivered afterwards
    async fn close(&self) -> Result<()>;
}

/// Streaming speech-to-text provider
///
/// Implementations must deliver interim events before the final event of
/// the same utterance, and at most one final per utterance.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Open a stream; updates arrive on the returned receiver
    async fn open(
        &self,
        options: &RecognitionOptions,
    ) -> Result<(Box<dyn RecognitionStream>, mpsc::Receiver<RecognitionUpdate>)>;
}

/// Conversational text generation provider
///
/// Stateless from the caller's point of view: the full history is resent on
/// every call. Must fail explicitly instead of returning malformed text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, history: &[Message]) -> Result<GenerationResult>;
}

/// Text-to-speech provider
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize the whole text into one audio buffer
    async fn speak(&self, text: &str) -> Result<Bytes>;

    /// Synthesize as a finite, non-restartable sequence of audio chunks
    async fn speak_stream(&self, text: &str) -> Result<BoxStream<'static, Result<Bytes>>>;
}

/// The provider instances owned by one session
#[derive(Clone)]
pub struct SessionProviders {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub generator: Arc<dyn TextGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

/// Builds a fresh set of providers for each new session
pub trait SessionFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns error if a provider cannot be constructed
    fn create(&self, session_id: &str) -> Result<SessionProviders>;
}

/// Factory wiring the Deepgram, Gemini, and `ElevenLabs` adapters from config
pub struct VendorFactory {
    config: Config,
    extractor: FactExtractor,
}

impl VendorFactory {
    /// # Errors
    ///
    /// Returns error if the dialogue markers do not compile
    pub fn new(config: Config) -> Result<Self> {
        let extractor = FactExtractor::new(config.session.markers.clone())?;
        Ok(Self { config, extractor })
    }
}

impl SessionFactory for VendorFactory {
    fn create(&self, session_id: &str) -> Result<SessionProviders> {
        tracing::debug!(session_id, "building vendor providers");

        let recognizer = DeepgramRecognizer::new(
            self.config.api_keys.deepgram.clone(),
            self.config.recognition.clone(),
        )?;
        let generator = GeminiGenerator::new(
            self.config.api_keys.google.clone(),
            self.config.generation.clone(),
            self.extractor.clone(),
        )?;
        let synthesizer = ElevenLabsSynthesizer::new(
            self.config.api_keys.elevenlabs.clone(),
            self.config.synthesis.clone(),
        )?;

        Ok(SessionProviders {
            recognizer: Arc::new(recognizer),
            generator: Arc::new(generator),
            synthesizer: Arc::new(synthesizer),
        })
    }
}
