//! voicedesk - Voice session orchestrator for phone-style support calls
//!
//! Each call is a [`session::VoiceSession`]: caller audio streams into a
//! speech recognizer, every completed utterance drives one
//! generate → synthesize turn, and the reply is published as audio and
//! text with the dialogue phase and facts derived from it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          HTTP API  /  WebSocket media relay          │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 SessionRegistry                      │
//! │   VoiceSession  │  Aggregator  │  TurnProcessor     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Providers                          │
//! │   Deepgram (STT)  │  Gemini (LLM)  │  ElevenLabs    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod prompt;
pub mod providers;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{AudioEvent, FaultSource, ProviderFault, TextEvent};
pub use providers::{
    GenerationResult, RecognitionEvent, SessionFactory, SessionProviders, SpeechRecognizer,
    SpeechSynthesizer, TextGenerator,
};
pub use session::{Phase, SessionRegistry, VoiceSession};
