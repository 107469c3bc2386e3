//! Shared test utilities: scripted providers and a registry built on them

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{Notify, mpsc};

use voicedesk::providers::{
    RecognitionOptions, RecognitionStream, RecognitionUpdate, SessionFactory, SessionProviders,
    SpeechRecognizer, SpeechSynthesizer, TextGenerator,
};
use voicedesk::session::{FactExtractor, Message, SessionRegistry, SessionSettings};
use voicedesk::{Error, GenerationResult, Result};

/// Recognizer whose updates are pushed by the test
#[derive(Default)]
pub struct ChannelRecognizer {
    updates: Mutex<Option<mpsc::Sender<RecognitionUpdate>>>,
    pub audio: Arc<Mutex<Vec<Bytes>>>,
    pub closed: Arc<AtomicBool>,
    pub fail_open: AtomicBool,
}

impl ChannelRecognizer {
    /// Sender feeding the most recently opened stream
    pub fn sender(&self) -> mpsc::Sender<RecognitionUpdate> {
        self.updates
            .lock()
            .unwrap()
            .clone()
            .expect("recognition stream not opened")
    }
}

struct ChannelStream {
    audio: Arc<Mutex<Vec<Bytes>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl RecognitionStream for ChannelStream {
    async fn send(&self, audio: Bytes) -> Result<()> {
        self.audio.lock().unwrap().push(audio);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SpeechRecognizer for ChannelRecognizer {
    async fn open(
        &self,
        _options: &RecognitionOptions,
    ) -> Result<(Box<dyn RecognitionStream>, mpsc::Receiver<RecognitionUpdate>)> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Recognition("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        *self.updates.lock().unwrap() = Some(tx);
        let stream = ChannelStream {
            audio: Arc::clone(&self.audio),
            closed: Arc::clone(&self.closed),
        };
        Ok((Box::new(stream), rx))
    }
}

/// Generator replying from a script, optionally held until released
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<GenerationResult>>>,
    gate: Option<Arc<Notify>>,
    extractor: FactExtractor,
    pub calls: AtomicUsize,
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub seen_history: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedGenerator {
    pub fn new(replies: impl IntoIterator<Item = Result<String>>) -> Self {
        let extractor = FactExtractor::default();
        let results: Vec<_> = replies
            .into_iter()
            .map(|reply| reply.map(|text| GenerationResult::from_text(text, &extractor)))
            .collect();
        Self::from_results(results)
    }

    /// Script whole generation results, metadata included
    pub fn from_results(results: impl IntoIterator<Item = Result<GenerationResult>>) -> Self {
        Self {
            replies: Mutex::new(results.into_iter().collect()),
            gate: None,
            extractor: FactExtractor::default(),
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            seen_history: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok((*r).to_string())))
    }

    /// Hold every call until the returned gate is notified
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, history: &[Message]) -> Result<GenerationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        self.seen_history.lock().unwrap().push(history.to_vec());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(GenerationResult::from_text("Certo.", &self.extractor)));
        self.running.fetch_sub(1, Ordering::SeqCst);

        reply
    }
}

/// Synthesizer echoing the text as bytes; can be told to fail
#[derive(Default)]
pub struct EchoSynthesizer {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl SpeechSynthesizer for EchoSynthesizer {
    async fn speak(&self, text: &str) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Synthesis("voice unavailable".to_string()));
        }
        Ok(Bytes::from(text.to_string()))
    }

    async fn speak_stream(&self, text: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let audio = self.speak(text).await?;
        Ok(stream::iter([Ok(audio)]).boxed())
    }
}

/// Mock providers shared by every session a [`MockFactory`] builds
pub struct Mocks {
    pub recognizer: Arc<ChannelRecognizer>,
    pub generator: Arc<ScriptedGenerator>,
    pub synthesizer: Arc<EchoSynthesizer>,
}

impl Mocks {
    pub fn new(generator: ScriptedGenerator) -> Self {
        Self {
            recognizer: Arc::new(ChannelRecognizer::default()),
            generator: Arc::new(generator),
            synthesizer: Arc::new(EchoSynthesizer::default()),
        }
    }

    pub fn providers(&self) -> SessionProviders {
        SessionProviders {
            recognizer: Arc::clone(&self.recognizer) as Arc<dyn SpeechRecognizer>,
            generator: Arc::clone(&self.generator) as Arc<dyn TextGenerator>,
            synthesizer: Arc::clone(&self.synthesizer) as Arc<dyn SpeechSynthesizer>,
        }
    }
}

pub struct MockFactory {
    pub mocks: Arc<Mocks>,
    pub created: AtomicUsize,
}

impl SessionFactory for MockFactory {
    fn create(&self, _session_id: &str) -> Result<SessionProviders> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.mocks.providers())
    }
}

/// Settings with short provider bounds so stuck tests fail fast
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        system_prompt: "Você é um assistente de testes.".to_string(),
        greeting: "Olá! Com quem eu falo?".to_string(),
        generation_timeout: Duration::from_secs(5),
        synthesis_timeout: Duration::from_secs(5),
        ..SessionSettings::default()
    }
}

pub fn registry_with(mocks: Arc<Mocks>) -> Arc<SessionRegistry> {
    let factory = Arc::new(MockFactory {
        mocks,
        created: AtomicUsize::new(0),
    });
    Arc::new(SessionRegistry::new(factory, test_settings()))
}

/// Poll `check` until it holds or a second passes
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
