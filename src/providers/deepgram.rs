//! Deepgram live transcription over WebSocket

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use super::{
    RECOGNITION_CHANNEL_CAPACITY, RecognitionEvent, RecognitionOptions, RecognitionStream,
    RecognitionUpdate, SpeechRecognizer,
};
use crate::config::RecognitionConfig;
use crate::{Error, Result};

const KEEP_ALIVE: &str = r#"{"type":"KeepAlive"}"#;
const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

/// Streaming message from the live endpoint; only `Results` carries text
#[derive(Deserialize)]
struct LiveMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_final: bool,
    channel: Option<LiveChannel>,
}

#[derive(Deserialize)]
struct LiveChannel {
    alternatives: Vec<LiveAlternative>,
}

#[derive(Deserialize)]
struct LiveAlternative {
    transcript: String,
    confidence: Option<f32>,
}

/// Opens Deepgram live transcription streams
pub struct DeepgramRecognizer {
    api_key: SecretString,
    endpoint: String,
    keepalive: Duration,
}

impl DeepgramRecognizer {
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: Option<SecretString>, config: RecognitionConfig) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("Deepgram API key required".to_string()))?;

        Ok(Self {
            api_key,
            endpoint: config.endpoint,
            keepalive: Duration::from_secs(config.keepalive_secs.max(1)),
        })
    }

    fn listen_url(&self, options: &RecognitionOptions) -> Result<reqwest::Url> {
        let mut params = vec![
            ("model", options.model.clone()),
            ("language", options.language.clone()),
            ("smart_format", options.smart_format.to_string()),
            ("interim_results", options.interim_results.to_string()),
            ("punctuate", options.punctuate.to_string()),
            ("utterance_end_ms", options.utterance_end_ms.to_string()),
            ("vad_events", options.vad_events.to_string()),
        ];
        if let Some(encoding) = &options.encoding {
            params.push(("encoding", encoding.clone()));
        }
        if let Some(rate) = options.sample_rate {
            params.push(("sample_rate", rate.to_string()));
        }
        if let Some(channels) = options.channels {
            params.push(("channels", channels.to_string()));
        }

        reqwest::Url::parse_with_params(&self.endpoint, &params)
            .map_err(|e| Error::Config(format!("invalid Deepgram endpoint: {e}")))
    }
}

#[async_trait]
impl SpeechRecognizer for DeepgramRecognizer {
    async fn open(
        &self,
        options: &RecognitionOptions,
    ) -> Result<(Box<dyn RecognitionStream>, mpsc::Receiver<RecognitionUpdate>)> {
        let url = self.listen_url(options)?;
        tracing::debug!(model = %options.model, language = %options.language, "opening Deepgram stream");

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Recognition(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key.expose_secret()))
            .map_err(|e| Error::Config(format!("invalid Deepgram API key: {e}")))?;
        request.headers_mut().insert("Authorization", auth);

        let (socket, _) = tokio_tungstenite::connect_async(request).await.map_err(|e| {
            tracing::error!(error = %e, "Deepgram connection failed");
            Error::Recognition(e.to_string())
        })?;
        tracing::info!("Deepgram stream open");

        let (sink, source) = socket.split();
        let (updates_tx, updates_rx) = mpsc::channel(RECOGNITION_CHANNEL_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(RECOGNITION_CHANNEL_CAPACITY);

        let writer = tokio::spawn(write_loop(
            sink,
            commands_rx,
            updates_tx.clone(),
            self.keepalive,
        ));
        tokio::spawn(read_loop(source, updates_tx));

        let stream = DeepgramStream {
            commands: commands_tx,
            writer: Mutex::new(Some(writer)),
        };
        Ok((Box::new(stream), updates_rx))
    }
}

enum Command {
    Audio(Bytes),
    Close,
}

/// Handle to one open Deepgram stream
pub struct DeepgramStream {
    commands: mpsc::Sender<Command>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl RecognitionStream for DeepgramStream {
    async fn send(&self, audio: Bytes) -> Result<()> {
        self.commands
            .send(Command::Audio(audio))
            .await
            .map_err(|_| Error::Recognition("Deepgram stream is closed".to_string()))
    }

    async fn close(&self) -> Result<()> {
        let Some(writer) = self.writer.lock().await.take() else {
            return Ok(());
        };
        // the writer may already have exited on a socket error
        let _ = self.commands.send(Command::Close).await;
        writer
            .await
            .map_err(|e| Error::Recognition(format!("Deepgram writer task failed: {e}")))
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut commands: mpsc::Receiver<Command>,
    updates: mpsc::Sender<RecognitionUpdate>,
    keepalive: Duration,
) where
    S: futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let mut ticker = tokio::time::interval(keepalive);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        let frame = tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Audio(audio)) => {
                    ticker.reset();
                    WsMessage::Binary(audio.to_vec())
                }
                Some(Command::Close) | None => break,
            },
            _ = ticker.tick() => {
                tracing::trace!("Deepgram keep-alive");
                WsMessage::Text(KEEP_ALIVE.to_string())
            }
        };

        if let Err(e) = sink.send(frame).await {
            tracing::warn!(error = %e, "Deepgram send failed");
            let _ = updates.send(RecognitionUpdate::Error(e.to_string())).await;
            return;
        }
    }

    tracing::debug!("closing Deepgram stream");
    if let Err(e) = sink.send(WsMessage::Text(CLOSE_STREAM.to_string())).await {
        tracing::debug!(error = %e, "Deepgram close frame not delivered");
    }
}

async fn read_loop<S>(mut source: S, updates: mpsc::Sender<RecognitionUpdate>)
where
    S: futures::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    while let Some(message) = source.next().await {
        let update = match message {
            Ok(WsMessage::Text(text)) => match parse_message(&text) {
                Ok(Some(update)) => update,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable Deepgram message");
                    RecognitionUpdate::Error(e.to_string())
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Deepgram socket error");
                let _ = updates.send(RecognitionUpdate::Error(e.to_string())).await;
                break;
            }
        };

        if updates.send(update).await.is_err() {
            return;
        }
    }

    tracing::info!("Deepgram stream closed");
    let _ = updates.send(RecognitionUpdate::Closed).await;
}

/// Decode one text frame; `None` for frames that carry no transcript
fn parse_message(text: &str) -> Result<Option<RecognitionUpdate>> {
    let message: LiveMessage = serde_json::from_str(text)?;
    if message.kind != "Results" {
        tracing::trace!(kind = %message.kind, "ignoring Deepgram message");
        return Ok(None);
    }

    let Some(alternative) = message
        .channel
        .and_then(|c| c.alternatives.into_iter().next())
    else {
        return Ok(None);
    };

    if alternative.transcript.trim().is_empty() {
        return Ok(None);
    }

    Ok(Some(RecognitionUpdate::Transcript(RecognitionEvent {
        text: alternative.transcript,
        is_final: message.is_final,
        confidence: alternative.confidence,
    })))
}
