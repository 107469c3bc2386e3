//! `ElevenLabs` text-to-speech

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::SpeechSynthesizer;
use crate::config::SynthesisConfig;
use crate::{Error, Result};

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

/// Synthesizes speech with an `ElevenLabs` voice
pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    api_key: SecretString,
    voice_id: String,
    config: SynthesisConfig,
}

impl ElevenLabsSynthesizer {
    /// # Errors
    ///
    /// Returns error if API key or voice id is missing
    pub fn new(api_key: Option<SecretString>, config: SynthesisConfig) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("ElevenLabs API key required for TTS".to_string()))?;
        let voice_id = config
            .voice_id
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Config("ElevenLabs voice id required for TTS".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice_id,
            config,
        })
    }

    fn url(&self, streaming: bool) -> String {
        let suffix = if streaming { "/stream" } else { "" };
        format!(
            "{}/text-to-speech/{}{suffix}",
            self.config.endpoint.trim_end_matches('/'),
            self.voice_id
        )
    }

    fn body<'a>(&'a self, text: &'a str) -> SpeechRequest<'a> {
        SpeechRequest {
            text,
            model_id: &self.config.model,
            voice_settings: VoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity_boost,
                style: self.config.style,
                use_speaker_boost: self.config.use_speaker_boost,
            },
        }
    }

    async fn post(&self, text: &str, streaming: bool) -> Result<reqwest::Response> {
        tracing::debug!(chars = text.len(), voice = %self.voice_id, streaming, "requesting ElevenLabs speech");

        let response = self
            .client
            .post(self.url(streaming))
            .query(&[("output_format", self.config.output_format.as_str())])
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Accept", "audio/mpeg")
            .json(&self.body(text))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "ElevenLabs request failed");
                Error::Synthesis(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "ElevenLabs API error");
            return Err(Error::Synthesis(format!("ElevenLabs API error {status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn speak(&self, text: &str) -> Result<Bytes> {
        let audio = self
            .post(text, false)
            .await?
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        tracing::info!(audio_bytes = audio.len(), "synthesis complete");
        Ok(audio)
    }

    async fn speak_stream(&self, text: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let response = self.post(text, true).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Synthesis(e.to_string())))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SynthesisConfig {
        SynthesisConfig {
            voice_id: Some("voice-1".to_string()),
            ..SynthesisConfig::default()
        }
    }

    #[test]
    fn requires_key_and_voice() {
        assert!(matches!(
            ElevenLabsSynthesizer::new(None, config()),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ElevenLabsSynthesizer::new(
                Some(SecretString::from("key".to_string())),
                SynthesisConfig::default()
            ),
            Err(Error::Config(m)) if m.contains("voice")
        ));
    }

    #[test]
    fn urls_and_body() {
        let tts =
            ElevenLabsSynthesizer::new(Some(SecretString::from("key".to_string())), config())
                .unwrap();

        assert_eq!(
            tts.url(false),
            "https://api.elevenlabs.io/v1/text-to-speech/voice-1"
        );
        assert_eq!(
            tts.url(true),
            "https://api.elevenlabs.io/v1/text-to-speech/voice-1/stream"
        );

        let json = serde_json::to_value(tts.body("olá")).unwrap();
        assert_eq!(json["model_id"], "eleven_turbo_v2_5");
        assert_eq!(json["voice_settings"]["similarity_boost"], 0.75);
        assert_eq!(json["voice_settings"]["use_speaker_boost"], true);
    }

    #[tokio::test]
    async fn speak_stream_posts_to_stream_endpoint() {
        use axum::extract::Query;
        use axum::http::HeaderMap;
        use axum::routing::post;
        use axum::{Json, Router};

        async fn stream(
            headers: HeaderMap,
            Query(query): Query<std::collections::HashMap<String, String>>,
            Json(body): Json<serde_json::Value>,
        ) -> Vec<u8> {
            assert_eq!(headers["xi-api-key"], "key");
            assert_eq!(query["output_format"], "mp3_44100_128");
            assert_eq!(body["text"], "olá");
            b"ID3-audio".to_vec()
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/v1/text-to-speech/voice-1/stream", post(stream));
        tokio::spawn(async move { axum::serve(listener, app).await });

        let tts = ElevenLabsSynthesizer::new(
            Some(SecretString::from("key".to_string())),
            SynthesisConfig {
                endpoint: format!("http://{addr}/v1"),
                ..config()
            },
        )
        .unwrap();

        let chunks: Vec<Bytes> = tts
            .speak_stream("olá")
            .await
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.concat(), b"ID3-audio");
    }
}
