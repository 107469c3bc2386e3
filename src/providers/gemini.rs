//! Gemini text generation via the `generateContent` REST endpoint

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{GenerationResult, TextGenerator};
use crate::config::GenerationConfig;
use crate::session::{FactExtractor, Message, Role};
use crate::{Error, Result};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationParams,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Generates replies with a Gemini model
pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: SecretString,
    config: GenerationConfig,
    extractor: FactExtractor,
}

impl GeminiGenerator {
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        api_key: Option<SecretString>,
        config: GenerationConfig,
        extractor: FactExtractor,
    ) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("Google API key required for Gemini".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            config,
            extractor,
        })
    }

    fn request<'a>(&self, history: &'a [Message]) -> GenerateRequest<'a> {
        let system: Vec<Part<'a>> = history
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| Part { text: &m.content })
            .collect();

        let contents = history
            .iter()
            .filter_map(|m| {
                let role = match m.role {
                    Role::System => return None,
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                Some(Content {
                    role: Some(role),
                    parts: vec![Part { text: &m.content }],
                })
            })
            .collect();

        GenerateRequest {
            system_instruction: (!system.is_empty()).then_some(Content {
                role: None,
                parts: system,
            }),
            contents,
            generation_config: GenerationParams {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                top_k: self.config.top_k,
                max_output_tokens: self.config.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, history: &[Message]) -> Result<GenerationResult> {
        tracing::debug!(model = %self.config.model, messages = history.len(), "requesting Gemini reply");

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&self.request(history))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Gemini request failed");
                Error::Generation(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Gemini API error");
            return Err(Error::Generation(format!("Gemini API error {status}: {body}")));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Generation(format!("failed to parse Gemini response: {e}")))?;

        let text = reply_text(body)?;
        tracing::info!(chars = text.len(), "Gemini reply received");
        Ok(GenerationResult::from_text(text, &self.extractor))
    }
}

/// Pull the reply text out of a response, rejecting blocked or empty replies
fn reply_text(body: GenerateResponse) -> Result<String> {
    if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(Error::Generation(format!("prompt blocked: {reason}")));
    }

    let candidate = body
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| Error::Generation("no candidates returned".to_string()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        let reason = candidate.finish_reason.as_deref().unwrap_or("unknown");
        return Err(Error::Generation(format!("empty reply (finish reason: {reason})")));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> GeminiGenerator {
        GeminiGenerator::new(
            Some(SecretString::from("key".to_string())),
            GenerationConfig::default(),
            FactExtractor::default(),
        )
        .unwrap()
    }

    #[test]
    fn request_maps_roles() {
        let history = vec![
            Message::system("regras"),
            Message::assistant("Com quem eu falo?"),
            Message::user("Ana"),
        ];
        let generator = generator();
        let json = serde_json::to_value(generator.request(&history)).unwrap();

        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "regras");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"].as_array().unwrap().len(), 2);
        assert_eq!(json["contents"][0]["role"], "model");
        assert_eq!(json["contents"][1]["role"], "user");
        assert_eq!(json["generationConfig"]["topK"], 40);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 500);
    }

    #[test]
    fn request_without_system_omits_instruction() {
        let history = vec![Message::user("oi")];
        let generator = generator();
        let json = serde_json::to_value(generator.request(&history)).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn reply_text_joins_parts() {
        let body: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Perfeito, "},{"text":"validei a UC."}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(reply_text(body).unwrap(), "Perfeito, validei a UC.");
    }

    #[test]
    fn blocked_and_empty_replies_are_errors() {
        let blocked: GenerateResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        assert!(matches!(reply_text(blocked), Err(Error::Generation(m)) if m.contains("SAFETY")));

        let none: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(reply_text(none).is_err());

        let empty: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[]},"finishReason":"MAX_TOKENS"}]}"#,
        )
        .unwrap();
        assert!(matches!(reply_text(empty), Err(Error::Generation(m)) if m.contains("MAX_TOKENS")));
    }

    #[test]
    fn requires_api_key() {
        assert!(matches!(
            GeminiGenerator::new(None, GenerationConfig::default(), FactExtractor::default()),
            Err(Error::Config(_))
        ));
    }
}
