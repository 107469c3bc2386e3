//! Structured facts derived from free-form generated text
//!
//! Phase, identifier validation, and protocol tokens are inferred by
//! substring and pattern matching on the assistant's reply. All of it sits
//! behind [`FactExtractor::extract`] so orchestration never looks at the
//! raw heuristics.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::state::Phase;
use crate::{Error, Result};

/// Metadata attached to a generation result
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key carrying the phase hint
pub const PHASE_KEY: &str = "phase";

/// Metadata key carrying the protocol token
pub const PROTOCOL_KEY: &str = "protocol";

/// Phrases the extractor looks for in generated text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueMarkers {
    /// Greeting/identification wording (case-sensitive) → phase 1
    pub greeting_phrases: Vec<String>,
    /// Explicit phase 1 markers (case-sensitive) → phase 1
    pub phase_one_markers: Vec<String>,
    /// Consumer unit identifier wording (case-sensitive) → phase 2
    pub identifier_phrases: Vec<String>,
    /// Literal identifier tokens, matched as whole words → phase 2
    pub identifier_tokens: Vec<String>,
    /// Acceptance phrases (case-insensitive) → identifier validated
    pub acceptance_phrases: Vec<String>,
    /// Prefix of generated protocol tokens (`PREFIX-<alphanumeric>`)
    pub protocol_prefix: String,
}

impl Default for DialogueMarkers {
    fn default() -> Self {
        Self {
            greeting_phrases: vec!["Com quem eu falo".to_string()],
            phase_one_markers: vec!["FASE_1".to_string()],
            identifier_phrases: vec!["Unidade Consumidora".to_string()],
            identifier_tokens: vec!["UC".to_string()],
            acceptance_phrases: vec!["validei".to_string(), "perfeito".to_string()],
            protocol_prefix: "DEMO".to_string(),
        }
    }
}

/// Facts extracted from one generated reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Facts {
    pub phase: Phase,
    pub validated: bool,
    pub protocol: Option<String>,
}

impl Facts {
    /// Render the metadata mapping published alongside the reply text
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        let mut map = Metadata::new();
        map.insert(PHASE_KEY.to_string(), self.phase.as_str().into());
        if let Some(protocol) = &self.protocol {
            map.insert(PROTOCOL_KEY.to_string(), protocol.clone().into());
        }
        map
    }
}

/// Read the phase hint back out of a metadata mapping
#[must_use]
pub fn phase_hint(metadata: &Metadata) -> Option<Phase> {
    metadata
        .get(PHASE_KEY)
        .and_then(serde_json::Value::as_str)
        .and_then(|s| s.parse().ok())
}

/// Compiled matcher for a set of [`DialogueMarkers`]
#[derive(Debug, Clone)]
pub struct FactExtractor {
    markers: DialogueMarkers,
    acceptance_lower: Vec<String>,
    identifier_tokens: Vec<Regex>,
    protocol: Regex,
}

impl FactExtractor {
    /// Compile the markers into matchers
    ///
    /// # Errors
    ///
    /// Returns error if the protocol prefix is empty
    pub fn new(markers: DialogueMarkers) -> Result<Self> {
        if markers.protocol_prefix.trim().is_empty() {
            return Err(Error::Config("protocol prefix must not be empty".to_string()));
        }

        let protocol = Regex::new(&format!(
            r"\b{}-[A-Za-z0-9_-]+",
            regex::escape(markers.protocol_prefix.trim())
        ))
        .map_err(|e| Error::Config(format!("invalid protocol pattern: {e}")))?;

        let identifier_tokens = markers
            .identifier_tokens
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| Regex::new(&format!(r"\b{}\b", regex::escape(t))))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Config(format!("invalid identifier token: {e}")))?;

        let acceptance_lower = markers
            .acceptance_phrases
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.to_lowercase())
            .collect();

        Ok(Self {
            markers,
            acceptance_lower,
            identifier_tokens,
            protocol,
        })
    }

    #[must_use]
    pub const fn markers(&self) -> &DialogueMarkers {
        &self.markers
    }

    /// Extract facts from generated text
    ///
    /// Phase detection is order-sensitive, first match wins: greeting or
    /// explicit phase 1 marker, then identifier wording, else phase 3.
    #[must_use]
    pub fn extract(&self, text: &str) -> Facts {
        Facts {
            phase: self.detect_phase(text),
            validated: self.is_acceptance(text),
            protocol: self.protocol(text),
        }
    }

    fn detect_phase(&self, text: &str) -> Phase {
        let contains_any = |phrases: &[String]| {
            phrases
                .iter()
                .any(|p| !p.is_empty() && text.contains(p.as_str()))
        };

        if contains_any(&self.markers.greeting_phrases)
            || contains_any(&self.markers.phase_one_markers)
        {
            Phase::Greeting
        } else if contains_any(&self.markers.identifier_phrases)
            || self.identifier_tokens.iter().any(|re| re.is_match(text))
        {
            Phase::Identification
        } else {
            Phase::Resolution
        }
    }

    fn is_acceptance(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.acceptance_lower.iter().any(|p| lower.contains(p.as_str()))
    }

    fn protocol(&self, text: &str) -> Option<String> {
        self.protocol
            .find(text)
            .map(|m| m.as_str().trim_end_matches('-').to_string())
    }
}

static DEFAULT_EXTRACTOR: LazyLock<FactExtractor> = LazyLock::new(|| {
    FactExtractor::new(DialogueMarkers::default()).expect("default dialogue markers compile")
});

impl Default for FactExtractor {
    fn default() -> Self {
        DEFAULT_EXTRACTOR.clone()
    }
}

/// Extract facts using the default markers
#[must_use]
pub fn extract_facts(text: &str) -> Facts {
    DEFAULT_EXTRACTOR.extract(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor_with_prefix(prefix: &str) -> FactExtractor {
        FactExtractor::new(DialogueMarkers {
            protocol_prefix: prefix.to_string(),
            ..DialogueMarkers::default()
        })
        .unwrap()
    }

    #[test]
    fn greeting_wins_over_identifier() {
        let facts = extract_facts("Com quem eu falo? Me informe sua Unidade Consumidora.");
        assert_eq!(facts.phase, Phase::Greeting);
    }

    #[test]
    fn explicit_phase_one_marker() {
        assert_eq!(extract_facts("Estamos na FASE_1 agora").phase, Phase::Greeting);
    }

    #[test]
    fn identifier_wording_is_phase_two() {
        let facts = extract_facts(
            "Para continuar, poderia me informar o número da sua Unidade Consumidora?",
        );
        assert_eq!(facts.phase, Phase::Identification);
        assert_eq!(phase_hint(&facts.metadata()), Some(Phase::Identification));
    }

    #[test]
    fn identifier_token_matches_whole_word_only() {
        assert_eq!(extract_facts("Qual o número da UC?").phase, Phase::Identification);
        assert_eq!(extract_facts("EDUCADO e gentil").phase, Phase::Resolution);
    }

    #[test]
    fn phase_matching_is_case_sensitive() {
        assert_eq!(extract_facts("unidade consumidora").phase, Phase::Resolution);
    }

    #[test]
    fn anything_else_is_phase_three() {
        let facts = extract_facts("Poderia me trazer mais detalhes do que está acontecendo?");
        assert_eq!(facts.phase, Phase::Resolution);
        assert!(!facts.validated);
        assert_eq!(facts.protocol, None);
    }

    #[test]
    fn acceptance_is_case_insensitive() {
        assert!(extract_facts("Perfeito. Agora que VALIDEI sua unidade...").validated);
        assert!(extract_facts("PERFEITO!").validated);
        assert!(!extract_facts("Certo, vamos continuar.").validated);
    }

    #[test]
    fn protocol_token_extracted() {
        let extractor = extractor_with_prefix("PREFIX");
        let facts = extractor.extract("Ocorrência registrada! Protocolo: PREFIX-ABC123. Prazo: 4 horas");
        assert_eq!(facts.protocol.as_deref(), Some("PREFIX-ABC123"));
        assert_eq!(
            facts.metadata().get(PROTOCOL_KEY).and_then(|v| v.as_str()),
            Some("PREFIX-ABC123")
        );
    }

    #[test]
    fn default_protocol_keeps_inner_dashes() {
        let facts = extract_facts("Protocolo DEMO-VIP-2024150- registrado");
        assert_eq!(facts.protocol.as_deref(), Some("DEMO-VIP-2024150"));
    }

    #[test]
    fn protocol_prefix_is_escaped() {
        let extractor = extractor_with_prefix("A.B");
        assert_eq!(extractor.extract("AxB-1").protocol, None);
        assert_eq!(extractor.extract("A.B-1").protocol.as_deref(), Some("A.B-1"));
    }

    #[test]
    fn empty_prefix_rejected() {
        let result = FactExtractor::new(DialogueMarkers {
            protocol_prefix: "  ".to_string(),
            ..DialogueMarkers::default()
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn metadata_always_has_phase() {
        let meta = extract_facts("ok").metadata();
        assert_eq!(meta.get(PHASE_KEY).and_then(|v| v.as_str()), Some("PHASE_3"));
        assert!(!meta.contains_key(PROTOCOL_KEY));
    }

    #[test]
    fn extraction_is_deterministic() {
        let text = "Perfeito. Protocolo DEMO-42 para sua Unidade Consumidora.";
        assert_eq!(extract_facts(text), extract_facts(text));
    }
}
