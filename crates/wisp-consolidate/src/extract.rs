//! LLM-driven extraction of structured memory from conversation transcripts.
//!
//! The storage order inside one extraction is fixed: aliases land before the
//! facts that reference them. Inverting that order fragments the store — a
//! fact row written under a not-yet-canonicalised name never reunites with
//! its entity.

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wisp_agent::provider::SystemBlock;
use wisp_agent::{ChatRequest, Provider};
use wisp_memory::MemoryStore;

use crate::error::{ConsolidateError, Result};

const EXTRACTION_SYSTEM: &str = concat!(
    "You are a conversation memory extractor. From the transcript, extract:\n",
    "- aliases: every name form used for a person/place/thing, mapped to one ",
    "canonical snake_case identifier\n",
    "- facts: stable entity/attribute/value triples about the user and their ",
    "world (preferences, relationships, biographical details)\n",
    "- episodes: at most two short narrative summaries of what happened, with ",
    "a title\n",
    "- commitments: concrete things the user or assistant promised to do, ",
    "with an ISO due date when one was stated\n",
    "Entities in facts MUST use the canonical identifier from aliases. ",
    "Ignore small talk, tool output, and anything the user did not confirm.\n",
    "Return ONLY a JSON object:\n",
    r#"{"aliases":[{"alias":"...","canonical":"...","confidence":0.9}],"#,
    r#""facts":[{"entity":"...","attribute":"...","value":"...","confidence":0.9}],"#,
    r#""episodes":[{"title":"...","body":"..."}],"#,
    r#""commitments":[{"description":"...","due":"2026-01-01T00:00:00Z"}]}"#,
    "\nEmpty arrays are fine. No prose outside the JSON."
);

/// Parsed extraction payload.
#[derive(Debug, Default, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub aliases: Vec<AliasRow>,
    #[serde(default)]
    pub facts: Vec<FactRow>,
    #[serde(default)]
    pub episodes: Vec<EpisodeRow>,
    #[serde(default)]
    pub commitments: Vec<CommitmentRow>,
}

#[derive(Debug, Deserialize)]
pub struct AliasRow {
    pub alias: String,
    pub canonical: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
pub struct FactRow {
    pub entity: String,
    pub attribute: String,
    pub value: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
pub struct EpisodeRow {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct CommitmentRow {
    pub description: String,
    #[serde(default)]
    pub due: Option<String>,
}

fn default_confidence() -> f64 {
    0.7
}

/// Runs bounded extraction calls against the utility provider.
pub struct Extractor {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: u32,
    max_transcript_chars: usize,
}

impl Extractor {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: String,
        max_tokens: u32,
        max_transcript_chars: usize,
    ) -> Self {
        Self {
            provider,
            model,
            max_tokens,
            max_transcript_chars,
        }
    }

    /// One extraction call over a transcript.
    pub async fn extract(
        &self,
        transcript: &str,
        cancel: &CancellationToken,
    ) -> Result<Extraction> {
        let bounded: String = transcript.chars().take(self.max_transcript_chars).collect();
        let request = ChatRequest {
            model: self.model.clone(),
            system: vec![SystemBlock {
                text: EXTRACTION_SYSTEM.to_string(),
                cacheable: false,
            }],
            messages: vec![serde_json::json!({
                "role": "user",
                "content": format!("Extract memory from this conversation:\n\n{bounded}"),
            })],
            max_tokens: self.max_tokens,
            tools: Vec::new(),
        };

        let completion = self.provider.complete(&request, cancel).await?;
        parse_extraction(&completion.content)
    }

    /// Store one extraction. Aliases first, then facts, then the rest.
    pub fn apply(
        &self,
        store: &MemoryStore,
        extraction: &Extraction,
        session: &str,
    ) -> Result<()> {
        for alias in &extraction.aliases {
            if alias.alias.is_empty() || alias.canonical.is_empty() {
                continue;
            }
            store.insert_alias(&alias.alias, &alias.canonical, alias.confidence)?;
        }

        let started_at = chrono::Utc::now().to_rfc3339();
        let mut facts = 0usize;
        for fact in &extraction.facts {
            if fact.entity.is_empty() || fact.attribute.is_empty() || fact.value.is_empty() {
                continue;
            }
            store.write_fact(
                &fact.entity,
                &fact.attribute,
                &fact.value,
                fact.confidence,
                Some(session),
            )?;
            facts += 1;
        }

        for episode in &extraction.episodes {
            if episode.title.is_empty() {
                continue;
            }
            store.insert_episode(&episode.title, &episode.body, &started_at, Some(session))?;
        }

        for commitment in &extraction.commitments {
            if commitment.description.is_empty() {
                continue;
            }
            store.insert_commitment(&commitment.description, commitment.due.as_deref())?;
        }

        info!(
            aliases = extraction.aliases.len(),
            facts,
            episodes = extraction.episodes.len(),
            commitments = extraction.commitments.len(),
            session,
            "extraction stored"
        );
        Ok(())
    }
}

/// Pull the JSON object out of a model reply that may wrap it in a code
/// fence or preamble, and parse it tolerantly.
pub fn parse_extraction(raw: &str) -> Result<Extraction> {
    let trimmed = raw.trim();
    let json_str = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end >= start => &trimmed[start..=end],
        _ => {
            return Err(ConsolidateError::Parse(format!(
                "no JSON object in extraction reply: {trimmed}"
            )))
        }
    };

    match serde_json::from_str::<Extraction>(json_str) {
        Ok(extraction) => {
            debug!(
                aliases = extraction.aliases.len(),
                facts = extraction.facts.len(),
                "extraction parsed"
            );
            Ok(extraction)
        }
        Err(e) => {
            warn!(error = %e, "extraction JSON did not match the expected shape");
            Err(ConsolidateError::Parse(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json() {
        let raw = "Here you go:\n```json\n{\"aliases\":[],\"facts\":[{\"entity\":\"ada\",\
                   \"attribute\":\"pet\",\"value\":\"cat\"}]}\n```";
        let extraction = parse_extraction(raw).unwrap();
        assert_eq!(extraction.facts.len(), 1);
        assert!((extraction.facts[0].confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_json_is_an_error() {
        assert!(parse_extraction("I could not find anything.").is_err());
    }

    #[test]
    fn apply_stores_aliases_before_facts() {
        let store = MemoryStore::open_in_memory().unwrap();
        let extraction: Extraction = serde_json::from_value(serde_json::json!({
            "aliases": [
                {"alias": "Nicolas Forstinger", "canonical": "nicolas_forstinger", "confidence": 0.9}
            ],
            "facts": [
                {"entity": "Nicolas Forstinger", "attribute": "nationality", "value": "austrian"}
            ],
            "episodes": [],
            "commitments": []
        }))
        .unwrap();

        struct NoProvider;
        #[async_trait::async_trait]
        impl Provider for NoProvider {
            fn name(&self) -> &str {
                "none"
            }
            async fn complete(
                &self,
                _r: &ChatRequest,
                _c: &CancellationToken,
            ) -> std::result::Result<wisp_agent::Completion, wisp_agent::ProviderError> {
                unreachable!("apply() does not call the provider")
            }
        }

        let extractor = Extractor::new(Arc::new(NoProvider), "m".into(), 512, 10_000);
        extractor.apply(&store, &extraction, "u1").unwrap();

        // The fact row's entity resolved through the alias inserted moments
        // earlier in the same batch.
        let facts = store
            .lookup_facts("Nicolas Forstinger", Some("nationality"))
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].entity, "nicolas_forstinger");
        assert_eq!(
            store.resolve_entity("Nicolas Forstinger").unwrap().as_deref(),
            Some("nicolas_forstinger")
        );
    }

    #[test]
    fn apply_is_idempotent_for_facts_and_aliases() {
        let store = MemoryStore::open_in_memory().unwrap();
        let extraction: Extraction = serde_json::from_value(serde_json::json!({
            "aliases": [{"alias": "Nico", "canonical": "nicolas_forstinger"}],
            "facts": [{"entity": "nicolas_forstinger", "attribute": "city", "value": "vienna"}],
            "episodes": [],
            "commitments": []
        }))
        .unwrap();

        struct NoProvider;
        #[async_trait::async_trait]
        impl Provider for NoProvider {
            fn name(&self) -> &str {
                "none"
            }
            async fn complete(
                &self,
                _r: &ChatRequest,
                _c: &CancellationToken,
            ) -> std::result::Result<wisp_agent::Completion, wisp_agent::ProviderError> {
                unreachable!()
            }
        }
        let extractor = Extractor::new(Arc::new(NoProvider), "m".into(), 512, 10_000);
        extractor.apply(&store, &extraction, "u1").unwrap();
        extractor.apply(&store, &extraction, "u1").unwrap();

        let facts = store.lookup_facts("Nico", Some("city")).unwrap();
        assert_eq!(facts.len(), 1);
    }
}
