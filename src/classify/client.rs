//! Classification capability: provider abstraction plus concrete clients.
//!
//! The capability is opaque — "given N items, return structured tags". The
//! orchestrator owns batching, parsing, and recovery; clients here only turn
//! a batch into the provider's raw text response.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::item::{Classification, ContentType, Sentiment, Source};
use crate::topics;

/// One item as presented to the capability.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyRequest {
    pub id: i64,
    pub source: Source,
    pub title: String,
    pub body_preview: String,
}

/// One element of the capability's JSON array output. Loosely typed on the
/// wire, validated into `Classification` before it touches the store.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationResult {
    pub id: i64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub relevance_score: i64,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub extracted_stats: Vec<String>,
    #[serde(default)]
    pub sentiment: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub conversation_signal: i64,
    #[serde(default)]
    pub verifiable_claims: Vec<String>,
}

impl ClassificationResult {
    /// Validate into the typed record: clamp scores, lenient enums.
    pub fn into_fields(self) -> Classification {
        let content_type = match self.content_type.trim() {
            "news_report" => Some(ContentType::NewsReport),
            "opinion_analysis" => Some(ContentType::OpinionAnalysis),
            "organic_discussion" => Some(ContentType::OrganicDiscussion),
            "data_release" => Some(ContentType::DataRelease),
            "institutional_research" => Some(ContentType::InstitutionalResearch),
            _ => None,
        };
        Classification {
            topics: self.topics,
            relevance_score: self.relevance_score.clamp(0, 100) as u8,
            entities: self.entities,
            extracted_stats: self.extracted_stats,
            sentiment: Sentiment::parse_lenient(&self.sentiment),
            content_type,
            conversation_signal: self.conversation_signal.clamp(0, 100) as u8,
            verifiable_claims: self.verifiable_claims,
        }
    }
}

/// Raw batch call. Implementations must bound their own timeouts.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, batch: &[ClassifyRequest]) -> Result<String>;
    fn provider_name(&self) -> &'static str;
}

pub type DynClassifier = Arc<dyn Classifier>;

const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";
const ANTHROPIC_VERSION: &str = "2023-06-01";

fn system_prompt() -> String {
    format!(
        "You are a content classifier for a housing/economics data journalism newsletter.\n\
         Classify each item with topic tags, relevance, entities, statistics, sentiment, \
         content type, conversation signal, and verifiable claims.\n\n\
         ## Topic Taxonomy\n{taxonomy}\n\n\
         ## Scoring\n\
         - relevance_score (0-100): 90+ directly about US housing data; 70-89 US housing \
           policy or macro that moves housing; 30-69 loosely related US economics; 0-29 not relevant. \
           Non-US housing content scores 0-10.\n\
         - sentiment: \"bullish\" | \"bearish\" | \"neutral\" for housing/economy direction.\n\
         - content_type: news_report | opinion_analysis | organic_discussion | data_release | institutional_research.\n\
         - conversation_signal (0-100): how much organic debate the item represents.\n\
         - verifiable_claims: specific factual assertions checkable against data.\n\n\
         ## Output\n\
         Return ONLY a JSON array, one object per item:\n\
         {{\"id\": <item_id>, \"topics\": [..], \"relevance_score\": <0-100>, \"entities\": [..], \
         \"extracted_stats\": [..], \"sentiment\": \"..\", \"content_type\": \"..\", \
         \"conversation_signal\": <0-100>, \"verifiable_claims\": [..]}}",
        taxonomy = topics::taxonomy_prompt()
    )
}

fn user_content(batch: &[ClassifyRequest]) -> String {
    let mut texts = Vec::with_capacity(batch.len());
    for req in batch {
        let mut text = format!("[ID: {}] [{}] {}", req.id, req.source, req.title);
        if !req.body_preview.is_empty() {
            text.push('\n');
            text.push_str(&req.body_preview);
        }
        texts.push(text);
    }
    format!(
        "Classify these {} items:\n\n{}",
        batch.len(),
        texts.join("\n\n---\n\n")
    )
}

/// Anthropic messages API client. Requires `ANTHROPIC_API_KEY`.
pub struct AnthropicClassifier {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicClassifier {
    pub fn new(api_key: String, model_override: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("pulse-engine/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model: model_override.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }
}

#[async_trait]
impl Classifier for AnthropicClassifier {
    async fn classify(&self, batch: &[ClassifyRequest]) -> Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: String,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            max_tokens: u32,
            system: String,
            messages: Vec<Msg<'a>>,
        }
        #[derive(Deserialize)]
        struct Resp {
            content: Vec<Block>,
        }
        #[derive(Deserialize)]
        struct Block {
            #[serde(default)]
            text: String,
        }

        if self.api_key.is_empty() {
            return Err(anyhow!("ANTHROPIC_API_KEY not set"));
        }

        let req = Req {
            model: &self.model,
            max_tokens: 8192,
            system: system_prompt(),
            messages: vec![Msg {
                role: "user",
                content: user_content(batch),
            }],
        };

        let resp = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await
            .context("classification request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("classification API returned {status}: {body}"));
        }

        let body: Resp = resp.json().await.context("read classification body")?;
        let text = body
            .content
            .first()
            .map(|b| b.text.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(anyhow!("classification response had no text content"));
        }
        Ok(text)
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}

/// Always yields an empty result set; used when classification is off.
pub struct DisabledClassifier;

#[async_trait]
impl Classifier for DisabledClassifier {
    async fn classify(&self, _batch: &[ClassifyRequest]) -> Result<String> {
        Ok("[]".to_string())
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Scripted client for tests: returns canned raw responses in order, then
/// empty arrays.
pub struct ScriptedClassifier {
    responses: std::sync::Mutex<std::collections::VecDeque<String>>,
}

impl ScriptedClassifier {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, _batch: &[ClassifyRequest]) -> Result<String> {
        let mut q = self.responses.lock().expect("scripted classifier mutex");
        Ok(q.pop_front().unwrap_or_else(|| "[]".to_string()))
    }
    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// Factory honoring the test-mode escape hatch: `CLASSIFY_TEST_MODE=mock`
/// forces a scripted no-op client regardless of keys.
pub fn build_classifier(enabled: bool, model_override: Option<&str>) -> DynClassifier {
    if std::env::var("CLASSIFY_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(ScriptedClassifier::new(Vec::new()));
    }
    if !enabled {
        return Arc::new(DisabledClassifier);
    }
    match std::env::var("ANTHROPIC_API_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            Arc::new(AnthropicClassifier::new(key, model_override))
        }
        _ => {
            tracing::warn!("ANTHROPIC_API_KEY not set; classification disabled");
            Arc::new(DisabledClassifier)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_result_validates_into_fields() {
        let raw: ClassificationResult = serde_json::from_str(
            r#"{"id": 7, "topics": ["mortgage_rates"], "relevance_score": 250,
                "sentiment": "Bearish", "content_type": "news_report",
                "conversation_signal": -5}"#,
        )
        .unwrap();
        let fields = raw.into_fields();
        assert_eq!(fields.relevance_score, 100);
        assert_eq!(fields.conversation_signal, 0);
        assert_eq!(fields.sentiment, Sentiment::Bearish);
        assert_eq!(fields.content_type, Some(ContentType::NewsReport));
    }

    #[test]
    fn unknown_content_type_maps_to_none() {
        let raw: ClassificationResult =
            serde_json::from_str(r#"{"id": 1, "content_type": "podcast"}"#).unwrap();
        assert_eq!(raw.into_fields().content_type, None);
    }

    #[test]
    fn user_content_includes_ids_and_previews() {
        let batch = vec![ClassifyRequest {
            id: 42,
            source: Source::Reddit,
            title: "Rates thread".into(),
            body_preview: "everyone arguing".into(),
        }];
        let content = user_content(&batch);
        assert!(content.contains("[ID: 42]"));
        assert!(content.contains("[reddit]"));
        assert!(content.contains("everyone arguing"));
    }
}
