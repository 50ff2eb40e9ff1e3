//! Item model: the normalized record every collector produces.
//!
//! Dedup is content-based, not ID-based. The same story is posted to several
//! platforms under different native IDs, so the fingerprint is derived from
//! the normalized title plus a body prefix and nothing else.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Platforms we collect from. Serialized as the snake_case names used in the
/// persisted store and the classifier payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Reddit,
    Bluesky,
    Hackernews,
    GoogleNews,
    Rss,
    Substack,
    Twitter,
    Gmail,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Reddit => "reddit",
            Source::Bluesky => "bluesky",
            Source::Hackernews => "hackernews",
            Source::GoogleNews => "google_news",
            Source::Rss => "rss",
            Source::Substack => "substack",
            Source::Twitter => "twitter",
            Source::Gmail => "gmail",
        }
    }

    /// Conversation-origin platforms. A topic carried by any of these gets the
    /// organic convergence bonus: conversation is a stronger signal than
    /// syndicated news.
    pub fn is_conversation(&self) -> bool {
        matches!(
            self,
            Source::Reddit | Source::Bluesky | Source::Hackernews | Source::Twitter
        )
    }

    /// Briefing prominence weight. Conversation sources dominate.
    pub fn weight(&self) -> u8 {
        match self {
            Source::Twitter | Source::Hackernews => 4,
            Source::Bluesky | Source::Substack => 3,
            Source::Gmail => 2,
            Source::GoogleNews | Source::Rss | Source::Reddit => 1,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reddit" => Ok(Source::Reddit),
            "bluesky" => Ok(Source::Bluesky),
            "hackernews" => Ok(Source::Hackernews),
            "google_news" => Ok(Source::GoogleNews),
            "rss" => Ok(Source::Rss),
            "substack" => Ok(Source::Substack),
            "twitter" => Ok(Source::Twitter),
            "gmail" => Ok(Source::Gmail),
            other => Err(anyhow::anyhow!("unknown source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Sentiment {
    /// Numeric mapping used by arc aggregation: bullish +1, bearish -1.
    pub fn score(&self) -> f64 {
        match self {
            Sentiment::Bullish => 1.0,
            Sentiment::Bearish => -1.0,
            Sentiment::Neutral => 0.0,
        }
    }

    /// Lenient parse for strings coming back from the classification
    /// capability. Anything unrecognized is neutral.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" => Sentiment::Bullish,
            "bearish" => Sentiment::Bearish,
            _ => Sentiment::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    NewsReport,
    OpinionAnalysis,
    OrganicDiscussion,
    DataRelease,
    InstitutionalResearch,
}

/// Classification fields, unset until the orchestrator applies a result.
/// Applied at most the current run's values; reclassification overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Classification {
    pub topics: Vec<String>,
    /// 0-100 relevance to the beat.
    pub relevance_score: u8,
    pub entities: Vec<String>,
    pub extracted_stats: Vec<String>,
    pub sentiment: Sentiment,
    pub content_type: Option<ContentType>,
    /// 0-100: how much organic debate this item represents.
    pub conversation_signal: u8,
    pub verifiable_claims: Vec<String>,
}

/// One piece of collected content from any platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Store-assigned row id; `None` until persisted.
    #[serde(default)]
    pub id: Option<i64>,
    pub source: Source,
    pub source_id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: String,
    pub published_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,

    /// Platform-normalized upvotes/likes/retweets.
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: u32,
    /// Platform-specific extras the common fields don't cover.
    #[serde(default)]
    pub engagement_raw: BTreeMap<String, serde_json::Value>,

    /// Set exactly once by the classification orchestrator.
    #[serde(default)]
    pub classification: Option<Classification>,
}

impl Item {
    pub fn new(source: Source, source_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: None,
            source,
            source_id: source_id.into(),
            url: String::new(),
            title: title.into(),
            body: String::new(),
            author: String::new(),
            published_at: None,
            collected_at: Utc::now(),
            score: 0,
            num_comments: 0,
            engagement_raw: BTreeMap::new(),
            classification: None,
        }
    }

    /// Dedup fingerprint: sha256 over normalized title plus the first 200
    /// chars of the body, truncated to 16 hex chars. Pure and total; two
    /// items with equal hash are the same logical item regardless of source.
    pub fn content_hash(&self) -> String {
        content_hash(&self.title, &self.body)
    }

    pub fn is_classified(&self) -> bool {
        self.classification.is_some()
    }

    pub fn relevance(&self) -> i64 {
        self.classification
            .as_ref()
            .map(|c| c.relevance_score as i64)
            .unwrap_or(0)
    }

    pub fn topics(&self) -> &[String] {
        self.classification
            .as_ref()
            .map(|c| c.topics.as_slice())
            .unwrap_or(&[])
    }

    pub fn sentiment(&self) -> Sentiment {
        self.classification
            .as_ref()
            .map(|c| c.sentiment)
            .unwrap_or_default()
    }
}

/// Content-addressed dedup key. Keep in sync with the store's hash-unique
/// item table.
pub fn content_hash(title: &str, body: &str) -> String {
    let normalized = title.to_lowercase().trim().to_string();
    let body_prefix: String = body.to_lowercase().chars().take(200).collect();
    let raw = format!("{normalized}|{}", body_prefix.trim());
    let digest = Sha256::digest(raw.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

/// Normalize collected text: decode HTML entities, strip tags, fold smart
/// quotes to ASCII, collapse whitespace. Collectors run titles and bodies
/// through this before hashing so equal content from different platforms
/// collapses to one record.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags =
        RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("valid tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("valid whitespace regex"));
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // Length cap keeps classifier prompts and the store bounded.
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_ignores_source_and_id() {
        let mut a = Item::new(Source::Reddit, "t3_abc", "Mortgage rates hit 7%");
        a.body = "Rates climbed again this week.".into();
        let mut b = Item::new(Source::Bluesky, "at://did/123", "Mortgage rates hit 7%");
        b.body = "Rates climbed again this week.".into();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn hash_is_case_and_padding_insensitive() {
        assert_eq!(
            content_hash("  Mortgage Rates Hit 7%  ", ""),
            content_hash("mortgage rates hit 7%", "")
        );
    }

    #[test]
    fn hash_uses_body_prefix_only() {
        let long_a = format!("{}{}", "x".repeat(200), "tail one");
        let long_b = format!("{}{}", "x".repeat(200), "different tail");
        assert_eq!(content_hash("same", &long_a), content_hash("same", &long_b));
        // Inside the prefix, differences matter.
        assert_ne!(content_hash("same", "aaa"), content_hash("same", "bbb"));
    }

    #[test]
    fn empty_items_collapse_to_one_hash() {
        assert_eq!(content_hash("", ""), content_hash("", ""));
    }

    #[test]
    fn normalize_strips_tags_and_entities() {
        let s = "  <p>Rates &amp; prices</p>\u{201C}quoted\u{201D}  ";
        assert_eq!(normalize_text(s), "Rates & prices\"quoted\"");
    }

    #[test]
    fn lenient_sentiment_defaults_to_neutral() {
        assert_eq!(Sentiment::parse_lenient("BULLISH"), Sentiment::Bullish);
        assert_eq!(Sentiment::parse_lenient("bearish "), Sentiment::Bearish);
        assert_eq!(Sentiment::parse_lenient("mixed"), Sentiment::Neutral);
    }
}
