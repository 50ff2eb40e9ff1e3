//! Fixed topic taxonomy. Keys are stable identifiers persisted in the store;
//! labels and keywords only feed prompts and human-facing output.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TopicInfo {
    pub label: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

static TAXONOMY: Lazy<BTreeMap<String, TopicInfo>> = Lazy::new(|| {
    let raw = include_str!("../config/topics.toml");
    toml::from_str::<BTreeMap<String, TopicInfo>>(raw).expect("valid topic taxonomy")
});

/// All topic keys in stable order.
pub fn keys() -> impl Iterator<Item = &'static str> {
    TAXONOMY.keys().map(|k| k.as_str())
}

pub fn get(topic: &str) -> Option<&'static TopicInfo> {
    TAXONOMY.get(topic)
}

/// Human-readable label; falls back to the key for topics the capability
/// invents outside the taxonomy.
pub fn label(topic: &str) -> &str {
    TAXONOMY.get(topic).map(|t| t.label.as_str()).unwrap_or(topic)
}

/// Compact taxonomy listing for the classifier system prompt.
pub fn taxonomy_prompt() -> String {
    let mut lines = Vec::with_capacity(TAXONOMY.len());
    for (key, info) in TAXONOMY.iter() {
        let keywords = info
            .keywords
            .iter()
            .take(5)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("- {key}: {} (e.g., {keywords})", info.label));
    }
    lines.join("\n")
}
