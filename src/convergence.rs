//! Cross-platform convergence scoring.
//!
//! A topic on one platform is noise; the same topic on four platforms is a
//! lead story. The composite score saturates volume at 20 items (diminishing
//! returns) and scales unboundedly with platform breadth: more platforms is
//! a stronger signal than more posts on one platform.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::item::{Item, Sentiment, Source};
use crate::store::Store;
use crate::topics;

/// Platforms whose items count as organic discussion with no news trigger.
const ORGANIC_SOURCES: [Source; 3] = [Source::Reddit, Source::Bluesky, Source::Hackernews];
/// Platforms that carry syndicated news.
const NEWS_SOURCES: [Source; 3] = [Source::GoogleNews, Source::Rss, Source::Twitter];

#[derive(Debug, Clone, Serialize)]
pub struct TopItem {
    pub id: Option<i64>,
    pub title: String,
    pub source: Source,
    pub relevance_score: i64,
    pub url: String,
}

/// Per-topic convergence, recomputed every run (never persisted).
#[derive(Debug, Clone, Serialize)]
pub struct ConvergenceResult {
    pub topic: String,
    pub label: String,
    pub platforms: Vec<Source>,
    pub platform_count: usize,
    pub total_items: usize,
    pub avg_relevance: f64,
    pub top_items: Vec<TopItem>,
    pub convergence_score: f64,
    pub is_alert_worthy: bool,
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Pure scoring over an already-grouped topic. Exposed for tests.
pub fn score_topic(platform_count: usize, avg_relevance: f64, organic: bool, total_items: usize) -> f64 {
    let organic_bonus = if organic { 3.0 } else { 1.0 };
    round2(
        platform_count as f64
            * (avg_relevance / 100.0)
            * organic_bonus
            * (total_items.min(20) as f64 / 5.0),
    )
}

/// Compute convergence for all topics over the window, sorted by score
/// descending. `alert_threshold` is the platform count that flags a topic
/// alert-worthy.
pub async fn compute_convergence(
    store: Arc<dyn Store>,
    hours: i64,
    min_relevance: i64,
    alert_threshold: usize,
) -> Result<Vec<ConvergenceResult>> {
    let items = store.get_items_since(hours, min_relevance).await?;

    // topic -> platform -> items
    let mut grouped: BTreeMap<String, BTreeMap<Source, Vec<&Item>>> = BTreeMap::new();
    for item in &items {
        for topic in item.topics() {
            grouped
                .entry(topic.clone())
                .or_default()
                .entry(item.source)
                .or_default()
                .push(item);
        }
    }

    let mut results = Vec::with_capacity(grouped.len());
    for (topic, platforms) in grouped {
        let platform_names: Vec<Source> = platforms.keys().copied().collect();
        let platform_count = platform_names.len();

        let all_items: Vec<&Item> = platforms.values().flatten().copied().collect();
        let total_items = all_items.len();
        let avg_relevance =
            all_items.iter().map(|i| i.relevance() as f64).sum::<f64>() / total_items as f64;

        let organic = platform_names.iter().any(|s| s.is_conversation());
        let convergence_score = score_topic(platform_count, avg_relevance, organic, total_items);

        let mut ranked = all_items.clone();
        ranked.sort_by_key(|i| std::cmp::Reverse(i.relevance()));
        let top_items = ranked
            .iter()
            .take(5)
            .map(|i| TopItem {
                id: i.id,
                title: i.title.chars().take(100).collect(),
                source: i.source,
                relevance_score: i.relevance(),
                url: i.url.clone(),
            })
            .collect();

        results.push(ConvergenceResult {
            label: topics::label(&topic).to_string(),
            topic,
            platforms: platform_names,
            platform_count,
            total_items,
            avg_relevance: round1(avg_relevance),
            top_items,
            convergence_score,
            is_alert_worthy: platform_count >= alert_threshold,
        });
    }

    results.sort_by(|a, b| {
        b.convergence_score
            .partial_cmp(&a.convergence_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(results)
}

fn title_words(title: &str) -> HashSet<String> {
    title.split_whitespace().map(|w| w.to_lowercase()).collect()
}

/// Forum discussions with no corresponding news story in the same window:
/// no shared content hash with any news item and fewer than three shared
/// title words. Sorted by engagement, top 10.
pub async fn detect_organic_conversations(
    store: Arc<dyn Store>,
    hours: i64,
    min_relevance: i64,
) -> Result<Vec<Item>> {
    let items = store.get_items_since(hours, min_relevance).await?;

    let organic_items: Vec<&Item> = items
        .iter()
        .filter(|i| ORGANIC_SOURCES.contains(&i.source))
        .collect();
    let news_items: Vec<&Item> = items
        .iter()
        .filter(|i| NEWS_SOURCES.contains(&i.source))
        .collect();

    let news_hashes: HashSet<String> = news_items.iter().map(|i| i.content_hash()).collect();

    let mut truly_organic: Vec<Item> = Vec::new();
    for item in &organic_items {
        if news_hashes.contains(&item.content_hash()) {
            continue;
        }
        let words = title_words(&item.title);
        let has_news_match = news_items.iter().any(|news| {
            let overlap = title_words(&news.title).intersection(&words).count();
            overlap >= 3
        });
        if !has_news_match {
            truly_organic.push((*item).clone());
        }
    }

    truly_organic.sort_by_key(|i| std::cmp::Reverse(i.score));
    truly_organic.truncate(10);

    info!(
        organic = truly_organic.len(),
        candidates = organic_items.len(),
        "organic conversation detection complete"
    );
    Ok(truly_organic)
}

#[derive(Debug, Clone, Serialize)]
pub struct Debate {
    pub topic: String,
    pub label: String,
    pub total_items: usize,
    pub bullish_count: usize,
    pub bearish_count: usize,
    pub neutral_count: usize,
    /// min/max share of the two sides; 1.0 is a perfect split.
    pub split_ratio: f64,
    pub description: String,
}

/// Topics where conversation platforms show genuinely split sentiment: both
/// sides need at least `min_side_pct` share, ranked by closeness to an even
/// split.
pub async fn detect_active_debates(
    store: Arc<dyn Store>,
    hours: i64,
    min_relevance: i64,
    min_items: usize,
    min_side_pct: f64,
) -> Result<Vec<Debate>> {
    let items = store.get_items_since(hours, min_relevance).await?;

    let mut topic_sentiments: BTreeMap<String, Vec<Sentiment>> = BTreeMap::new();
    for item in items.iter().filter(|i| i.source.is_conversation()) {
        for topic in item.topics() {
            topic_sentiments
                .entry(topic.clone())
                .or_default()
                .push(item.sentiment());
        }
    }

    let topic_count = topic_sentiments.len();
    let mut debates = Vec::new();
    for (topic, sentiments) in topic_sentiments {
        let total = sentiments.len();
        if total < min_items {
            continue;
        }
        let bullish = sentiments.iter().filter(|s| **s == Sentiment::Bullish).count();
        let bearish = sentiments.iter().filter(|s| **s == Sentiment::Bearish).count();

        let bull_pct = bullish as f64 / total as f64;
        let bear_pct = bearish as f64 / total as f64;
        if bull_pct < min_side_pct || bear_pct < min_side_pct {
            continue;
        }

        let split_ratio = round2(bull_pct.min(bear_pct) / bull_pct.max(bear_pct));
        let label = topics::label(&topic).to_string();
        let description = format!(
            "{label}: {bullish} bullish vs {bearish} bearish ({:.0}%/{:.0}% split)",
            bull_pct * 100.0,
            bear_pct * 100.0
        );
        debates.push(Debate {
            topic,
            label,
            total_items: total,
            bullish_count: bullish,
            bearish_count: bearish,
            neutral_count: total - bullish - bearish,
            split_ratio,
            description,
        });
    }

    debates.sort_by(|a, b| {
        b.split_ratio
            .partial_cmp(&a.split_ratio)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    info!(debates = debates.len(), topics = topic_count, "debate detection complete");
    Ok(debates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn more_platforms_scores_strictly_higher() {
        let narrow = score_topic(2, 70.0, false, 10);
        let broad = score_topic(3, 70.0, false, 10);
        assert!(broad > narrow);
    }

    #[test]
    fn organic_bonus_is_exactly_three_x() {
        let plain = score_topic(3, 70.0, false, 10);
        let organic = score_topic(3, 70.0, true, 10);
        assert!((organic - 3.0 * plain).abs() < 1e-9);
    }

    #[test]
    fn volume_contribution_saturates_at_twenty() {
        let at_cap = score_topic(3, 70.0, false, 20);
        let over_cap = score_topic(3, 70.0, false, 200);
        assert_eq!(at_cap, over_cap);
    }

    #[test]
    fn title_word_overlap_is_case_insensitive() {
        let a = title_words("Mortgage Rates Hit Seven Percent");
        let b = title_words("mortgage rates hit new highs");
        assert_eq!(a.intersection(&b).count(), 3);
    }
}
