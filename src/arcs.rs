//! Topic arcs: per-(topic, date) rolling aggregates and narrative-shift
//! detection.
//!
//! Shift detection is a simple two-window mean comparison (last 7 days vs
//! the 7 before), not a statistical change-point detector. False positives
//! near the threshold boundary are expected and acceptable.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::item::{Item, Source};
use crate::store::Store;
use crate::topics;

/// One arc row. At most one per (topic, date); recomputation overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicArc {
    pub topic: String,
    pub date: NaiveDate,
    pub item_count: u32,
    pub avg_relevance: f64,
    /// Mean of mapped sentiment: bullish +1, neutral 0, bearish -1.
    pub avg_sentiment_score: f64,
    pub platforms: Vec<Source>,
    /// Top 5 item ids by relevance.
    pub top_item_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArcSummary {
    pub item_count: u32,
    pub avg_relevance: f64,
    pub avg_sentiment: f64,
    pub platforms: Vec<Source>,
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Recompute and upsert arc rows for `date` from the last 24h of classified
/// items. Idempotent: running twice for the same date overwrites in place.
pub async fn update_arcs(
    store: Arc<dyn Store>,
    date: Option<NaiveDate>,
) -> Result<BTreeMap<String, ArcSummary>> {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let items = store.get_items_since(24, 0).await?;
    info!(%date, items = items.len(), "computing topic arcs");

    // An item may carry several topics: fan-out, not partition.
    let mut by_topic: BTreeMap<&str, Vec<&Item>> = BTreeMap::new();
    for item in &items {
        for topic in item.topics() {
            by_topic.entry(topic.as_str()).or_default().push(item);
        }
    }

    let mut summaries = BTreeMap::new();

    for topic in topics::keys() {
        let Some(topic_items) = by_topic.get(topic) else {
            continue;
        };

        let n = topic_items.len() as f64;
        let avg_relevance = topic_items.iter().map(|i| i.relevance() as f64).sum::<f64>() / n;
        let avg_sentiment = topic_items.iter().map(|i| i.sentiment().score()).sum::<f64>() / n;

        let mut platforms: Vec<Source> = topic_items.iter().map(|i| i.source).collect();
        platforms.sort();
        platforms.dedup();

        let mut ranked: Vec<&&Item> = topic_items.iter().collect();
        ranked.sort_by_key(|i| std::cmp::Reverse(i.relevance()));
        let top_item_ids: Vec<i64> = ranked.iter().take(5).filter_map(|i| i.id).collect();

        let arc = TopicArc {
            topic: topic.to_string(),
            date,
            item_count: topic_items.len() as u32,
            avg_relevance: round1(avg_relevance),
            avg_sentiment_score: round3(avg_sentiment),
            platforms: platforms.clone(),
            top_item_ids,
        };
        store.upsert_topic_arc(arc).await?;

        summaries.insert(
            topic.to_string(),
            ArcSummary {
                item_count: topic_items.len() as u32,
                avg_relevance: round1(avg_relevance),
                avg_sentiment: round3(avg_sentiment),
                platforms,
            },
        );
    }

    info!(topics = summaries.len(), "updated arcs");
    Ok(summaries)
}

#[derive(Debug, Clone, Serialize)]
pub struct NarrativeShift {
    pub topic: String,
    pub label: String,
    pub prior_sentiment: f64,
    pub recent_sentiment: f64,
    pub shift_magnitude: f64,
    /// Direction of the move itself.
    pub shift_direction: &'static str,
    /// Qualitative label of each window: bullish above 0.2, bearish below
    /// -0.2, neutral between.
    pub narrative_from: &'static str,
    pub narrative_to: &'static str,
    pub volume_change_pct: f64,
    pub recent_volume: u32,
    pub prior_volume: u32,
}

fn qualitative(sentiment: f64) -> &'static str {
    if sentiment > 0.2 {
        "bullish"
    } else if sentiment < -0.2 {
        "bearish"
    } else {
        "neutral"
    }
}

/// Flag topics whose mean sentiment moved at least `threshold` between the
/// last 7 days and the 7 before (boundary inclusive). Topics with fewer than
/// five arc rows in the lookback are skipped as insufficient signal.
pub async fn detect_narrative_shifts(
    store: Arc<dyn Store>,
    lookback_days: i64,
    threshold: f64,
) -> Result<Vec<NarrativeShift>> {
    let mut shifts = Vec::new();
    let midpoint = Utc::now().date_naive() - Duration::days(7);

    for topic in topics::keys() {
        let rows = store.get_topic_arc(topic, lookback_days).await?;
        if rows.len() < 5 {
            continue;
        }

        let (recent, prior): (Vec<&TopicArc>, Vec<&TopicArc>) =
            rows.iter().partition(|r| r.date >= midpoint);
        if recent.is_empty() || prior.is_empty() {
            continue;
        }

        let recent_sentiment =
            recent.iter().map(|r| r.avg_sentiment_score).sum::<f64>() / recent.len() as f64;
        let prior_sentiment =
            prior.iter().map(|r| r.avg_sentiment_score).sum::<f64>() / prior.len() as f64;

        let recent_volume: u32 = recent.iter().map(|r| r.item_count).sum();
        let prior_volume: u32 = prior.iter().map(|r| r.item_count).sum();

        let sentiment_shift = recent_sentiment - prior_sentiment;
        let volume_change = recent_volume as f64 / (prior_volume.max(1) as f64) - 1.0;

        if sentiment_shift.abs() >= threshold {
            shifts.push(NarrativeShift {
                topic: topic.to_string(),
                label: topics::label(topic).to_string(),
                prior_sentiment: round3(prior_sentiment),
                recent_sentiment: round3(recent_sentiment),
                shift_magnitude: round3(sentiment_shift.abs()),
                shift_direction: if sentiment_shift > 0.0 { "bullish" } else { "bearish" },
                narrative_from: qualitative(prior_sentiment),
                narrative_to: qualitative(recent_sentiment),
                volume_change_pct: round1(volume_change * 100.0),
                recent_volume,
                prior_volume,
            });
        }
    }

    shifts.sort_by(|a, b| {
        b.shift_magnitude
            .partial_cmp(&a.shift_magnitude)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    info!(shifts = shifts.len(), "narrative shift detection complete");
    Ok(shifts)
}
