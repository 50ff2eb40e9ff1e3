//! Daily briefing assembly.
//!
//! Pure aggregation over the store: convergence, shifts, organic
//! conversations, debates, and highlight items folded into one serializable
//! value handed to delivery collaborators. Rendering (email, push, Notion)
//! happens outside this crate.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::arcs::{self, NarrativeShift};
use crate::config::PulseConfig;
use crate::convergence::{self, ConvergenceResult, Debate};
use crate::item::{Item, Source};
use crate::store::Store;

/// Briefing window. Wider than the 24h collection cadence so late-night
/// threads still make the morning edition.
const BRIEFING_WINDOW_HOURS: i64 = 36;

#[derive(Debug, Clone, Serialize)]
pub struct Highlight {
    pub id: Option<i64>,
    pub title: String,
    pub source: Source,
    pub url: String,
    pub relevance_score: i64,
    pub topics: Vec<String>,
    /// True for forum items with enough comments to be an actual
    /// conversation rather than a link share.
    pub is_conversation: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganicConversation {
    pub title: String,
    pub source: Source,
    pub score: i64,
    pub num_comments: u32,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BriefingStats {
    pub total_items: usize,
    pub conversation_items: usize,
    pub platforms_active: usize,
    pub source_breakdown: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyBriefing {
    pub date: NaiveDate,
    pub convergence: Vec<ConvergenceResult>,
    pub narrative_shifts: Vec<NarrativeShift>,
    pub organic_conversations: Vec<OrganicConversation>,
    pub debates: Vec<Debate>,
    pub highlights: Vec<Highlight>,
    pub stats: BriefingStats,
}

fn to_highlight(item: &Item, min_comments: u32) -> Highlight {
    Highlight {
        id: item.id,
        title: item.title.chars().take(200).collect(),
        source: item.source,
        url: item.url.clone(),
        relevance_score: item.relevance(),
        topics: item.topics().to_vec(),
        is_conversation: item.source.is_conversation() && item.num_comments >= min_comments,
    }
}

/// Assemble the daily briefing from the last 36 hours of classified items.
pub async fn generate_daily_briefing(
    store: Arc<dyn Store>,
    cfg: &PulseConfig,
) -> Result<DailyBriefing> {
    let all_items = store.get_items_since(BRIEFING_WINDOW_HOURS, 0).await?;

    let mut convergence = convergence::compute_convergence(
        store.clone(),
        BRIEFING_WINDOW_HOURS,
        cfg.relevance_include,
        cfg.convergence_alert_threshold,
    )
    .await?;
    convergence.truncate(10);

    let mut shifts =
        arcs::detect_narrative_shifts(store.clone(), cfg.shift_lookback_days, cfg.shift_threshold)
            .await?;
    shifts.truncate(5);

    let organic = convergence::detect_organic_conversations(
        store.clone(),
        BRIEFING_WINDOW_HOURS,
        cfg.relevance_include,
    )
    .await?
    .into_iter()
    .map(|i| OrganicConversation {
        title: i.title.chars().take(100).collect(),
        source: i.source,
        score: i.score,
        num_comments: i.num_comments,
        url: i.url,
    })
    .collect();

    let debates = convergence::detect_active_debates(
        store.clone(),
        BRIEFING_WINDOW_HOURS,
        cfg.relevance_include,
        cfg.debate_min_items,
        cfg.debate_min_side_pct,
    )
    .await?;

    // Conversation sources lead the highlight list regardless of relevance
    // rank within their tier.
    let mut highlights: Vec<Highlight> = all_items
        .iter()
        .filter(|i| i.relevance() >= cfg.relevance_highlight)
        .map(|i| to_highlight(i, cfg.min_comments_for_conversation))
        .collect();
    highlights.sort_by_key(|h| (std::cmp::Reverse(h.source.weight()), std::cmp::Reverse(h.relevance_score)));
    highlights.truncate(25);

    let mut source_breakdown: BTreeMap<String, usize> = BTreeMap::new();
    for item in &all_items {
        *source_breakdown.entry(item.source.as_str().to_string()).or_default() += 1;
    }
    let conversation_items = all_items
        .iter()
        .filter(|i| i.classification.as_ref().map(|c| c.conversation_signal >= 30).unwrap_or(false))
        .count();

    let stats = BriefingStats {
        total_items: all_items.len(),
        conversation_items,
        platforms_active: source_breakdown.len(),
        source_breakdown,
    };

    info!(
        items = stats.total_items,
        convergence_topics = convergence.len(),
        highlights = highlights.len(),
        "daily briefing assembled"
    );

    Ok(DailyBriefing {
        date: Utc::now().date_naive(),
        convergence,
        narrative_shifts: shifts,
        organic_conversations: organic,
        debates,
        highlights,
        stats,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyReport {
    pub date: NaiveDate,
    pub narrative_shifts: Vec<NarrativeShift>,
    pub debates: Vec<Debate>,
}

/// Weekly lookback: every shift over the full arc history window plus the
/// week's contested topics.
pub async fn generate_weekly_report(
    store: Arc<dyn Store>,
    cfg: &PulseConfig,
) -> Result<WeeklyReport> {
    let narrative_shifts =
        arcs::detect_narrative_shifts(store.clone(), cfg.shift_lookback_days, cfg.shift_threshold)
            .await?;
    let debates = convergence::detect_active_debates(
        store,
        cfg.shift_lookback_days * 24,
        cfg.relevance_include,
        cfg.debate_min_items,
        cfg.debate_min_side_pct,
    )
    .await?;
    info!(
        shifts = narrative_shifts.len(),
        debates = debates.len(),
        "weekly report assembled"
    );
    Ok(WeeklyReport {
        date: Utc::now().date_naive(),
        narrative_shifts,
        debates,
    })
}
