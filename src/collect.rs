//! Collection phase: a uniform `Collector` capability per platform, a fixed
//! registry the orchestrator iterates, and budget gating for paid search
//! backends.
//!
//! Platform HTTP clients live outside this crate; they implement `Collector`
//! (or `PaidSearch`) and get registered here. Each collector applies its own
//! rate limiting since every platform enforces its own quota.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::budget::{cents_from_usd, BudgetLedger};
use crate::item::{Item, Source};
use crate::store::{CollectionRun, Store};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("collect_items_total", "Items returned by collectors.");
        describe_counter!("collect_new_total", "Items stored as new after dedup.");
        describe_counter!("collect_dupes_total", "Items discarded as duplicates.");
        describe_counter!("collect_errors_total", "Collector fetch errors.");
        describe_counter!("paid_search_skipped_total", "Paid queries skipped by the budget gate.");
    });
}

/// One platform's collection capability.
#[async_trait]
pub trait Collector: Send + Sync {
    fn source(&self) -> Source;
    async fn collect(&self) -> Result<Vec<Item>>;
}

/// Fixed table of collectors keyed by source. The orchestrator iterates this
/// instead of branching on source names.
#[derive(Default)]
pub struct CollectorRegistry {
    entries: Vec<Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, collector: Arc<dyn Collector>) -> Self {
        self.entries.push(collector);
        self
    }

    pub fn sources(&self) -> Vec<Source> {
        self.entries.iter().map(|c| c.source()).collect()
    }

    fn selected(&self, sources: Option<&[Source]>) -> Vec<Arc<dyn Collector>> {
        match sources {
            None => self.entries.clone(),
            Some(wanted) => self
                .entries
                .iter()
                .filter(|c| wanted.contains(&c.source()))
                .cloned()
                .collect(),
        }
    }
}

/// Per-source outcome reported in the run summary.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SourceCounts {
    pub collected: usize,
    pub new: usize,
    pub dupes: usize,
}

/// Run the selected collectors concurrently, each under its own timeout.
/// A failed or stuck collector contributes zero items; siblings proceed.
/// Store writes go through upsert-by-contentHash, so two collectors racing
/// on the same logical item converge to one row. A failed store write is a
/// different class entirely: nothing downstream can make progress, so the
/// whole run aborts with the store error.
pub async fn run_collectors(
    store: Arc<dyn Store>,
    registry: &CollectorRegistry,
    sources: Option<&[Source]>,
    per_source_timeout: Duration,
) -> Result<BTreeMap<String, SourceCounts>> {
    ensure_metrics_described();

    let mut tasks = JoinSet::new();
    for collector in registry.selected(sources) {
        let store = store.clone();
        tasks.spawn(async move {
            let source = collector.source();
            let counts = collect_one(store, collector.as_ref(), per_source_timeout).await;
            (source, counts)
        });
    }

    let mut results = BTreeMap::new();
    let mut total_new = 0usize;
    let mut total_dupes = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((source, counts)) => {
                // Store unavailability: dropping the JoinSet cancels siblings.
                let counts = counts?;
                total_new += counts.new;
                total_dupes += counts.dupes;
                results.insert(source.as_str().to_string(), counts);
            }
            Err(e) => warn!(error = %e, "collector task panicked"),
        }
    }

    info!(
        new = total_new,
        dupes = total_dupes,
        sources = results.len(),
        "collection complete"
    );
    Ok(results)
}

async fn collect_one(
    store: Arc<dyn Store>,
    collector: &dyn Collector,
    timeout: Duration,
) -> Result<SourceCounts> {
    let source = collector.source();
    let fetched = match tokio::time::timeout(timeout, collector.collect()).await {
        Ok(Ok(items)) => items,
        Ok(Err(e)) => {
            warn!(source = %source, error = %e, "collector failed");
            counter!("collect_errors_total").increment(1);
            log_run(&store, source, 0, 0, 0, Some(e.to_string())).await;
            return Ok(SourceCounts::default());
        }
        Err(_) => {
            warn!(source = %source, timeout_secs = timeout.as_secs(), "collector timed out");
            counter!("collect_errors_total").increment(1);
            log_run(&store, source, 0, 0, 0, Some("timeout".to_string())).await;
            return Ok(SourceCounts::default());
        }
    };

    let collected = fetched.len();
    counter!("collect_items_total").increment(collected as u64);

    // Unlike a collector failure, a failed upsert means the store itself is
    // down and the error propagates to abort the run.
    let outcome = store
        .upsert_items(fetched)
        .await
        .with_context(|| format!("persisting items collected from {source}"))?;
    counter!("collect_new_total").increment(outcome.new as u64);
    counter!("collect_dupes_total").increment(outcome.dupes as u64);
    info!(
        source = %source,
        new = outcome.new,
        dupes = outcome.dupes,
        collected,
        "collector finished"
    );
    log_run(&store, source, collected, outcome.new, outcome.dupes, None).await;
    Ok(SourceCounts {
        collected,
        new: outcome.new,
        dupes: outcome.dupes,
    })
}

async fn log_run(
    store: &Arc<dyn Store>,
    source: Source,
    collected: usize,
    new: usize,
    dupes: usize,
    error: Option<String>,
) {
    let run = CollectionRun {
        source,
        collected,
        new,
        dupes,
        error,
        at: Utc::now(),
    };
    if let Err(e) = store.log_collection_run(run).await {
        warn!(source = %source, error = %e, "could not log collection run");
    }
}

/// Sleep-based rate limiter: spaces calls at least `min_interval` apart.
pub struct RateLimit {
    min_interval: Duration,
    last: Mutex<Option<tokio::time::Instant>>,
}

impl RateLimit {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        let now = tokio::time::Instant::now();
        if let Some(prev) = *last {
            let elapsed = now.duration_since(prev);
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(tokio::time::Instant::now());
    }
}

/// Result of one paid search run: items plus the backend's reported cost.
#[derive(Debug, Clone)]
pub struct PaidRun {
    pub items: Vec<Item>,
    pub cost_usd: Option<f64>,
}

/// A metered search backend (scraper-as-a-service and the like). The caller
/// owns budget checks and spend recording.
#[async_trait]
pub trait PaidSearch: Send + Sync {
    async fn run(&self, query: &str, max_items: usize) -> Result<PaidRun>;
}

/// Collector over a paid search backend. Every query is gated through the
/// budget ledger; exhaustion is a deliberate skip, not an error.
pub struct GatedSearchCollector {
    source: Source,
    capability: String,
    queries: Vec<String>,
    max_per_query: usize,
    search: Arc<dyn PaidSearch>,
    ledger: BudgetLedger,
    /// Charged when the backend does not report a cost.
    fallback_cost_cents: u32,
    rate: RateLimit,
}

impl GatedSearchCollector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Source,
        capability: impl Into<String>,
        queries: Vec<String>,
        max_per_query: usize,
        search: Arc<dyn PaidSearch>,
        ledger: BudgetLedger,
        fallback_cost_cents: u32,
        min_interval: Duration,
    ) -> Self {
        Self {
            source,
            capability: capability.into(),
            queries,
            max_per_query,
            search,
            ledger,
            fallback_cost_cents,
            rate: RateLimit::new(min_interval),
        }
    }
}

#[async_trait]
impl Collector for GatedSearchCollector {
    fn source(&self) -> Source {
        self.source
    }

    async fn collect(&self) -> Result<Vec<Item>> {
        ensure_metrics_described();
        let mut items = Vec::new();
        for query in &self.queries {
            if !self.ledger.check_budget(&self.capability).await {
                counter!("paid_search_skipped_total").increment(1);
                break;
            }
            self.rate.wait().await;
            match self.search.run(query, self.max_per_query).await {
                Ok(run) => {
                    let cents = run
                        .cost_usd
                        .map(cents_from_usd)
                        .unwrap_or(self.fallback_cost_cents);
                    self.ledger.record_spend(&self.capability, cents).await;
                    items.extend(run.items);
                }
                Err(e) => {
                    warn!(source = %self.source, query = %query, error = %e, "paid search failed");
                }
            }
        }
        Ok(items)
    }
}

/// Fixed-output collector for tests and dry runs.
pub struct StaticCollector {
    source: Source,
    items: Vec<Item>,
}

impl StaticCollector {
    pub fn new(source: Source, items: Vec<Item>) -> Self {
        Self { source, items }
    }
}

#[async_trait]
impl Collector for StaticCollector {
    fn source(&self) -> Source {
        self.source
    }

    async fn collect(&self) -> Result<Vec<Item>> {
        Ok(self.items.clone())
    }
}
