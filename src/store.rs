//! Persistence contract plus an in-memory reference implementation.
//!
//! The production store lives outside this crate; everything here talks to it
//! through the `Store` trait. `MemStore` backs tests and the `test`
//! subcommand, and pins down the semantics the contract requires:
//! hash-unique items, (topic, date)-unique arc rows, and atomic
//! upsert-increment on the budget table.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::arcs::TopicArc;
use crate::item::{Classification, Item, Source};

/// Result of storing one collected batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub new: usize,
    pub dupes: usize,
    /// Items dropped for violating the non-empty-title invariant.
    pub rejected: usize,
}

/// One collector run, for the collection log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRun {
    pub source: Source,
    pub collected: usize,
    pub new: usize,
    pub dupes: usize,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// The small CRUD contract the core consumes; the real table layout is the
/// store's business.
#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert by content hash: a known hash counts as a duplicate and is
    /// discarded (first-seen wins), a new hash is inserted.
    async fn upsert_items(&self, items: Vec<Item>) -> Result<UpsertOutcome>;

    /// Items not yet classified, oldest first, up to `limit`.
    async fn get_unclassified(&self, limit: usize) -> Result<Vec<Item>>;

    /// Overwrite the classification fields of one item. Returns false when
    /// the id is unknown (the caller drops the result with a warning).
    async fn apply_classification(&self, item_id: i64, fields: Classification) -> Result<bool>;

    /// Classified items collected within the last `hours` whose relevance is
    /// at least `min_relevance`.
    async fn get_items_since(&self, hours: i64, min_relevance: i64) -> Result<Vec<Item>>;

    /// Insert or overwrite the arc row for (arc.topic, arc.date).
    async fn upsert_topic_arc(&self, arc: TopicArc) -> Result<()>;

    /// Arc rows for a topic over the trailing `days`, date ascending.
    async fn get_topic_arc(&self, topic: &str, days: i64) -> Result<Vec<TopicArc>>;

    async fn log_collection_run(&self, run: CollectionRun) -> Result<()>;

    /// Cents spent so far for (capability, date); zero when no row exists.
    async fn budget_spent(&self, capability: &str, date: NaiveDate) -> Result<u32>;

    /// Atomic upsert-increment; returns the new total. Never read-modify-write
    /// from the caller's side — concurrent paid calls must converge.
    async fn add_budget_spend(&self, capability: &str, date: NaiveDate, cents: u32) -> Result<u32>;
}

#[derive(Default)]
struct MemInner {
    items: Vec<Item>,
    by_hash: HashMap<String, usize>,
    arcs: HashMap<(String, NaiveDate), TopicArc>,
    budget: HashMap<(String, NaiveDate), u32>,
    runs: Vec<CollectionRun>,
}

/// In-memory store. Interior mutability through a plain mutex; no lock is
/// held across an await point.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection_log(&self) -> Vec<CollectionRun> {
        self.inner.lock().expect("store mutex poisoned").runs.clone()
    }

    pub fn item_count(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").items.len()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn upsert_items(&self, items: Vec<Item>) -> Result<UpsertOutcome> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let mut out = UpsertOutcome::default();
        for mut item in items {
            if item.title.trim().is_empty() {
                warn!(source = %item.source, source_id = %item.source_id, "rejecting item with empty title");
                out.rejected += 1;
                continue;
            }
            let hash = item.content_hash();
            if inner.by_hash.contains_key(&hash) {
                out.dupes += 1;
                continue;
            }
            let id = inner.items.len() as i64 + 1;
            item.id = Some(id);
            let idx = inner.items.len();
            inner.items.push(item);
            inner.by_hash.insert(hash, idx);
            out.new += 1;
        }
        Ok(out)
    }

    async fn get_unclassified(&self, limit: usize) -> Result<Vec<Item>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .items
            .iter()
            .filter(|i| !i.is_classified())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn apply_classification(&self, item_id: i64, fields: Classification) -> Result<bool> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        match inner.items.iter_mut().find(|i| i.id == Some(item_id)) {
            Some(item) => {
                item.classification = Some(fields);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_items_since(&self, hours: i64, min_relevance: i64) -> Result<Vec<Item>> {
        let cutoff = Utc::now() - Duration::hours(hours);
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .items
            .iter()
            .filter(|i| i.collected_at >= cutoff && i.is_classified() && i.relevance() >= min_relevance)
            .cloned()
            .collect())
    }

    async fn upsert_topic_arc(&self, arc: TopicArc) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.arcs.insert((arc.topic.clone(), arc.date), arc);
        Ok(())
    }

    async fn get_topic_arc(&self, topic: &str, days: i64) -> Result<Vec<TopicArc>> {
        let cutoff = Utc::now().date_naive() - Duration::days(days);
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut rows: Vec<TopicArc> = inner
            .arcs
            .values()
            .filter(|a| a.topic == topic && a.date >= cutoff)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.date);
        Ok(rows)
    }

    async fn log_collection_run(&self, run: CollectionRun) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.runs.push(run);
        Ok(())
    }

    async fn budget_spent(&self, capability: &str, date: NaiveDate) -> Result<u32> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .budget
            .get(&(capability.to_string(), date))
            .copied()
            .unwrap_or(0))
    }

    async fn add_budget_spend(&self, capability: &str, date: NaiveDate, cents: u32) -> Result<u32> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let entry = inner
            .budget
            .entry((capability.to_string(), date))
            .or_insert(0);
        *entry = entry.saturating_add(cents);
        Ok(*entry)
    }
}
