//! Phase sequencer behind the CLI subcommands.
//!
//! Phases run in order. External capabilities may fail without sinking the
//! run: a broken collector contributes zero items, a failed classification
//! batch stays unclassified for the next run, and a delivery failure is
//! caught here and reported in the summary. The store is different: with it
//! down no phase can make progress, so store errors propagate out of every
//! command and the process exits non-zero.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::arcs;
use crate::budget::BudgetLedger;
use crate::classify::{self, client::DynClassifier, ClassifyOptions};
use crate::collect::{self, CollectorRegistry, SourceCounts};
use crate::config::PulseConfig;
use crate::convergence;
use crate::item::Source;
use crate::notify::{pushover, Delivery};
use crate::store::Store;
use crate::synthesize::{self, DailyBriefing, WeeklyReport};

/// Free, no-auth sources used by the `test` subcommand.
const TEST_SOURCES: [Source; 4] = [
    Source::Reddit,
    Source::GoogleNews,
    Source::Hackernews,
    Source::Bluesky,
];

pub struct Pipeline {
    store: Arc<dyn Store>,
    registry: CollectorRegistry,
    classifier: DynClassifier,
    ledger: BudgetLedger,
    delivery: Arc<dyn Delivery>,
    notifier: Option<pushover::PushoverNotifier>,
    cfg: PulseConfig,
}

#[derive(Debug, Default, Serialize)]
pub struct CollectSummary {
    pub collection: BTreeMap<String, SourceCounts>,
    pub classified: usize,
    pub arcs: usize,
    /// Contained non-store failures (delivery); empty when everything
    /// succeeded.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<&'static str, String>,
    pub elapsed_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct DailySummary {
    #[serde(flatten)]
    pub collect: CollectSummary,
    pub briefing: DailyBriefing,
    pub delivered: bool,
    pub alerts_sent: usize,
}

#[derive(Debug, Serialize)]
pub struct WeeklySummary {
    pub report: WeeklyReport,
    pub elapsed_seconds: u64,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        registry: CollectorRegistry,
        classifier: DynClassifier,
        delivery: Arc<dyn Delivery>,
        notifier: Option<pushover::PushoverNotifier>,
        cfg: PulseConfig,
    ) -> Self {
        let ledger = BudgetLedger::new(store.clone(), cfg.budget_caps.clone());
        Self {
            store,
            registry,
            classifier,
            ledger,
            delivery,
            notifier,
            cfg,
        }
    }

    fn classify_options(&self) -> ClassifyOptions {
        ClassifyOptions {
            batch_size: self.cfg.classify_batch_size,
            max_items: self.cfg.classify_max_items,
            ..ClassifyOptions::default()
        }
    }

    /// Collection phase plus the two phases that depend only on it. All
    /// three talk to the store, so any `Err` here aborts the run.
    async fn collect_classify_arcs(&self, sources: Option<&[Source]>) -> Result<CollectSummary> {
        let start = Instant::now();
        let mut summary = CollectSummary::default();

        info!("phase: collection");
        summary.collection = collect::run_collectors(
            self.store.clone(),
            &self.registry,
            sources,
            Duration::from_secs(self.cfg.collector_timeout_secs),
        )
        .await?;

        info!("phase: classification");
        summary.classified = classify::run_classification(
            self.store.clone(),
            self.classifier.clone(),
            &self.ledger,
            self.classify_options(),
        )
        .await?;

        info!("phase: arc tracking");
        summary.arcs = arcs::update_arcs(self.store.clone(), None).await?.len();

        summary.elapsed_seconds = start.elapsed().as_secs();
        Ok(summary)
    }

    /// `collect`: collection + classification + arc update. The cron
    /// workhorse, several runs a day.
    pub async fn collect(&self, sources: Option<&[Source]>) -> Result<CollectSummary> {
        info!("=== collect run ===");
        self.collect_classify_arcs(sources).await
    }

    /// `daily`: the full morning pipeline through delivery and alerts.
    pub async fn daily(&self, sources: Option<&[Source]>) -> Result<DailySummary> {
        info!("=== daily run ===");
        let start = Instant::now();
        let mut collect = self.collect_classify_arcs(sources).await?;

        info!("phase: synthesis");
        let briefing = synthesize::generate_daily_briefing(self.store.clone(), &self.cfg).await?;

        info!(channel = self.delivery.channel(), "phase: delivery");
        let mut delivered = false;
        match self.delivery.deliver(&briefing).await {
            Ok(()) => delivered = true,
            Err(e) => {
                warn!(channel = self.delivery.channel(), error = %e, "delivery skipped");
                collect.errors.insert("deliver", e.to_string());
            }
        }

        info!("phase: alert check");
        let results = convergence::compute_convergence(
            self.store.clone(),
            self.cfg.alert_window_hours,
            self.cfg.relevance_include,
            self.cfg.convergence_alert_threshold,
        )
        .await?;
        let alerts_sent = pushover::check_and_alert(self.notifier.as_ref(), &results).await;

        collect.elapsed_seconds = start.elapsed().as_secs();
        info!(
            delivered,
            alerts_sent,
            elapsed = collect.elapsed_seconds,
            "daily pipeline complete"
        );
        Ok(DailySummary {
            collect,
            briefing,
            delivered,
            alerts_sent,
        })
    }

    /// `weekly`: shift and debate report over the full arc history window.
    pub async fn weekly(&self) -> Result<WeeklySummary> {
        info!("=== weekly run ===");
        let start = Instant::now();
        let report = synthesize::generate_weekly_report(self.store.clone(), &self.cfg).await?;
        Ok(WeeklySummary {
            report,
            elapsed_seconds: start.elapsed().as_secs(),
        })
    }

    /// `collect-only`: collectors, nothing else.
    pub async fn collect_only(
        &self,
        sources: Option<&[Source]>,
    ) -> Result<BTreeMap<String, SourceCounts>> {
        info!("=== collect-only run ===");
        collect::run_collectors(
            self.store.clone(),
            &self.registry,
            sources,
            Duration::from_secs(self.cfg.collector_timeout_secs),
        )
        .await
    }

    /// `classify-only`: drain the unclassified backlog.
    pub async fn classify_only(&self) -> Result<usize> {
        info!("=== classify-only run ===");
        classify::run_classification(
            self.store.clone(),
            self.classifier.clone(),
            &self.ledger,
            self.classify_options(),
        )
        .await
    }

    /// `test`: collect from the free sources only, classify, no delivery.
    pub async fn test_run(&self) -> Result<CollectSummary> {
        info!("=== test run ===");
        let start = Instant::now();
        let mut summary = CollectSummary::default();

        summary.collection = collect::run_collectors(
            self.store.clone(),
            &self.registry,
            Some(&TEST_SOURCES),
            Duration::from_secs(self.cfg.collector_timeout_secs),
        )
        .await?;

        summary.classified = classify::run_classification(
            self.store.clone(),
            self.classifier.clone(),
            &self.ledger,
            self.classify_options(),
        )
        .await?;

        summary.elapsed_seconds = start.elapsed().as_secs();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::client::ScriptedClassifier;
    use crate::collect::StaticCollector;
    use crate::item::Item;
    use crate::notify::NoopDelivery;
    use crate::store::MemStore;
    use async_trait::async_trait;

    fn test_pipeline(registry: CollectorRegistry, responses: Vec<String>) -> (Pipeline, Arc<MemStore>) {
        let store = Arc::new(MemStore::new());
        let pipeline = Pipeline::new(
            store.clone(),
            registry,
            Arc::new(ScriptedClassifier::new(responses)),
            Arc::new(NoopDelivery),
            None,
            PulseConfig::default(),
        );
        (pipeline, store)
    }

    #[tokio::test]
    async fn collect_run_reports_per_source_counts() {
        let registry = CollectorRegistry::new()
            .register(Arc::new(StaticCollector::new(
                Source::Reddit,
                vec![
                    Item::new(Source::Reddit, "a", "Rates thread"),
                    Item::new(Source::Reddit, "b", "Prices thread"),
                ],
            )))
            .register(Arc::new(StaticCollector::new(
                Source::GoogleNews,
                vec![Item::new(Source::GoogleNews, "n", "Rates thread")],
            )));
        let (pipeline, _store) = test_pipeline(
            registry,
            vec![
                r#"[{"id": 1, "topics": ["mortgage_rates"], "relevance_score": 80},
                    {"id": 2, "topics": ["home_prices"], "relevance_score": 60}]"#
                    .to_string(),
            ],
        );

        let summary = pipeline.collect(None).await.unwrap();
        assert_eq!(summary.collection["reddit"].new, 2);
        // Same title as reddit item "a": content dedup across sources.
        assert_eq!(summary.collection["google_news"].dupes, 1);
        assert_eq!(summary.classified, 2);
        assert!(summary.errors.is_empty());
        assert_eq!(summary.arcs, 2);
    }

    struct FailingDelivery;

    #[async_trait]
    impl Delivery for FailingDelivery {
        fn channel(&self) -> &'static str {
            "broken"
        }
        async fn deliver(&self, _briefing: &DailyBriefing) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("smtp down"))
        }
    }

    #[tokio::test]
    async fn daily_survives_delivery_failure() {
        let registry = CollectorRegistry::new().register(Arc::new(StaticCollector::new(
            Source::Reddit,
            vec![Item::new(Source::Reddit, "a", "Rates thread")],
        )));
        let store = Arc::new(MemStore::new());
        let pipeline = Pipeline::new(
            store,
            registry,
            Arc::new(ScriptedClassifier::new(vec![
                r#"[{"id": 1, "topics": ["mortgage_rates"], "relevance_score": 80}]"#.to_string(),
            ])),
            Arc::new(FailingDelivery),
            None,
            PulseConfig::default(),
        );

        let summary = pipeline.daily(None).await.unwrap();
        assert_eq!(summary.briefing.stats.total_items, 1);
        assert!(!summary.delivered);
        assert_eq!(summary.alerts_sent, 0);
        assert!(summary.collect.errors.contains_key("deliver"));
    }

    /// Store that is down for every call.
    struct DeadStore;

    #[async_trait]
    impl crate::store::Store for DeadStore {
        async fn upsert_items(&self, _items: Vec<Item>) -> anyhow::Result<crate::store::UpsertOutcome> {
            Err(anyhow::anyhow!("database is unavailable"))
        }
        async fn get_unclassified(&self, _limit: usize) -> anyhow::Result<Vec<Item>> {
            Err(anyhow::anyhow!("database is unavailable"))
        }
        async fn apply_classification(
            &self,
            _item_id: i64,
            _fields: crate::item::Classification,
        ) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("database is unavailable"))
        }
        async fn get_items_since(&self, _hours: i64, _min_relevance: i64) -> anyhow::Result<Vec<Item>> {
            Err(anyhow::anyhow!("database is unavailable"))
        }
        async fn upsert_topic_arc(&self, _arc: crate::arcs::TopicArc) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("database is unavailable"))
        }
        async fn get_topic_arc(&self, _topic: &str, _days: i64) -> anyhow::Result<Vec<crate::arcs::TopicArc>> {
            Err(anyhow::anyhow!("database is unavailable"))
        }
        async fn log_collection_run(&self, _run: crate::store::CollectionRun) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("database is unavailable"))
        }
        async fn budget_spent(
            &self,
            _capability: &str,
            _date: chrono::NaiveDate,
        ) -> anyhow::Result<u32> {
            Err(anyhow::anyhow!("database is unavailable"))
        }
        async fn add_budget_spend(
            &self,
            _capability: &str,
            _date: chrono::NaiveDate,
            _cents: u32,
        ) -> anyhow::Result<u32> {
            Err(anyhow::anyhow!("database is unavailable"))
        }
    }

    #[tokio::test]
    async fn dead_store_aborts_the_run() {
        let registry = CollectorRegistry::new().register(Arc::new(StaticCollector::new(
            Source::Reddit,
            vec![Item::new(Source::Reddit, "a", "Rates thread")],
        )));
        let pipeline = Pipeline::new(
            Arc::new(DeadStore),
            registry,
            Arc::new(ScriptedClassifier::new(vec![])),
            Arc::new(NoopDelivery),
            None,
            PulseConfig::default(),
        );

        // No zero-count "success": every command that touches the store
        // surfaces the failure so the process exits non-zero.
        assert!(pipeline.collect(None).await.is_err());
        assert!(pipeline.daily(None).await.is_err());
        assert!(pipeline.classify_only().await.is_err());
        assert!(pipeline.weekly().await.is_err());
    }

    #[tokio::test]
    async fn classify_only_drains_backlog() {
        let (pipeline, store) = test_pipeline(
            CollectorRegistry::new(),
            vec![r#"[{"id": 1, "relevance_score": 55}]"#.to_string()],
        );
        store
            .upsert_items(vec![Item::new(Source::Rss, "x", "Backlog item")])
            .await
            .unwrap();

        let n = pipeline.classify_only().await.unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn test_run_only_touches_free_sources() {
        let registry = CollectorRegistry::new()
            .register(Arc::new(StaticCollector::new(
                Source::Reddit,
                vec![Item::new(Source::Reddit, "a", "Free item")],
            )))
            .register(Arc::new(StaticCollector::new(
                Source::Twitter,
                vec![Item::new(Source::Twitter, "t", "Paid item")],
            )));
        let (pipeline, _store) = test_pipeline(registry, vec![]);

        let summary = pipeline.test_run().await.unwrap();
        assert!(summary.collection.contains_key("reddit"));
        assert!(!summary.collection.contains_key("twitter"));
    }
}
