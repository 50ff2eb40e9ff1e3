// tests/pipeline_e2e.rs
// Full daily pipeline over an in-memory store: collect across four
// platforms, classify with a scripted capability, aggregate, and check the
// alert flag.

use std::sync::Arc;

use pulse_engine::classify::client::ScriptedClassifier;
use pulse_engine::collect::{CollectorRegistry, StaticCollector};
use pulse_engine::notify::NoopDelivery;
use pulse_engine::{Item, MemStore, Pipeline, PulseConfig, Source, Store};

fn registry_with_four_platforms() -> CollectorRegistry {
    CollectorRegistry::new()
        .register(Arc::new(StaticCollector::new(
            Source::Reddit,
            vec![Item::new(Source::Reddit, "r1", "Mortgage rates megathread")],
        )))
        .register(Arc::new(StaticCollector::new(
            Source::Bluesky,
            vec![Item::new(Source::Bluesky, "b1", "Rates are reshaping the market")],
        )))
        .register(Arc::new(StaticCollector::new(
            Source::GoogleNews,
            vec![Item::new(Source::GoogleNews, "g1", "Mortgage rates tick higher")],
        )))
        .register(Arc::new(StaticCollector::new(
            Source::Hackernews,
            vec![Item::new(Source::Hackernews, "h1", "Ask HN: locking a rate now?")],
        )))
}

fn scripted_classifier() -> Arc<ScriptedClassifier> {
    Arc::new(ScriptedClassifier::new(vec![r#"[
        {"id": 1, "topics": ["mortgage_rates"], "relevance_score": 80, "sentiment": "bearish"},
        {"id": 2, "topics": ["mortgage_rates"], "relevance_score": 75, "sentiment": "bearish"},
        {"id": 3, "topics": ["mortgage_rates"], "relevance_score": 60, "sentiment": "neutral"},
        {"id": 4, "topics": ["mortgage_rates"], "relevance_score": 70, "sentiment": "bullish"}
    ]"#
    .to_string()]))
}

#[tokio::test]
async fn daily_run_flags_four_platform_convergence() {
    let store = Arc::new(MemStore::new());
    let pipeline = Pipeline::new(
        store.clone(),
        registry_with_four_platforms(),
        scripted_classifier(),
        Arc::new(NoopDelivery),
        None,
        PulseConfig::default(),
    );

    let summary = pipeline.daily(None).await.unwrap();
    assert!(summary.collect.errors.is_empty());
    assert_eq!(summary.collect.classified, 4);
    assert_eq!(summary.collect.arcs, 1);
    assert!(summary.delivered);
    // No Pushover credentials wired in.
    assert_eq!(summary.alerts_sent, 0);

    let briefing = summary.briefing;
    assert_eq!(briefing.stats.total_items, 4);
    assert_eq!(briefing.stats.platforms_active, 4);

    let top = &briefing.convergence[0];
    assert_eq!(top.topic, "mortgage_rates");
    assert_eq!(top.platform_count, 4);
    assert!(top.is_alert_worthy);
    // 4 platforms * 0.7125 avg relevance * 3.0 organic * (4/5) volume.
    assert!((top.convergence_score - 6.84).abs() < 0.01);
}

#[tokio::test]
async fn collect_then_daily_does_not_double_count() {
    let store = Arc::new(MemStore::new());
    let pipeline = Pipeline::new(
        store.clone(),
        registry_with_four_platforms(),
        scripted_classifier(),
        Arc::new(NoopDelivery),
        None,
        PulseConfig::default(),
    );

    let first = pipeline.collect(None).await.unwrap();
    assert_eq!(first.classified, 4);

    // Same collectors again: everything is a dupe, nothing to classify,
    // arcs recompute in place.
    let second = pipeline.daily(None).await.unwrap();
    let dupes: usize = second.collect.collection.values().map(|c| c.dupes).sum();
    assert_eq!(dupes, 4);
    assert_eq!(second.collect.classified, 0);
    assert_eq!(store.item_count(), 4);

    let briefing = second.briefing;
    assert_eq!(briefing.stats.total_items, 4);
    assert_eq!(briefing.convergence[0].total_items, 4);
}

#[tokio::test]
async fn three_platforms_do_not_alert() {
    let registry = CollectorRegistry::new()
        .register(Arc::new(StaticCollector::new(
            Source::Reddit,
            vec![Item::new(Source::Reddit, "r1", "Mortgage rates megathread")],
        )))
        .register(Arc::new(StaticCollector::new(
            Source::Bluesky,
            vec![Item::new(Source::Bluesky, "b1", "Rates are reshaping the market")],
        )))
        .register(Arc::new(StaticCollector::new(
            Source::GoogleNews,
            vec![Item::new(Source::GoogleNews, "g1", "Mortgage rates tick higher")],
        )));
    let classifier = Arc::new(ScriptedClassifier::new(vec![r#"[
        {"id": 1, "topics": ["mortgage_rates"], "relevance_score": 80},
        {"id": 2, "topics": ["mortgage_rates"], "relevance_score": 75},
        {"id": 3, "topics": ["mortgage_rates"], "relevance_score": 60}
    ]"#
    .to_string()]));

    let pipeline = Pipeline::new(
        Arc::new(MemStore::new()),
        registry,
        classifier,
        Arc::new(NoopDelivery),
        None,
        PulseConfig::default(),
    );

    let summary = pipeline.daily(None).await.unwrap();
    let briefing = summary.briefing;
    assert_eq!(briefing.convergence[0].platform_count, 3);
    assert!(!briefing.convergence[0].is_alert_worthy);
}
