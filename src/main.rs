//! Pulse — cross-platform content attention engine, batch CLI entrypoint.
//!
//! Subcommands: collect, daily, weekly, collect-only, classify-only, test.
//! Each prints a JSON run summary to stdout. Partial per-source failures are
//! reported inside the summary; setup and store failures exit non-zero.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pulse_engine::classify::client::build_classifier;
use pulse_engine::collect::CollectorRegistry;
use pulse_engine::notify::{pushover::PushoverNotifier, NoopDelivery};
use pulse_engine::{MemStore, Pipeline, PulseConfig, Source};

const USAGE: &str = "usage: pulse <collect|daily|weekly|collect-only|classify-only|test> \
[--sources <name>...]";

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pulse_engine=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

struct Args {
    command: String,
    sources: Option<Vec<Source>>,
}

fn parse_args() -> Result<Args> {
    let mut argv = std::env::args().skip(1);
    let command = argv.next().context(USAGE)?;

    let mut sources = None;
    let rest: Vec<String> = argv.collect();
    if let Some(pos) = rest.iter().position(|a| a == "--sources") {
        let mut parsed = Vec::new();
        for raw in &rest[pos + 1..] {
            if raw.starts_with("--") {
                break;
            }
            parsed.push(raw.parse::<Source>()?);
        }
        sources = Some(parsed);
    }
    Ok(Args { command, sources })
}

/// Platform collectors are wired in by the deployment; the stock binary runs
/// with whatever the registry builder provides (none by default, which makes
/// collect phases no-ops over an already-populated store).
fn build_registry() -> CollectorRegistry {
    CollectorRegistry::new()
}

async fn run(args: Args) -> Result<ExitCode> {
    let cfg = PulseConfig::load_default().context("loading configuration")?;

    let store = Arc::new(MemStore::new());
    let classifier = build_classifier(cfg.classify_enabled, cfg.classify_model.as_deref());
    let pipeline = Pipeline::new(
        store,
        build_registry(),
        classifier,
        Arc::new(NoopDelivery),
        PushoverNotifier::from_env(),
        cfg,
    );

    let sources = args.sources.as_deref();
    let summary = match args.command.as_str() {
        "collect" => serde_json::to_value(pipeline.collect(sources).await?)?,
        "daily" => serde_json::to_value(pipeline.daily(sources).await?)?,
        "weekly" => serde_json::to_value(pipeline.weekly().await?)?,
        "collect-only" => serde_json::to_value(pipeline.collect_only(sources).await?)?,
        "classify-only" => {
            serde_json::json!({ "classified": pipeline.classify_only().await? })
        }
        "test" => serde_json::to_value(pipeline.test_run().await?)?,
        other => {
            eprintln!("unknown command: {other}\n{USAGE}");
            return Ok(ExitCode::from(2));
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            // Fatal setup or store error; everything recoverable was already
            // folded into the summary.
            eprintln!("pulse: {e:#}");
            ExitCode::FAILURE
        }
    }
}
