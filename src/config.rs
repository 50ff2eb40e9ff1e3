//! Runtime configuration: thresholds, limits, and budget caps.
//!
//! Loaded from an optional TOML or JSON file (env path override, then
//! `config/pulse.toml`, then `config/pulse.json`), with per-field env
//! overrides for the budget caps. Missing file means defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

const ENV_PATH: &str = "PULSE_CONFIG_PATH";

/// Ledger capability name for the paid search collector.
pub const SEARCH_CAPABILITY: &str = "search";

fn default_relevance_include() -> i64 {
    30
}
fn default_relevance_highlight() -> i64 {
    70
}
fn default_alert_threshold() -> usize {
    4
}
fn default_batch_size() -> usize {
    20
}
fn default_max_items() -> usize {
    500
}
fn default_true() -> bool {
    true
}
fn default_collector_timeout_secs() -> u64 {
    120
}
fn default_alert_window_hours() -> i64 {
    6
}
fn default_shift_lookback_days() -> i64 {
    14
}
fn default_shift_threshold() -> f64 {
    0.4
}
fn default_debate_min_items() -> usize {
    4
}
fn default_debate_min_side_pct() -> f64 {
    0.2
}
fn default_min_comments() -> u32 {
    10
}

fn default_budget_caps() -> HashMap<String, u32> {
    let mut caps = HashMap::new();
    caps.insert(SEARCH_CAPABILITY.to_string(), 300);
    caps.insert(crate::classify::CAPABILITY.to_string(), 50);
    caps
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    /// Items below this relevance are ignored by convergence/arcs reads.
    #[serde(default = "default_relevance_include")]
    pub relevance_include: i64,
    /// Items at or above this relevance are featured in the briefing.
    #[serde(default = "default_relevance_highlight")]
    pub relevance_highlight: i64,
    /// Distinct platforms required before a topic pages anyone.
    #[serde(default = "default_alert_threshold")]
    pub convergence_alert_threshold: usize,

    #[serde(default = "default_true")]
    pub classify_enabled: bool,
    #[serde(default = "default_batch_size")]
    pub classify_batch_size: usize,
    #[serde(default = "default_max_items")]
    pub classify_max_items: usize,
    #[serde(default)]
    pub classify_model: Option<String>,

    /// Daily cents caps per capability. Absent capability = unmetered.
    #[serde(default = "default_budget_caps")]
    pub budget_caps: HashMap<String, u32>,

    #[serde(default = "default_collector_timeout_secs")]
    pub collector_timeout_secs: u64,
    /// Alert check looks at only very recent items.
    #[serde(default = "default_alert_window_hours")]
    pub alert_window_hours: i64,

    #[serde(default = "default_shift_lookback_days")]
    pub shift_lookback_days: i64,
    #[serde(default = "default_shift_threshold")]
    pub shift_threshold: f64,

    #[serde(default = "default_debate_min_items")]
    pub debate_min_items: usize,
    #[serde(default = "default_debate_min_side_pct")]
    pub debate_min_side_pct: f64,

    /// Below this comment count a forum post is a link share, not a
    /// conversation.
    #[serde(default = "default_min_comments")]
    pub min_comments_for_conversation: u32,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            relevance_include: default_relevance_include(),
            relevance_highlight: default_relevance_highlight(),
            convergence_alert_threshold: default_alert_threshold(),
            classify_enabled: true,
            classify_batch_size: default_batch_size(),
            classify_max_items: default_max_items(),
            classify_model: None,
            budget_caps: default_budget_caps(),
            collector_timeout_secs: default_collector_timeout_secs(),
            alert_window_hours: default_alert_window_hours(),
            shift_lookback_days: default_shift_lookback_days(),
            shift_threshold: default_shift_threshold(),
            debate_min_items: default_debate_min_items(),
            debate_min_side_pct: default_debate_min_side_pct(),
            min_comments_for_conversation: default_min_comments(),
        }
    }
}

impl PulseConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg: PulseConfig = if ext == "json" {
            serde_json::from_str(&content).context("parsing JSON config")?
        } else {
            toml::from_str(&content).context("parsing TOML config")?
        };
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $PULSE_CONFIG_PATH
    /// 2) config/pulse.toml
    /// 3) config/pulse.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("PULSE_CONFIG_PATH points to non-existent path"));
        }
        for candidate in ["config/pulse.toml", "config/pulse.json"] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(cents) = env_cents("TWITTER_DAILY_BUDGET_CENTS") {
            self.budget_caps.insert(SEARCH_CAPABILITY.to_string(), cents);
        }
        if let Some(cents) = env_cents("CLASSIFIER_DAILY_BUDGET_CENTS") {
            self.budget_caps
                .insert(crate::classify::CAPABILITY.to_string(), cents);
        }
    }

    fn sanitize(&mut self) {
        if self.classify_batch_size == 0 || self.classify_batch_size > 20 {
            warn!(
                batch_size = self.classify_batch_size,
                "classify_batch_size out of range, using default"
            );
            self.classify_batch_size = default_batch_size();
        }
        if !(0.0..=2.0).contains(&self.shift_threshold) {
            self.shift_threshold = default_shift_threshold();
        }
        if !(0.0..=0.5).contains(&self.debate_min_side_pct) {
            self.debate_min_side_pct = default_debate_min_side_pct();
        }
        if self.relevance_highlight < self.relevance_include {
            std::mem::swap(&mut self.relevance_highlight, &mut self.relevance_include);
        }
    }
}

fn env_cents(var: &str) -> Option<u32> {
    let raw = env::var(var).ok()?;
    match raw.trim().parse::<u32>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var, raw = %raw, "ignoring unparseable budget override");
            None
        }
    }
}
