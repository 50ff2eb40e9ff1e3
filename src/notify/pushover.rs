use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;
use tracing::{error, info, warn};

use crate::convergence::ConvergenceResult;

const PUSHOVER_API: &str = "https://api.pushover.net/1/messages.json";

/// Pushover push channel for high-signal convergence alerts. Expected
/// frequency is once or twice a month, so the payload errs on context over
/// brevity.
#[derive(Clone)]
pub struct PushoverNotifier {
    client: Client,
    token: String,
    user: String,
    timeout: Duration,
    max_retries: u8,
}

impl PushoverNotifier {
    pub fn new(token: String, user: String) -> Self {
        Self {
            client: Client::new(),
            token,
            user,
            timeout: Duration::from_secs(15),
            max_retries: 3,
        }
    }

    /// Build from `PUSHOVER_TOKEN` / `PUSHOVER_USER`. Missing credentials
    /// disable the channel rather than failing the run.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("PUSHOVER_TOKEN").unwrap_or_default();
        let user = std::env::var("PUSHOVER_USER").unwrap_or_default();
        if token.is_empty() || user.is_empty() {
            warn!("PUSHOVER_TOKEN or PUSHOVER_USER not set, alerts disabled");
            return None;
        }
        Some(Self::new(token, user))
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    /// Send one push. Priority 0 is normal; 1 bypasses quiet hours.
    pub async fn send_alert(&self, title: &str, message: &str, url: &str, priority: i8) -> Result<()> {
        let title: String = title.chars().take(250).collect();
        let message: String = message.chars().take(1024).collect();
        let url: String = url.chars().take(512).collect();

        let mut form: Vec<(&str, String)> = vec![
            ("token", self.token.clone()),
            ("user", self.user.clone()),
            ("title", title.clone()),
            ("message", message),
            ("priority", priority.to_string()),
            ("sound", "pushover".to_string()),
        ];
        if !url.is_empty() {
            form.push(("url", url));
            form.push(("url_title", "View story".to_string()));
        }

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(PUSHOVER_API)
                .timeout(self.timeout)
                .form(&form)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("Pushover HTTP error: {e}"));
                    }
                    info!(title = %title, "pushover alert sent");
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("Pushover request failed: {e}"));
                }
            }
        }
    }
}

/// Push one alert per alert-worthy convergence result. Returns the number of
/// alerts actually delivered; individual failures are logged and skipped.
pub async fn check_and_alert(
    notifier: Option<&PushoverNotifier>,
    results: &[ConvergenceResult],
) -> usize {
    let Some(notifier) = notifier else {
        return 0;
    };

    let mut sent = 0usize;
    for result in results {
        if !result.is_alert_worthy {
            continue;
        }
        let platforms: Vec<&str> = result.platforms.iter().map(|s| s.as_str()).collect();
        let title = format!("{}: {} platforms", result.label, result.platform_count);
        let message = format!(
            "Trending across {}\n{} items, avg relevance {}\nConvergence score: {:.1}",
            platforms.join(", "),
            result.total_items,
            result.avg_relevance,
            result.convergence_score
        );
        let url = result.top_items.first().map(|i| i.url.as_str()).unwrap_or("");

        match notifier.send_alert(&title, &message, url, 0).await {
            Ok(()) => {
                sent += 1;
                metrics::counter!("alerts_sent_total").increment(1);
            }
            Err(e) => error!(topic = %result.topic, error = %e, "alert delivery failed"),
        }
    }
    sent
}
