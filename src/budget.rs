//! Daily spend ledger for paid external capabilities.
//!
//! One row per (capability, date), integer cents, additive increments only.
//! Callers check before each unit of paid work and record the reported cost
//! after; when the capability reports nothing, they record a conservative
//! estimate. If the ledger itself is unreadable we fail open: stalling every
//! collection run is worse than risking one day of overrun, but it is logged
//! loudly.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{error, info, warn};

use crate::store::Store;

#[derive(Clone)]
pub struct BudgetLedger {
    store: Arc<dyn Store>,
    /// Daily cap in cents per capability. A capability with no cap here is
    /// treated as unmetered.
    caps: HashMap<String, u32>,
}

impl BudgetLedger {
    pub fn new(store: Arc<dyn Store>, caps: HashMap<String, u32>) -> Self {
        Self { store, caps }
    }

    pub fn cap_cents(&self, capability: &str) -> Option<u32> {
        self.caps.get(capability).copied()
    }

    /// True when the capability may spend today. Strict `spent < cap`: a
    /// spend landing exactly on the cap closes the gate until date rollover.
    pub async fn check_budget(&self, capability: &str) -> bool {
        self.check_budget_on(capability, Utc::now().date_naive()).await
    }

    pub async fn check_budget_on(&self, capability: &str, date: NaiveDate) -> bool {
        let Some(cap) = self.cap_cents(capability) else {
            return true;
        };
        let spent = match self.store.budget_spent(capability, date).await {
            Ok(cents) => cents,
            Err(e) => {
                error!(capability, error = %e, "budget ledger unreadable; failing open");
                return true;
            }
        };
        if spent >= cap {
            warn!(capability, spent, cap, "daily budget exhausted; skipping paid call");
            return false;
        }
        true
    }

    /// Record actual spend. Increment is atomic at the store, so repeated or
    /// concurrent runs converge to the sum.
    pub async fn record_spend(&self, capability: &str, cents: u32) {
        self.record_spend_on(capability, Utc::now().date_naive(), cents)
            .await
    }

    pub async fn record_spend_on(&self, capability: &str, date: NaiveDate, cents: u32) {
        match self.store.add_budget_spend(capability, date, cents).await {
            Ok(total) => {
                let cap = self.cap_cents(capability).unwrap_or(0);
                info!(capability, spent = total, cap, "recorded paid-capability spend");
            }
            Err(e) => {
                error!(capability, cents, error = %e, "budget ledger unwritable; spend not recorded");
            }
        }
    }
}

/// Round a reported USD cost up to whole cents. Never undercounts.
pub fn cents_from_usd(usd: f64) -> u32 {
    if !usd.is_finite() || usd <= 0.0 {
        return 0;
    }
    (usd * 100.0).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn ledger(cap: u32) -> BudgetLedger {
        let mut caps = HashMap::new();
        caps.insert("apify".to_string(), cap);
        BudgetLedger::new(Arc::new(MemStore::new()), caps)
    }

    #[tokio::test]
    async fn gate_closes_once_cap_reached() {
        let ledger = ledger(300);
        let day = Utc::now().date_naive();
        assert!(ledger.check_budget_on("apify", day).await);

        ledger.record_spend_on("apify", day, 299).await;
        assert!(ledger.check_budget_on("apify", day).await);

        // Crossing the cap is allowed; further calls are not.
        ledger.record_spend_on("apify", day, 50).await;
        assert!(!ledger.check_budget_on("apify", day).await);
    }

    #[tokio::test]
    async fn spend_on_boundary_is_inclusive() {
        let ledger = ledger(100);
        let day = Utc::now().date_naive();
        ledger.record_spend_on("apify", day, 100).await;
        assert!(!ledger.check_budget_on("apify", day).await);
    }

    #[tokio::test]
    async fn date_rollover_resets_the_gate() {
        let ledger = ledger(100);
        let yesterday = Utc::now().date_naive() - chrono::Duration::days(1);
        ledger.record_spend_on("apify", yesterday, 500).await;
        assert!(ledger.check_budget_on("apify", Utc::now().date_naive()).await);
    }

    #[tokio::test]
    async fn unmetered_capability_always_passes() {
        let ledger = ledger(100);
        assert!(ledger.check_budget("gmail").await);
    }

    #[test]
    fn usd_rounds_up_and_clamps() {
        assert_eq!(cents_from_usd(0.161), 17);
        assert_eq!(cents_from_usd(0.0), 0);
        assert_eq!(cents_from_usd(-1.0), 0);
        assert_eq!(cents_from_usd(f64::NAN), 0);
    }
}
