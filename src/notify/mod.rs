//! Delivery collaborators: push alerts plus the briefing hand-off seam.

pub mod pushover;

use async_trait::async_trait;

use crate::synthesize::DailyBriefing;

/// Downstream briefing channel (email renderer, Notion sync). The engine
/// only hands the assembled briefing over; rendering lives outside.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn channel(&self) -> &'static str;
    async fn deliver(&self, briefing: &DailyBriefing) -> anyhow::Result<()>;
}

/// Default channel when no delivery collaborator is wired in.
pub struct NoopDelivery;

#[async_trait]
impl Delivery for NoopDelivery {
    fn channel(&self) -> &'static str {
        "noop"
    }

    async fn deliver(&self, _briefing: &DailyBriefing) -> anyhow::Result<()> {
        Ok(())
    }
}
