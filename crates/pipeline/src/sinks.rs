//! Everything the fan-out delivers a purchase to implements [`PurchaseSink`].

use crate::merger::ProfileMerger;
use crate::recorder::OrderRecorder;
use async_trait::async_trait;
use relay_cache::ChargeLedger;
use relay_core::types::PurchaseEvent;
use relay_core::RelayResult;
use relay_integrations::{MarketingPlatform, SpreadsheetLog, SpreadsheetRow};
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait PurchaseSink: Send + Sync {
    /// Stable name used in logs and metric labels.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &PurchaseEvent) -> RelayResult<()>;
}

#[async_trait]
impl PurchaseSink for ProfileMerger {
    fn name(&self) -> &'static str {
        "profile"
    }

    async fn handle(&self, event: &PurchaseEvent) -> RelayResult<()> {
        self.merge_purchase(event).await.map(|_| ())
    }
}

#[async_trait]
impl PurchaseSink for OrderRecorder {
    fn name(&self) -> &'static str {
        "order"
    }

    async fn handle(&self, event: &PurchaseEvent) -> RelayResult<()> {
        self.record(event).await.map(|_| ())
    }
}

/// Profile upsert plus list subscription on the marketing platform. The
/// platform's upsert is keyed by email, so redelivery is harmless.
pub struct MarketingSink {
    platform: Arc<dyn MarketingPlatform>,
}

impl MarketingSink {
    pub fn new(platform: Arc<dyn MarketingPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl PurchaseSink for MarketingSink {
    fn name(&self) -> &'static str {
        "marketing"
    }

    async fn handle(&self, event: &PurchaseEvent) -> RelayResult<()> {
        self.platform.sync_purchase(event).await
    }
}

/// Appends one row per charge; the ledger suppresses rows for redeliveries.
pub struct SpreadsheetSink {
    log: Arc<dyn SpreadsheetLog>,
    ledger: Arc<dyn ChargeLedger>,
}

impl SpreadsheetSink {
    pub fn new(log: Arc<dyn SpreadsheetLog>, ledger: Arc<dyn ChargeLedger>) -> Self {
        Self { log, ledger }
    }
}

#[async_trait]
impl PurchaseSink for SpreadsheetSink {
    fn name(&self) -> &'static str {
        "spreadsheet"
    }

    async fn handle(&self, event: &PurchaseEvent) -> RelayResult<()> {
        let key = format!("sheet:{}", event.external_charge_id);
        match self.ledger.claim(&key).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(charge_id = %event.external_charge_id, "Spreadsheet row already written");
                return Ok(());
            }
            Err(e) => warn!(charge_id = %event.external_charge_id, error = %e, "Charge ledger unavailable"),
        }

        let result = self.log.append_row(&SpreadsheetRow::from(event)).await;
        if result.is_err() {
            if let Err(e) = self.ledger.release(&key).await {
                warn!(charge_id = %event.external_charge_id, error = %e, "Failed to release charge claim");
            }
        }
        result
    }
}
