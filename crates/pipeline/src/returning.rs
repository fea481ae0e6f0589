//! Returning-Customer Evaluator.
//!
//! A buyer is returning when their most recent earlier primary purchase is at
//! least `threshold` old. Charges newer than `now - guard` are ignored so the
//! in-flight purchase never counts as its own history. Any lookup failure
//! yields "not returning".

use chrono::{DateTime, Duration, Utc};
use relay_core::config::PipelineConfig;
use relay_core::types::PriorCharge;
use relay_processor::PurchaseHistory;
use std::sync::Arc;
use tracing::{debug, warn};

pub fn is_returning(
    history: &[PriorCharge],
    now: DateTime<Utc>,
    guard: Duration,
    threshold: Duration,
) -> bool {
    let cutoff = now - guard;
    history
        .iter()
        .filter(|c| c.succeeded && !c.is_upsell && c.created < cutoff)
        .map(|c| c.created)
        .max()
        .is_some_and(|latest| now - latest >= threshold)
}

pub struct ReturningCustomerEvaluator {
    history: Arc<dyn PurchaseHistory>,
    guard: Duration,
    threshold: Duration,
}

impl ReturningCustomerEvaluator {
    pub fn new(history: Arc<dyn PurchaseHistory>, config: &PipelineConfig) -> Self {
        Self {
            history,
            guard: Duration::seconds(config.guard_interval_secs),
            threshold: Duration::seconds(config.returning_threshold_secs),
        }
    }

    pub async fn evaluate(&self, identity_ref: &str, occurred_at: DateTime<Utc>) -> bool {
        match self.history.charges(identity_ref).await {
            Ok(history) => {
                let returning = is_returning(&history, occurred_at, self.guard, self.threshold);
                debug!(identity_ref, returning, prior = history.len(), "Returning-customer check");
                returning
            }
            Err(e) => {
                warn!(identity_ref, error = %e, "Purchase history unavailable, treating as new customer");
                false
            }
        }
    }
}
