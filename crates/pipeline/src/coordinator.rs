//! Fan-out Coordinator and the end-to-end purchase pipeline.

use crate::classifier::PurchaseClassifier;
use crate::returning::ReturningCustomerEvaluator;
use crate::sinks::PurchaseSink;
use relay_core::types::{ConfirmedCharge, PurchaseEvent};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub sink: &'static str,
    pub error: Option<String>,
}

/// How each sink settled for one event. Failures are informational only:
/// the event counts as accepted whatever the sinks did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub charge_id: String,
    pub sinks: Vec<SinkReport>,
}

impl FanOutReport {
    pub fn attempted(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.sink).collect()
    }

    pub fn failed(&self) -> Vec<&'static str> {
        self.sinks
            .iter()
            .filter(|s| s.error.is_some())
            .map(|s| s.sink)
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.sinks.iter().all(|s| s.error.is_none())
    }
}

/// Runs every sink concurrently on its own task and waits for all to settle.
#[derive(Default)]
pub struct FanOutCoordinator {
    sinks: Vec<Arc<dyn PurchaseSink>>,
}

impl FanOutCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn PurchaseSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub async fn dispatch(&self, event: PurchaseEvent) -> FanOutReport {
        let event = Arc::new(event);
        let handles: Vec<_> = self
            .sinks
            .iter()
            .map(|sink| {
                let sink = sink.clone();
                let event = event.clone();
                (sink.name(), tokio::spawn(async move { sink.handle(&event).await }))
            })
            .collect();

        let mut report = FanOutReport {
            charge_id: event.external_charge_id.clone(),
            sinks: Vec::with_capacity(handles.len()),
        };
        for (sink, handle) in handles {
            let error = match handle.await {
                Ok(Ok(())) => {
                    metrics::counter!("pipeline.sink.succeeded", "sink" => sink).increment(1);
                    None
                }
                Ok(Err(e)) => {
                    metrics::counter!("pipeline.sink.failed", "sink" => sink).increment(1);
                    warn!(sink, charge_id = %event.external_charge_id, email = %event.email, error = %e, "Purchase sink failed");
                    Some(e.to_string())
                }
                Err(e) => {
                    metrics::counter!("pipeline.sink.failed", "sink" => sink).increment(1);
                    error!(sink, charge_id = %event.external_charge_id, error = %e, "Purchase sink task aborted");
                    Some(e.to_string())
                }
            };
            report.sinks.push(SinkReport { sink, error });
        }
        report
    }
}

/// Classify, evaluate, fan out.
pub struct PurchasePipeline {
    classifier: PurchaseClassifier,
    evaluator: ReturningCustomerEvaluator,
    coordinator: FanOutCoordinator,
}

impl PurchasePipeline {
    pub fn new(
        classifier: PurchaseClassifier,
        evaluator: ReturningCustomerEvaluator,
        coordinator: FanOutCoordinator,
    ) -> Self {
        Self {
            classifier,
            evaluator,
            coordinator,
        }
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.coordinator.sink_names()
    }

    pub async fn process(&self, charge: ConfirmedCharge) -> FanOutReport {
        let is_upsell = charge.is_upsell;
        let mut event = self.classifier.classify(charge).await;
        if !is_upsell {
            event.is_returning_customer = self
                .evaluator
                .evaluate(&event.identity_ref, event.occurred_at)
                .await;
        }

        info!(
            charge_id = %event.external_charge_id,
            email = %event.email,
            category = %event.purchase_category,
            returning = event.is_returning_customer,
            "Purchase classified"
        );
        metrics::counter!("pipeline.events").increment(1);

        let report = self.coordinator.dispatch(event).await;
        if report.all_succeeded() {
            info!(charge_id = %report.charge_id, sinks = report.sinks.len(), "Purchase fan-out complete");
        } else {
            warn!(charge_id = %report.charge_id, failed = ?report.failed(), "Purchase fan-out completed with failures");
        }
        report
    }
}
