//! Purchase queue: decouples the notification acknowledgment from fan-out.
//!
//! Handlers submit a confirmed charge and return immediately. A background
//! worker drains the channel and processes each event on its own task, so a
//! slow buyer's sinks never hold up the next event.

use crate::coordinator::PurchasePipeline;
use relay_core::types::ConfirmedCharge;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct PurchaseQueue {
    sender: mpsc::Sender<ConfirmedCharge>,
}

impl PurchaseQueue {
    /// Create the queue and spawn its worker. The worker ends once every
    /// queue handle has been dropped and the channel is drained.
    pub fn spawn(pipeline: Arc<PurchasePipeline>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<ConfirmedCharge>(capacity.max(1));

        let worker = tokio::spawn(async move {
            info!(sinks = ?pipeline.sink_names(), "Purchase queue worker started");
            while let Some(charge) = receiver.recv().await {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    pipeline.process(charge).await;
                });
            }
            debug!("Purchase queue closed");
        });

        (Self { sender }, worker)
    }

    /// Hand a confirmed charge to the pipeline without waiting for it. When the
    /// queue is full the charge waits on a detached task rather than being dropped.
    pub fn submit(&self, charge: ConfirmedCharge) {
        match self.sender.try_send(charge) {
            Ok(()) => {
                metrics::counter!("pipeline.queued").increment(1);
            }
            Err(mpsc::error::TrySendError::Full(charge)) => {
                metrics::counter!("pipeline.queue_full").increment(1);
                warn!(charge_id = %charge.charge_id, "Purchase queue full, deferring submission");
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    if let Err(e) = sender.send(charge).await {
                        error!(charge_id = %e.0.charge_id, "Purchase queue closed, event dropped");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(charge)) => {
                metrics::counter!("pipeline.dropped").increment(1);
                error!(charge_id = %charge.charge_id, "Purchase queue closed, event dropped");
            }
        }
    }
}
