//! Post-purchase reconciliation: classify a confirmed charge, decide whether
//! the buyer is returning, then fan the purchase out to every downstream sink.

#![warn(clippy::unwrap_used)]

pub mod classifier;
pub mod coordinator;
pub mod merger;
pub mod queue;
pub mod recorder;
pub mod returning;
pub mod sinks;

pub use classifier::PurchaseClassifier;
pub use coordinator::{FanOutCoordinator, FanOutReport, PurchasePipeline, SinkReport};
pub use merger::{MergeOutcome, ProfileMerger};
pub use queue::PurchaseQueue;
pub use recorder::{OrderRecorder, RecordOutcome};
pub use returning::ReturningCustomerEvaluator;
pub use sinks::{MarketingSink, PurchaseSink, SpreadsheetSink};
