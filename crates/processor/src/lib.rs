//! Payment processor boundary: live catalog reads, charge creation, purchase
//! history, and verification of the processor's signed notifications.

#![warn(clippy::unwrap_used)]

pub mod client;
pub mod memory;
pub mod provider;
pub mod signature;
pub mod webhook;

pub use client::StripeClient;
pub use memory::InMemoryProcessor;
pub use provider::{Catalog, ChargeGateway, PurchaseHistory};
pub use signature::WebhookVerifier;
