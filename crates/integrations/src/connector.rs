//! Capability traits for every downstream system. Each trait is the whole
//! contract the relay relies on; vendor clients and in-process stores implement them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::types::{
    format_amount, CustomerProfile, LeadCapture, OrderRecord, PurchaseEvent,
};
use relay_core::RelayResult;
use serde::{Deserialize, Serialize};

/// Remote customer database addressed by email.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// All profiles whose email equals `email` exactly (normalized form).
    async fn find_by_email(&self, email: &str) -> RelayResult<Vec<CustomerProfile>>;

    /// Create a profile; returns it with the store-assigned id.
    async fn create(&self, profile: &CustomerProfile) -> RelayResult<CustomerProfile>;

    /// Overwrite tags, note, consent and contact fields of an existing profile.
    async fn update(&self, profile: &CustomerProfile) -> RelayResult<CustomerProfile>;
}

/// Commerce-platform order ledger, used for revenue attribution.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Create an order; returns the platform's order id.
    async fn create_order(&self, order: &OrderRecord) -> RelayResult<String>;
}

/// Email/SMS marketing platform.
#[async_trait]
pub trait MarketingPlatform: Send + Sync {
    async fn sync_purchase(&self, event: &PurchaseEvent) -> RelayResult<()>;

    async fn subscribe_lead(&self, lead: &LeadCapture) -> RelayResult<()>;
}

/// Append-only purchase log.
#[async_trait]
pub trait SpreadsheetLog: Send + Sync {
    async fn append_row(&self, row: &SpreadsheetRow) -> RelayResult<()>;
}

/// One spreadsheet row per purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadsheetRow {
    pub timestamp: DateTime<Utc>,
    pub email: String,
    pub name: String,
    pub product: String,
    pub amount: String,
    pub category: String,
    pub charge_id: String,
    pub returning: bool,
}

impl From<&PurchaseEvent> for SpreadsheetRow {
    fn from(event: &PurchaseEvent) -> Self {
        Self {
            timestamp: event.occurred_at,
            email: event.email.clone(),
            name: event.customer_name.clone().unwrap_or_default(),
            product: event.product_name.clone(),
            amount: format_amount(event.amount_minor_units, &event.currency),
            category: event.purchase_category.to_string(),
            charge_id: event.external_charge_id.clone(),
            returning: event.is_returning_customer,
        }
    }
}
