//! Order Recorder: one commerce-platform order per charge.
//!
//! The charge id is claimed in the seen-charge ledger before the order is
//! created, so a redelivered notification creates nothing. A failed create
//! releases the claim so a later delivery can retry it.

use relay_cache::ChargeLedger;
use relay_core::types::{
    BillingAddress, OrderLineItem, OrderRecord, OrderTransaction, PurchaseCategory, PurchaseEvent,
    RETURNING_TAG,
};
use relay_core::RelayResult;
use relay_integrations::{OrderStore, ProfileStore};
use relay_processor::Catalog;
use std::sync::Arc;
use tracing::{debug, info, warn};

const GATEWAY: &str = "stripe";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Created(String),
    Duplicate,
}

pub struct OrderRecorder {
    orders: Arc<dyn OrderStore>,
    profiles: Option<Arc<dyn ProfileStore>>,
    catalog: Arc<dyn Catalog>,
    ledger: Arc<dyn ChargeLedger>,
    vendor: String,
    main_purchase_tag: String,
}

impl OrderRecorder {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        catalog: Arc<dyn Catalog>,
        ledger: Arc<dyn ChargeLedger>,
        vendor: impl Into<String>,
        main_purchase_tag: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            profiles: None,
            catalog,
            ledger,
            vendor: vendor.into(),
            main_purchase_tag: main_purchase_tag.into(),
        }
    }

    /// Attach orders to the buyer's profile when one can be found.
    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileStore>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub async fn record(&self, event: &PurchaseEvent) -> RelayResult<RecordOutcome> {
        let key = ledger_key(&event.external_charge_id);
        match self.ledger.claim(&key).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(charge_id = %event.external_charge_id, "Order already recorded for charge");
                return Ok(RecordOutcome::Duplicate);
            }
            Err(e) => {
                warn!(charge_id = %event.external_charge_id, error = %e, "Charge ledger unavailable, recording without duplicate check");
            }
        }

        let order = self.build_order(event).await;
        match self.orders.create_order(&order).await {
            Ok(order_id) => {
                info!(charge_id = %event.external_charge_id, order_id = %order_id, "Order recorded");
                Ok(RecordOutcome::Created(order_id))
            }
            Err(e) => {
                if let Err(release) = self.ledger.release(&key).await {
                    warn!(charge_id = %event.external_charge_id, error = %release, "Failed to release charge claim");
                }
                Err(e)
            }
        }
    }

    async fn build_order(&self, event: &PurchaseEvent) -> OrderRecord {
        let (title, vendor) = match self.catalog.product(&event.product_id).await {
            Ok(Some(product)) => (product.name, product.vendor.unwrap_or_else(|| self.vendor.clone())),
            Ok(None) => (event.product_name.clone(), self.vendor.clone()),
            Err(e) => {
                warn!(product_id = %event.product_id, error = %e, "Catalog lookup failed, using event product");
                (event.product_name.clone(), self.vendor.clone())
            }
        };

        let category_tag = match &event.purchase_category {
            PurchaseCategory::MainPurchase => self.main_purchase_tag.clone(),
            PurchaseCategory::Upsell(slug) => slug.clone(),
        };
        let mut tags = vec![category_tag, format!("charge-{}", event.external_charge_id)];
        if event.is_returning_customer {
            tags.push(RETURNING_TAG.to_string());
        }

        OrderRecord {
            id: None,
            email: event.email.clone(),
            customer_id: self.customer_id(&event.email).await,
            external_charge_id: event.external_charge_id.clone(),
            line_item: OrderLineItem {
                title,
                product_id: event.product_id.clone(),
                vendor,
                price_minor_units: event.amount_minor_units,
                quantity: 1,
            },
            transaction: OrderTransaction {
                amount_minor_units: event.amount_minor_units,
                currency: event.currency.clone(),
                gateway: GATEWAY.to_string(),
                authorization: event.external_charge_id.clone(),
            },
            billing_address: BillingAddress::placeholder(event.customer_name.as_deref()),
            tags,
            note: format!(
                "Payment processor charge {} ({})",
                event.external_charge_id, event.purchase_category
            ),
            processed_at: event.occurred_at,
        }
    }

    async fn customer_id(&self, email: &str) -> Option<String> {
        let profiles = self.profiles.as_ref()?;
        match profiles.find_by_email(email).await {
            Ok(matches) => matches.into_iter().next().and_then(|p| p.id),
            Err(e) => {
                debug!(email, error = %e, "Profile lookup for order failed");
                None
            }
        }
    }
}

fn ledger_key(charge_id: &str) -> String {
    format!("order:{charge_id}")
}
