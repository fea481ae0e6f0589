//! In-process processor: a seeded catalog, recorded charges and purchase
//! history, with call counters and failure switches. Backs local runs and tests.

use crate::provider::{Catalog, ChargeGateway, PurchaseHistory};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use relay_core::types::{
    CatalogPrice, CatalogProduct, ChargeKind, ChargeOutcome, ChargeRequest, ChargeStatus,
    PriorCharge,
};
use relay_core::{RelayError, RelayResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct InMemoryProcessor {
    products: DashMap<String, CatalogProduct>,
    prices: DashMap<String, Vec<CatalogPrice>>,
    history: DashMap<String, Vec<PriorCharge>>,
    customers: DashMap<String, String>,
    charges: Mutex<Vec<ChargeRequest>>,
    catalog_calls: AtomicUsize,
    history_calls: AtomicUsize,
    fail_catalog: AtomicBool,
    fail_history: AtomicBool,
    decline_charges: AtomicBool,
    require_followup: AtomicBool,
}

impl InMemoryProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a product with one active price per entry of `amounts` (in usd).
    pub fn with_product(self, id: &str, name: &str, active: bool, amounts: &[i64]) -> Self {
        self.products.insert(
            id.to_string(),
            CatalogProduct {
                id: id.to_string(),
                name: name.to_string(),
                active,
                vendor: None,
            },
        );
        let prices = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| CatalogPrice {
                id: format!("price_{id}_{i}"),
                product_id: id.to_string(),
                unit_amount: *amount,
                currency: "usd".to_string(),
                active: true,
            })
            .collect();
        self.prices.insert(id.to_string(), prices);
        self
    }

    pub fn add_price(&self, price: CatalogPrice) {
        self.prices
            .entry(price.product_id.clone())
            .or_default()
            .push(price);
    }

    pub fn add_prior_charge(&self, identity_ref: &str, charge: PriorCharge) {
        self.history
            .entry(identity_ref.to_string())
            .or_default()
            .push(charge);
    }

    pub fn set_catalog_failing(&self, failing: bool) {
        self.fail_catalog.store(failing, Ordering::SeqCst);
    }

    pub fn set_history_failing(&self, failing: bool) {
        self.fail_history.store(failing, Ordering::SeqCst);
    }

    pub fn set_declining(&self, declining: bool) {
        self.decline_charges.store(declining, Ordering::SeqCst);
    }

    pub fn set_requires_followup(&self, followup: bool) {
        self.require_followup.store(followup, Ordering::SeqCst);
    }

    pub fn catalog_calls(&self) -> usize {
        self.catalog_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    /// Every charge request received, in order.
    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().clone()
    }

    fn catalog_read(&self) -> RelayResult<()> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_catalog.load(Ordering::SeqCst) {
            return Err(RelayError::CatalogUnavailable("catalog offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Catalog for InMemoryProcessor {
    async fn product(&self, product_id: &str) -> RelayResult<Option<CatalogProduct>> {
        self.catalog_read()?;
        Ok(self.products.get(product_id).map(|p| p.clone()))
    }

    async fn prices(&self, product_id: &str) -> RelayResult<Vec<CatalogPrice>> {
        self.catalog_read()?;
        Ok(self
            .prices
            .get(product_id)
            .map(|p| p.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChargeGateway for InMemoryProcessor {
    async fn ensure_customer(&self, email: &str) -> RelayResult<String> {
        let next = self.customers.len() + 1;
        Ok(self
            .customers
            .entry(email.to_string())
            .or_insert_with(|| format!("cus_{next}"))
            .clone())
    }

    async fn create_charge(&self, request: &ChargeRequest) -> RelayResult<ChargeOutcome> {
        if self.decline_charges.load(Ordering::SeqCst) {
            return Err(RelayError::UpstreamRejected("Your card was declined.".into()));
        }

        let charge_id = {
            let mut charges = self.charges.lock();
            charges.push(request.clone());
            format!("pi_{}", charges.len())
        };

        if self.require_followup.load(Ordering::SeqCst) {
            return Ok(ChargeOutcome {
                status: ChargeStatus::RequiresFollowup,
                client_secret: Some(format!("{charge_id}_secret")),
                charge_id,
                identity_ref: request.identity_ref.clone(),
            });
        }

        self.add_prior_charge(
            &request.identity_ref,
            PriorCharge {
                id: charge_id.clone(),
                created: Utc::now(),
                succeeded: true,
                is_upsell: request.kind == ChargeKind::Upsell,
            },
        );

        Ok(ChargeOutcome {
            status: ChargeStatus::Succeeded,
            charge_id,
            identity_ref: request.identity_ref.clone(),
            client_secret: None,
        })
    }
}

#[async_trait]
impl PurchaseHistory for InMemoryProcessor {
    async fn charges(&self, identity_ref: &str) -> RelayResult<Vec<PriorCharge>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(RelayError::integration("payment-processor", "history offline"));
        }
        Ok(self
            .history
            .get(identity_ref)
            .map(|h| h.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_catalog() {
        let processor = InMemoryProcessor::new().with_product("prod_main", "Main Course", true, &[4700]);
        let product = processor.product("prod_main").await.unwrap().unwrap();
        assert_eq!(product.name, "Main Course");
        assert_eq!(processor.prices("prod_main").await.unwrap()[0].unit_amount, 4700);
        assert_eq!(processor.catalog_calls(), 2);
    }

    #[tokio::test]
    async fn test_ensure_customer_is_stable() {
        let processor = InMemoryProcessor::new();
        let a = processor.ensure_customer("a@x.com").await.unwrap();
        let b = processor.ensure_customer("b@x.com").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(processor.ensure_customer("a@x.com").await.unwrap(), a);
    }
}
