//! Capability traits the relay needs from the payment processor. Each
//! consumer takes only the capability it uses.

use async_trait::async_trait;
use relay_core::types::{CatalogPrice, CatalogProduct, ChargeOutcome, ChargeRequest, PriorCharge};
use relay_core::RelayResult;

/// Live product/price listing. Reads are never cached: prices change.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch a product. `Ok(None)` means the catalog has no such product.
    async fn product(&self, product_id: &str) -> RelayResult<Option<CatalogProduct>>;

    /// All prices listed for a product, active or not.
    async fn prices(&self, product_id: &str) -> RelayResult<Vec<CatalogPrice>>;
}

/// Charge creation against the processor, which owns card data and 3-D Secure.
#[async_trait]
pub trait ChargeGateway: Send + Sync {
    /// Find the processor customer for `email`, creating one if absent.
    async fn ensure_customer(&self, email: &str) -> RelayResult<String>;

    async fn create_charge(&self, request: &ChargeRequest) -> RelayResult<ChargeOutcome>;
}

/// Read access to a customer's past charges.
#[async_trait]
pub trait PurchaseHistory: Send + Sync {
    async fn charges(&self, identity_ref: &str) -> RelayResult<Vec<PriorCharge>>;
}
