//! Seen-charge ledger: remembers which charge ids a sink already applied so
//! redelivered processor notifications become no-ops.

use async_trait::async_trait;
use relay_core::RelayResult;

#[async_trait]
pub trait ChargeLedger: Send + Sync {
    /// Atomically record `key`. Returns `false` if it was already present and unexpired.
    async fn claim(&self, key: &str) -> RelayResult<bool>;

    /// Forget `key`, so a failed side effect can be applied on a later delivery.
    async fn release(&self, key: &str) -> RelayResult<()>;

    /// Drop expired entries. Backends with native expiry do nothing.
    async fn maintenance(&self) {}
}
