//! In-process implementations of every downstream capability. Each keeps what
//! it received so tests can assert on effects, and each can be switched into
//! a failing state.

use crate::connector::{MarketingPlatform, OrderStore, ProfileStore, SpreadsheetLog, SpreadsheetRow};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use relay_core::types::{CustomerProfile, LeadCapture, OrderRecord, PurchaseEvent};
use relay_core::{RelayError, RelayResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

fn check(failing: &AtomicBool, integration: &str) -> RelayResult<()> {
    if failing.load(Ordering::SeqCst) {
        return Err(RelayError::integration(integration, "simulated outage"));
    }
    Ok(())
}

// ─── Profiles ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: DashMap<String, CustomerProfile>,
    next_id: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    failing: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, widening the window between read and write.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = Some(latency);
        self
    }

    /// Insert a profile as if it already existed remotely.
    pub fn seed(&self, mut profile: CustomerProfile) -> CustomerProfile {
        if profile.id.is_none() {
            profile.id = Some(self.allocate_id());
        }
        let id = profile.id.clone().unwrap_or_default();
        self.profiles.insert(id, profile.clone());
        profile
    }

    pub fn by_email(&self, email: &str) -> Vec<CustomerProfile> {
        let mut found: Vec<_> = self
            .profiles
            .iter()
            .filter(|p| p.email == email)
            .map(|p| p.clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn allocate_id(&self) -> String {
        format!("gid_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn simulate(&self) -> RelayResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        check(&self.failing, "profile-store")
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn find_by_email(&self, email: &str) -> RelayResult<Vec<CustomerProfile>> {
        self.simulate().await?;
        Ok(self.by_email(email))
    }

    async fn create(&self, profile: &CustomerProfile) -> RelayResult<CustomerProfile> {
        self.simulate().await?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut created = profile.clone();
        created.id = Some(self.allocate_id());
        let id = created.id.clone().unwrap_or_default();
        self.profiles.insert(id, created.clone());
        Ok(created)
    }

    async fn update(&self, profile: &CustomerProfile) -> RelayResult<CustomerProfile> {
        self.simulate().await?;
        let Some(id) = profile.id.clone() else {
            return Err(RelayError::InvalidInput("profile update without id".into()));
        };
        if !self.profiles.contains_key(&id) {
            return Err(RelayError::integration("profile-store", format!("unknown profile {id}")));
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.profiles.insert(id, profile.clone());
        Ok(profile.clone())
    }
}

// ─── Orders ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<Vec<OrderRecord>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> Vec<OrderRecord> {
        self.orders.lock().clone()
    }

    /// Calls received, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, order: &OrderRecord) -> RelayResult<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        check(&self.failing, "order-store")?;
        let mut orders = self.orders.lock();
        let id = format!("order_{}", orders.len() + 1);
        let mut stored = order.clone();
        stored.id = Some(id.clone());
        orders.push(stored);
        Ok(id)
    }
}

// ─── Marketing ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryMarketing {
    purchases: Mutex<Vec<PurchaseEvent>>,
    leads: Mutex<Vec<LeadCapture>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryMarketing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn purchases(&self) -> Vec<PurchaseEvent> {
        self.purchases.lock().clone()
    }

    pub fn leads(&self) -> Vec<LeadCapture> {
        self.leads.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MarketingPlatform for InMemoryMarketing {
    async fn sync_purchase(&self, event: &PurchaseEvent) -> RelayResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        check(&self.failing, "marketing-platform")?;
        self.purchases.lock().push(event.clone());
        Ok(())
    }

    async fn subscribe_lead(&self, lead: &LeadCapture) -> RelayResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        check(&self.failing, "marketing-platform")?;
        self.leads.lock().push(lead.clone());
        Ok(())
    }
}

// ─── Spreadsheet ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemorySpreadsheet {
    rows: Mutex<Vec<SpreadsheetRow>>,
    failing: AtomicBool,
}

impl InMemorySpreadsheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<SpreadsheetRow> {
        self.rows.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpreadsheetLog for InMemorySpreadsheet {
    async fn append_row(&self, row: &SpreadsheetRow) -> RelayResult<()> {
        check(&self.failing, "spreadsheet")?;
        self.rows.lock().push(row.clone());
        Ok(())
    }
}
