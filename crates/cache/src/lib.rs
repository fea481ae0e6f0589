#![warn(clippy::unwrap_used)]

pub mod client;
pub mod ledger;
pub mod local;
pub mod locks;

pub use client::RedisChargeLedger;
pub use ledger::ChargeLedger;
pub use local::LocalChargeLedger;
pub use locks::EmailLocks;
