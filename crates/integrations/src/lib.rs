//! Downstream commerce and marketing integrations behind capability traits:
//! the profile store, the order ledger, the marketing platform and the
//! spreadsheet log.

#![warn(clippy::unwrap_used)]

pub mod connector;
mod http;
pub mod klaviyo;
pub mod memory;
pub mod sheets;
pub mod shopify;

pub use connector::{MarketingPlatform, OrderStore, ProfileStore, SpreadsheetLog, SpreadsheetRow};
pub use klaviyo::KlaviyoClient;
pub use memory::{InMemoryMarketing, InMemoryOrderStore, InMemoryProfileStore, InMemorySpreadsheet};
pub use sheets::SheetsWebhook;
pub use shopify::ShopifyClient;
