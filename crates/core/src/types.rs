use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Base tag carried by every paying customer's profile.
pub const CUSTOMER_TAG: &str = "customer";
/// Tag applied to a profile created by its first purchase.
pub const FIRST_TIME_TAG: &str = "first-time-customer";
/// Tag applied once a primary purchase is classified as returning.
pub const RETURNING_TAG: &str = "returning-customer";
/// Base tag carried by a profile created from a lead form.
pub const LEAD_TAG: &str = "lead";
/// Category label of a primary (non-upsell) purchase.
pub const MAIN_PURCHASE: &str = "main-purchase";

// ─── Catalog ────────────────────────────────────────────────────────────

/// A product as listed in the processor's live catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: String,
    pub name: String,
    pub active: bool,
    #[serde(default)]
    pub vendor: Option<String>,
}

/// A listed price for a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPrice {
    pub id: String,
    pub product_id: String,
    pub unit_amount: i64,
    pub currency: String,
    pub active: bool,
}

// ─── Charges ────────────────────────────────────────────────────────────

/// Whether a charge establishes the relationship or is an add-on to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeKind {
    Primary,
    Upsell,
}

/// A charge that passed admission, ready to be handed to the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedCharge {
    pub kind: ChargeKind,
    pub payment_method_ref: String,
    pub email: Option<String>,
    pub identity_ref: Option<String>,
    pub amount_minor_units: i64,
    pub currency: String,
    pub product_id: String,
    pub product_name: Option<String>,
    pub category_tag: Option<String>,
    /// False only when the catalog was unreachable and test mode trusted the caller.
    pub price_verified: bool,
}

/// Request to create and confirm a charge with the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub identity_ref: String,
    pub payment_method_ref: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub product_id: String,
    pub product_name: Option<String>,
    pub email: Option<String>,
    pub kind: ChargeKind,
    pub category_tag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Succeeded,
    /// The payer must complete an extra step (e.g. 3-D Secure) client-side.
    RequiresFollowup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub status: ChargeStatus,
    pub charge_id: String,
    pub identity_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// A past charge from the processor's purchase history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorCharge {
    pub id: String,
    pub created: DateTime<Utc>,
    pub succeeded: bool,
    pub is_upsell: bool,
}

/// A verified "charge succeeded" notification, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedCharge {
    pub charge_id: String,
    pub email: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub product_id: String,
    #[serde(default)]
    pub product_name: Option<String>,
    pub is_upsell: bool,
    #[serde(default)]
    pub category_tag: Option<String>,
    pub identity_ref: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

// ─── Purchase ───────────────────────────────────────────────────────────

/// Canonical purchase category: the primary purchase, or an upsell keyed
/// by a slug such as `coaching-buyer`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PurchaseCategory {
    MainPurchase,
    Upsell(String),
}

impl PurchaseCategory {
    pub fn as_str(&self) -> &str {
        match self {
            Self::MainPurchase => MAIN_PURCHASE,
            Self::Upsell(slug) => slug,
        }
    }

    pub fn is_upsell(&self) -> bool {
        matches!(self, Self::Upsell(_))
    }
}

impl From<String> for PurchaseCategory {
    fn from(value: String) -> Self {
        if value == MAIN_PURCHASE {
            Self::MainPurchase
        } else {
            Self::Upsell(value)
        }
    }
}

impl From<PurchaseCategory> for String {
    fn from(value: PurchaseCategory) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for PurchaseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical unit the post-purchase pipeline operates on.
/// `external_charge_id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseEvent {
    pub email: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub product_id: String,
    pub product_name: String,
    pub purchase_category: PurchaseCategory,
    pub external_charge_id: String,
    /// Only meaningful for primary purchases; always false for upsells.
    pub is_returning_customer: bool,
    pub identity_ref: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Render minor units as `47.00 USD`.
pub fn format_amount(amount_minor_units: i64, currency: &str) -> String {
    format!(
        "{} {}",
        decimal_amount(amount_minor_units, currency),
        currency.to_uppercase()
    )
}

/// Currencies whose minor unit is the major unit (no decimal places).
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd", "vuv",
    "xaf", "xof", "xpf",
];

pub fn is_zero_decimal(currency: &str) -> bool {
    ZERO_DECIMAL_CURRENCIES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(currency.trim()))
}

/// Minor units in the decimal form commerce APIs expect: `4700 usd` → `"47.00"`,
/// `4700 jpy` → `"4700"`.
pub fn decimal_amount(amount_minor_units: i64, currency: &str) -> String {
    if is_zero_decimal(currency) {
        return amount_minor_units.to_string();
    }
    let sign = if amount_minor_units < 0 { "-" } else { "" };
    let abs = amount_minor_units.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

// ─── Customer profile ───────────────────────────────────────────────────

/// Marketing consent only ever moves toward `Subscribed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketingConsent {
    #[default]
    NotSubscribed,
    Subscribed,
}

impl MarketingConsent {
    pub fn merge(self, other: Self) -> Self {
        self.max(other)
    }
}

/// A customer record as held by the remote profile store, keyed by email.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProfile {
    #[serde(default)]
    pub id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub email_consent: MarketingConsent,
    #[serde(default)]
    pub sms_consent: MarketingConsent,
}

/// Split a display name into first and last name on the first whitespace.
pub fn split_name(name: &str) -> (Option<String>, Option<String>) {
    let mut parts = name.trim().splitn(2, char::is_whitespace);
    let first = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    let last = parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    (first, last)
}

// ─── Orders ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub title: String,
    pub product_id: String,
    pub vendor: String,
    pub price_minor_units: i64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTransaction {
    pub amount_minor_units: i64,
    pub currency: String,
    pub gateway: String,
    pub authorization: String,
}

/// Placeholder billing fields; products are non-physical so no address is collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAddress {
    pub first_name: String,
    pub last_name: String,
    pub address1: String,
    pub city: String,
    pub country_code: String,
    pub zip: String,
}

impl BillingAddress {
    /// Address carrying only the buyer's name; location fields are fixed placeholders.
    pub fn placeholder(name: Option<&str>) -> Self {
        let (first, last) = name.map(split_name).unwrap_or((None, None));
        Self {
            first_name: first.unwrap_or_else(|| "Customer".to_string()),
            last_name: last.unwrap_or_default(),
            address1: "Digital delivery".to_string(),
            city: "N/A".to_string(),
            country_code: "US".to_string(),
            zip: "00000".to_string(),
        }
    }
}

/// One order entry in the commerce platform per purchase. The charge id is
/// only carried in the note and tags; there is no foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    pub external_charge_id: String,
    pub line_item: OrderLineItem,
    pub transaction: OrderTransaction,
    pub billing_address: BillingAddress,
    pub tags: Vec<String>,
    pub note: String,
    pub processed_at: DateTime<Utc>,
}

// ─── Leads ──────────────────────────────────────────────────────────────

/// A validated lead-form submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadCapture {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub category_tag: String,
    #[serde(default)]
    pub form_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_string_roundtrip() {
        let main: PurchaseCategory = String::from("main-purchase").into();
        assert_eq!(main, PurchaseCategory::MainPurchase);
        assert!(!main.is_upsell());

        let upsell = PurchaseCategory::from("coaching-buyer".to_string());
        assert!(upsell.is_upsell());
        assert_eq!(serde_json::to_string(&upsell).unwrap(), "\"coaching-buyer\"");
    }

    #[test]
    fn test_consent_is_monotonic() {
        use MarketingConsent::*;
        assert_eq!(Subscribed.merge(NotSubscribed), Subscribed);
        assert_eq!(NotSubscribed.merge(Subscribed), Subscribed);
        assert_eq!(NotSubscribed.merge(NotSubscribed), NotSubscribed);
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(4700, "usd"), "47.00 USD");
        assert_eq!(format_amount(5, "eur"), "0.05 EUR");
        assert_eq!(format_amount(-1250, "usd"), "-12.50 USD");
        assert_eq!(format_amount(4700, "jpy"), "4700 JPY");
    }

    #[test]
    fn test_decimal_amount_respects_currency_exponent() {
        assert_eq!(decimal_amount(4700, "usd"), "47.00");
        assert_eq!(decimal_amount(99, "eur"), "0.99");
        assert_eq!(decimal_amount(-5, "usd"), "-0.05");
        assert_eq!(decimal_amount(4700, "JPY"), "4700");
        assert_eq!(decimal_amount(15000, "krw"), "15000");
    }

    #[test]
    fn test_split_name() {
        assert_eq!(
            split_name("Ada  Lovelace King"),
            (Some("Ada".into()), Some("Lovelace King".into()))
        );
        assert_eq!(split_name("Cher"), (Some("Cher".into()), None));
        assert_eq!(split_name("  "), (None, None));
    }

    #[test]
    fn test_billing_placeholder_uses_name() {
        let billing = BillingAddress::placeholder(Some("Ada Lovelace"));
        assert_eq!(billing.first_name, "Ada");
        assert_eq!(billing.last_name, "Lovelace");
        assert_eq!(BillingAddress::placeholder(None).first_name, "Customer");
    }
}
