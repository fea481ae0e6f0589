//! Admission Gate: decides whether a charge request may reach the processor.
//!
//! Checks run in a fixed order and the first failure wins:
//! payment method, identity (email or identity ref), amount, product id,
//! then the catalog (product active, amount equal to an active price).
//! The catalog is re-read on every request.

use relay_core::config::{AppConfig, OperatingMode};
use relay_core::normalize::{is_valid_email, normalize_email, slugify_tag};
use relay_core::types::{AdmittedCharge, ChargeKind};
use relay_core::{RelayError, RelayResult};
use relay_processor::Catalog;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Charge request body as received. Fields stay untyped so that a value of
/// the wrong JSON type is reported as invalid input by the gate, in order,
/// rather than as a body deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChargeRequest {
    #[serde(default)]
    pub payment_method_ref: Option<Value>,
    #[serde(default)]
    pub email: Option<Value>,
    #[serde(default)]
    pub identity_ref: Option<Value>,
    #[serde(default)]
    pub amount_minor_units: Option<Value>,
    #[serde(default)]
    pub currency: Option<Value>,
    #[serde(default)]
    pub product_id: Option<Value>,
    #[serde(default)]
    pub product_name: Option<Value>,
    #[serde(default)]
    pub category_tag: Option<Value>,
}

pub struct AdmissionGate {
    catalog: Arc<dyn Catalog>,
    mode: OperatingMode,
    max_amount_minor_units: i64,
    currency: String,
}

impl AdmissionGate {
    pub fn new(catalog: Arc<dyn Catalog>, config: &AppConfig) -> Self {
        Self {
            catalog,
            mode: config.mode,
            max_amount_minor_units: config.admission.max_amount_minor_units,
            currency: config.processor.currency.to_lowercase(),
        }
    }

    /// Validate `raw` as a charge of the given kind. Only the catalog is read.
    pub async fn admit(&self, kind: ChargeKind, raw: &RawChargeRequest) -> RelayResult<AdmittedCharge> {
        let result = self.check(kind, raw).await;
        match &result {
            Ok(admitted) => {
                metrics::counter!("admission.admitted").increment(1);
                debug!(product_id = %admitted.product_id, amount = admitted.amount_minor_units, "Charge admitted");
            }
            Err(e) => {
                metrics::counter!("admission.rejected", "kind" => e.kind().as_str()).increment(1);
                debug!(error = %e, "Charge rejected");
            }
        }
        result
    }

    async fn check(&self, kind: ChargeKind, raw: &RawChargeRequest) -> RelayResult<AdmittedCharge> {
        let payment_method_ref = required_string(&raw.payment_method_ref, "paymentMethodRef")?;

        let (email, identity_ref) = match kind {
            ChargeKind::Primary => {
                let email = normalize_email(&required_string(&raw.email, "email")?);
                if !is_valid_email(&email) {
                    return Err(RelayError::InvalidInput("email is not a valid address".into()));
                }
                (Some(email), None)
            }
            ChargeKind::Upsell => {
                let identity_ref = required_string(&raw.identity_ref, "identityRef")?;
                let email = optional_string(&raw.email)
                    .map(|e| normalize_email(&e))
                    .filter(|e| is_valid_email(e));
                (email, Some(identity_ref))
            }
        };

        let amount = self.amount(&raw.amount_minor_units)?;
        let product_id = required_string(&raw.product_id, "productId")?;
        if !is_catalog_id(&product_id) {
            return Err(RelayError::InvalidInput("productId is not a valid identifier".into()));
        }
        let currency = optional_string(&raw.currency)
            .map(|c| c.to_lowercase())
            .unwrap_or_else(|| self.currency.clone());

        let mut admitted = AdmittedCharge {
            kind,
            payment_method_ref,
            email,
            identity_ref,
            amount_minor_units: amount,
            currency,
            product_id,
            product_name: optional_string(&raw.product_name),
            category_tag: optional_string(&raw.category_tag)
                .map(|t| slugify_tag(&t))
                .filter(|t| !t.is_empty()),
            price_verified: false,
        };

        match self.verify_price(&admitted).await {
            Ok(name) => {
                admitted.product_name = Some(name);
                admitted.price_verified = true;
                Ok(admitted)
            }
            Err(RelayError::CatalogUnavailable(reason)) if !self.mode.is_live() => {
                warn!(
                    product_id = %admitted.product_id,
                    reason = %reason,
                    "Catalog unavailable, admitting caller amount unverified (test mode)"
                );
                Ok(admitted)
            }
            Err(e) => Err(e),
        }
    }

    fn amount(&self, value: &Option<Value>) -> RelayResult<i64> {
        let amount = value
            .as_ref()
            .and_then(Value::as_i64)
            .ok_or_else(|| RelayError::InvalidInput("amountMinorUnits must be an integer".into()))?;
        if amount <= 0 {
            return Err(RelayError::InvalidInput("amountMinorUnits must be positive".into()));
        }
        if amount > self.max_amount_minor_units {
            return Err(RelayError::InvalidInput(format!(
                "amountMinorUnits exceeds the maximum of {}",
                self.max_amount_minor_units
            )));
        }
        Ok(amount)
    }

    /// Returns the product's display name when the amount matches an active price.
    async fn verify_price(&self, charge: &AdmittedCharge) -> RelayResult<String> {
        let product = self
            .catalog
            .product(&charge.product_id)
            .await
            .map_err(catalog_unavailable)?
            .filter(|p| p.active)
            .ok_or_else(|| RelayError::ProductInactive(charge.product_id.clone()))?;

        let prices = self
            .catalog
            .prices(&charge.product_id)
            .await
            .map_err(catalog_unavailable)?;

        let listed = prices.iter().any(|p| {
            p.active
                && p.unit_amount == charge.amount_minor_units
                && p.currency.eq_ignore_ascii_case(&charge.currency)
        });
        if !listed {
            return Err(RelayError::PriceMismatch {
                product_id: charge.product_id.clone(),
                amount: charge.amount_minor_units,
            });
        }
        Ok(product.name)
    }
}

fn catalog_unavailable(e: RelayError) -> RelayError {
    match e {
        RelayError::CatalogUnavailable(_) => e,
        other => RelayError::CatalogUnavailable(other.to_string()),
    }
}

fn required_string(value: &Option<Value>, field: &str) -> RelayResult<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            Err(RelayError::InvalidInput(format!("{field} is required")))
        }
        Some(_) => Err(RelayError::InvalidInput(format!("{field} must be a string"))),
    }
}

/// Catalog ids end up in request paths, so only `[A-Za-z0-9_-]` is allowed.
fn is_catalog_id(id: &str) -> bool {
    id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn optional_string(value: &Option<Value>) -> Option<String> {
    value
        .as_ref()
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
