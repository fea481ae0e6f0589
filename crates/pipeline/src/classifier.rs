//! Purchase Classifier: turns a confirmed charge into a [`PurchaseEvent`] with
//! a resolved product name and purchase category. Never fails.

use relay_core::config::{CategoryRule, PipelineConfig};
use relay_core::normalize::slugify_tag;
use relay_core::types::{ConfirmedCharge, PurchaseCategory, PurchaseEvent};
use relay_processor::Catalog;
use std::sync::Arc;
use tracing::warn;

/// Display name used when neither the catalog nor the charge names the product.
pub const PLACEHOLDER_PRODUCT_NAME: &str = "Product";

/// Resolve the category. An explicit tag wins; otherwise upsells are matched
/// against `rules` in order (case-insensitive containment, first match) and
/// fall back to `default_upsell`; everything else is the main purchase.
pub fn categorize(
    rules: &[CategoryRule],
    default_upsell: &str,
    is_upsell: bool,
    explicit_tag: Option<&str>,
    product_name: &str,
) -> PurchaseCategory {
    if let Some(tag) = explicit_tag.map(slugify_tag).filter(|t| !t.is_empty()) {
        return PurchaseCategory::from(tag);
    }
    if !is_upsell {
        return PurchaseCategory::MainPurchase;
    }
    let name = product_name.to_lowercase();
    let category = rules
        .iter()
        .find(|rule| name.contains(&rule.keyword.to_lowercase()))
        .map_or(default_upsell, |rule| rule.category.as_str());
    PurchaseCategory::Upsell(category.to_string())
}

pub struct PurchaseClassifier {
    catalog: Arc<dyn Catalog>,
    rules: Vec<CategoryRule>,
    default_upsell: String,
}

impl PurchaseClassifier {
    pub fn new(catalog: Arc<dyn Catalog>, config: &PipelineConfig) -> Self {
        Self {
            catalog,
            rules: config.category_rules.clone(),
            default_upsell: config.default_upsell_category.clone(),
        }
    }

    /// Build the event for `charge`. `is_returning_customer` starts false and
    /// is filled in by the evaluator for primary purchases.
    pub async fn classify(&self, charge: ConfirmedCharge) -> PurchaseEvent {
        let product_name = self.resolve_name(&charge).await;
        let purchase_category = categorize(
            &self.rules,
            &self.default_upsell,
            charge.is_upsell,
            charge.category_tag.as_deref(),
            &product_name,
        );

        PurchaseEvent {
            email: charge.email,
            amount_minor_units: charge.amount_minor_units,
            currency: charge.currency,
            product_id: charge.product_id,
            product_name,
            purchase_category,
            external_charge_id: charge.charge_id,
            is_returning_customer: false,
            identity_ref: charge.identity_ref,
            occurred_at: charge.occurred_at,
            customer_name: charge.customer_name,
            phone: charge.phone,
        }
    }

    async fn resolve_name(&self, charge: &ConfirmedCharge) -> String {
        match self.catalog.product(&charge.product_id).await {
            Ok(Some(product)) => return product.name,
            Ok(None) => {}
            Err(e) => {
                warn!(product_id = %charge.product_id, error = %e, "Catalog lookup failed during classification");
            }
        }
        charge
            .product_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| PLACEHOLDER_PRODUCT_NAME.to_string())
    }
}
