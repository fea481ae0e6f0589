//! HTTP client for the payment processor's REST API (Stripe wire format:
//! bearer auth, form-encoded writes, `{data: [...]}` list envelopes).

use crate::provider::{Catalog, ChargeGateway, PurchaseHistory};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use relay_core::types::{
    CatalogPrice, CatalogProduct, ChargeKind, ChargeOutcome, ChargeRequest, ChargeStatus,
    PriorCharge,
};
use relay_core::{RelayError, RelayResult};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const INTEGRATION: &str = "payment-processor";

/// Payment processor client. Cheap to clone.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl StripeClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> RelayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| RelayError::Config(format!("processor HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> reqwest::Result<Response> {
        self.http
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await
    }

    async fn post_form(&self, path: &str, form: &[(String, String)]) -> reqwest::Result<Response> {
        self.http
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .form(form)
            .send()
            .await
    }

    async fn find_customer(&self, email: &str) -> RelayResult<Option<String>> {
        let response = self
            .get("/customers", &[("email", email), ("limit", "1")])
            .await
            .map_err(|e| RelayError::integration(INTEGRATION, e))?;
        let list: ListEnvelope<IdOnly> = read_json(response, processor_error).await?;
        Ok(list.data.into_iter().next().map(|c| c.id))
    }
}

fn charge_form(request: &ChargeRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("amount".to_string(), request.amount_minor_units.to_string()),
        ("currency".to_string(), request.currency.to_lowercase()),
        ("customer".to_string(), request.identity_ref.clone()),
        ("payment_method".to_string(), request.payment_method_ref.clone()),
        ("confirm".to_string(), "true".to_string()),
        ("metadata[product_id]".to_string(), request.product_id.clone()),
        (
            "metadata[is_upsell]".to_string(),
            (request.kind == ChargeKind::Upsell).to_string(),
        ),
    ];
    if let Some(name) = &request.product_name {
        form.push(("metadata[product_name]".to_string(), name.clone()));
    }
    if let Some(email) = &request.email {
        form.push(("metadata[email]".to_string(), email.clone()));
        form.push(("receipt_email".to_string(), email.clone()));
    }
    if let Some(tag) = &request.category_tag {
        form.push(("metadata[category_tag]".to_string(), tag.clone()));
    }
    match request.kind {
        ChargeKind::Primary => {
            form.push(("setup_future_usage".to_string(), "off_session".to_string()));
            form.push(("automatic_payment_methods[enabled]".to_string(), "true".to_string()));
            form.push((
                "automatic_payment_methods[allow_redirects]".to_string(),
                "never".to_string(),
            ));
        }
        ChargeKind::Upsell => {
            form.push(("off_session".to_string(), "true".to_string()));
        }
    }
    form
}

/// Payer-safe message for a declined charge. Processor diagnostics stay in logs.
fn sanitized_decline(error: &ApiErrorBody) -> &'static str {
    match error.code.as_deref() {
        Some("expired_card") => "Your card has expired.",
        Some("incorrect_cvc") | Some("invalid_cvc") => "Your card's security code is incorrect.",
        Some("authentication_required") => "Your bank requires additional authentication.",
        Some("insufficient_funds") => "Your card has insufficient funds.",
        _ => match error.error_type.as_deref() {
            Some("card_error") => "Your card was declined.",
            _ => "The payment could not be processed.",
        },
    }
}

async fn read_json<T: DeserializeOwned>(
    response: Response,
    on_error: fn(String) -> RelayError,
) -> RelayResult<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(on_error(format!("HTTP {status}")));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| on_error(e.to_string()))
}

fn catalog_error(reason: String) -> RelayError {
    RelayError::CatalogUnavailable(reason)
}

fn processor_error(reason: String) -> RelayError {
    RelayError::integration(INTEGRATION, reason)
}

#[async_trait]
impl Catalog for StripeClient {
    async fn product(&self, product_id: &str) -> RelayResult<Option<CatalogProduct>> {
        let response = self
            .get(&format!("/products/{product_id}"), &[])
            .await
            .map_err(|e| RelayError::CatalogUnavailable(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let product: ProductBody = read_json(response, catalog_error).await?;
        Ok(Some(CatalogProduct {
            id: product.id,
            name: product.name,
            active: product.active,
            vendor: product.metadata.get("vendor").cloned(),
        }))
    }

    async fn prices(&self, product_id: &str) -> RelayResult<Vec<CatalogPrice>> {
        let response = self
            .get("/prices", &[("product", product_id), ("limit", "100")])
            .await
            .map_err(|e| RelayError::CatalogUnavailable(e.to_string()))?;
        let list: ListEnvelope<PriceBody> = read_json(response, catalog_error).await?;
        Ok(list
            .data
            .into_iter()
            .filter_map(|p| {
                // Metered and custom-amount prices carry no unit amount.
                Some(CatalogPrice {
                    unit_amount: p.unit_amount?,
                    id: p.id,
                    product_id: p.product,
                    currency: p.currency,
                    active: p.active,
                })
            })
            .collect())
    }
}

#[async_trait]
impl ChargeGateway for StripeClient {
    async fn ensure_customer(&self, email: &str) -> RelayResult<String> {
        if let Some(id) = self.find_customer(email).await? {
            debug!(identity_ref = %id, "Reusing processor customer");
            return Ok(id);
        }
        let form = vec![("email".to_string(), email.to_string())];
        let response = self
            .post_form("/customers", &form)
            .await
            .map_err(|e| RelayError::integration(INTEGRATION, e))?;
        let created: IdOnly = read_json(response, processor_error).await?;
        Ok(created.id)
    }

    async fn create_charge(&self, request: &ChargeRequest) -> RelayResult<ChargeOutcome> {
        let response = self
            .post_form("/payment_intents", &charge_form(request))
            .await
            .map_err(|e| RelayError::integration(INTEGRATION, e))?;

        let status = response.status();
        if status.is_client_error() {
            let body: ApiErrorEnvelope = response
                .json()
                .await
                .map_err(|e| RelayError::integration(INTEGRATION, e))?;
            warn!(
                http_status = %status,
                code = body.error.code.as_deref().unwrap_or("none"),
                decline_code = body.error.decline_code.as_deref().unwrap_or("none"),
                "Processor rejected charge"
            );
            metrics::counter!("processor.charge_rejected").increment(1);
            return Err(RelayError::UpstreamRejected(
                sanitized_decline(&body.error).to_string(),
            ));
        }

        let intent: PaymentIntentBody = read_json(response, processor_error).await?;
        let status = match intent.status.as_str() {
            "succeeded" | "processing" => ChargeStatus::Succeeded,
            "requires_action" | "requires_confirmation" => ChargeStatus::RequiresFollowup,
            other => {
                warn!(charge_id = %intent.id, status = other, "Charge not completed");
                return Err(RelayError::UpstreamRejected(
                    "The payment could not be processed.".to_string(),
                ));
            }
        };

        Ok(ChargeOutcome {
            status,
            charge_id: intent.id,
            identity_ref: intent.customer.unwrap_or_else(|| request.identity_ref.clone()),
            client_secret: match status {
                ChargeStatus::RequiresFollowup => intent.client_secret,
                ChargeStatus::Succeeded => None,
            },
        })
    }
}

#[async_trait]
impl PurchaseHistory for StripeClient {
    async fn charges(&self, identity_ref: &str) -> RelayResult<Vec<PriorCharge>> {
        let response = self
            .get("/payment_intents", &[("customer", identity_ref), ("limit", "100")])
            .await
            .map_err(|e| RelayError::integration(INTEGRATION, e))?;
        let list: ListEnvelope<PaymentIntentBody> = read_json(response, processor_error).await?;

        Ok(list
            .data
            .into_iter()
            .filter_map(|pi| {
                let created = Utc.timestamp_opt(pi.created, 0).single()?;
                Some(PriorCharge {
                    succeeded: pi.status == "succeeded",
                    is_upsell: pi.metadata.get("is_upsell").is_some_and(|v| v == "true"),
                    id: pi.id,
                    created,
                })
            })
            .collect())
    }
}

// ─── Wire types ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ListEnvelope<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct ProductBody {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct PriceBody {
    id: String,
    product: String,
    unit_amount: Option<i64>,
    currency: String,
    #[serde(default)]
    active: bool,
}

#[derive(Deserialize)]
struct PaymentIntentBody {
    id: String,
    status: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    decline_code: Option<String>,
}
