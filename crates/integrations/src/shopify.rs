//! Storefront commerce platform (Shopify Admin REST API): customer profiles
//! and order ledger.

use crate::connector::{OrderStore, ProfileStore};
use crate::http::{build_client, expect_success};
use async_trait::async_trait;
use chrono::Utc;
use relay_core::config::ProfileStoreConfig;
use relay_core::types::{decimal_amount, CustomerProfile, MarketingConsent, OrderRecord};
use relay_core::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::debug;

const INTEGRATION: &str = "profile-store";

#[derive(Clone)]
pub struct ShopifyClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl ShopifyClient {
    pub fn new(
        base_url: impl AsRef<str>,
        api_version: &str,
        access_token: impl Into<String>,
    ) -> RelayResult<Self> {
        Ok(Self {
            http: build_client(INTEGRATION)?,
            base_url: format!(
                "{}/admin/api/{}",
                base_url.as_ref().trim_end_matches('/'),
                api_version
            ),
            access_token: access_token.into(),
        })
    }

    /// Build a client from config; `None` when credentials are absent.
    pub fn from_config(config: &ProfileStoreConfig) -> RelayResult<Option<Self>> {
        match (&config.base_url, &config.access_token) {
            (Some(url), Some(token)) => Ok(Some(Self::new(url, &config.api_version, token)?)),
            _ => Ok(None),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-Shopify-Access-Token", &self.access_token)
    }
}

// ─── Wire types ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CustomerList {
    customers: Vec<CustomerBody>,
}

#[derive(Deserialize)]
struct CustomerEnvelope {
    customer: CustomerBody,
}

#[derive(Deserialize)]
struct CustomerBody {
    id: u64,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    email_marketing_consent: Option<ConsentBody>,
    #[serde(default)]
    sms_marketing_consent: Option<ConsentBody>,
}

#[derive(Serialize, Deserialize)]
struct ConsentBody {
    state: String,
}

#[derive(Deserialize)]
struct OrderEnvelope {
    order: OrderId,
}

#[derive(Deserialize)]
struct OrderId {
    id: u64,
}

fn parse_tags(tags: &str) -> BTreeSet<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_tags<'a>(tags: impl IntoIterator<Item = &'a String>) -> String {
    tags.into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn consent_from(body: Option<&ConsentBody>) -> MarketingConsent {
    match body.map(|c| c.state.as_str()) {
        Some("subscribed") => MarketingConsent::Subscribed,
        _ => MarketingConsent::NotSubscribed,
    }
}

impl From<CustomerBody> for CustomerProfile {
    fn from(body: CustomerBody) -> Self {
        Self {
            id: Some(body.id.to_string()),
            email: body.email.unwrap_or_default(),
            email_consent: consent_from(body.email_marketing_consent.as_ref()),
            sms_consent: consent_from(body.sms_marketing_consent.as_ref()),
            first_name: body.first_name,
            last_name: body.last_name,
            phone: body.phone,
            tags: parse_tags(&body.tags),
            note: body.note.unwrap_or_default(),
        }
    }
}

fn customer_payload(profile: &CustomerProfile) -> serde_json::Value {
    let mut customer = json!({
        "email": profile.email,
        "tags": join_tags(&profile.tags),
        "note": profile.note,
    });
    if let Some(first) = &profile.first_name {
        customer["first_name"] = json!(first);
    }
    if let Some(last) = &profile.last_name {
        customer["last_name"] = json!(last);
    }
    if let Some(phone) = &profile.phone {
        customer["phone"] = json!(phone);
    }
    let consented_at = Utc::now().to_rfc3339();
    if profile.email_consent == MarketingConsent::Subscribed {
        customer["email_marketing_consent"] = json!({
            "state": "subscribed",
            "opt_in_level": "single_opt_in",
            "consent_updated_at": consented_at,
        });
    }
    if profile.sms_consent == MarketingConsent::Subscribed && profile.phone.is_some() {
        customer["sms_marketing_consent"] = json!({
            "state": "subscribed",
            "opt_in_level": "single_opt_in",
            "consent_updated_at": consented_at,
        });
    }
    json!({ "customer": customer })
}

fn order_payload(order: &OrderRecord) -> serde_json::Value {
    let price = decimal_amount(order.line_item.price_minor_units, &order.transaction.currency);
    let mut body = json!({
        "email": order.email,
        "financial_status": "paid",
        "currency": order.transaction.currency.to_uppercase(),
        "processed_at": order.processed_at.to_rfc3339(),
        "send_receipt": false,
        "send_fulfillment_receipt": false,
        "inventory_behaviour": "bypass",
        "tags": order.tags.join(", "),
        "note": order.note,
        "line_items": [{
            "title": order.line_item.title,
            "price": price,
            "quantity": order.line_item.quantity,
            "vendor": order.line_item.vendor,
            "requires_shipping": false,
            "taxable": false,
        }],
        "transactions": [{
            "kind": "sale",
            "status": "success",
            "amount": decimal_amount(order.transaction.amount_minor_units, &order.transaction.currency),
            "gateway": order.transaction.gateway,
            "authorization": order.transaction.authorization,
        }],
        "billing_address": {
            "first_name": order.billing_address.first_name,
            "last_name": order.billing_address.last_name,
            "address1": order.billing_address.address1,
            "city": order.billing_address.city,
            "country_code": order.billing_address.country_code,
            "zip": order.billing_address.zip,
        },
    });
    if let Some(customer_id) = order
        .customer_id
        .as_deref()
        .and_then(|id| id.parse::<u64>().ok())
    {
        body["customer"] = json!({ "id": customer_id });
    }
    json!({ "order": body })
}

#[async_trait]
impl ProfileStore for ShopifyClient {
    async fn find_by_email(&self, email: &str) -> RelayResult<Vec<CustomerProfile>> {
        let query = format!("email:\"{email}\"");
        let response = expect_success(
            self.request(reqwest::Method::GET, "/customers/search.json")
                .query(&[("query", query.as_str())])
                .send()
                .await,
            INTEGRATION,
        )
        .await?;
        let list: CustomerList = response
            .json()
            .await
            .map_err(|e| RelayError::integration(INTEGRATION, e))?;

        // Search is token-based; keep exact matches only.
        Ok(list
            .customers
            .into_iter()
            .map(CustomerProfile::from)
            .filter(|p| p.email.eq_ignore_ascii_case(email))
            .collect())
    }

    async fn create(&self, profile: &CustomerProfile) -> RelayResult<CustomerProfile> {
        let response = expect_success(
            self.request(reqwest::Method::POST, "/customers.json")
                .json(&customer_payload(profile))
                .send()
                .await,
            INTEGRATION,
        )
        .await?;
        let created: CustomerEnvelope = response
            .json()
            .await
            .map_err(|e| RelayError::integration(INTEGRATION, e))?;
        debug!(customer_id = created.customer.id, "Created store customer");
        Ok(created.customer.into())
    }

    async fn update(&self, profile: &CustomerProfile) -> RelayResult<CustomerProfile> {
        let id = profile
            .id
            .as_deref()
            .ok_or_else(|| RelayError::integration(INTEGRATION, "update without customer id"))?;
        let response = expect_success(
            self.request(reqwest::Method::PUT, &format!("/customers/{id}.json"))
                .json(&customer_payload(profile))
                .send()
                .await,
            INTEGRATION,
        )
        .await?;
        let updated: CustomerEnvelope = response
            .json()
            .await
            .map_err(|e| RelayError::integration(INTEGRATION, e))?;
        Ok(updated.customer.into())
    }
}

#[async_trait]
impl OrderStore for ShopifyClient {
    async fn create_order(&self, order: &OrderRecord) -> RelayResult<String> {
        let response = expect_success(
            self.request(reqwest::Method::POST, "/orders.json")
                .json(&order_payload(order))
                .send()
                .await,
            "order-store",
        )
        .await?;
        let created: OrderEnvelope = response
            .json()
            .await
            .map_err(|e| RelayError::integration("order-store", e))?;
        Ok(created.order.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::types::{BillingAddress, OrderLineItem, OrderTransaction};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> ShopifyClient {
        ShopifyClient::new(server.uri(), "2024-10", "shpat_test").unwrap()
    }

    #[tokio::test]
    async fn test_find_by_email_keeps_exact_matches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin/api/2024-10/customers/search.json"))
            .and(query_param("query", "email:\"a@x.com\""))
            .and(header("X-Shopify-Access-Token", "shpat_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "customers": [
                    { "id": 1, "email": "a@x.com", "tags": "customer, main-course", "note": "Purchase History:",
                      "email_marketing_consent": { "state": "subscribed" } },
                    { "id": 2, "email": "a@x.com.au", "tags": "" }
                ]
            })))
            .mount(&server)
            .await;

        let profiles = client(&server).await.find_by_email("a@x.com").await.unwrap();
        assert_eq!(profiles.len(), 1);
        let profile = &profiles[0];
        assert_eq!(profile.id.as_deref(), Some("1"));
        assert!(profile.tags.contains("main-course"));
        assert_eq!(profile.tags.len(), 2);
        assert_eq!(profile.email_consent, MarketingConsent::Subscribed);
        assert_eq!(profile.sms_consent, MarketingConsent::NotSubscribed);
    }

    #[tokio::test]
    async fn test_create_sends_tags_and_consent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/api/2024-10/customers.json"))
            .and(body_partial_json(json!({
                "customer": {
                    "email": "a@x.com",
                    "tags": "customer, first-time-customer",
                    "email_marketing_consent": { "state": "subscribed" }
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "customer": { "id": 77, "email": "a@x.com", "tags": "customer, first-time-customer" }
            })))
            .mount(&server)
            .await;

        let profile = CustomerProfile {
            email: "a@x.com".into(),
            tags: ["customer", "first-time-customer"].iter().map(|t| t.to_string()).collect(),
            email_consent: MarketingConsent::Subscribed,
            ..Default::default()
        };
        let created = client(&server).await.create(&profile).await.unwrap();
        assert_eq!(created.id.as_deref(), Some("77"));
    }

    #[tokio::test]
    async fn test_error_status_is_integration_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/admin/api/2024-10/customers/5.json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let profile = CustomerProfile {
            id: Some("5".into()),
            email: "a@x.com".into(),
            ..Default::default()
        };
        let err = client(&server).await.update(&profile).await.unwrap_err();
        assert!(matches!(err, RelayError::IntegrationUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_create_order_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/api/2024-10/orders.json"))
            .and(body_partial_json(json!({
                "order": {
                    "financial_status": "paid",
                    "customer": { "id": 42 },
                    "line_items": [{ "title": "Main Course", "price": "47.00", "quantity": 1 }],
                    "transactions": [{ "kind": "sale", "status": "success", "amount": "47.00" }]
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "order": { "id": 9001 } })))
            .mount(&server)
            .await;

        let id = client(&server).await.create_order(&sample_order()).await.unwrap();
        assert_eq!(id, "9001");
    }

    #[test]
    fn test_zero_decimal_currency_order_amounts() {
        let mut order = sample_order();
        order.transaction.currency = "jpy".into();
        let payload = order_payload(&order);
        assert_eq!(payload["order"]["line_items"][0]["price"], "4700");
        assert_eq!(payload["order"]["transactions"][0]["amount"], "4700");
        assert_eq!(payload["order"]["currency"], "JPY");
    }

    fn sample_order() -> OrderRecord {
        OrderRecord {
            id: None,
            email: "a@x.com".into(),
            customer_id: Some("42".into()),
            external_charge_id: "pi_1".into(),
            line_item: OrderLineItem {
                title: "Main Course".into(),
                product_id: "prod_main".into(),
                vendor: "Online Store".into(),
                price_minor_units: 4700,
                quantity: 1,
            },
            transaction: OrderTransaction {
                amount_minor_units: 4700,
                currency: "usd".into(),
                gateway: "stripe".into(),
                authorization: "pi_1".into(),
            },
            billing_address: BillingAddress {
                first_name: "Ada".into(),
                last_name: "Customer".into(),
                address1: "Digital Delivery".into(),
                city: "Online".into(),
                country_code: "US".into(),
                zip: "00000".into(),
            },
            tags: vec!["pi_1".into()],
            note: "Charge: pi_1".into(),
            processed_at: Utc::now(),
        }
    }
}
