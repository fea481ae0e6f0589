//! Email/SMS marketing platform (Klaviyo JSON:API).

use crate::connector::MarketingPlatform;
use crate::http::{build_client, expect_success};
use async_trait::async_trait;
use relay_core::config::MarketingConfig;
use relay_core::types::{format_amount, split_name, LeadCapture, PurchaseEvent};
use relay_core::RelayResult;
use serde_json::{json, Value};

const INTEGRATION: &str = "marketing-platform";
const API_REVISION: &str = "2024-10-15";

#[derive(Clone)]
pub struct KlaviyoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    customer_list_id: Option<String>,
    lead_list_id: Option<String>,
}

impl KlaviyoClient {
    /// Build a client from config; `None` when no API key is configured.
    pub fn from_config(config: &MarketingConfig) -> RelayResult<Option<Self>> {
        let Some(api_key) = &config.api_key else {
            return Ok(None);
        };
        Ok(Some(Self {
            http: build_client(INTEGRATION)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.clone(),
            customer_list_id: config.customer_list_id.clone(),
            lead_list_id: config.lead_list_id.clone(),
        }))
    }

    async fn post(&self, path: &str, body: &Value) -> RelayResult<()> {
        expect_success(
            self.http
                .post(format!("{}{}", self.base_url, path))
                .header("Authorization", format!("Klaviyo-API-Key {}", self.api_key))
                .header("revision", API_REVISION)
                .json(body)
                .send()
                .await,
            INTEGRATION,
        )
        .await?;
        Ok(())
    }

    async fn import_profile(&self, attributes: Value) -> RelayResult<()> {
        let body = json!({ "data": { "type": "profile", "attributes": attributes } });
        self.post("/profile-import/", &body).await
    }

    async fn subscribe(&self, list_id: &str, email: &str, phone: Option<&str>) -> RelayResult<()> {
        let mut subscriptions = json!({ "email": { "marketing": { "consent": "SUBSCRIBED" } } });
        let mut profile = json!({ "email": email });
        if let Some(phone) = phone {
            subscriptions["sms"] = json!({ "marketing": { "consent": "SUBSCRIBED" } });
            profile["phone_number"] = json!(phone);
        }
        profile["subscriptions"] = subscriptions;

        let body = json!({
            "data": {
                "type": "profile-subscription-bulk-create-job",
                "attributes": {
                    "profiles": { "data": [{ "type": "profile", "attributes": profile }] }
                },
                "relationships": { "list": { "data": { "type": "list", "id": list_id } } }
            }
        });
        self.post("/profile-subscription-bulk-create-jobs/", &body).await
    }
}

fn purchase_attributes(event: &PurchaseEvent) -> Value {
    let mut attributes = json!({
        "email": event.email,
        "properties": {
            "last_purchase_product": event.product_name,
            "last_purchase_category": event.purchase_category.as_str(),
            "last_purchase_amount": format_amount(event.amount_minor_units, &event.currency),
            "last_charge_id": event.external_charge_id,
            "returning_customer": event.is_returning_customer,
        }
    });
    if let Some(name) = &event.customer_name {
        let (first, last) = split_name(name);
        attributes["first_name"] = json!(first);
        attributes["last_name"] = json!(last);
    }
    if let Some(phone) = &event.phone {
        attributes["phone_number"] = json!(phone);
    }
    attributes
}

#[async_trait]
impl MarketingPlatform for KlaviyoClient {
    async fn sync_purchase(&self, event: &PurchaseEvent) -> RelayResult<()> {
        self.import_profile(purchase_attributes(event)).await?;
        if let Some(list_id) = &self.customer_list_id {
            self.subscribe(list_id, &event.email, event.phone.as_deref())
                .await?;
        }
        Ok(())
    }

    async fn subscribe_lead(&self, lead: &LeadCapture) -> RelayResult<()> {
        let (first, last) = split_name(&lead.name);
        let mut attributes = json!({
            "email": lead.email,
            "first_name": first,
            "last_name": last,
            "properties": {
                "lead_interest": lead.category_tag,
                "lead_source": lead.form_name,
            }
        });
        if let Some(phone) = &lead.phone {
            attributes["phone_number"] = json!(phone);
        }
        self.import_profile(attributes).await?;
        if let Some(list_id) = &self.lead_list_id {
            self.subscribe(list_id, &lead.email, lead.phone.as_deref())
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_core::types::PurchaseCategory;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, list: Option<&str>) -> KlaviyoClient {
        let config = MarketingConfig {
            api_key: Some("pk_test".into()),
            base_url: server.uri(),
            customer_list_id: list.map(String::from),
            lead_list_id: None,
        };
        KlaviyoClient::from_config(&config).unwrap().unwrap()
    }

    fn event() -> PurchaseEvent {
        PurchaseEvent {
            email: "a@x.com".into(),
            amount_minor_units: 4700,
            currency: "usd".into(),
            product_id: "prod_main".into(),
            product_name: "Main Course".into(),
            purchase_category: PurchaseCategory::MainPurchase,
            external_charge_id: "pi_1".into(),
            is_returning_customer: false,
            identity_ref: "cus_1".into(),
            occurred_at: Utc::now(),
            customer_name: Some("Ada Lovelace".into()),
            phone: None,
        }
    }

    #[test]
    fn test_missing_key_disables_client() {
        assert!(KlaviyoClient::from_config(&MarketingConfig::default())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_sync_purchase_imports_and_subscribes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/profile-import/"))
            .and(header("revision", API_REVISION))
            .and(header("Authorization", "Klaviyo-API-Key pk_test"))
            .and(body_partial_json(json!({
                "data": { "attributes": {
                    "email": "a@x.com",
                    "first_name": "Ada",
                    "properties": { "last_purchase_category": "main-purchase", "last_charge_id": "pi_1" }
                } }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/profile-subscription-bulk-create-jobs/"))
            .and(body_partial_json(json!({
                "data": { "relationships": { "list": { "data": { "id": "LIST1" } } } }
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, Some("LIST1")).sync_purchase(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_without_list_skips_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/profile-import/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/profile-subscription-bulk-create-jobs/"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        client(&server, None).sync_purchase(&event()).await.unwrap();
    }
}
