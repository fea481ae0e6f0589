//! Spreadsheet purchase log, fed through a spreadsheet-side webhook
//! (e.g. an Apps Script web app) that appends each posted row.

use crate::connector::{SpreadsheetLog, SpreadsheetRow};
use crate::http::{build_client, expect_success};
use async_trait::async_trait;
use relay_core::config::SpreadsheetConfig;
use relay_core::RelayResult;

const INTEGRATION: &str = "spreadsheet";

#[derive(Clone)]
pub struct SheetsWebhook {
    http: reqwest::Client,
    url: String,
}

impl SheetsWebhook {
    pub fn from_config(config: &SpreadsheetConfig) -> RelayResult<Option<Self>> {
        let Some(url) = &config.webhook_url else {
            return Ok(None);
        };
        Ok(Some(Self {
            http: build_client(INTEGRATION)?,
            url: url.clone(),
        }))
    }
}

#[async_trait]
impl SpreadsheetLog for SheetsWebhook {
    async fn append_row(&self, row: &SpreadsheetRow) -> RelayResult<()> {
        expect_success(self.http.post(&self.url).json(row).send().await, INTEGRATION).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_core::RelayError;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row() -> SpreadsheetRow {
        SpreadsheetRow {
            timestamp: Utc::now(),
            email: "a@x.com".into(),
            name: String::new(),
            product: "Main Course".into(),
            amount: "47.00 USD".into(),
            category: "main-purchase".into(),
            charge_id: "pi_1".into(),
            returning: false,
        }
    }

    #[tokio::test]
    async fn test_append_posts_row() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "charge_id": "pi_1", "amount": "47.00 USD" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = SheetsWebhook::from_config(&SpreadsheetConfig {
            webhook_url: Some(server.uri()),
        })
        .unwrap()
        .unwrap();
        sink.append_row(&row()).await.unwrap();
    }

    #[tokio::test]
    async fn test_append_failure_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = SheetsWebhook::from_config(&SpreadsheetConfig {
            webhook_url: Some(server.uri()),
        })
        .unwrap()
        .unwrap();
        assert!(matches!(
            sink.append_row(&row()).await,
            Err(RelayError::IntegrationUnavailable { .. })
        ));
    }
}
