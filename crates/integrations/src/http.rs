use relay_core::{RelayError, RelayResult};
use reqwest::Response;
use std::time::Duration;
use tracing::debug;

pub(crate) fn build_client(integration: &str) -> RelayResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .map_err(|e| RelayError::Config(format!("{integration} HTTP client: {e}")))
}

/// Map transport errors and non-2xx statuses to `IntegrationUnavailable`.
/// Response bodies can carry customer data, so they only reach debug logs.
pub(crate) async fn expect_success(
    result: reqwest::Result<Response>,
    integration: &'static str,
) -> RelayResult<Response> {
    let response = result.map_err(|e| RelayError::integration(integration, e))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!(integration, status = %status, body = %body, "Integration returned error");
    Err(RelayError::integration(integration, format!("HTTP {status}")))
}
