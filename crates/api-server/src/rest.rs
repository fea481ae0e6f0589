//! REST handlers: charges, processor notifications, lead capture and
//! operational endpoints.

use crate::error::ApiError;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use relay_admission::{AdmissionGate, RateLimiter, RawChargeRequest};
use relay_core::config::OperatingMode;
use relay_core::normalize::{is_valid_email, normalize_email, normalize_phone, slugify_tag};
use relay_core::types::{AdmittedCharge, ChargeKind, ChargeRequest, ChargeStatus, LeadCapture};
use relay_core::RelayError;
use relay_integrations::MarketingPlatform;
use relay_pipeline::{ProfileMerger, PurchaseQueue};
use relay_processor::signature::SIGNATURE_HEADER;
use relay_processor::webhook::{parse_notification, Notification};
use relay_processor::{ChargeGateway, WebhookVerifier};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const MAX_NAME_LEN: usize = 200;

/// Shared application state for REST handlers. Optional members are absent
/// when their credentials are not configured.
#[derive(Clone)]
pub struct AppState {
    pub mode: OperatingMode,
    pub gate: Option<Arc<AdmissionGate>>,
    pub gateway: Option<Arc<dyn ChargeGateway>>,
    pub verifier: Option<Arc<WebhookVerifier>>,
    pub queue: Option<PurchaseQueue>,
    pub leads: Option<Arc<ProfileMerger>>,
    pub marketing: Option<Arc<dyn MarketingPlatform>>,
    pub limiter: Arc<dyn RateLimiter>,
    pub start_time: Instant,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| RelayError::InvalidInput(e.body_text()).into())
}

fn missing(what: &str) -> ApiError {
    RelayError::Config(format!("{what} is not configured")).into()
}

// ─── Charges ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeResponse {
    pub status: ChargeStatus,
    pub identity_ref: String,
    pub charge_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// POST /charge — admit, find or create the processor customer, charge.
pub async fn charge(
    State(state): State<AppState>,
    payload: Result<Json<RawChargeRequest>, JsonRejection>,
) -> Result<Json<ChargeResponse>, ApiError> {
    let raw = body(payload)?;
    let (gate, gateway) = processor(&state)?;
    let admitted = gate.admit(ChargeKind::Primary, &raw).await?;

    let email = admitted
        .email
        .clone()
        .ok_or_else(|| RelayError::InvalidInput("email is required".into()))?;
    let identity_ref = gateway.ensure_customer(&email).await?;
    execute(gateway.as_ref(), admitted, identity_ref).await
}

/// POST /charge-upsell — admit and charge the saved method of an existing customer.
pub async fn charge_upsell(
    State(state): State<AppState>,
    payload: Result<Json<RawChargeRequest>, JsonRejection>,
) -> Result<Json<ChargeResponse>, ApiError> {
    let raw = body(payload)?;
    let (gate, gateway) = processor(&state)?;
    let admitted = gate.admit(ChargeKind::Upsell, &raw).await?;

    let identity_ref = admitted
        .identity_ref
        .clone()
        .ok_or_else(|| RelayError::InvalidInput("identityRef is required".into()))?;
    execute(gateway.as_ref(), admitted, identity_ref).await
}

fn processor(state: &AppState) -> Result<(&AdmissionGate, &Arc<dyn ChargeGateway>), ApiError> {
    match (&state.gate, &state.gateway) {
        (Some(gate), Some(gateway)) => Ok((gate.as_ref(), gateway)),
        _ => Err(missing("payment processor")),
    }
}

async fn execute(
    gateway: &dyn ChargeGateway,
    admitted: AdmittedCharge,
    identity_ref: String,
) -> Result<Json<ChargeResponse>, ApiError> {
    let request = ChargeRequest {
        identity_ref,
        payment_method_ref: admitted.payment_method_ref,
        amount_minor_units: admitted.amount_minor_units,
        currency: admitted.currency,
        product_id: admitted.product_id,
        product_name: admitted.product_name,
        email: admitted.email,
        kind: admitted.kind,
        category_tag: admitted.category_tag,
    };

    let outcome = gateway.create_charge(&request).await?;
    metrics::counter!("api.charges", "status" => match outcome.status {
        ChargeStatus::Succeeded => "succeeded",
        ChargeStatus::RequiresFollowup => "requires_followup",
    })
    .increment(1);
    info!(
        charge_id = %outcome.charge_id,
        identity_ref = %outcome.identity_ref,
        kind = ?request.kind,
        status = ?outcome.status,
        "Charge created"
    );

    Ok(Json(ChargeResponse {
        status: outcome.status,
        identity_ref: outcome.identity_ref,
        charge_id: outcome.charge_id,
        client_secret: outcome.client_secret,
    }))
}

// ─── Processor notifications ────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationAck {
    pub received: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored: Option<String>,
}

/// POST /purchase-notification — verify, acknowledge, then fan out in the background.
pub async fn purchase_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Bytes,
) -> Result<Json<NotificationAck>, ApiError> {
    let verifier = state
        .verifier
        .as_ref()
        .ok_or_else(|| missing("webhook signing secret"))?;
    // Without a pipeline a 200 would make the processor drop the event for good.
    let queue = state
        .queue
        .as_ref()
        .ok_or_else(|| missing("purchase pipeline"))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RelayError::AuthFailure("missing signature header".into()))?;
    if let Err(e) = verifier.verify(&payload, signature) {
        metrics::counter!("webhook.rejected").increment(1);
        warn!(error = %e, "Notification signature rejected");
        return Err(e.into());
    }
    metrics::counter!("webhook.verified").increment(1);

    match parse_notification(&payload)? {
        Notification::ChargeSucceeded { event_id, charge } => {
            info!(event_id = %event_id, charge_id = %charge.charge_id, email = %charge.email, "Charge confirmed");
            queue.submit(charge);
            Ok(Json(NotificationAck {
                received: true,
                ignored: None,
            }))
        }
        Notification::Unattributed {
            event_id,
            charge_id,
            reason,
        } => {
            warn!(event_id = %event_id, charge_id = %charge_id, reason, "Confirmed charge cannot be attributed");
            Ok(Json(NotificationAck {
                received: true,
                ignored: Some(reason.to_string()),
            }))
        }
        Notification::Ignored {
            event_id,
            event_type,
        } => {
            info!(event_id = %event_id, event_type = %event_type, "Notification type ignored");
            Ok(Json(NotificationAck {
                received: true,
                ignored: Some(event_type),
            }))
        }
    }
}

// ─── Lead capture ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub category_tag: Option<String>,
    #[serde(default)]
    pub form_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeadResponse {
    pub success: bool,
}

pub fn validate_lead(request: LeadRequest) -> Result<LeadCapture, RelayError> {
    let name = request
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| RelayError::InvalidInput("name is required".into()))?;
    if name.chars().count() > MAX_NAME_LEN {
        return Err(RelayError::InvalidInput("name is too long".into()));
    }

    let email = normalize_email(request.email.as_deref().unwrap_or_default());
    if !is_valid_email(&email) {
        return Err(RelayError::InvalidInput("email is not a valid address".into()));
    }

    let phone = match request.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(raw) => Some(
            normalize_phone(raw)
                .ok_or_else(|| RelayError::InvalidInput("phone is not a valid number".into()))?,
        ),
        None => None,
    };

    let category_tag = request
        .category_tag
        .as_deref()
        .map(slugify_tag)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RelayError::InvalidInput("categoryTag is required".into()))?;

    Ok(LeadCapture {
        name,
        email,
        phone,
        category_tag,
        form_name: request
            .form_name
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty()),
    })
}

/// POST /lead-capture — lead-only profile upsert and marketing subscription.
pub async fn lead_capture(
    State(state): State<AppState>,
    payload: Result<Json<LeadRequest>, JsonRejection>,
) -> Result<Json<LeadResponse>, ApiError> {
    let lead = validate_lead(body(payload)?)?;

    match &state.leads {
        Some(merger) => {
            merger.upsert_lead(&lead).await?;
        }
        None => warn!(email = %lead.email, "Profile store not configured, lead profile skipped"),
    }

    if let Some(marketing) = &state.marketing {
        if let Err(e) = marketing.subscribe_lead(&lead).await {
            warn!(email = %lead.email, error = %e, "Lead marketing subscription failed");
        }
    }

    metrics::counter!("api.leads").increment(1);
    info!(email = %lead.email, category = %lead.category_tag, "Lead captured");
    Ok(Json(LeadResponse { success: true }))
}

// ─── Operational ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub mode: String,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        mode: if state.mode.is_live() { "live" } else { "test" }.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — ready once charges can be taken.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.gate.is_some() && state.gateway.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
