//! API server: router assembly, HTTP listener and metrics exporter.

use crate::middleware;
use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use relay_core::config::AppConfig;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// All routes. Charge and lead endpoints sit behind the per-origin limiter;
/// processor notifications and probes do not.
pub fn build_router(state: AppState) -> Router {
    let limited = Router::new()
        .route("/charge", post(rest::charge))
        .route("/charge-upsell", post(rest::charge_upsell))
        .route("/lead-capture", post(rest::lead_capture))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ));

    Router::new()
        .merge(limited)
        .route("/purchase-notification", post(rest::purchase_notification))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Serve until ctrl-c.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = build_router(self.state.clone());

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

        Ok(())
    }

    /// Start the Prometheus exporter on its own port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use relay_admission::{AdmissionGate, ManualClock, SlidingWindowLimiter};
    use relay_cache::{EmailLocks, LocalChargeLedger};
    use relay_core::config::{OperatingMode, PipelineConfig};
    use relay_integrations::{InMemoryMarketing, InMemoryOrderStore, InMemoryProfileStore};
    use relay_pipeline::{
        FanOutCoordinator, MarketingSink, OrderRecorder, ProfileMerger, PurchaseClassifier,
        PurchasePipeline, PurchaseQueue, ReturningCustomerEvaluator,
    };
    use relay_processor::{InMemoryProcessor, WebhookVerifier};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tower::ServiceExt;

    const SECRET: &str = "whsec_test";

    struct TestApp {
        router: Router,
        processor: Arc<InMemoryProcessor>,
        profiles: Arc<InMemoryProfileStore>,
        orders: Arc<InMemoryOrderStore>,
        marketing: Arc<InMemoryMarketing>,
    }

    fn app_with(configure: impl FnOnce(&mut AppState)) -> TestApp {
        app_with_profiles(Arc::new(InMemoryProfileStore::new()), configure)
    }

    fn app_with_profiles(
        profiles: Arc<InMemoryProfileStore>,
        configure: impl FnOnce(&mut AppState),
    ) -> TestApp {
        let config = AppConfig::default();
        let pipeline_config = PipelineConfig::default();
        let processor = Arc::new(
            InMemoryProcessor::new()
                .with_product("prod_main", "Main Course", true, &[4700])
                .with_product("prod_vip", "VIP Day", true, &[19700]),
        );
        let orders = Arc::new(InMemoryOrderStore::new());
        let marketing = Arc::new(InMemoryMarketing::new());
        let locks = Arc::new(EmailLocks::new());
        let merger = Arc::new(ProfileMerger::new(
            profiles.clone(),
            locks,
            pipeline_config.main_purchase_tag.clone(),
        ));

        let coordinator = FanOutCoordinator::new()
            .with_sink(merger.clone())
            .with_sink(Arc::new(OrderRecorder::new(
                orders.clone(),
                processor.clone(),
                Arc::new(LocalChargeLedger::new(3600)),
                "Online Store",
                pipeline_config.main_purchase_tag.clone(),
            )))
            .with_sink(Arc::new(MarketingSink::new(marketing.clone())));
        let pipeline = Arc::new(PurchasePipeline::new(
            PurchaseClassifier::new(processor.clone(), &pipeline_config),
            ReturningCustomerEvaluator::new(processor.clone(), &pipeline_config),
            coordinator,
        ));
        let (queue, _worker) = PurchaseQueue::spawn(pipeline, 16);

        let mut state = AppState {
            mode: OperatingMode::Live,
            gate: Some(Arc::new(AdmissionGate::new(processor.clone(), &config))),
            gateway: Some(processor.clone()),
            verifier: Some(Arc::new(WebhookVerifier::new(SECRET, 300))),
            queue: Some(queue),
            leads: Some(merger),
            marketing: Some(marketing.clone()),
            limiter: Arc::new(SlidingWindowLimiter::with_clock(
                10,
                Duration::from_secs(900),
                ManualClock::new(),
            )),
            start_time: Instant::now(),
        };
        configure(&mut state);

        TestApp {
            router: build_router(state),
            processor,
            profiles,
            orders,
            marketing,
        }
    }

    fn app() -> TestApp {
        app_with(|_| {})
    }

    fn post(uri: &str, body: &Value, origin: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-forwarded-for", origin)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn charge_body() -> Value {
        json!({
            "paymentMethodRef": "pm_card_visa",
            "email": "Ada@Example.com",
            "amountMinorUnits": 4700,
            "productId": "prod_main"
        })
    }

    fn notification(charge_id: &str) -> Value {
        json!({
            "id": format!("evt_{charge_id}"),
            "type": "payment_intent.succeeded",
            "data": { "object": {
                "id": charge_id,
                "amount": 4700,
                "amount_received": 4700,
                "currency": "usd",
                "customer": "cus_1",
                "created": chrono::Utc::now().timestamp(),
                "metadata": {
                    "email": "ada@example.com",
                    "product_id": "prod_main",
                    "is_upsell": "false"
                }
            } }
        })
    }

    fn signed(body: &Value, secret: &str) -> Request<Body> {
        let payload = body.to_string();
        let signature = WebhookVerifier::new(secret, 300)
            .sign(payload.as_bytes(), chrono::Utc::now().timestamp());
        Request::builder()
            .method("POST")
            .uri("/purchase-notification")
            .header("content-type", "application/json")
            .header("stripe-signature", signature)
            .body(Body::from(payload))
            .unwrap()
    }

    async fn eventually(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_charge_succeeds() {
        let t = app();
        let (status, body) = send(&t.router, post("/charge", &charge_body(), "1.1.1.1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "succeeded");
        assert_eq!(body["identityRef"], "cus_1");

        let charges = t.processor.charges();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].email.as_deref(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn test_charge_requiring_followup_returns_secret() {
        let t = app();
        t.processor.set_requires_followup(true);
        let (status, body) = send(&t.router, post("/charge", &charge_body(), "1.1.1.1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "requires_followup");
        assert!(body["clientSecret"].is_string());
    }

    #[tokio::test]
    async fn test_price_mismatch_is_rejected_before_charging() {
        let t = app();
        let mut body = charge_body();
        body["amountMinorUnits"] = json!(100);
        let (status, response) = send(&t.router, post("/charge", &body, "1.1.1.1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "business_rule_rejected");
        assert!(t.processor.charges().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_email_makes_no_catalog_call() {
        let t = app();
        let mut body = charge_body();
        body["email"] = json!("not-an-email");
        let (status, response) = send(&t.router, post("/charge", &body, "1.1.1.1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "invalid_input");
        assert_eq!(t.processor.catalog_calls(), 0);
    }

    #[tokio::test]
    async fn test_declined_charge_is_sanitized() {
        let t = app();
        t.processor.set_declining(true);
        let (status, response) = send(&t.router, post("/charge", &charge_body(), "1.1.1.1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "upstream_rejected");
        assert_eq!(response["message"], "Your card was declined.");
    }

    #[tokio::test]
    async fn test_upsell_charges_existing_identity() {
        let t = app();
        let body = json!({
            "identityRef": "cus_9",
            "paymentMethodRef": "pm_saved",
            "amountMinorUnits": 19700,
            "productId": "prod_vip"
        });
        let (status, response) = send(&t.router, post("/charge-upsell", &body, "1.1.1.1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["identityRef"], "cus_9");
        assert_eq!(t.processor.charges()[0].kind, relay_core::types::ChargeKind::Upsell);
    }

    #[tokio::test]
    async fn test_missing_processor_is_configuration_error() {
        let t = app_with(|state| {
            state.gate = None;
            state.gateway = None;
        });
        let (status, response) = send(&t.router, post("/charge", &charge_body(), "1.1.1.1")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response["error"], "missing_configuration");
    }

    #[tokio::test]
    async fn test_rate_limit_per_origin() {
        let t = app();
        let mut body = charge_body();
        body["amountMinorUnits"] = json!(100);
        for _ in 0..10 {
            let (status, _) = send(&t.router, post("/charge", &body, "198.51.100.1")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        let (status, response) = send(&t.router, post("/charge", &body, "198.51.100.1")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response["error"], "rate_limited");

        let (status, _) = send(&t.router, post("/charge", &charge_body(), "198.51.100.2")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_notification_fans_out_once() {
        let t = app();
        let body = notification("pi_100");

        let (status, ack) = send(&t.router, signed(&body, SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["received"], true);
        let (status, _) = send(&t.router, signed(&body, SECRET)).await;
        assert_eq!(status, StatusCode::OK);

        eventually(|| t.marketing.purchases().len() == 2).await;
        eventually(|| {
            t.profiles
                .by_email("ada@example.com")
                .first()
                .is_some_and(|p| p.note.contains("ref:pi_100"))
        })
        .await;
        eventually(|| t.orders.orders().len() == 1).await;
        assert_eq!(t.orders.attempts(), 1);
        let profile = t.profiles.by_email("ada@example.com").remove(0);
        assert_eq!(profile.note.matches("ref:pi_100").count(), 1);
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected() {
        let t = app();
        let (status, response) = send(&t.router, signed(&notification("pi_1"), "whsec_other")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "auth_failure");

        let unsigned = Request::builder()
            .method("POST")
            .uri("/purchase-notification")
            .body(Body::from(notification("pi_1").to_string()))
            .unwrap();
        let (status, _) = send(&t.router, unsigned).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(t.marketing.purchases().is_empty());
    }

    #[tokio::test]
    async fn test_missing_webhook_secret_is_server_error() {
        let t = app_with(|state| state.verifier = None);
        let (status, _) = send(&t.router, signed(&notification("pi_1"), SECRET)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_notification_without_pipeline_is_not_acknowledged() {
        let t = app_with(|state| {
            state.gate = None;
            state.gateway = None;
            state.queue = None;
        });
        let (status, response) = send(&t.router, signed(&notification("pi_7"), SECRET)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response["error"], "missing_configuration");
        assert_ne!(response["received"], true);
    }

    #[tokio::test]
    async fn test_acknowledgment_does_not_wait_for_sinks() {
        let profiles =
            Arc::new(InMemoryProfileStore::new().with_latency(Duration::from_millis(500)));
        let t = app_with_profiles(profiles, |_| {});

        let started = Instant::now();
        let (status, _) = send(&t.router, signed(&notification("pi_8"), SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(t.profiles.is_empty());

        eventually(|| !t.profiles.by_email("ada@example.com").is_empty()).await;
    }

    #[tokio::test]
    async fn test_other_event_types_are_acknowledged() {
        let t = app();
        let mut body = notification("pi_1");
        body["type"] = json!("payment_intent.created");
        let (status, ack) = send(&t.router, signed(&body, SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["ignored"], "payment_intent.created");
    }

    #[tokio::test]
    async fn test_lead_capture() {
        let t = app();
        let body = json!({
            "name": "Grace Hopper",
            "email": "grace@example.com",
            "phone": "555-123-4567",
            "categoryTag": "Coaching",
            "formName": "Webinar"
        });
        let (status, response) = send(&t.router, post("/lead-capture", &body, "1.1.1.1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], true);

        let profile = t.profiles.by_email("grace@example.com").remove(0);
        assert!(profile.tags.contains("lead"));
        assert!(profile.tags.contains("coaching"));
        assert_eq!(profile.phone.as_deref(), Some("+15551234567"));
        assert_eq!(t.marketing.leads().len(), 1);
        assert!(t.processor.charges().is_empty());
    }

    #[tokio::test]
    async fn test_lead_capture_profile_outage() {
        let t = app();
        t.profiles.set_failing(true);
        let body = json!({ "name": "G", "email": "g@example.com", "categoryTag": "vip" });
        let (status, _) = send(&t.router, post("/lead-capture", &body, "1.1.1.1")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_input() {
        let t = app();
        let request = Request::builder()
            .method("POST")
            .uri("/lead-capture")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, response) = send(&t.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "invalid_input");
    }

    #[tokio::test]
    async fn test_probes() {
        let t = app();
        let get = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = send(&t.router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "live");
        assert_eq!(send(&t.router, get("/ready")).await.0, StatusCode::OK);
        assert_eq!(send(&t.router, get("/live")).await.0, StatusCode::OK);

        let t = app_with(|state| state.gateway = None);
        assert_eq!(send(&t.router, get("/ready")).await.0, StatusCode::SERVICE_UNAVAILABLE);
    }
}
