//! Payment Relay: checkout charges and post-purchase fan-out.
//!
//! Main entry point that wires the processor, the optional downstream sinks
//! and the purchase pipeline, then starts the server.

use clap::Parser;
use relay_admission::{AdmissionGate, RateLimiter, SlidingWindowLimiter};
use relay_api::{ApiServer, AppState};
use relay_cache::{ChargeLedger, EmailLocks, LocalChargeLedger, RedisChargeLedger};
use relay_core::config::{AppConfig, OperatingMode};
use relay_integrations::{
    KlaviyoClient, MarketingPlatform, SheetsWebhook, ShopifyClient, SpreadsheetLog,
};
use relay_pipeline::{
    FanOutCoordinator, MarketingSink, OrderRecorder, ProfileMerger, PurchaseClassifier,
    PurchasePipeline, PurchaseQueue, ReturningCustomerEvaluator, SpreadsheetSink,
};
use relay_processor::{StripeClient, WebhookVerifier};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const PROCESSOR_KEY_VAR: &str = "PAYMENT_RELAY__PROCESSOR__API_KEY";

#[derive(Parser, Debug)]
#[command(name = "payment-relay")]
#[command(about = "Checkout charge relay with post-purchase fan-out")]
#[command(version)]
struct Cli {
    /// HTTP port (overrides config)
    #[arg(long, env = "PAYMENT_RELAY__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics port (overrides config)
    #[arg(long, env = "PAYMENT_RELAY__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Run in test mode: a catalog outage admits the caller's amount unverified
    #[arg(long, default_value_t = false)]
    test_mode: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "payment_relay=info,relay_pipeline=info,relay_api=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Payment Relay starting up");

    // Load configuration
    let mut config = resolve_config(
        AppConfig::load(),
        std::env::var_os(PROCESSOR_KEY_VAR).is_some(),
    )?;

    // Apply CLI overrides
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if cli.test_mode {
        config.mode = OperatingMode::Test;
    }

    info!(
        mode = ?config.mode,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        "Configuration loaded"
    );

    // Payment processor
    let processor = match &config.processor.api_key {
        Some(key) => Some(Arc::new(StripeClient::new(&config.processor.base_url, key)?)),
        None => {
            warn!("Processor API key not set, charge endpoints will refuse requests");
            None
        }
    };
    let verifier = match &config.processor.webhook_secret {
        Some(secret) => Some(Arc::new(WebhookVerifier::new(
            secret.clone(),
            config.processor.signature_tolerance_secs,
        ))),
        None => {
            warn!("Webhook signing secret not set, notifications will be refused");
            None
        }
    };

    // Seen-charge ledger
    let ledger: Arc<dyn ChargeLedger> = match &config.cache.redis_url {
        Some(url) => match RedisChargeLedger::connect(url, config.cache.charge_ttl_secs).await {
            Ok(redis) => Arc::new(redis),
            Err(e) => {
                error!(error = %e, "Failed to connect to Redis, using in-process charge ledger");
                Arc::new(LocalChargeLedger::new(config.cache.charge_ttl_secs))
            }
        },
        None => Arc::new(LocalChargeLedger::new(config.cache.charge_ttl_secs)),
    };

    // Downstream integrations, each optional
    let store = ShopifyClient::from_config(&config.profile_store)?.map(Arc::new);
    if store.is_none() {
        warn!("Profile store not configured, profile and order sinks disabled");
    }
    let marketing: Option<Arc<dyn MarketingPlatform>> = match KlaviyoClient::from_config(&config.marketing)? {
        Some(client) => Some(Arc::new(client)),
        None => {
            warn!("Marketing platform not configured, marketing sink disabled");
            None
        }
    };
    let sheet: Option<Arc<dyn SpreadsheetLog>> = match SheetsWebhook::from_config(&config.spreadsheet)? {
        Some(client) => Some(Arc::new(client)),
        None => {
            warn!("Spreadsheet webhook not configured, spreadsheet sink disabled");
            None
        }
    };

    let locks = Arc::new(EmailLocks::new());
    let main_tag = config.pipeline.main_purchase_tag.clone();
    let leads = store
        .clone()
        .map(|store| Arc::new(ProfileMerger::new(store, locks.clone(), main_tag.clone())));

    let mut state = AppState {
        mode: config.mode,
        gate: None,
        gateway: None,
        verifier,
        queue: None,
        leads: leads.clone(),
        marketing: marketing.clone(),
        limiter: rate_limiter(&config),
        start_time: Instant::now(),
    };

    // Purchase pipeline
    if let Some(processor) = &processor {
        let mut coordinator = FanOutCoordinator::new();
        if let (Some(store), Some(merger)) = (&store, &leads) {
            coordinator = coordinator.with_sink(merger.clone()).with_sink(Arc::new(
                OrderRecorder::new(
                    store.clone(),
                    processor.clone(),
                    ledger.clone(),
                    config.profile_store.vendor.clone(),
                    main_tag.clone(),
                )
                .with_profiles(store.clone()),
            ));
        }
        if let Some(marketing) = &marketing {
            coordinator = coordinator.with_sink(Arc::new(MarketingSink::new(marketing.clone())));
        }
        if let Some(sheet) = &sheet {
            coordinator =
                coordinator.with_sink(Arc::new(SpreadsheetSink::new(sheet.clone(), ledger.clone())));
        }

        let pipeline = Arc::new(PurchasePipeline::new(
            PurchaseClassifier::new(processor.clone(), &config.pipeline),
            ReturningCustomerEvaluator::new(processor.clone(), &config.pipeline),
            coordinator,
        ));
        info!(sinks = ?pipeline.sink_names(), "Purchase pipeline assembled");

        let (queue, _worker) = PurchaseQueue::spawn(pipeline, config.pipeline.queue_capacity);
        state.queue = Some(queue);
        state.gate = Some(Arc::new(AdmissionGate::new(processor.clone(), &config)));
        state.gateway = Some(processor.clone());
    }

    let api_server = ApiServer::new(config.clone(), state);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    // Spawn ledger maintenance task
    let ledger_for_maintenance = ledger.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            ledger_for_maintenance.maintenance().await;
        }
    });

    info!("Payment Relay is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}

fn rate_limiter(config: &AppConfig) -> Arc<dyn RateLimiter> {
    Arc::new(SlidingWindowLimiter::new(
        config.admission.rate_limit_max_requests,
        Duration::from_secs(config.admission.rate_limit_window_secs),
    ))
}

/// Defaults are only acceptable when no money can move. With a processor key
/// in the environment, a config that fails to load stops startup.
fn resolve_config<E: std::fmt::Display>(
    loaded: Result<AppConfig, E>,
    processor_key_present: bool,
) -> anyhow::Result<AppConfig> {
    match loaded {
        Ok(config) => Ok(config),
        Err(e) if processor_key_present => {
            error!(error = %e, "Failed to load config with a processor key set, refusing to start");
            Err(anyhow::anyhow!("invalid configuration: {e}"))
        }
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Ok(AppConfig::default())
        }
    }
}
