use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `PAYMENT_RELAY__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub profile_store: ProfileStoreConfig,
    #[serde(default)]
    pub marketing: MarketingConfig,
    #[serde(default)]
    pub spreadsheet: SpreadsheetConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Test mode relaxes admission when the catalog cannot be read. It must be
/// selected explicitly; an unset mode is live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Test,
    #[default]
    Live,
}

impl OperatingMode {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_processor_url")]
    pub base_url: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_signature_tolerance_secs")]
    pub signature_tolerance_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileStoreConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_store_api_version")]
    pub api_version: String,
    #[serde(default = "default_vendor")]
    pub vendor: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketingConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_marketing_url")]
    pub base_url: String,
    #[serde(default)]
    pub customer_list_id: Option<String>,
    #[serde(default)]
    pub lead_list_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpreadsheetConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_max_amount")]
    pub max_amount_minor_units: i64,
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: usize,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
}

/// One row of the upsell classification table: a product name containing
/// `keyword` (case-insensitive) is classified as `category`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryRule {
    pub keyword: String,
    pub category: String,
}

impl CategoryRule {
    pub fn new(keyword: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            category: category.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_guard_interval_secs")]
    pub guard_interval_secs: i64,
    #[serde(default = "default_returning_threshold_secs")]
    pub returning_threshold_secs: i64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_main_purchase_tag")]
    pub main_purchase_tag: String,
    #[serde(default = "default_category_rules")]
    pub category_rules: Vec<CategoryRule>,
    #[serde(default = "default_upsell_category")]
    pub default_upsell_category: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_charge_ttl_secs")]
    pub charge_ttl_secs: u64,
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    3000
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_processor_url() -> String {
    "https://api.stripe.com/v1".to_string()
}
fn default_currency() -> String {
    "usd".to_string()
}
fn default_signature_tolerance_secs() -> u64 {
    300
}
fn default_store_api_version() -> String {
    "2024-10".to_string()
}
fn default_vendor() -> String {
    "Online Store".to_string()
}
fn default_marketing_url() -> String {
    "https://a.klaviyo.com/api".to_string()
}
fn default_max_amount() -> i64 {
    1_000_000
}
fn default_rate_limit_max_requests() -> usize {
    10
}
fn default_rate_limit_window_secs() -> u64 {
    15 * 60
}
fn default_guard_interval_secs() -> i64 {
    60
}
fn default_returning_threshold_secs() -> i64 {
    3600
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_main_purchase_tag() -> String {
    "main-course".to_string()
}
fn default_category_rules() -> Vec<CategoryRule> {
    vec![
        CategoryRule::new("coaching", "coaching-buyer"),
        CategoryRule::new("vip", "vip-buyer"),
        CategoryRule::new("workbook", "workbook-buyer"),
        CategoryRule::new("template", "templates-buyer"),
    ]
}
fn default_upsell_category() -> String {
    "generic-upsell".to_string()
}
fn default_charge_ttl_secs() -> u64 {
    7 * 24 * 3600
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            webhook_secret: None,
            base_url: default_processor_url(),
            currency: default_currency(),
            signature_tolerance_secs: default_signature_tolerance_secs(),
        }
    }
}

impl Default for ProfileStoreConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            access_token: None,
            api_version: default_store_api_version(),
            vendor: default_vendor(),
        }
    }
}

impl Default for MarketingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_marketing_url(),
            customer_list_id: None,
            lead_list_id: None,
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_amount_minor_units: default_max_amount(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            guard_interval_secs: default_guard_interval_secs(),
            returning_threshold_secs: default_returning_threshold_secs(),
            queue_capacity: default_queue_capacity(),
            main_purchase_tag: default_main_purchase_tag(),
            category_rules: default_category_rules(),
            default_upsell_category: default_upsell_category(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            charge_ttl_secs: default_charge_ttl_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            processor: ProcessorConfig::default(),
            profile_store: ProfileStoreConfig::default(),
            marketing: MarketingConfig::default(),
            spreadsheet: SpreadsheetConfig::default(),
            admission: AdmissionConfig::default(),
            pipeline: PipelineConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("PAYMENT_RELAY")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.mode, OperatingMode::Live);
        assert_eq!(config.admission.rate_limit_max_requests, 10);
        assert_eq!(config.admission.rate_limit_window_secs, 900);
        assert_eq!(config.pipeline.guard_interval_secs, 60);
        assert_eq!(config.pipeline.returning_threshold_secs, 3600);
        assert_eq!(config.pipeline.category_rules[0].keyword, "coaching");
        assert!(config.processor.api_key.is_none());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let json = serde_json::json!({
            "mode": "test",
            "processor": { "api_key": "sk_test_123" },
            "pipeline": { "category_rules": [{ "keyword": "vip", "category": "vip-buyer" }] }
        });
        let config: AppConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.mode, OperatingMode::Test);
        assert_eq!(config.processor.api_key.as_deref(), Some("sk_test_123"));
        assert_eq!(config.processor.currency, "usd");
        assert_eq!(config.pipeline.category_rules.len(), 1);
        assert_eq!(config.pipeline.main_purchase_tag, "main-course");
    }
}
