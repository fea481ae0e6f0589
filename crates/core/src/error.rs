use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

/// Stable classification of a [`RelayError`], used for HTTP mapping and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    BusinessRuleRejected,
    CatalogUnavailable,
    AuthFailure,
    RateLimited,
    IntegrationUnavailable,
    UpstreamRejected,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::BusinessRuleRejected => "business_rule_rejected",
            Self::CatalogUnavailable => "catalog_unavailable",
            Self::AuthFailure => "auth_failure",
            Self::RateLimited => "rate_limited",
            Self::IntegrationUnavailable => "integration_unavailable",
            Self::UpstreamRejected => "upstream_rejected",
            Self::Config => "missing_configuration",
            Self::Internal => "internal_error",
        }
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Product {0} is not active")]
    ProductInactive(String),

    #[error("Amount {amount} does not match an active price for product {product_id}")]
    PriceMismatch { product_id: String, amount: i64 },

    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("{integration} unavailable: {reason}")]
    IntegrationUnavailable { integration: String, reason: String },

    /// The processor declined the charge. The message is safe to show to the payer.
    #[error("Payment rejected: {0}")]
    UpstreamRejected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    pub fn integration(integration: impl Into<String>, reason: impl ToString) -> Self {
        Self::IntegrationUnavailable {
            integration: integration.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::ProductInactive(_) | Self::PriceMismatch { .. } => {
                ErrorKind::BusinessRuleRejected
            }
            Self::CatalogUnavailable(_) => ErrorKind::CatalogUnavailable,
            Self::AuthFailure(_) => ErrorKind::AuthFailure,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::IntegrationUnavailable { .. } => ErrorKind::IntegrationUnavailable,
            Self::UpstreamRejected(_) => ErrorKind::UpstreamRejected,
            Self::Config(_) => ErrorKind::Config,
            Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_rule_kinds() {
        assert_eq!(
            RelayError::ProductInactive("prod_1".into()).kind(),
            ErrorKind::BusinessRuleRejected
        );
        let mismatch = RelayError::PriceMismatch {
            product_id: "prod_1".into(),
            amount: 100,
        };
        assert_eq!(mismatch.kind(), ErrorKind::BusinessRuleRejected);
        assert!(mismatch.to_string().contains("prod_1"));
    }

    #[test]
    fn test_integration_helper() {
        let err = RelayError::integration("profile-store", "HTTP 503");
        assert_eq!(err.kind(), ErrorKind::IntegrationUnavailable);
        assert_eq!(err.to_string(), "profile-store unavailable: HTTP 503");
    }
}
