//! Billing error types

use blogify_shared::StoreError;
use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Record store unavailable: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: i64, required: i64 },

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Malformed webhook payload: {0}")]
    WebhookPayload(String),

    #[error("Checkout session {correlation_id} could not be linked to an account: {reason}")]
    CheckoutUnresolved {
        correlation_id: String,
        reason: String,
    },

    #[error("No active subscription")]
    NoSubscription,

    #[error("Concurrent modification detected: {0}")]
    ConcurrentModification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Transient failure of an external collaborator
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            BillingError::StripeApi(_) | BillingError::Store(_)
        )
    }
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { table, key } => {
                BillingError::NotFound(format!("{}/{}", table, key))
            }
            StoreError::Upstream(msg) => BillingError::Store(msg),
            StoreError::Decode(msg) => BillingError::Internal(format!("malformed record: {}", msg)),
            StoreError::Config(msg) => BillingError::Config(msg),
        }
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
