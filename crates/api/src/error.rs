//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use blogify_billing::BillingError;
use blogify_shared::StoreError;
use serde_json::json;

use crate::auth::password::PasswordValidationError;
use crate::content::ContentError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Email address not confirmed")]
    EmailNotConfirmed,
    #[error("Invalid confirmation code")]
    InvalidConfirmationCode,
    #[error("Email already registered")]
    EmailAlreadyExists,
    #[error("Too many wrong codes; a new confirmation code has been sent")]
    ConfirmationAttemptsExceeded,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthorized,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),

    // Billing errors
    #[error("Insufficient credits: {balance} available, {required} required")]
    InsufficientCredits { balance: i64, required: i64 },
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
    #[error("No active subscription")]
    NoSubscription,
    #[error("Payment received, but the account could not be updated yet (reference {correlation_id})")]
    CheckoutUnresolved { correlation_id: String },

    // Content errors
    #[error(transparent)]
    Content(#[from] ContentError),

    // Internal errors
    #[error("Internal server error")]
    Internal,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", self.to_string()),
            ApiError::EmailNotConfirmed => (StatusCode::FORBIDDEN, "EMAIL_NOT_CONFIRMED", "Please confirm your email address before logging in.".to_string()),
            ApiError::InvalidConfirmationCode => (StatusCode::BAD_REQUEST, "INVALID_CONFIRMATION_CODE", self.to_string()),
            ApiError::EmailAlreadyExists => (StatusCode::CONFLICT, "EMAIL_EXISTS", self.to_string()),
            ApiError::ConfirmationAttemptsExceeded => (StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_ATTEMPTS", self.to_string()),
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            // Billing
            ApiError::InsufficientCredits { .. } => (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_CREDITS", self.to_string()),
            ApiError::InvalidPlan(_) => (StatusCode::BAD_REQUEST, "INVALID_PLAN", self.to_string()),
            ApiError::NoSubscription => (StatusCode::BAD_REQUEST, "NO_SUBSCRIPTION", self.to_string()),
            ApiError::CheckoutUnresolved { .. } => (StatusCode::CONFLICT, "CHECKOUT_UNRESOLVED", self.to_string()),

            // Content
            ApiError::Content(err) => {
                let (status, code) = match err {
                    ContentError::MissingUrl | ContentError::InvalidUrl => (StatusCode::BAD_REQUEST, "INVALID_URL"),
                    ContentError::TranscriptUnavailable => (StatusCode::UNPROCESSABLE_ENTITY, "TRANSCRIPT_UNAVAILABLE"),
                    ContentError::NoTranscriptFound => (StatusCode::UNPROCESSABLE_ENTITY, "NO_TRANSCRIPT_FOUND"),
                    ContentError::VideoUnavailable => (StatusCode::UNPROCESSABLE_ENTITY, "VIDEO_UNAVAILABLE"),
                    ContentError::Blocked => (StatusCode::SERVICE_UNAVAILABLE, "TRANSCRIPT_BLOCKED"),
                    ContentError::Upstream(_) | ContentError::MalformedArticle(_) => {
                        return (
                            StatusCode::BAD_GATEWAY,
                            Json(json!({
                                "error": {
                                    "code": "GENERATION_FAILED",
                                    "message": "Article generation failed, please try again.",
                                }
                            })),
                        )
                            .into_response();
                    }
                };
                (status, code, err.to_string())
            }

            // Internal
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
            ApiError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound,
            StoreError::Upstream(msg) => {
                tracing::error!(error = %msg, "Record store unavailable");
                ApiError::ServiceUnavailable
            }
            other => {
                tracing::error!(error = %other, "Record store error");
                ApiError::Internal
            }
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::NotFound(_) => ApiError::NotFound,
            BillingError::InsufficientCredits { balance, required } => {
                ApiError::InsufficientCredits { balance, required }
            }
            BillingError::InvalidPlan(plan) => ApiError::InvalidPlan(plan),
            BillingError::InvalidInput(msg) => ApiError::Validation(msg),
            BillingError::WebhookSignatureInvalid => {
                ApiError::BadRequest("Invalid webhook signature".to_string())
            }
            BillingError::WebhookPayload(msg) => ApiError::BadRequest(msg),
            BillingError::NoSubscription => ApiError::NoSubscription,
            BillingError::CheckoutUnresolved { correlation_id, .. } => {
                ApiError::CheckoutUnresolved { correlation_id }
            }
            e if e.is_upstream() => {
                tracing::error!(error = %e, "Billing upstream unavailable");
                ApiError::ServiceUnavailable
            }
            e => {
                tracing::error!(error = %e, "Billing error");
                ApiError::Internal
            }
        }
    }
}

impl From<PasswordValidationError> for ApiError {
    fn from(err: PasswordValidationError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_errors_map_to_client_errors() {
        assert!(matches!(
            ApiError::from(BillingError::InsufficientCredits { balance: 0, required: 1 }),
            ApiError::InsufficientCredits { balance: 0, required: 1 }
        ));
        assert!(matches!(
            ApiError::from(BillingError::InvalidPlan("gold".into())),
            ApiError::InvalidPlan(_)
        ));
        assert!(matches!(
            ApiError::from(BillingError::StripeApi("timeout".into())),
            ApiError::ServiceUnavailable
        ));
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::InsufficientCredits { balance: 0, required: 1 }, StatusCode::PAYMENT_REQUIRED),
            (ApiError::EmailNotConfirmed, StatusCode::FORBIDDEN),
            (ApiError::EmailAlreadyExists, StatusCode::CONFLICT),
            (ApiError::ConfirmationAttemptsExceeded, StatusCode::TOO_MANY_REQUESTS),
            (ApiError::Content(ContentError::InvalidUrl), StatusCode::BAD_REQUEST),
            (ApiError::Content(ContentError::Blocked), StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::Content(ContentError::Upstream("x".into())), StatusCode::BAD_GATEWAY),
            (
                ApiError::CheckoutUnresolved { correlation_id: "cs_test_".into() },
                StatusCode::CONFLICT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
