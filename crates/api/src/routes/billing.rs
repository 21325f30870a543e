//! Billing routes: checkout, return path, cancellation and the Stripe webhook

use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use blogify_billing::{BillingError, BillingService, WebhookOutcome};
use serde::{Deserialize, Serialize};

use crate::{
    auth::CurrentSession,
    error::{ApiError, ApiResult},
    session::{SessionFlag, SessionSnapshot},
    state::AppState,
};

fn billing(state: &AppState) -> ApiResult<&BillingService> {
    state
        .billing
        .as_deref()
        .ok_or(ApiError::ServiceUnavailable)
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct CheckoutUrlResponse {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct UpgradeSuccessQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpgradeSuccessResponse {
    pub message: String,
    pub account: SessionSnapshot,
}

#[derive(Debug, Serialize)]
pub struct CancelSubscriptionResponse {
    pub message: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// Start a hosted checkout for `plan` and return its URL
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    Path(plan): Path<String>,
) -> ApiResult<Json<CheckoutUrlResponse>> {
    let billing = billing(&state)?;
    let account = state.accounts.get(&session.snapshot.account_id).await?;

    let checkout = billing.checkout.start_checkout(&account, &plan).await?;
    let url = checkout.url.ok_or_else(|| {
        tracing::error!(session_id = %checkout.session_id, "Checkout session has no URL");
        ApiError::Internal
    })?;

    Ok(Json(CheckoutUrlResponse { url }))
}

/// Browser return from a completed checkout.
///
/// Links the Stripe ids to the account and refreshes the caller's session.
/// Credits are granted by the webhook only.
pub async fn upgrade_success(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    Query(query): Query<UpgradeSuccessQuery>,
) -> ApiResult<Json<UpgradeSuccessResponse>> {
    let billing = billing(&state)?;
    let checkout_session_id = query
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing session_id".to_string()))?;

    let account = billing
        .checkout
        .finalize_checkout_return(&checkout_session_id)
        .await
        .map_err(|e| {
            tracing::warn!(
                account_id = %session.snapshot.account_id,
                error = %e,
                "Checkout return could not be linked"
            );
            ApiError::from(e)
        })?;

    if account.id != session.snapshot.account_id {
        tracing::warn!(
            session_account_id = %session.snapshot.account_id,
            checkout_account_id = %account.id,
            "Checkout return belongs to another account"
        );
    }

    let snapshot = state
        .sessions
        .refresh(&session.id, &account)
        .map(|s| s.snapshot)
        .unwrap_or_else(|| SessionSnapshot::from(&account));

    Ok(Json(UpgradeSuccessResponse {
        message: "Thank you! Your subscription is active; credits appear as soon as the payment is confirmed."
            .to_string(),
        account: snapshot,
    }))
}

/// Schedule the caller's subscription to end with the current period
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
) -> ApiResult<Json<CancelSubscriptionResponse>> {
    let billing = billing(&state)?;
    let account = state.accounts.get(&session.snapshot.account_id).await?;

    billing.checkout.cancel_at_period_end(&account).await?;
    state
        .sessions
        .set_flag(&session.id, SessionFlag::CancellationScheduled);

    Ok(Json(CancelSubscriptionResponse {
        message: "Your subscription will end at the close of the current billing period."
            .to_string(),
    }))
}

/// Stripe webhook.
///
/// Only a missing or invalid signature is rejected; every verified delivery
/// is acknowledged so Stripe does not retry a permanently failing handler.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let billing = billing(&state)?;

    // Get signature header
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::BadRequest("Missing Stripe signature".to_string())
        })?;

    // Verify and parse event
    let event = match billing.webhooks.verify_event(&body, signature) {
        Ok(event) => event,
        Err(BillingError::WebhookPayload(reason)) => {
            tracing::error!(
                reason = %reason,
                "RECONCILIATION NEEDED: signed webhook payload could not be parsed"
            );
            return Ok(StatusCode::OK);
        }
        Err(e) => {
            tracing::warn!(error = ?e, "Stripe webhook signature verification failed");
            return Err(ApiError::BadRequest("Invalid webhook signature".to_string()));
        }
    };

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "Stripe webhook event verified"
    );

    let event_id = event.id.clone();
    match billing.webhooks.handle_event(event).await {
        WebhookOutcome::Applied => {
            tracing::info!(event_id = %event_id, "Stripe webhook processed successfully")
        }
        outcome => tracing::info!(event_id = %event_id, outcome = ?outcome, "Stripe webhook acknowledged"),
    }

    Ok(StatusCode::OK)
}
