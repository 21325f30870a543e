//! Account routes

use axum::{
    extract::{Extension, State},
    Json,
};
use blogify_billing::PlanSpec;
use serde::Serialize;

use crate::{
    auth::CurrentSession,
    error::ApiResult,
    session::{SessionFlag, SessionSnapshot},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub account: SessionSnapshot,
    /// Seconds since the snapshot was loaded from the record store
    pub snapshot_age_secs: u64,
    /// Set once after a cancellation was scheduled
    pub cancellation_scheduled: bool,
}

/// The caller's account, refreshed by the session middleware
pub async fn get_account(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
) -> ApiResult<Json<AccountResponse>> {
    let cancellation_scheduled = state
        .sessions
        .take_flag(&session.id, SessionFlag::CancellationScheduled);

    Ok(Json(AccountResponse {
        snapshot_age_secs: session.age(std::time::Instant::now()).as_secs(),
        account: session.snapshot,
        cancellation_scheduled,
    }))
}

/// Purchasable plans and their credit allotments
pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<PlanSpec>> {
    let plans = state
        .billing
        .as_ref()
        .map(|billing| billing.catalog.plans().to_vec())
        .unwrap_or_default();
    Json(plans)
}
