//! Authentication routes

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use blogify_billing::FREE_SIGNUP_CREDITS;
use blogify_shared::{Account, AccountUpdate, NewAccount};
use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::{
    auth::{hash_password, validate_password_strength, verify_password, CurrentSession},
    error::{ApiError, ApiResult},
    session::SessionSnapshot,
    state::AppState,
};

/// Digits in a signup confirmation code
pub const CONFIRMATION_CODE_LEN: usize = 6;

/// Wrong codes accepted before the code is replaced
pub const MAX_CONFIRMATION_ATTEMPTS: i64 = 5;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub email: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub account: SessionSnapshot,
}

// =============================================================================
// Handlers
// =============================================================================

/// Create an unconfirmed account and email its confirmation code
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> ApiResult<(StatusCode, Json<SignupResponse>)> {
    let email = req.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::Validation("Invalid email format".to_string()));
    }
    validate_password_strength(&req.password)?;

    if state.accounts.find_by_email(&email).await?.is_some() {
        return Err(ApiError::EmailAlreadyExists);
    }

    let password_hash = hash_password(&req.password).map_err(|e| {
        tracing::error!(error = %e, "signup: password hashing failed");
        ApiError::Internal
    })?;
    let code = generate_confirmation_code();

    let account = state
        .accounts
        .create(NewAccount {
            email: email.clone(),
            password_hash,
            confirmation_code: code.clone(),
            credits: FREE_SIGNUP_CREDITS,
        })
        .await?;

    tracing::info!(account_id = %account.id, "Account created, awaiting confirmation");
    state.email.send_confirmation_code(&account.email, &code).await;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            email: account.email,
            message: "A confirmation code has been sent to your email address.".to_string(),
        }),
    ))
}

/// Confirm an account with its emailed code and open a session.
///
/// Every attempt is counted before the code is compared. After
/// [`MAX_CONFIRMATION_ATTEMPTS`] wrong codes the code is replaced and a new
/// one is emailed.
pub async fn confirm(
    State(state): State<AppState>,
    Json(req): Json<ConfirmRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let account = state
        .accounts
        .find_by_email(&req.email)
        .await?
        .ok_or(ApiError::InvalidConfirmationCode)?;

    let expected = account
        .confirmation_code
        .as_deref()
        .ok_or(ApiError::InvalidConfirmationCode)?;

    if account.confirmation_attempts >= MAX_CONFIRMATION_ATTEMPTS {
        return Err(rotate_confirmation_code(&state, &account).await);
    }
    if !state
        .accounts
        .record_confirmation_attempt(&account.id, account.confirmation_attempts)
        .await?
    {
        tracing::info!(account_id = %account.id, "confirm: concurrent attempt, rejected");
        return Err(ApiError::InvalidConfirmationCode);
    }

    let submitted = req.code.trim();
    if !bool::from(expected.as_bytes().ct_eq(submitted.as_bytes())) {
        let attempts = account.confirmation_attempts + 1;
        tracing::info!(account_id = %account.id, attempts, "confirm: wrong confirmation code");
        if attempts >= MAX_CONFIRMATION_ATTEMPTS {
            return Err(rotate_confirmation_code(&state, &account).await);
        }
        return Err(ApiError::InvalidConfirmationCode);
    }

    let account = state
        .accounts
        .update(&account.id, AccountUpdate::new().confirmed())
        .await?;
    tracing::info!(account_id = %account.id, "Account confirmed");

    open_session(&state, &account).map(Json)
}

/// Log in with email and password
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let account = state
        .accounts
        .find_by_email(&req.email)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    let valid = verify_password(&req.password, &account.password_hash).map_err(|e| {
        tracing::error!(account_id = %account.id, error = %e, "login: stored hash unusable");
        ApiError::InvalidCredentials
    })?;
    if !valid {
        return Err(ApiError::InvalidCredentials);
    }
    if !account.is_confirmed {
        return Err(ApiError::EmailNotConfirmed);
    }

    tracing::info!(account_id = %account.id, "User logged in");
    open_session(&state, &account).map(Json)
}

/// Destroy the caller's session
pub async fn logout(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
) -> StatusCode {
    state.sessions.remove(&session.id);
    tracing::info!(account_id = %session.snapshot.account_id, "User logged out");
    StatusCode::NO_CONTENT
}

// =============================================================================
// Helpers
// =============================================================================

fn open_session(state: &AppState, account: &Account) -> ApiResult<AuthResponse> {
    let session = state.sessions.create(account);
    let issued = state
        .jwt
        .generate_session_token(account.id.as_str(), &account.email, &session.id)
        .map_err(|e| {
            state.sessions.remove(&session.id);
            tracing::error!(error = %e, "Failed to issue session token");
            ApiError::Internal
        })?;

    Ok(AuthResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        account: session.snapshot,
    })
}

/// Replace an exhausted confirmation code and email the new one
async fn rotate_confirmation_code(state: &AppState, account: &Account) -> ApiError {
    let code = generate_confirmation_code();
    if let Err(e) = state
        .accounts
        .update(&account.id, AccountUpdate::new().confirmation_code(code.clone()))
        .await
    {
        return ApiError::from(e);
    }

    tracing::warn!(account_id = %account.id, "Confirmation attempts exhausted, code replaced");
    state.email.send_confirmation_code(&account.email, &code).await;
    ApiError::ConfirmationAttemptsExceeded
}

/// Random zero-padded numeric code
pub fn generate_confirmation_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CONFIRMATION_CODE_LEN)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

fn is_valid_email(email: &str) -> bool {
    let email = email.trim().to_lowercase();

    // Length checks per RFC 5321
    if email.len() > 254 || email.is_empty() {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if domain.contains('@') {
        return false;
    }

    // Local part validation
    if local.is_empty() || local.len() > 64 {
        return false;
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }
    if !local
        .chars()
        .all(|c| c.is_alphanumeric() || ".+-_".contains(c))
    {
        return false;
    }

    // Domain validation
    if domain.is_empty() || domain.len() > 255 {
        return false;
    }
    if domain.starts_with('-') || domain.ends_with('-') {
        return false;
    }
    if domain.starts_with('.') || domain.ends_with('.') || domain.contains("..") {
        return false;
    }

    // Must have valid TLD (at least 2 chars, alpha only)
    match domain.rsplit_once('.') {
        Some((_, tld)) if tld.len() >= 2 && tld.chars().all(|c| c.is_alphabetic()) => {}
        _ => return false,
    }

    domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
}
