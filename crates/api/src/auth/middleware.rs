//! Session middleware
//!
//! Resolves the bearer token to a server-side session and brings the
//! session's account snapshot up to date before the handler runs.

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::session::Session;
use crate::state::AppState;

/// The caller's session, as seen after the staleness policy ran
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

/// Bearer token from the Authorization header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the session a request belongs to; `None` when it has none
pub fn resolve_session(state: &AppState, headers: &HeaderMap) -> Result<Option<Session>, ApiError> {
    let Some(token) = bearer_token(headers) else {
        return Ok(None);
    };

    let claims = state.jwt.validate_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected session token");
        ApiError::InvalidToken
    })?;

    Ok(state
        .sessions
        .get(&claims.sid)
        .filter(|session| session.snapshot.account_id.as_str() == claims.sub))
}

/// Reload the snapshot when it is stale for `path`.
///
/// A failed reload is logged and the last known snapshot is served.
pub async fn apply_staleness_policy(state: &AppState, session: Session, path: &str) -> Session {
    if !session.needs_refresh(path, state.sessions.ttl(), Instant::now()) {
        return session;
    }

    match state.accounts.get(&session.snapshot.account_id).await {
        Ok(account) => match state.sessions.refresh(&session.id, &account) {
            Some(refreshed) => {
                tracing::debug!(
                    account_id = %account.id,
                    credits = account.credits,
                    path = %path,
                    "Session snapshot refreshed"
                );
                refreshed
            }
            // Logged out concurrently
            None => session,
        },
        Err(e) => {
            tracing::warn!(
                account_id = %session.snapshot.account_id,
                path = %path,
                error = %e,
                "Session refresh failed, serving last known snapshot"
            );
            session
        }
    }
}

/// Middleware that requires a live session
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let session = resolve_session(&state, request.headers())?.ok_or(ApiError::Unauthorized)?;

    let path = request.uri().path().to_string();
    let session = apply_staleness_policy(&state, session, &path).await;

    request.extensions_mut().insert(CurrentSession(session));
    Ok(next.run(request).await)
}
