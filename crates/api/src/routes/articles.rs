//! Saved articles

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use blogify_shared::Article;
use serde::Deserialize;

use crate::{auth::CurrentSession, error::ApiResult, state::AppState};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ListArticlesQuery {
    pub limit: Option<usize>,
}

/// The caller's articles, newest first
pub async fn list_articles(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    Query(query): Query<ListArticlesQuery>,
) -> ApiResult<Json<Vec<Article>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let articles = state
        .articles
        .recent_for_account(&session.snapshot.account_id, limit)
        .await?;
    Ok(Json(articles))
}
