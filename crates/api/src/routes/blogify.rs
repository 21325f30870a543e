//! Article generation from a YouTube video

use axum::{
    extract::{Extension, State},
    Json,
};
use blogify_billing::ledger::{ARTICLE_COST, SETTLEMENT_SKIPPED_WARNING};
use blogify_billing::Settlement;
use blogify_shared::articles::UNTITLED;
use blogify_shared::{ArticleStatus, NewArticle};
use serde::{Deserialize, Serialize};

use crate::{
    auth::CurrentSession,
    content::{extract_video_id, ArticleOptions, TRANSCRIPT_LANGUAGES},
    error::ApiResult,
    state::AppState,
};

/// Warning when the paid illustration could not be produced
pub const IMAGE_FAILED_WARNING: &str =
    "The illustration could not be generated; you were not charged for it.";

/// Warning when charging failed after the article was delivered
pub const BILLING_NOT_FINALIZED_WARNING: &str =
    "Your article is ready, but its cost could not be recorded yet.";

#[derive(Debug, Deserialize)]
pub struct BlogifyRequest {
    pub url: String,
    pub title: Option<String>,
    pub tone: Option<String>,
    pub audience: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub with_image: bool,
}

impl BlogifyRequest {
    fn options(&self) -> ArticleOptions {
        let defaults = ArticleOptions::default();
        let pick = |value: &Option<String>, default: String| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .unwrap_or(default)
        };

        ArticleOptions {
            title: self.title.clone().filter(|t| !t.trim().is_empty()),
            tone: pick(&self.tone, defaults.tone),
            audience: pick(&self.audience, defaults.audience),
            language: pick(&self.language, defaults.language),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BlogifyResponse {
    /// Key of the saved article; absent when saving failed
    pub article_id: Option<String>,
    pub video_id: String,
    pub title: String,
    pub html: String,
    pub keyword: String,
    pub seo_title: String,
    pub meta_description: String,
    pub image_url: Option<String>,
    pub credits_used: i64,
    /// Absent when the balance could not be read back
    pub credits_remaining: Option<i64>,
    pub warnings: Vec<String>,
}

/// Turn a YouTube video into an article.
///
/// The balance is checked before any provider is called, generation runs
/// without holding the account lock, and the cost is settled afterwards.
pub async fn blogify(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    Json(req): Json<BlogifyRequest>,
) -> ApiResult<Json<BlogifyResponse>> {
    let account_id = session.snapshot.account_id.clone();
    let video_id = extract_video_id(&req.url)?;

    let quote = state.ledger.quote_article(&account_id, req.with_image).await?;
    let mut warnings: Vec<String> = quote.warning.iter().cloned().collect();

    tracing::info!(
        account_id = %account_id,
        video_id = %video_id,
        cost = quote.cost,
        with_image = quote.with_image,
        "Starting article generation"
    );

    let transcript = state
        .content
        .transcripts
        .fetch_transcript(&video_id, &TRANSCRIPT_LANGUAGES)
        .await?;
    let generated = state
        .content
        .articles
        .generate_article(&transcript, &req.options())
        .await?;

    let image_url = if quote.with_image {
        state.content.images.generate_image(&generated.image_prompt).await
    } else {
        None
    };

    let cost = if quote.with_image && image_url.is_none() {
        warnings.push(IMAGE_FAILED_WARNING.to_string());
        ARTICLE_COST
    } else {
        quote.cost
    };

    let (credits_used, credits_remaining) = match state.ledger.settle(&account_id, cost).await {
        Ok(Settlement::Charged { balance }) => (cost, Some(balance)),
        Ok(Settlement::Skipped { balance }) => {
            warnings.push(SETTLEMENT_SKIPPED_WARNING.to_string());
            (0, Some(balance))
        }
        Err(e) => {
            tracing::error!(
                account_id = %account_id,
                cost,
                error = %e,
                "RECONCILIATION NEEDED: article delivered but not charged"
            );
            warnings.push(BILLING_NOT_FINALIZED_WARNING.to_string());
            (0, None)
        }
    };

    let title = if generated.seo_title.trim().is_empty() {
        UNTITLED.to_string()
    } else {
        generated.seo_title.clone()
    };

    let article_id = match state
        .articles
        .create(NewArticle {
            account_id: Some(account_id.clone()),
            title: title.clone(),
            seo_title: Some(generated.seo_title.clone()).filter(|s| !s.is_empty()),
            keyword: Some(generated.keyword.clone()).filter(|s| !s.is_empty()),
            meta_description: Some(generated.meta_description.clone()),
            html_content: generated.html.clone(),
            image_url: image_url.clone(),
            source_video_id: Some(video_id.clone()),
            source_transcript: Some(transcript),
            credits_used,
            status: ArticleStatus::Draft,
        })
        .await
    {
        Ok(article) => Some(article.id),
        Err(e) => {
            tracing::warn!(account_id = %account_id, error = %e, "Could not save generated article");
            None
        }
    };

    // Best effort: the next request refreshes the snapshot anyway
    if credits_used > 0 {
        match state.accounts.get(&account_id).await {
            Ok(account) => {
                state.sessions.refresh(&session.id, &account);
            }
            Err(e) => {
                tracing::warn!(account_id = %account_id, error = %e, "Could not refresh session after charge")
            }
        }
    }

    tracing::info!(
        account_id = %account_id,
        video_id = %video_id,
        credits_used,
        warnings = warnings.len(),
        "Article generated"
    );

    Ok(Json(BlogifyResponse {
        article_id,
        video_id,
        title,
        html: generated.html,
        keyword: generated.keyword,
        seo_title: generated.seo_title,
        meta_description: generated.meta_description,
        image_url,
        credits_used,
        credits_remaining,
        warnings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> BlogifyRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_options_fall_back_to_defaults() {
        let options = request(serde_json::json!({
            "url": "https://youtu.be/abc",
            "tone": "  ",
            "language": "anglais"
        }))
        .options();
        assert_eq!(options, ArticleOptions {
            title: None,
            language: "anglais".to_string(),
            ..ArticleOptions::default()
        });
    }

    #[test]
    fn test_with_image_defaults_to_false() {
        let req = request(serde_json::json!({ "url": "https://youtu.be/abc" }));
        assert!(!req.with_image);
    }
}
