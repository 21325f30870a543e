//! Transcript fetching

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use super::{ContentError, ContentResult};

/// Transcript languages, in order of preference
pub const TRANSCRIPT_LANGUAGES: [&str; 2] = ["fr", "en"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_BASE_DELAY_MS: u64 = 200;
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);
const MAX_RETRIES: usize = 2;

#[async_trait]
pub trait TranscriptProvider: Send + Sync {
    /// Plain-text transcript of a video in the first available language
    async fn fetch_transcript(&self, video_id: &str, languages: &[&str]) -> ContentResult<String>;
}

#[derive(Debug, Deserialize)]
pub struct TranscriptSegment {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub duration: f64,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Default, Deserialize)]
struct TranscriptErrorBody {
    #[serde(default)]
    error: String,
}

/// Join the non-empty segment texts with newlines
pub fn join_segments(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| s.text.as_str())
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Map a failed transcript service answer to a content error
fn classify_failure(status: StatusCode, error_code: &str) -> ContentError {
    match error_code {
        "transcripts_disabled" => return ContentError::TranscriptUnavailable,
        "video_unavailable" => return ContentError::VideoUnavailable,
        "no_transcript_found" => return ContentError::NoTranscriptFound,
        "request_blocked" | "ip_blocked" => return ContentError::Blocked,
        _ => {}
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN => ContentError::Blocked,
        StatusCode::NOT_FOUND => ContentError::NoTranscriptFound,
        StatusCode::GONE => ContentError::VideoUnavailable,
        other => ContentError::Upstream(format!("transcript service answered {}", other)),
    }
}

/// Transcript provider backed by a transcript HTTP service.
///
/// `GET {base}/transcripts/{video_id}?languages=fr,en` answers
/// `{"segments": [{"text", "start", "duration"}]}`, or an error status with
/// `{"error": "<code>"}`.
#[derive(Clone)]
pub struct HttpTranscriptProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTranscriptProvider {
    pub fn new(base_url: impl Into<String>) -> ContentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_once(&self, video_id: &str, languages: &str) -> ContentResult<String> {
        let response = self
            .client
            .get(format!("{}/transcripts/{}", self.base_url, video_id))
            .query(&[("languages", languages)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: TranscriptErrorBody = response.json().await.unwrap_or_default();
            return Err(classify_failure(status, &body.error));
        }

        let transcript: TranscriptResponse = response.json().await?;
        let text = join_segments(&transcript.segments);
        if text.is_empty() {
            return Err(ContentError::NoTranscriptFound);
        }
        Ok(text)
    }
}

#[async_trait]
impl TranscriptProvider for HttpTranscriptProvider {
    async fn fetch_transcript(&self, video_id: &str, languages: &[&str]) -> ContentResult<String> {
        let languages = languages.join(",");
        let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY_MS)
            .max_delay(RETRY_MAX_DELAY)
            .take(MAX_RETRIES)
            .map(jitter);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.fetch_once(video_id, &languages),
            |e: &ContentError| {
                if e.is_transient() {
                    tracing::debug!(video_id = %video_id, error = %e, "Transient transcript error - will retry");
                }
                e.is_transient()
            },
        )
        .await;

        match &result {
            Ok(text) => tracing::info!(video_id = %video_id, chars = text.len(), "Transcript fetched"),
            Err(e) => tracing::warn!(video_id = %video_id, error = %e, "Transcript fetch failed"),
        }
        result
    }
}
