//! Content pipeline: YouTube URL to transcript to article, with an optional
//! illustration.
//!
//! Each external provider sits behind a trait so the routes can be exercised
//! with in-process fakes.

pub mod article;
pub mod image;
pub mod transcript;
pub mod video;

use std::sync::Arc;

use thiserror::Error;

pub use article::{ArticleGenerator, ArticleOptions, GeneratedArticle, OpenAiArticleGenerator};
pub use image::{ImageGenerator, OpenAiImageGenerator};
pub use transcript::{HttpTranscriptProvider, TranscriptProvider, TRANSCRIPT_LANGUAGES};
pub use video::extract_video_id;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Please provide a YouTube URL.")]
    MissingUrl,

    #[error("Unrecognized YouTube URL.")]
    InvalidUrl,

    #[error("Transcripts are disabled for this video.")]
    TranscriptUnavailable,

    #[error("No transcript found for this video in the requested languages.")]
    NoTranscriptFound,

    #[error("This video is unavailable.")]
    VideoUnavailable,

    #[error("The transcript service refused the request, please try again later.")]
    Blocked,

    #[error("Content provider error: {0}")]
    Upstream(String),

    #[error("Malformed article returned by the model: {0}")]
    MalformedArticle(String),
}

impl ContentError {
    /// Worth another attempt against the same provider
    pub fn is_transient(&self) -> bool {
        matches!(self, ContentError::Upstream(_))
    }
}

impl From<reqwest::Error> for ContentError {
    fn from(err: reqwest::Error) -> Self {
        ContentError::Upstream(err.to_string())
    }
}

pub type ContentResult<T> = Result<T, ContentError>;

/// The providers a generation request runs through
#[derive(Clone)]
pub struct ContentPipeline {
    pub transcripts: Arc<dyn TranscriptProvider>,
    pub articles: Arc<dyn ArticleGenerator>,
    pub images: Arc<dyn ImageGenerator>,
}

impl ContentPipeline {
    pub fn new(
        transcripts: Arc<dyn TranscriptProvider>,
        articles: Arc<dyn ArticleGenerator>,
        images: Arc<dyn ImageGenerator>,
    ) -> Self {
        Self {
            transcripts,
            articles,
            images,
        }
    }
}
