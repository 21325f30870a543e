//! Article illustration

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Appended to every image prompt
pub const NO_TEXT_SUFFIX: &str = " ; aucun texte, aucun mot, aucune typographie dans l'image.";

pub const IMAGE_SIZE: &str = "1024x1024";

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// URL of the generated image, `None` when no image could be produced.
    ///
    /// Never fails: an illustration is optional.
    async fn generate_image(&self, prompt: &str) -> Option<String>;
}

/// Final prompt sent to the image model, `None` for an empty prompt
pub fn image_prompt(prompt: &str) -> Option<String> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return None;
    }
    Some(format!("{}{}", prompt, NO_TEXT_SUFFIX))
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
    b64_json: Option<String>,
}

/// Prefer the hosted URL; fall back to a data URL built from base64 output
fn image_url(data: &ImageData) -> Option<String> {
    if let Some(url) = data.url.as_deref().filter(|u| !u.is_empty()) {
        return Some(url.to_string());
    }

    let b64 = data.b64_json.as_deref().filter(|b| !b.is_empty())?;
    if base64::engine::general_purpose::STANDARD.decode(b64).is_err() {
        tracing::warn!("Image model returned invalid base64 data");
        return None;
    }
    Some(format!("data:image/png;base64,{}", b64))
}

/// Image generator backed by the OpenAI images API
#[derive(Clone)]
pub struct OpenAiImageGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiImageGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    async fn request(&self, prompt: &str) -> Result<Option<String>, reqwest::Error> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "size": IMAGE_SIZE,
        });

        let response: ImageResponse = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.data.first().and_then(image_url))
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate_image(&self, prompt: &str) -> Option<String> {
        let Some(prompt) = image_prompt(prompt) else {
            tracing::info!("No image prompt provided, skipping illustration");
            return None;
        };

        match self.request(&prompt).await {
            Ok(Some(url)) => {
                tracing::info!(model = %self.model, "Illustration generated");
                Some(url)
            }
            Ok(None) => {
                tracing::warn!(model = %self.model, "Image model returned no image");
                None
            }
            Err(e) => {
                tracing::warn!(model = %self.model, error = %e, "Illustration generation failed");
                None
            }
        }
    }
}
