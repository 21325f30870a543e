//! Article generation with an LLM

use std::time::Duration;

use async_trait::async_trait;
use blogify_shared::articles::{truncate_chars, META_DESCRIPTION_MAX_CHARS};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ContentError, ContentResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

pub const DEFAULT_TONE: &str = "pédagogique et accessible";
pub const DEFAULT_AUDIENCE: &str = "débutants intéressés par le sujet";
pub const DEFAULT_LANGUAGE: &str = "français";

/// Editorial options for a generated article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleOptions {
    /// Suggested title for the model to use or adapt
    pub title: Option<String>,
    pub tone: String,
    pub audience: String,
    pub language: String,
}

impl Default for ArticleOptions {
    fn default() -> Self {
        Self {
            title: None,
            tone: DEFAULT_TONE.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

/// Structured output of the article model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArticle {
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub seo_title: String,
    #[serde(default)]
    pub meta_description: String,
    #[serde(default)]
    pub image_prompt: String,
}

#[async_trait]
pub trait ArticleGenerator: Send + Sync {
    async fn generate_article(
        &self,
        source_text: &str,
        options: &ArticleOptions,
    ) -> ContentResult<GeneratedArticle>;
}

/// Full prompt sent to the model
pub fn build_prompt(source_text: &str, options: &ArticleOptions) -> String {
    let mut instructions = format!(
        r#"Tu es un rédacteur web expert SEO et un content strategist.

Langue : {language}
Ton : {tone}
Public cible : {audience}

Ta mission :
1. Transformer le texte source en article de blog structuré.
2. Déterminer un mot-clé principal SEO pertinent.
3. Créer un titre SEO optimisé (différent du H1 de l'article).
4. Rédiger une meta description (max 160 caractères).
5. Proposer un prompt pour une image d'illustration sans aucun texte dans l'image.

Contraintes de contenu pour l'article :
- Article en HTML uniquement (sans balises <html>, <head>, <body>).
- Utilise des balises : <h1>, <h2>, <h3>, <p>, <ul>, <ol>, <li>, <strong>, <em>, <blockquote>.
- Le H1 doit être naturel et adapté à l'article.
- Le SEO title doit être différent du H1, plus orienté résultat Google.
- La meta description doit faire max 160 caractères (compte très strict).
- Le mot-clé principal doit être une expression naturelle, pas une phrase entière.

Contraintes pour l'image :
- Décris une scène visuelle qui illustre le sujet de l'article.
- Interdit : texte, typographie, mots, logo, chiffres dans l'image.
- Style : illustration moderne, propre, adaptée à un blog professionnel.

Format de sortie :
Retourne UNIQUEMENT un objet JSON valide, sans texte autour, de la forme :

{{
  "html": "<h1>...</h1> ...",
  "keyword": "mot clé principal",
  "seo_title": "Titre SEO",
  "meta_description": "Meta description (max 160 caractères)",
  "image_prompt": "Description détaillée de l'image SANS texte"
}}"#,
        language = options.language,
        tone = options.tone,
        audience = options.audience,
    );

    if let Some(title) = options.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        instructions.push_str(&format!(
            "\n\nTitre suggéré à intégrer ou adapter : \"{}\".",
            title
        ));
    }

    format!(
        "{}\n\nTexte source à transformer :\n\n{}",
        instructions, source_text
    )
}

/// Decode the model's JSON answer.
///
/// Missing keys become empty strings and the meta description is cut to
/// [`META_DESCRIPTION_MAX_CHARS`].
pub fn parse_article(raw: &str) -> ContentResult<GeneratedArticle> {
    let trimmed = raw.trim();
    // Tolerate a fenced ```json block
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let mut article: GeneratedArticle = serde_json::from_str(body)
        .map_err(|e| ContentError::MalformedArticle(e.to_string()))?;
    article.meta_description =
        truncate_chars(&article.meta_description, META_DESCRIPTION_MAX_CHARS);
    Ok(article)
}

/// First `output_text` of a Responses API answer
fn response_text(response: &Value) -> Option<&str> {
    response
        .get("output")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .find(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
}

/// Article generator backed by the OpenAI Responses API
#[derive(Clone)]
pub struct OpenAiArticleGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiArticleGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> ContentResult<Self> {
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
}

#[async_trait]
impl ArticleGenerator for OpenAiArticleGenerator {
    async fn generate_article(
        &self,
        source_text: &str,
        options: &ArticleOptions,
    ) -> ContentResult<GeneratedArticle> {
        let body = serde_json::json!({
            "model": self.model,
            "input": build_prompt(source_text, options),
        });

        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %text, "Article generation failed");
            return Err(ContentError::Upstream(format!(
                "article model answered {}",
                status
            )));
        }

        let payload: Value = response.json().await?;
        let raw = response_text(&payload).ok_or_else(|| {
            ContentError::MalformedArticle("response carries no output text".to_string())
        })?;

        let article = parse_article(raw)?;
        tracing::info!(
            model = %self.model,
            keyword = %article.keyword,
            html_len = article.html.len(),
            "Article generated"
        );
        Ok(article)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_carries_options_and_source() {
        let options = ArticleOptions {
            title: Some("Le compost en ville".to_string()),
            ..Default::default()
        };
        let prompt = build_prompt("texte de la vidéo", &options);
        assert!(prompt.contains("Ton : pédagogique et accessible"));
        assert!(prompt.contains("Langue : français"));
        assert!(prompt.contains("Titre suggéré à intégrer ou adapter : \"Le compost en ville\"."));
        assert!(prompt.ends_with("texte de la vidéo"));
    }

    #[test]
    fn test_prompt_without_title() {
        let prompt = build_prompt("x", &ArticleOptions::default());
        assert!(!prompt.contains("Titre suggéré"));
    }

    #[test]
    fn test_parse_defaults_missing_keys() {
        let article = parse_article(r#"{"html": "<h1>Titre</h1>"}"#).unwrap();
        assert_eq!(article.html, "<h1>Titre</h1>");
        assert_eq!(article.keyword, "");
        assert_eq!(article.seo_title, "");
        assert_eq!(article.image_prompt, "");
    }

    #[test]
    fn test_parse_truncates_meta_description() {
        let raw = json!({ "meta_description": "é".repeat(200) }).to_string();
        let article = parse_article(&raw).unwrap();
        assert_eq!(article.meta_description.chars().count(), 160);
    }

    #[test]
    fn test_parse_accepts_fenced_json() {
        let article = parse_article("```json\n{\"keyword\": \"compost\"}\n```").unwrap();
        assert_eq!(article.keyword, "compost");
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(matches!(
            parse_article("Voici votre article !"),
            Err(ContentError::MalformedArticle(_))
        ));
    }

    #[test]
    fn test_response_text_finds_output_text() {
        let payload = json!({
            "output": [
                { "type": "reasoning", "summary": [] },
                { "type": "message", "content": [
                    { "type": "output_text", "text": "{\"html\":\"<p>ok</p>\"}" }
                ]}
            ]
        });
        assert_eq!(response_text(&payload), Some("{\"html\":\"<p>ok</p>\"}"));
        assert_eq!(response_text(&json!({ "output": [] })), None);
    }
}
