//! Typed access to the articles table

use std::sync::Arc;

use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::store::{Fields, Formula, Record, RecordStore};
use crate::types::{str_field, AccountId, Article, ArticleStatus};

/// Default name of the articles table
pub const DEFAULT_ARTICLES_TABLE: &str = "articles";

/// Title used when the generator produced none
pub const UNTITLED: &str = "Sans titre";

/// Meta descriptions are cut to this many characters
pub const META_DESCRIPTION_MAX_CHARS: usize = 160;

/// Truncate to at most `max` characters without splitting a code point
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub account_id: Option<AccountId>,
    pub title: String,
    pub seo_title: Option<String>,
    pub keyword: Option<String>,
    pub meta_description: Option<String>,
    pub html_content: String,
    pub image_url: Option<String>,
    pub source_video_id: Option<String>,
    pub source_transcript: Option<String>,
    pub credits_used: i64,
    pub status: ArticleStatus,
}

impl NewArticle {
    fn into_fields(self) -> Fields {
        let title = if self.title.trim().is_empty() {
            UNTITLED.to_string()
        } else {
            self.title
        };

        let mut fields = Fields::new();
        fields.insert("title".into(), Value::from(title));
        fields.insert(
            "meta_description".into(),
            Value::from(truncate_chars(
                self.meta_description.as_deref().unwrap_or_default(),
                META_DESCRIPTION_MAX_CHARS,
            )),
        );
        fields.insert("html_content".into(), Value::from(self.html_content));
        fields.insert("credits_used".into(), Value::from(self.credits_used));
        fields.insert("status".into(), Value::from(self.status.as_str()));

        let optional = [
            ("seo_title", self.seo_title),
            ("keyword", self.keyword),
            ("image_url", self.image_url),
            ("source_video_id", self.source_video_id),
            ("source_transcript", self.source_transcript),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                fields.insert(name.into(), Value::from(value));
            }
        }

        if let Some(account_id) = self.account_id {
            fields.insert(OWNER_FIELD.into(), Value::from(account_id.0.clone()));
            fields.insert("user".into(), Value::from(vec![account_id.0]));
        }
        fields
    }
}

/// Plain-text owner key; `user` holds the same id as a linked record
const OWNER_FIELD: &str = "account_id";

fn article_from_record(record: &Record) -> StoreResult<Article> {
    let fields = &record.fields;
    let account_id = fields
        .get("user")
        .and_then(|v| v.as_array())
        .and_then(|links| links.first())
        .and_then(|v| v.as_str())
        .map(AccountId::from);
    let status = match str_field(fields, "status") {
        Some("published") => ArticleStatus::Published,
        Some("draft") | None => ArticleStatus::Draft,
        Some(other) => {
            return Err(StoreError::Decode(format!(
                "unknown article status {} on {}",
                other, record.id
            )))
        }
    };

    Ok(Article {
        id: record.id.clone(),
        account_id,
        title: str_field(fields, "title").unwrap_or(UNTITLED).to_string(),
        seo_title: str_field(fields, "seo_title").map(str::to_string),
        keyword: str_field(fields, "keyword").map(str::to_string),
        meta_description: str_field(fields, "meta_description")
            .unwrap_or_default()
            .to_string(),
        html_content: str_field(fields, "html_content")
            .unwrap_or_default()
            .to_string(),
        image_url: str_field(fields, "image_url").map(str::to_string),
        source_video_id: str_field(fields, "source_video_id").map(str::to_string),
        credits_used: fields
            .get("credits_used")
            .and_then(|v| v.as_i64())
            .unwrap_or(0),
        status,
        created_at: record.created_time,
    })
}

/// Repository over the articles table
#[derive(Clone)]
pub struct ArticleRepository {
    store: Arc<dyn RecordStore>,
    table: String,
}

impl ArticleRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_table(store, DEFAULT_ARTICLES_TABLE)
    }

    pub fn with_table(store: Arc<dyn RecordStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub async fn create(&self, article: NewArticle) -> StoreResult<Article> {
        let record = self.store.create(&self.table, article.into_fields()).await?;
        article_from_record(&record)
    }

    /// Most recent articles owned by an account.
    ///
    /// Records that fail to decode are logged and left out.
    pub async fn recent_for_account(
        &self,
        account_id: &AccountId,
        limit: usize,
    ) -> StoreResult<Vec<Article>> {
        let records = self
            .store
            .select(&self.table, &Formula::eq(OWNER_FIELD, account_id.as_str()), Some(limit))
            .await?;

        Ok(records
            .iter()
            .filter_map(|record| match article_from_record(record) {
                Ok(article) => Some(article),
                Err(e) => {
                    tracing::warn!(record_id = %record.id, error = %e, "Skipping unreadable article");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_truncate_chars_respects_code_points() {
        let s = "é".repeat(200);
        let cut = truncate_chars(&s, META_DESCRIPTION_MAX_CHARS);
        assert_eq!(cut.chars().count(), 160);
    }

    #[tokio::test]
    async fn test_create_applies_defaults() {
        let repo = ArticleRepository::new(Arc::new(MemoryStore::new()));
        let article = repo
            .create(NewArticle {
                account_id: Some(AccountId::from("recAAAAAAAAAAAAAA")),
                meta_description: Some("x".repeat(300)),
                html_content: "<h1>Hi</h1>".into(),
                credits_used: 3,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(article.title, UNTITLED);
        assert_eq!(article.meta_description.len(), 160);
        assert_eq!(article.credits_used, 3);
        assert_eq!(article.status, ArticleStatus::Draft);
        assert!(article.image_url.is_none());
    }

    #[tokio::test]
    async fn test_recent_for_account_filters_owner() {
        let repo = ArticleRepository::new(Arc::new(MemoryStore::new()));
        let mine = AccountId::from("recAAAAAAAAAAAAAA");
        let theirs = AccountId::from("recBBBBBBBBBBBBBB");
        for (owner, title) in [(&mine, "one"), (&theirs, "two"), (&mine, "three")] {
            repo.create(NewArticle {
                account_id: Some(owner.clone()),
                title: title.into(),
                ..Default::default()
            })
            .await
            .unwrap();
        }

        let articles = repo.recent_for_account(&mine, 10).await.unwrap();
        let titles: Vec<_> = articles.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["three", "one"]);
    }

    #[tokio::test]
    async fn test_unreadable_article_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let repo = ArticleRepository::new(store.clone());
        let mine = AccountId::from("recAAAAAAAAAAAAAA");
        repo.create(NewArticle {
            account_id: Some(mine.clone()),
            title: "good".into(),
            ..Default::default()
        })
        .await
        .unwrap();

        let mut broken = Fields::new();
        broken.insert(OWNER_FIELD.into(), Value::from(mine.as_str()));
        broken.insert("status".into(), Value::from("archived"));
        store.create(DEFAULT_ARTICLES_TABLE, broken).await.unwrap();

        let articles = repo.recent_for_account(&mine, 10).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "good");
    }

    #[tokio::test]
    async fn test_recent_for_account_respects_limit() {
        let repo = ArticleRepository::new(Arc::new(MemoryStore::new()));
        let mine = AccountId::from("recAAAAAAAAAAAAAA");
        for title in ["one", "two", "three"] {
            repo.create(NewArticle {
                account_id: Some(mine.clone()),
                title: title.into(),
                ..Default::default()
            })
            .await
            .unwrap();
        }

        let articles = repo.recent_for_account(&mine, 2).await.unwrap();
        let titles: Vec<_> = articles.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["three", "two"]);
    }
}
