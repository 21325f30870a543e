//! Common types used across Blogify

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::StoreError;
use crate::store::{Fields, Record};

// =============================================================================
// Record keys
// =============================================================================

/// Prefix carried by every record key the store hands out
pub const RECORD_KEY_PREFIX: &str = "rec";

/// Number of random characters following the prefix
const RECORD_KEY_BODY_LEN: usize = 14;

/// Generate a fresh store-native record key (`rec` + 14 alphanumerics)
pub fn generate_record_key() -> String {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RECORD_KEY_BODY_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", RECORD_KEY_PREFIX, body)
}

/// Whether an identifier has the shape of a store-native record key
pub fn looks_like_record_key(candidate: &str) -> bool {
    candidate.len() == RECORD_KEY_PREFIX.len() + RECORD_KEY_BODY_LEN
        && candidate.starts_with(RECORD_KEY_PREFIX)
        && candidate.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Account ID wrapper (the account's record key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Plans and statuses
// =============================================================================

/// Subscription plan an account is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanName {
    #[default]
    Free,
    Medium,
    Premium,
}

impl PlanName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanName::Free => "free",
            PlanName::Medium => "medium",
            PlanName::Premium => "premium",
        }
    }

    pub fn all() -> [PlanName; 3] {
        [PlanName::Free, PlanName::Medium, PlanName::Premium]
    }
}

impl std::fmt::Display for PlanName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlanName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(PlanName::Free),
            "medium" => Ok(PlanName::Medium),
            "premium" => Ok(PlanName::Premium),
            other => Err(format!("unknown plan: {}", other)),
        }
    }
}

/// Billing status of an account.
///
/// Stored with the historical French labels (`gratuit`, `payant`, `annulé`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AccountStatus {
    #[default]
    #[serde(rename = "gratuit")]
    Free,
    #[serde(rename = "payant")]
    Paying,
    #[serde(rename = "annulé")]
    Cancelled,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Free => "gratuit",
            AccountStatus::Paying => "payant",
            AccountStatus::Cancelled => "annulé",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "gratuit" | "free" => Ok(AccountStatus::Free),
            "payant" | "paying" => Ok(AccountStatus::Paying),
            "annulé" | "annule" | "cancelled" => Ok(AccountStatus::Cancelled),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

// =============================================================================
// Account
// =============================================================================

/// Field names of the users table
pub mod account_fields {
    pub const EMAIL: &str = "email";
    pub const PASSWORD_HASH: &str = "password_hash";
    pub const IS_CONFIRMED: &str = "is_confirmed";
    pub const CONFIRMATION_CODE: &str = "confirmation_code";
    pub const CREDITS: &str = "credits";
    pub const PLAN_NAME: &str = "plan_name";
    pub const STATUS: &str = "status";
    pub const STRIPE_CUSTOMER_ID: &str = "stripe_customer_id";
    pub const STRIPE_SUBSCRIPTION_ID: &str = "stripe_subscription_id";
    pub const CREDITED_SUBSCRIPTION_ID: &str = "credited_subscription_id";
    pub const CONFIRMATION_ATTEMPTS: &str = "confirmation_attempts";
    pub const CREATION_DATE: &str = "creation_date";
}

/// A user account, decoded from its record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_confirmed: bool,
    #[serde(skip_serializing)]
    pub confirmation_code: Option<String>,
    /// Wrong codes submitted against the current confirmation code
    #[serde(skip_serializing, default)]
    pub confirmation_attempts: i64,
    pub credits: i64,
    pub plan_name: PlanName,
    pub status: AccountStatus,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    /// Last subscription whose allotment was granted; only webhook
    /// reconciliation writes it
    #[serde(skip_serializing, default)]
    pub credited_subscription_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub creation_date: Option<OffsetDateTime>,
}

impl Account {
    /// Check if the account can pay for `amount` credits
    pub fn has_credits(&self, amount: i64) -> bool {
        self.credits >= amount
    }

    /// Decode an account from a raw record.
    ///
    /// Missing optional fields fall back to their defaults; a non-numeric or
    /// negative credit balance is a decode error.
    pub fn from_record(record: &Record) -> Result<Self, StoreError> {
        use account_fields::*;

        let fields = &record.fields;
        let credits = match fields.get(CREDITS) {
            None | Some(serde_json::Value::Null) => 0,
            Some(v) => v.as_i64().ok_or_else(|| {
                StoreError::Decode(format!("credits is not an integer on {}", record.id))
            })?,
        };
        if credits < 0 {
            return Err(StoreError::Decode(format!(
                "negative credit balance on {}",
                record.id
            )));
        }

        let plan_name = match str_field(fields, PLAN_NAME) {
            Some(p) => p.parse().map_err(StoreError::Decode)?,
            None => PlanName::Free,
        };
        let status = match str_field(fields, STATUS) {
            Some(s) => s.parse().map_err(StoreError::Decode)?,
            None => AccountStatus::Free,
        };
        let creation_date = str_field(fields, CREATION_DATE).and_then(|s| {
            OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339).ok()
        });

        Ok(Self {
            id: AccountId(record.id.clone()),
            email: str_field(fields, EMAIL).unwrap_or_default().to_string(),
            password_hash: str_field(fields, PASSWORD_HASH)
                .unwrap_or_default()
                .to_string(),
            is_confirmed: fields
                .get(IS_CONFIRMED)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            confirmation_code: str_field(fields, CONFIRMATION_CODE).map(str::to_string),
            confirmation_attempts: fields
                .get(CONFIRMATION_ATTEMPTS)
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            credits,
            plan_name,
            status,
            stripe_customer_id: str_field(fields, STRIPE_CUSTOMER_ID).map(str::to_string),
            stripe_subscription_id: str_field(fields, STRIPE_SUBSCRIPTION_ID)
                .map(str::to_string),
            credited_subscription_id: str_field(fields, CREDITED_SUBSCRIPTION_ID)
                .map(str::to_string),
            creation_date,
        })
    }
}

/// Non-empty string field lookup
pub(crate) fn str_field<'a>(fields: &'a Fields, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

// =============================================================================
// Articles
// =============================================================================

/// Publication status of a generated article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    #[default]
    Draft,
    Published,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::Published => "published",
        }
    }
}

/// A persisted article
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub account_id: Option<AccountId>,
    pub title: String,
    pub seo_title: Option<String>,
    pub keyword: Option<String>,
    pub meta_description: String,
    pub html_content: String,
    pub image_url: Option<String>,
    pub source_video_id: Option<String>,
    pub credits_used: i64,
    pub status: ArticleStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_look_native() {
        for _ in 0..20 {
            let key = generate_record_key();
            assert!(looks_like_record_key(&key), "{} should look native", key);
        }
    }

    #[test]
    fn test_email_is_not_a_record_key() {
        assert!(!looks_like_record_key("someone@example.com"));
        assert!(!looks_like_record_key("rec123"));
        assert!(!looks_like_record_key("usr0123456789abcd"));
    }

    #[test]
    fn test_plan_name_parse() {
        assert_eq!("Premium".parse::<PlanName>(), Ok(PlanName::Premium));
        assert_eq!(" medium ".parse::<PlanName>(), Ok(PlanName::Medium));
        assert!("gold".parse::<PlanName>().is_err());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(AccountStatus::Cancelled.as_str(), "annulé");
        assert_eq!("payant".parse::<AccountStatus>(), Ok(AccountStatus::Paying));
        assert_eq!(
            serde_json::to_value(AccountStatus::Free).unwrap(),
            serde_json::json!("gratuit")
        );
    }

    #[test]
    fn test_account_from_record_defaults() {
        let mut fields = Fields::new();
        fields.insert("email".into(), "a@b.c".into());
        let record = Record {
            id: "recAAAAAAAAAAAAAA".into(),
            fields,
            created_time: OffsetDateTime::now_utc(),
        };
        let account = Account::from_record(&record).unwrap();
        assert_eq!(account.credits, 0);
        assert_eq!(account.plan_name, PlanName::Free);
        assert_eq!(account.status, AccountStatus::Free);
        assert!(!account.is_confirmed);
        assert!(account.stripe_subscription_id.is_none());
    }

    #[test]
    fn test_account_from_record_rejects_negative_credits() {
        let mut fields = Fields::new();
        fields.insert("credits".into(), (-1).into());
        let record = Record {
            id: "recAAAAAAAAAAAAAA".into(),
            fields,
            created_time: OffsetDateTime::now_utc(),
        };
        assert!(matches!(
            Account::from_record(&record),
            Err(StoreError::Decode(_))
        ));
    }
}
