//! Record store adapter
//!
//! A generic keyed-record store: single-record get/update by key, append-only
//! create, and a first-match query by a simple field-equality formula.
//! Backends translate [`Formula`] into their own query language.

mod airtable;
mod memory;
mod postgres;

pub use airtable::{AirtableConfig, AirtableStore};
pub use memory::MemoryStore;
pub use postgres::PgRecordStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::StoreResult;

/// Untyped field map as stored by the backend
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// A raw record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub fields: Fields,
    #[serde(with = "time::serde::rfc3339")]
    pub created_time: OffsetDateTime,
}

/// Single-match filter expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formula {
    /// `field == value`
    Eq { field: String, value: String },
    /// `lower(field) == lower(value)`
    EqIgnoreCase { field: String, value: String },
}

impl Formula {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Formula::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn eq_ignore_case(field: impl Into<String>, value: impl Into<String>) -> Self {
        Formula::EqIgnoreCase {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Formula::Eq { field, .. } | Formula::EqIgnoreCase { field, .. } => field,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Formula::Eq { value, .. } | Formula::EqIgnoreCase { value, .. } => value,
        }
    }

    /// Evaluate the formula against an in-memory field map
    pub fn matches(&self, fields: &Fields) -> bool {
        let actual = match fields.get(self.field()) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => return false,
            Some(other) => other.to_string(),
        };
        match self {
            Formula::Eq { value, .. } => actual == *value,
            Formula::EqIgnoreCase { value, .. } => actual.to_lowercase() == value.to_lowercase(),
        }
    }
}

/// Renders the Airtable formula syntax; also used in log lines
impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Formula::Eq { field, value } => {
                write!(f, "{{{}}} = '{}'", field, escape_formula_literal(value))
            }
            Formula::EqIgnoreCase { field, value } => write!(
                f,
                "LOWER({{{}}}) = LOWER('{}')",
                field,
                escape_formula_literal(value)
            ),
        }
    }
}

fn escape_formula_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Keyed-record store.
///
/// The store gives no transactions. Callers that read-modify-write a record
/// serialize themselves (see the billing crate's lock registry) and may use
/// [`RecordStore::compare_and_update`] as an extra guard across processes.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one record; `StoreError::NotFound` when absent
    async fn get(&self, table: &str, key: &str) -> StoreResult<Record>;

    /// Merge `fields` into an existing record and return the result
    async fn update(&self, table: &str, key: &str, fields: Fields) -> StoreResult<Record>;

    /// Append a new record
    async fn create(&self, table: &str, fields: Fields) -> StoreResult<Record>;

    /// First record matching `formula`
    async fn first(&self, table: &str, formula: &Formula) -> StoreResult<Option<Record>>;

    /// Records of a table, newest first
    async fn all(&self, table: &str, limit: Option<usize>) -> StoreResult<Vec<Record>>;

    /// Records matching `formula`, newest first
    async fn select(
        &self,
        table: &str,
        formula: &Formula,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>>;

    /// Merge `fields` only if `guard_field` currently equals `expected`.
    ///
    /// Returns `Ok(false)` when the guard did not hold and nothing was written.
    async fn compare_and_update(
        &self,
        table: &str,
        key: &str,
        guard_field: &str,
        expected: &serde_json::Value,
        fields: Fields,
    ) -> StoreResult<bool>;
}
