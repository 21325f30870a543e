//! In-process record store
//!
//! Backs tests and local development (`RECORD_STORE=memory`). Tables can be
//! flagged unavailable to exercise the callers' degradation paths.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{Fields, Formula, Record, RecordStore};
use crate::error::{StoreError, StoreResult};
use crate::types::generate_record_key;

#[derive(Default)]
pub struct MemoryStore {
    /// Records per table, in insertion order
    tables: RwLock<HashMap<String, Vec<Record>>>,
    unavailable: std::sync::RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `table` fail with `StoreError::Upstream`
    pub fn set_unavailable(&self, table: &str, unavailable: bool) {
        if let Ok(mut set) = self.unavailable.write() {
            if unavailable {
                set.insert(table.to_string());
            } else {
                set.remove(table);
            }
        }
    }

    /// Number of records in a table
    pub async fn count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn check_available(&self, table: &str) -> StoreResult<()> {
        let down = self
            .unavailable
            .read()
            .map(|set| set.contains(table))
            .unwrap_or(false);
        if down {
            return Err(StoreError::Upstream(format!("table {} unavailable", table)));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, table: &str, key: &str) -> StoreResult<Record> {
        self.check_available(table)?;
        let tables = self.tables.read().await;
        tables
            .get(table)
            .and_then(|records| records.iter().find(|r| r.id == key))
            .cloned()
            .ok_or_else(|| StoreError::not_found(table, key))
    }

    async fn update(&self, table: &str, key: &str, fields: Fields) -> StoreResult<Record> {
        self.check_available(table)?;
        let mut tables = self.tables.write().await;
        let record = tables
            .get_mut(table)
            .and_then(|records| records.iter_mut().find(|r| r.id == key))
            .ok_or_else(|| StoreError::not_found(table, key))?;
        record.fields.extend(fields);
        Ok(record.clone())
    }

    async fn create(&self, table: &str, fields: Fields) -> StoreResult<Record> {
        self.check_available(table)?;
        let record = Record {
            id: generate_record_key(),
            fields,
            created_time: OffsetDateTime::now_utc(),
        };
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn first(&self, table: &str, formula: &Formula) -> StoreResult<Option<Record>> {
        self.check_available(table)?;
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .and_then(|records| records.iter().find(|r| formula.matches(&r.fields)))
            .cloned())
    }

    async fn all(&self, table: &str, limit: Option<usize>) -> StoreResult<Vec<Record>> {
        self.check_available(table)?;
        let tables = self.tables.read().await;
        let records = tables.get(table).map(Vec::as_slice).unwrap_or_default();
        Ok(records
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn select(
        &self,
        table: &str,
        formula: &Formula,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>> {
        self.check_available(table)?;
        let tables = self.tables.read().await;
        let records = tables.get(table).map(Vec::as_slice).unwrap_or_default();
        Ok(records
            .iter()
            .rev()
            .filter(|r| formula.matches(&r.fields))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn compare_and_update(
        &self,
        table: &str,
        key: &str,
        guard_field: &str,
        expected: &serde_json::Value,
        fields: Fields,
    ) -> StoreResult<bool> {
        self.check_available(table)?;
        let mut tables = self.tables.write().await;
        let record = tables
            .get_mut(table)
            .and_then(|records| records.iter_mut().find(|r| r.id == key))
            .ok_or_else(|| StoreError::not_found(table, key))?;

        let current = record
            .fields
            .get(guard_field)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        if current != *expected {
            return Ok(false);
        }
        record.fields.extend(fields);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: serde_json::Value) -> Fields {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_get_update() {
        let store = MemoryStore::new();
        let rec = store
            .create("users", fields(json!({"email": "a@b.c", "credits": 3})))
            .await
            .unwrap();

        let fetched = store.get("users", &rec.id).await.unwrap();
        assert_eq!(fetched.fields["credits"], json!(3));

        let updated = store
            .update("users", &rec.id, fields(json!({"credits": 1})))
            .await
            .unwrap();
        assert_eq!(updated.fields["credits"], json!(1));
        assert_eq!(updated.fields["email"], json!("a@b.c"));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("users", "recMISSINGMISSING").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_first_and_all_ordering() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store
                .create("articles", fields(json!({"title": format!("t{}", i)})))
                .await
                .unwrap();
        }
        let all = store.all("articles", Some(2)).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].fields["title"], json!("t2"));

        let hit = store
            .first("articles", &Formula::eq("title", "t1"))
            .await
            .unwrap();
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn test_select_filters_newest_first() {
        let store = MemoryStore::new();
        for (owner, title) in [("a", "t0"), ("b", "t1"), ("a", "t2"), ("a", "t3")] {
            store
                .create("articles", fields(json!({"account_id": owner, "title": title})))
                .await
                .unwrap();
        }

        let hits = store
            .select("articles", &Formula::eq("account_id", "a"), Some(2))
            .await
            .unwrap();
        let titles: Vec<_> = hits.iter().map(|r| r.fields["title"].clone()).collect();
        assert_eq!(titles, vec![json!("t3"), json!("t2")]);
    }

    #[tokio::test]
    async fn test_compare_and_update_guard() {
        let store = MemoryStore::new();
        let rec = store
            .create("users", fields(json!({"credits": 5})))
            .await
            .unwrap();

        let stale = store
            .compare_and_update("users", &rec.id, "credits", &json!(4), fields(json!({"credits": 3})))
            .await
            .unwrap();
        assert!(!stale);

        let fresh = store
            .compare_and_update("users", &rec.id, "credits", &json!(5), fields(json!({"credits": 3})))
            .await
            .unwrap();
        assert!(fresh);
        assert_eq!(store.get("users", &rec.id).await.unwrap().fields["credits"], json!(3));
    }

    #[tokio::test]
    async fn test_unavailable_table() {
        let store = MemoryStore::new();
        store.set_unavailable("users", true);
        assert!(matches!(
            store.all("users", None).await,
            Err(StoreError::Upstream(_))
        ));
        store.set_unavailable("users", false);
        assert!(store.all("users", None).await.is_ok());
    }
}
