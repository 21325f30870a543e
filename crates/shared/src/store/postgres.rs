//! PostgreSQL-backed record store
//!
//! All tables live in a single `records` relation with JSONB fields; the
//! logical table name is a column.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use time::OffsetDateTime;

use super::{Fields, Formula, Record, RecordStore};
use crate::error::{StoreError, StoreResult};
use crate::types::generate_record_key;

type RecordRow = (String, Json<Fields>, OffsetDateTime);

fn into_record((id, Json(fields), created_time): RecordRow) -> Record {
    Record {
        id,
        fields,
        created_time,
    }
}

/// `WHERE` clause for a formula; the field binds to `$2`, the value to `$3`
fn formula_condition(formula: &Formula) -> &'static str {
    match formula {
        Formula::Eq { .. } => "fields->>$2 = $3",
        Formula::EqIgnoreCase { .. } => "LOWER(fields->>$2) = LOWER($3)",
    }
}

/// `LIMIT NULL` means no limit
fn sql_limit(limit: Option<usize>) -> Option<i64> {
    limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX))
}

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn get(&self, table: &str, key: &str) -> StoreResult<Record> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT id, fields, created_at FROM records WHERE table_name = $1 AND id = $2",
        )
        .bind(table)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_record)
            .ok_or_else(|| StoreError::not_found(table, key))
    }

    async fn update(&self, table: &str, key: &str, fields: Fields) -> StoreResult<Record> {
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            UPDATE records
            SET fields = fields || $3, updated_at = NOW()
            WHERE table_name = $1 AND id = $2
            RETURNING id, fields, created_at
            "#,
        )
        .bind(table)
        .bind(key)
        .bind(Json(fields))
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_record)
            .ok_or_else(|| StoreError::not_found(table, key))
    }

    async fn create(&self, table: &str, fields: Fields) -> StoreResult<Record> {
        let row: RecordRow = sqlx::query_as(
            r#"
            INSERT INTO records (id, table_name, fields)
            VALUES ($1, $2, $3)
            RETURNING id, fields, created_at
            "#,
        )
        .bind(generate_record_key())
        .bind(table)
        .bind(Json(fields))
        .fetch_one(&self.pool)
        .await?;

        Ok(into_record(row))
    }

    async fn first(&self, table: &str, formula: &Formula) -> StoreResult<Option<Record>> {
        let sql = format!(
            "SELECT id, fields, created_at FROM records \
             WHERE table_name = $1 AND {} \
             ORDER BY created_at ASC LIMIT 1",
            formula_condition(formula)
        );

        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(table)
            .bind(formula.field())
            .bind(formula.value())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(into_record))
    }

    async fn select(
        &self,
        table: &str,
        formula: &Formula,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>> {
        let sql = format!(
            "SELECT id, fields, created_at FROM records \
             WHERE table_name = $1 AND {} \
             ORDER BY created_at DESC LIMIT $4",
            formula_condition(formula)
        );

        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .bind(table)
            .bind(formula.field())
            .bind(formula.value())
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(into_record).collect())
    }

    async fn all(&self, table: &str, limit: Option<usize>) -> StoreResult<Vec<Record>> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, fields, created_at FROM records
            WHERE table_name = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(table)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(into_record).collect())
    }

    async fn compare_and_update(
        &self,
        table: &str,
        key: &str,
        guard_field: &str,
        expected: &serde_json::Value,
        fields: Fields,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE records
            SET fields = fields || $5, updated_at = NOW()
            WHERE table_name = $1 AND id = $2
              AND COALESCE(fields->$3, 'null'::jsonb) = $4
            "#,
        )
        .bind(table)
        .bind(key)
        .bind(guard_field)
        .bind(Json(expected))
        .bind(Json(fields))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Distinguish a failed guard from a missing record
        self.get(table, key).await?;
        Ok(false)
    }
}
