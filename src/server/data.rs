//! Repository for the `data` table.
//!
//! Each row stores the record's type tag, two lifted columns (`client_id`,
//! `client_name`) and the rest of the payload as a JSON text column. Reads
//! flatten everything back into a single [`Record`].

use chrono::{DateTime, SecondsFormat, Utc};
use dualstore_core::record::sanitize_payload;
use dualstore_core::{Payload, Record};
use serde_json::Value;
use sqlx::SqlitePool;

use super::db::DbError;

#[derive(Clone)]
pub struct DataRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct DataRow {
    id: i64,
    record_type: String,
    client_id: Option<String>,
    client_name: Option<String>,
    data: String,
    created_at: String,
    updated_at: String,
}

/// A request body split into its columns.
struct Columns {
    record_type: Option<String>,
    client_id: Option<String>,
    client_name: Option<String>,
    data: String,
}

impl Columns {
    fn split(mut body: Payload) -> Self {
        let record_type = match body.remove("type") {
            Some(Value::String(t)) if !t.trim().is_empty() => Some(t),
            _ => None,
        };
        let client_id = body.remove("client_id").and_then(column_text);
        let client_name = body.remove("client_name").and_then(column_text);

        let payload = sanitize_payload(body);
        let data = Value::Object(payload).to_string();

        Self {
            record_type,
            client_id,
            client_name,
            data,
        }
    }
}

/// Renders a lifted value as column text; null stays NULL.
fn column_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl DataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Cheap round-trip used by the health check.
    pub async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// All records, newest first.
    pub async fn list(&self) -> Result<Vec<Record>, DbError> {
        let rows: Vec<DataRow> = sqlx::query_as(
            r#"
            SELECT id, type AS record_type, client_id, client_name, data, created_at, updated_at
            FROM data
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(hydrate).collect())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Record>, DbError> {
        let row: Option<DataRow> = sqlx::query_as(
            r#"
            SELECT id, type AS record_type, client_id, client_name, data, created_at, updated_at
            FROM data
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(hydrate))
    }

    /// Inserts a record and returns its new id. `type` is required.
    pub async fn insert(&self, body: Payload) -> Result<i64, DbError> {
        let columns = Columns::split(body);
        let record_type = columns
            .record_type
            .ok_or_else(|| DbError::Invalid("Field 'type' is required".to_string()))?;
        let now = timestamp_now();

        let result = sqlx::query(
            r#"
            INSERT INTO data (type, client_id, client_name, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record_type)
        .bind(&columns.client_id)
        .bind(&columns.client_name)
        .bind(&columns.data)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Replaces the payload of row `id` and touches `updated_at`.
    ///
    /// A missing `type` keeps the stored one. Returns false if no row matched.
    pub async fn update(&self, id: i64, body: Payload) -> Result<bool, DbError> {
        let columns = Columns::split(body);
        let now = timestamp_now();

        let result = sqlx::query(
            r#"
            UPDATE data
            SET type = COALESCE(?, type), client_id = ?, client_name = ?, data = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&columns.record_type)
        .bind(&columns.client_id)
        .bind(&columns.client_name)
        .bind(&columns.data)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes row `id`. Returns false if no row matched.
    pub async fn delete(&self, id: i64) -> Result<bool, DbError> {
        // CASCADE will handle attached files
        let result = sqlx::query("DELETE FROM data WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn hydrate(row: DataRow) -> Record {
    let mut payload: Payload = match serde_json::from_str(&row.data) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Row {} has unreadable data column: {}", row.id, e);
            Payload::new()
        }
    };
    if let Some(client_id) = row.client_id {
        payload.insert("client_id".to_string(), Value::String(client_id));
    }
    if let Some(client_name) = row.client_name {
        payload.insert("client_name".to_string(), Value::String(client_name));
    }

    Record {
        id: row.id.to_string(),
        backend_id: Some(row.id),
        record_type: row.record_type,
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
        payload,
    }
}

/// Fixed-width UTC timestamp, so text ordering matches time ordering.
pub(crate) fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::db::init_db;
    use serde_json::json;
    use tempfile::TempDir;

    struct TestContext {
        repo: DataRepository,
        _temp_dir: TempDir, // Keep alive for duration of test
    }

    async fn setup_repo() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&temp_dir.path().join("test.db")).await.unwrap();
        TestContext {
            repo: DataRepository::new(pool),
            _temp_dir: temp_dir,
        }
    }

    fn body(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("body must be an object"),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_flattens_payload() {
        let ctx = setup_repo().await;
        let repo = &ctx.repo;

        let id = repo
            .insert(body(json!({
                "type": "order",
                "client_id": "c-1",
                "client_name": "Acme",
                "total": 30,
                "id": "ignored",
                "__backendId": 99
            })))
            .await
            .unwrap();

        let record = repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.id, id.to_string());
        assert_eq!(record.backend_id, Some(id));
        assert_eq!(record.record_type, "order");
        assert_eq!(record.payload["client_id"], "c-1");
        assert_eq!(record.payload["client_name"], "Acme");
        assert_eq!(record.payload["total"], 30);
        assert!(!record.payload.contains_key("__backendId"));
        assert!(record.created_at.is_some());
    }

    #[tokio::test]
    async fn test_insert_requires_type() {
        let ctx = setup_repo().await;
        let result = ctx.repo.insert(body(json!({"name": "no type"}))).await;
        assert!(matches!(result, Err(DbError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_ids_autoincrement() {
        let ctx = setup_repo().await;
        let a = ctx.repo.insert(body(json!({"type": "client"}))).await.unwrap();
        let b = ctx.repo.insert(body(json!({"type": "client"}))).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let ctx = setup_repo().await;
        let repo = &ctx.repo;

        let first = repo.insert(body(json!({"type": "client", "n": 1}))).await.unwrap();
        let second = repo.insert(body(json!({"type": "client", "n": 2}))).await.unwrap();

        let records = repo.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].backend_id, Some(second));
        assert_eq!(records[1].backend_id, Some(first));
    }

    #[tokio::test]
    async fn test_update_replaces_payload() {
        let ctx = setup_repo().await;
        let repo = &ctx.repo;

        let id = repo
            .insert(body(json!({"type": "client", "name": "Acme", "city": "Lisbon"})))
            .await
            .unwrap();

        let matched = repo
            .update(id, body(json!({"name": "Acme SA"})))
            .await
            .unwrap();
        assert!(matched);

        let record = repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.record_type, "client");
        assert_eq!(record.payload["name"], "Acme SA");
        assert!(!record.payload.contains_key("city"));
        assert!(record.updated_at >= record.created_at);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_row() {
        let ctx = setup_repo().await;
        let repo = &ctx.repo;

        assert!(!repo.update(404, body(json!({"type": "x"}))).await.unwrap());
        assert!(!repo.delete(404).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let ctx = setup_repo().await;
        let repo = &ctx.repo;

        let id = repo.insert(body(json!({"type": "client"}))).await.unwrap();
        assert!(repo.delete(id).await.unwrap());
        assert!(repo.get(id).await.unwrap().is_none());
    }
}
