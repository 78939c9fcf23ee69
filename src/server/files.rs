//! Attachments stored against a `data` row.

use base64::{engine::general_purpose::STANDARD, Engine};
use dualstore_core::FileUpload;
use sqlx::SqlitePool;

use super::data::{timestamp_now, DataRepository};
use super::db::DbError;

#[derive(Clone)]
pub struct FileRepository {
    pool: SqlitePool,
    data: DataRepository,
}

impl FileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            data: DataRepository::new(pool.clone()),
            pool,
        }
    }

    /// Decodes the base64 payload and stores it. Returns the file id.
    pub async fn insert(&self, upload: &FileUpload) -> Result<i64, DbError> {
        if upload.filename.trim().is_empty() {
            return Err(DbError::Invalid("Field 'filename' is required".to_string()));
        }

        // Data URLs carry a "data:<mime>;base64," prefix
        let encoded = match upload.file_data.split_once(";base64,") {
            Some((_, rest)) => rest,
            None => upload.file_data.as_str(),
        };
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| DbError::Invalid(format!("file_data is not valid base64: {}", e)))?;

        if self.data.get(upload.data_id).await?.is_none() {
            return Err(DbError::Invalid(format!(
                "No data row with id {}",
                upload.data_id
            )));
        }

        let result = sqlx::query(
            "INSERT INTO files (data_id, filename, file_data, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(upload.data_id)
        .bind(upload.filename.trim())
        .bind(bytes)
        .bind(timestamp_now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Number of files attached to a data row.
    pub async fn count_for(&self, data_id: i64) -> Result<i64, DbError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM files WHERE data_id = ?")
            .bind(data_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
