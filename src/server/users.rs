//! Username/password accounts for `/api/register` and `/api/login`.
//!
//! Passwords are stored as SHA-256 hex digests. This is a convenience
//! check for a trusted network, not an authentication system.

use dualstore_core::Credentials;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use super::data::timestamp_now;
use super::db::DbError;

#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

fn digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates an account. Fails with `Conflict` if the username is taken.
    pub async fn register(&self, credentials: &Credentials) -> Result<(), DbError> {
        let username = credentials.username.trim();
        if username.is_empty() || credentials.password.is_empty() {
            return Err(DbError::Invalid(
                "Username and password are required".to_string(),
            ));
        }

        let result = sqlx::query("INSERT INTO users (username, password, created_at) VALUES (?, ?, ?)")
            .bind(username)
            .bind(digest(&credentials.password))
            .bind(timestamp_now())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                tracing::info!("Registered user {}", username);
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DbError::Conflict("Username already exists".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns true if the username exists and the password matches.
    pub async fn login(&self, credentials: &Credentials) -> Result<bool, DbError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM users WHERE username = ? AND password = ?")
                .bind(credentials.username.trim())
                .bind(digest(&credentials.password))
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::db::init_db;
    use tempfile::TempDir;

    async fn setup_repo() -> (UserRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&temp_dir.path().join("test.db")).await.unwrap();
        (UserRepository::new(pool), temp_dir)
    }

    fn creds(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (repo, _temp) = setup_repo().await;

        repo.register(&creds("maria", "secret")).await.unwrap();

        assert!(repo.login(&creds("maria", "secret")).await.unwrap());
        assert!(!repo.login(&creds("maria", "wrong")).await.unwrap());
        assert!(!repo.login(&creds("joao", "secret")).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let (repo, _temp) = setup_repo().await;

        repo.register(&creds("maria", "secret")).await.unwrap();
        let result = repo.register(&creds("maria", "other")).await;

        assert!(matches!(result, Err(DbError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_register_requires_fields() {
        let (repo, _temp) = setup_repo().await;

        assert!(matches!(
            repo.register(&creds("", "secret")).await,
            Err(DbError::Invalid(_))
        ));
        assert!(matches!(
            repo.register(&creds("maria", "")).await,
            Err(DbError::Invalid(_))
        ));
    }

    #[test]
    fn test_password_not_stored_in_clear() {
        let hashed = digest("secret");
        assert_ne!(hashed, "secret");
        assert_eq!(hashed.len(), 64);
    }
}
