use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Errors raised by the backend store's repositories.
#[derive(Debug)]
pub enum DbError {
    /// Query or connection failure.
    Sqlx(sqlx::Error),
    /// Migration failure at startup.
    Migrate(sqlx::migrate::MigrateError),
    /// Could not prepare the database directory.
    Io(PathBuf, std::io::Error),
    /// The request is missing something the schema requires.
    Invalid(String),
    /// A unique constraint was violated.
    Conflict(String),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Sqlx(e) => write!(f, "Database error: {}", e),
            DbError::Migrate(e) => write!(f, "Migration failed: {}", e),
            DbError::Io(path, e) => write!(f, "I/O error for {}: {}", path.display(), e),
            DbError::Invalid(msg) => write!(f, "{}", msg),
            DbError::Conflict(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DbError::Sqlx(e) => Some(e),
            DbError::Migrate(e) => Some(e),
            DbError::Io(_, e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        DbError::Sqlx(e)
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        DbError::Migrate(e)
    }
}

/// Opens the SQLite database at `path` and runs migrations.
pub async fn init_db(path: &Path) -> Result<SqlitePool, DbError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| DbError::Io(parent.to_path_buf(), e))?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!("Database ready at {}", path.display());
    Ok(pool)
}
