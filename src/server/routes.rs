//! HTTP surface of the backend store.
//!
//! Every handler answers with an [`Envelope`]; failures never escape as
//! bare status codes or panics.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use dualstore_core::{Credentials, Envelope, FileUpload, Payload, Record};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::path::PathBuf;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use super::data::DataRepository;
use super::db::DbError;
use super::files::FileRepository;
use super::users::UserRepository;

/// Uploads arrive base64-encoded inside JSON, so allow large bodies.
const BODY_LIMIT: usize = 50 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub data: DataRepository,
    pub users: UserRepository,
    pub files: FileRepository,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            data: DataRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            files: FileRepository::new(pool),
        }
    }
}

type Reply<T> = (StatusCode, Json<Envelope<T>>);

fn failure<T>(status: StatusCode, error: impl Into<String>) -> Reply<T> {
    (status, Json(Envelope::failure(error)))
}

fn db_failure<T>(e: DbError) -> Reply<T> {
    let status = match &e {
        DbError::Conflict(_) => StatusCode::CONFLICT,
        DbError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => {
            tracing::error!("Request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    failure(status, e.to_string())
}

fn bad_body<T>(rejection: JsonRejection) -> Reply<T> {
    failure(rejection.status(), rejection.body_text())
}

fn parse_id<T>(raw: &str) -> Result<i64, Reply<T>> {
    raw.trim().parse().map_err(|_| {
        failure(
            StatusCode::BAD_REQUEST,
            format!("Invalid record id '{}'", raw),
        )
    })
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize)]
struct HealthInfo {
    status: &'static str,
    version: &'static str,
    timestamp: String,
}

async fn health(State(state): State<AppState>) -> Reply<HealthInfo> {
    if let Err(e) = state.data.ping().await {
        tracing::error!("Health check failed: {}", e);
        return failure(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
    }

    let envelope = Envelope {
        message: Some("Backend store running".to_string()),
        ..Envelope::ok_with_data(HealthInfo {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now().to_rfc3339(),
        })
    };
    (StatusCode::OK, Json(envelope))
}

async fn list_data(State(state): State<AppState>) -> Reply<Vec<Record>> {
    match state.data.list().await {
        Ok(records) => (StatusCode::OK, Json(Envelope::ok_with_data(records))),
        Err(e) => db_failure(e),
    }
}

async fn create_data(
    State(state): State<AppState>,
    body: Result<Json<Payload>, JsonRejection>,
) -> Reply<()> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    match state.data.insert(body).await {
        Ok(id) => {
            tracing::debug!("Inserted data row {}", id);
            (StatusCode::OK, Json(Envelope::ok_with_id(id)))
        }
        Err(e) => db_failure(e),
    }
}

async fn update_data(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    body: Result<Json<Payload>, JsonRejection>,
) -> Reply<()> {
    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    match state.data.update(id, body).await {
        Ok(true) => (StatusCode::OK, Json(Envelope::ok())),
        Ok(false) => failure(StatusCode::NOT_FOUND, format!("No record with id {}", id)),
        Err(e) => db_failure(e),
    }
}

async fn delete_data(State(state): State<AppState>, Path(raw_id): Path<String>) -> Reply<()> {
    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };

    match state.data.delete(id).await {
        Ok(true) => (StatusCode::OK, Json(Envelope::ok())),
        Ok(false) => failure(StatusCode::NOT_FOUND, format!("No record with id {}", id)),
        Err(e) => db_failure(e),
    }
}

async fn register(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Reply<()> {
    let Json(credentials) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    match state.users.register(&credentials).await {
        Ok(()) => (
            StatusCode::OK,
            Json(Envelope::ok_with_message("User registered")),
        ),
        Err(e) => db_failure(e),
    }
}

async fn login(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Reply<()> {
    let Json(credentials) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    match state.users.login(&credentials).await {
        Ok(true) => (StatusCode::OK, Json(Envelope::ok_with_message("Logged in"))),
        Ok(false) => failure(StatusCode::UNAUTHORIZED, "Invalid username or password"),
        Err(e) => db_failure(e),
    }
}

/// Answers `{isOk, file_id}` on success.
async fn store_file(
    State(state): State<AppState>,
    body: Result<Json<FileUpload>, JsonRejection>,
) -> Response {
    let Json(upload) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body::<()>(rejection).into_response(),
    };

    match state.files.insert(&upload).await {
        Ok(file_id) => {
            tracing::info!("Stored file {} for data row {}", file_id, upload.data_id);
            Json(json!({ "isOk": true, "file_id": file_id })).into_response()
        }
        Err(e) => db_failure::<()>(e).into_response(),
    }
}

// ============================================================================
// Router
// ============================================================================

/// Builds the API router. When `static_dir` is set, any path outside `/api`
/// is served from it.
pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/api/health", get(health))
        .route("/api/data", get(list_data).post(create_data))
        .route("/api/data/{id}", put(update_data).delete(delete_data))
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/file", post(store_file))
        .with_state(state);

    let app = match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };

    app.layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
