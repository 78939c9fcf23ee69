//! Backend store: SQLite persistence behind an axum JSON API.

pub mod data;
pub mod db;
pub mod files;
pub mod routes;
pub mod users;

pub use data::DataRepository;
pub use db::{init_db, DbError};
pub use files::FileRepository;
pub use routes::{router, AppState};
pub use users::UserRepository;
