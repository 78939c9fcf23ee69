//! Error type returned by every data store operation.

use thiserror::Error;

use crate::mirror::MirrorError;
use crate::remote::RemoteError;
use crate::store::SyncPolicy;

#[derive(Error, Debug)]
pub enum StoreError {
    /// No backend answered, or the active one stopped answering.
    #[error("Backend unreachable: {0}")]
    TransportUnreachable(String),

    /// The backend refused or garbled a request.
    #[error("Backend rejected request: {0}")]
    Rejected(String),

    /// No record matches the given id or backend id.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Writing the local mirror failed.
    #[error("Local mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error("Operation '{operation}' is not available under the {policy} policy")]
    Unsupported {
        operation: &'static str,
        policy: SyncPolicy,
    },
}

impl From<RemoteError> for StoreError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Unreachable(msg) => StoreError::TransportUnreachable(msg),
            RemoteError::Rejected(msg) => StoreError::Rejected(msg),
            RemoteError::Decode(msg) => StoreError::Rejected(msg),
        }
    }
}

impl StoreError {
    /// True for failures that a later retry against the backend could fix.
    pub fn is_transport(&self) -> bool {
        matches!(self, StoreError::TransportUnreachable(_))
    }
}
