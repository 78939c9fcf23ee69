//! dualstore core library
//!
//! Record persistence that works offline against a local mirror and
//! reconciles with a remote HTTP backend when one is reachable.

pub mod discovery;
pub mod error;
pub mod mirror;
pub mod protocol;
pub mod record;
pub mod remote;
pub mod store;

#[cfg(test)]
mod testing;

pub use discovery::{
    candidate_urls, probe, BackendKind, BackendStatus, DiscoveryConfig, ProbeOutcome,
    DEFAULT_BACKEND_PORT,
};
pub use error::StoreError;
pub use mirror::{FileStore, KeyValueStore, LocalMirror, MemoryStore, MirrorError};
pub use protocol::{Credentials, Envelope, FileUpload};
pub use record::{Identity, IdMinter, Payload, Record};
pub use remote::{Backend, HttpBackend, RemoteError};
pub use store::{DataHandler, DataStore, StoreConfig, SyncPolicy, SyncReport};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
