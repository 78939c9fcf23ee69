//! Backend store for dualstore.
//!
//! The reconciliation layer and its clients live in `dualstore-core`.

pub mod server;
