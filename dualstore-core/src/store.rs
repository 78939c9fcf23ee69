//! Reconciliation layer.
//!
//! `DataStore` is the CRUD facade over the local mirror and the backend
//! store. Discovery runs once in [`DataStore::init`]; after that each call
//! goes to the mirror, the backend, or both, depending on the [`SyncPolicy`].
//!
//! Under the hybrid policy every write lands in the mirror first and is then
//! mirrored to the backend on a best-effort basis. A failed remote write is
//! logged and dropped; it never rolls back the local write.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::discovery::{probe, BackendStatus, UNREACHABLE_MESSAGE};
use crate::error::StoreError;
use crate::mirror::LocalMirror;
use crate::record::{filter_by_type, IdMinter, Payload, Record};
use crate::remote::Backend;

/// Where writes go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPolicy {
    /// Mirror only; the backend is never contacted.
    LocalOnly,
    /// Mirror first, backend best-effort.
    #[default]
    Hybrid,
    /// Backend is mandatory; nothing is kept locally.
    ServerOnly,
}

impl SyncPolicy {
    fn persists_locally(self) -> bool {
        !matches!(self, SyncPolicy::ServerOnly)
    }
}

impl fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPolicy::LocalOnly => write!(f, "local-only"),
            SyncPolicy::Hybrid => write!(f, "hybrid"),
            SyncPolicy::ServerOnly => write!(f, "server-only"),
        }
    }
}

impl FromStr for SyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "local-only" | "local" => Ok(SyncPolicy::LocalOnly),
            "hybrid" => Ok(SyncPolicy::Hybrid),
            "server-only" | "server" => Ok(SyncPolicy::ServerOnly),
            other => Err(format!(
                "Unknown policy '{}'. Expected local-only, hybrid or server-only",
                other
            )),
        }
    }
}

/// Receives change notifications. Implemented by the UI layer.
pub trait DataHandler: Send + Sync {
    /// Called with the full collection after every change.
    fn on_data_changed(&self, records: &[Record]);

    /// Called once per `init` with the discovery result.
    fn on_backend_status(&self, _status: &BackendStatus) {}
}

#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub policy: SyncPolicy,
    /// Backend base URLs in priority order, see `discovery::candidate_urls`.
    pub candidates: Vec<String>,
}

/// Counts from one re-sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Local-only records that acquired a backend id.
    pub pushed: usize,
    /// Local-only records whose remote create failed again.
    pub failed: usize,
    /// Records found on the backend that were not in the mirror.
    pub adopted: usize,
    /// Mirror records whose backend row no longer exists.
    pub dropped: usize,
}

#[derive(Default)]
struct State {
    records: Vec<Record>,
    base_url: Option<String>,
    handler: Option<Arc<dyn DataHandler>>,
}

/// Dual-mode record store.
pub struct DataStore {
    config: StoreConfig,
    mirror: LocalMirror,
    backend: Arc<dyn Backend>,
    minter: IdMinter,
    // Held across each load-modify-save sequence, remote calls included.
    state: Mutex<State>,
}

impl DataStore {
    pub fn new(config: StoreConfig, mirror: LocalMirror, backend: Arc<dyn Backend>) -> Self {
        Self {
            config,
            mirror,
            backend,
            minter: IdMinter::new(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn policy(&self) -> SyncPolicy {
        self.config.policy
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.base_url.is_some()
    }

    /// Base URL selected by discovery, if any.
    pub async fn base_url(&self) -> Option<String> {
        self.state.lock().await.base_url.clone()
    }

    /// Runs discovery, loads the authoritative collection and notifies
    /// `handler` with it.
    pub async fn init(
        &self,
        handler: Option<Arc<dyn DataHandler>>,
    ) -> Result<Vec<Record>, StoreError> {
        let mut state = self.state.lock().await;
        state.handler = handler;
        state.base_url = None;

        if self.config.policy != SyncPolicy::LocalOnly {
            let outcome = probe(self.backend.as_ref(), &self.config.candidates).await;
            state.base_url = outcome.base_url().map(str::to_string);
            if let Some(handler) = &state.handler {
                handler.on_backend_status(&outcome.status());
            }
        }

        self.load_locked(&mut state).await?;
        self.notify(&state);
        tracing::info!(
            "Data store ready: {} record(s), policy {}, backend {}",
            state.records.len(),
            self.config.policy,
            state.base_url.as_deref().unwrap_or("none")
        );
        Ok(state.records.clone())
    }

    /// Reloads the collection from the authoritative store.
    pub async fn load(&self) -> Result<Vec<Record>, StoreError> {
        let mut state = self.state.lock().await;
        self.load_locked(&mut state).await?;
        self.notify(&state);
        Ok(state.records.clone())
    }

    /// All records of one type.
    pub async fn read(&self, record_type: &str) -> Result<Vec<Record>, StoreError> {
        let state = self.state.lock().await;
        Ok(filter_by_type(&state.records, record_type)
            .into_iter()
            .cloned()
            .collect())
    }

    /// The whole collection.
    pub async fn records(&self) -> Vec<Record> {
        self.state.lock().await.records.clone()
    }

    pub async fn create(
        &self,
        record_type: &str,
        payload: Payload,
    ) -> Result<Record, StoreError> {
        let mut state = self.state.lock().await;
        let record = Record::new(self.minter.mint(), record_type, payload);

        if self.config.policy == SyncPolicy::ServerOnly {
            let base_url = Self::require_backend(&state)?;
            let backend_id = self.backend.create(&base_url, &record).await?;
            let record = Record {
                id: backend_id.to_string(),
                backend_id: Some(backend_id),
                ..record
            };
            state.records.push(record.clone());
            self.notify(&state);
            return Ok(record);
        }

        state.records.push(record);
        if let Err(e) = self.mirror.save(&state.records) {
            state.records.pop();
            return Err(e.into());
        }
        self.notify(&state);

        let index = state.records.len() - 1;
        if self.config.policy == SyncPolicy::Hybrid {
            self.mirror_upsert(&mut state, index).await;
        }
        Ok(state.records[index].clone())
    }

    /// Shallow-merges `patch` into the record matching `key` (local id or
    /// backend id).
    pub async fn update(&self, key: &str, patch: Payload) -> Result<Record, StoreError> {
        let mut state = self.state.lock().await;
        let index = Self::position(&state.records, key)?;

        if self.config.policy == SyncPolicy::ServerOnly {
            let base_url = Self::require_backend(&state)?;
            let mut updated = state.records[index].clone();
            updated.merge(patch);
            let backend_id = updated
                .backend_id
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            self.backend.update(&base_url, backend_id, &updated).await?;
            state.records[index] = updated.clone();
            self.notify(&state);
            return Ok(updated);
        }

        let previous = state.records[index].clone();
        state.records[index].merge(patch);
        if let Err(e) = self.mirror.save(&state.records) {
            state.records[index] = previous;
            return Err(e.into());
        }
        self.notify(&state);

        if self.config.policy == SyncPolicy::Hybrid {
            self.mirror_upsert(&mut state, index).await;
        }
        Ok(state.records[index].clone())
    }

    /// Removes the record matching `key` and returns it.
    pub async fn delete(&self, key: &str) -> Result<Record, StoreError> {
        let mut state = self.state.lock().await;
        let index = Self::position(&state.records, key)?;

        if self.config.policy == SyncPolicy::ServerOnly {
            let base_url = Self::require_backend(&state)?;
            let backend_id = state.records[index]
                .backend_id
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            self.backend.delete(&base_url, backend_id).await?;
            let removed = state.records.remove(index);
            self.notify(&state);
            return Ok(removed);
        }

        let removed = state.records.remove(index);
        if let Err(e) = self.mirror.save(&state.records) {
            state.records.insert(index, removed);
            return Err(e.into());
        }
        self.notify(&state);

        if self.config.policy == SyncPolicy::Hybrid {
            match (&state.base_url, removed.backend_id) {
                (Some(base_url), Some(backend_id)) => {
                    if let Err(e) = self.backend.delete(base_url, backend_id).await {
                        tracing::warn!(
                            "Record {} deleted locally, backend delete failed: {}",
                            removed.id,
                            e
                        );
                    }
                }
                _ => tracing::debug!("Record {} deleted only locally", removed.id),
            }
        }
        Ok(removed)
    }

    /// Empties the collection. Local-only deployments only.
    pub async fn clear(&self) -> Result<(), StoreError> {
        if self.config.policy != SyncPolicy::LocalOnly {
            return Err(StoreError::Unsupported {
                operation: "clear",
                policy: self.config.policy,
            });
        }
        let mut state = self.state.lock().await;
        let previous = std::mem::take(&mut state.records);
        if let Err(e) = self.mirror.save(&state.records) {
            state.records = previous;
            return Err(e.into());
        }
        self.notify(&state);
        tracing::info!("Cleared {} record(s)", previous.len());
        Ok(())
    }

    /// Pushes local-only records to the backend and merges the backend
    /// collection into the mirror.
    pub async fn sync(&self) -> Result<SyncReport, StoreError> {
        let mut state = self.state.lock().await;
        let report = match self.config.policy {
            SyncPolicy::LocalOnly => {
                return Err(StoreError::Unsupported {
                    operation: "sync",
                    policy: self.config.policy,
                })
            }
            SyncPolicy::Hybrid => self.sync_locked(&mut state).await?,
            SyncPolicy::ServerOnly => {
                self.load_locked(&mut state).await?;
                SyncReport::default()
            }
        };
        self.notify(&state);
        Ok(report)
    }

    async fn load_locked(&self, state: &mut State) -> Result<(), StoreError> {
        match self.config.policy {
            SyncPolicy::LocalOnly => {
                state.records = self.mirror.load();
            }
            SyncPolicy::Hybrid => {
                state.records = self.mirror.load();
                if state.base_url.is_some() {
                    if let Err(e) = self.sync_locked(state).await {
                        tracing::warn!("Sync with backend failed, using local mirror: {}", e);
                    }
                }
            }
            SyncPolicy::ServerOnly => {
                let base_url = Self::require_backend(state)?;
                state.records = self.backend.fetch_all(&base_url).await?;
            }
        }

        for record in &state.records {
            self.minter.observe(&record.id);
        }
        Ok(())
    }

    async fn sync_locked(&self, state: &mut State) -> Result<SyncReport, StoreError> {
        let base_url = Self::require_backend(state)?;
        let mut report = SyncReport::default();

        for record in state.records.iter_mut().filter(|r| r.is_pending()) {
            match self.backend.create(&base_url, record).await {
                Ok(backend_id) => {
                    record.backend_id = Some(backend_id);
                    report.pushed += 1;
                }
                Err(e) => {
                    tracing::warn!("Record {} still local only: {}", record.id, e);
                    report.failed += 1;
                }
            }
        }
        if report.pushed > 0 {
            // Keep acquired backend ids even if the fetch below fails
            self.mirror.save(&state.records)?;
        }

        let remote = self.backend.fetch_all(&base_url).await?;
        state.records = merge_remote(std::mem::take(&mut state.records), remote, &mut report);
        self.mirror.save(&state.records)?;

        tracing::info!(
            "Synced with {}: {} pushed, {} failed, {} adopted, {} dropped",
            base_url,
            report.pushed,
            report.failed,
            report.adopted,
            report.dropped
        );
        Ok(report)
    }

    /// Best-effort remote write of `state.records[index]`.
    async fn mirror_upsert(&self, state: &mut State, index: usize) {
        let base_url = match &state.base_url {
            Some(url) => url.clone(),
            None => {
                tracing::debug!("Record {} saved only locally", state.records[index].id);
                return;
            }
        };

        let record = &state.records[index];
        match record.backend_id {
            Some(backend_id) => {
                if let Err(e) = self.backend.update(&base_url, backend_id, record).await {
                    tracing::warn!(
                        "Record {} updated locally, backend update failed: {}",
                        record.id,
                        e
                    );
                }
            }
            None => match self.backend.create(&base_url, record).await {
                Ok(backend_id) => {
                    state.records[index].backend_id = Some(backend_id);
                    match self.mirror.save(&state.records) {
                        Ok(()) => self.notify(state),
                        Err(e) => tracing::warn!(
                            "Backend id {} not persisted to local mirror: {}",
                            backend_id,
                            e
                        ),
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Record {} saved locally, backend create failed: {}",
                        record.id,
                        e
                    );
                }
            },
        }
    }

    fn require_backend(state: &State) -> Result<String, StoreError> {
        state
            .base_url
            .clone()
            .ok_or_else(|| StoreError::TransportUnreachable(UNREACHABLE_MESSAGE.to_string()))
    }

    /// First record whose local id or backend id equals `key`.
    fn position(records: &[Record], key: &str) -> Result<usize, StoreError> {
        records
            .iter()
            .position(|r| r.matches(key))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn notify(&self, state: &State) {
        if let Some(handler) = &state.handler {
            handler.on_data_changed(&state.records);
        }
    }
}

/// Merges the backend collection into the local one.
///
/// Local order is kept. Records known on both sides keep the local version;
/// local records whose backend row is gone are dropped; pending records are
/// kept; backend-only records are appended.
fn merge_remote(local: Vec<Record>, remote: Vec<Record>, report: &mut SyncReport) -> Vec<Record> {
    let remote_ids: HashSet<i64> = remote.iter().filter_map(|r| r.backend_id).collect();
    let mut known: HashSet<i64> = HashSet::new();
    let mut merged = Vec::with_capacity(local.len().max(remote.len()));

    for record in local {
        match record.backend_id {
            None => merged.push(record),
            Some(backend_id) if remote_ids.contains(&backend_id) => {
                if known.insert(backend_id) {
                    merged.push(record);
                }
            }
            Some(_) => report.dropped += 1,
        }
    }

    for record in remote {
        match record.backend_id {
            Some(backend_id) if known.insert(backend_id) => {
                report.adopted += 1;
                merged.push(record);
            }
            Some(_) => {}
            None => tracing::debug!("Ignoring backend record {} without backend id", record.id),
        }
    }

    merged
}
