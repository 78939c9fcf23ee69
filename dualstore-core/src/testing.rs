//! In-memory backend used by unit tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::record::{sanitize_payload, Record};
use crate::remote::{Backend, RemoteError};

#[derive(Default)]
struct FakeState {
    reachable: HashSet<String>,
    rows: Vec<Record>,
    next_id: i64,
    health_calls: Vec<String>,
    create_calls: usize,
    fail_writes: bool,
}

/// Backend whose reachability is set per base URL.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, base_url: &str, reachable: bool) {
        let mut state = self.state.lock().unwrap();
        if reachable {
            state.reachable.insert(base_url.to_string());
        } else {
            state.reachable.remove(base_url);
        }
    }

    /// Health checks pass but every write fails as unreachable.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub fn health_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().health_calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    pub fn rows(&self) -> Vec<Record> {
        self.state.lock().unwrap().rows.clone()
    }

    /// Inserts a row as if another client had created it.
    pub fn seed(&self, record_type: &str, payload: crate::record::Payload) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state
            .rows
            .push(Record::new(id.to_string(), record_type, payload).with_backend_id(id));
        id
    }

    fn check(&self, base_url: &str, write: bool) -> Result<(), RemoteError> {
        let state = self.state.lock().unwrap();
        if !state.reachable.contains(base_url) || (write && state.fail_writes) {
            return Err(RemoteError::Unreachable(format!(
                "connection refused: {}",
                base_url
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn health(&self, base_url: &str) -> Result<(), RemoteError> {
        self.state
            .lock()
            .unwrap()
            .health_calls
            .push(base_url.to_string());
        self.check(base_url, false)
    }

    async fn fetch_all(&self, base_url: &str) -> Result<Vec<Record>, RemoteError> {
        self.check(base_url, false)?;
        Ok(self.rows())
    }

    async fn create(&self, base_url: &str, record: &Record) -> Result<i64, RemoteError> {
        self.state.lock().unwrap().create_calls += 1;
        self.check(base_url, true)?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let row = Record::new(
            id.to_string(),
            record.record_type.clone(),
            sanitize_payload(record.payload.clone()),
        )
        .with_backend_id(id);
        state.rows.push(row);
        Ok(id)
    }

    async fn update(
        &self,
        base_url: &str,
        backend_id: i64,
        record: &Record,
    ) -> Result<(), RemoteError> {
        self.check(base_url, true)?;
        let mut state = self.state.lock().unwrap();
        let row = state
            .rows
            .iter_mut()
            .find(|r| r.backend_id == Some(backend_id))
            .ok_or_else(|| RemoteError::Rejected("Record not found".to_string()))?;
        row.record_type = record.record_type.clone();
        row.payload = record.payload.clone();
        row.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn delete(&self, base_url: &str, backend_id: i64) -> Result<(), RemoteError> {
        self.check(base_url, true)?;
        let mut state = self.state.lock().unwrap();
        let before = state.rows.len();
        state.rows.retain(|r| r.backend_id != Some(backend_id));
        if state.rows.len() == before {
            return Err(RemoteError::Rejected("Record not found".to_string()));
        }
        Ok(())
    }
}
