//! Record model shared by the local mirror, the backend client and the server.
//!
//! A record is a type tag plus an open payload. On the wire and in the mirror
//! blob it is a single flat JSON object:
//!
//! ```text
//! { "id": "1718000000000", "__backendId": 42, "type": "client",
//!   "created_at": "...", "updated_at": "...", "name": "Acme", ... }
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Open bag of caller fields, stored and returned verbatim.
pub type Payload = Map<String, Value>;

/// Keys owned by the persistence layer. They never live inside a payload.
pub const RESERVED_KEYS: [&str; 5] = ["id", "__backendId", "type", "created_at", "updated_at"];

/// Which identity space a record's authoritative id belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Minted on this client, not yet confirmed by the backend.
    Local(String),
    /// Assigned by the backend store.
    Remote(i64),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Local(id) => write!(f, "{}", id),
            Identity::Remote(id) => write!(f, "{}", id),
        }
    }
}

/// One persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Client-visible identifier.
    pub id: String,

    /// Identifier assigned by the backend store, once known.
    #[serde(rename = "__backendId", skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<i64>,

    /// Collection discriminator, e.g. "client" or "order".
    #[serde(rename = "type")]
    pub record_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub payload: Payload,
}

/// A record as found in a mirror blob or a backend response.
#[derive(Deserialize)]
struct StoredRecord {
    #[serde(deserialize_with = "de_id")]
    id: String,
    #[serde(rename = "__backendId", default)]
    backend_id: Option<Value>,
    #[serde(rename = "type")]
    record_type: String,
    #[serde(default, deserialize_with = "de_timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_timestamp")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    payload: Payload,
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let stored = StoredRecord::deserialize(deserializer)?;
        let backend_id = backend_id_of(stored.backend_id, &stored.id);
        Ok(Self {
            id: stored.id,
            backend_id,
            record_type: stored.record_type,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
            payload: stored.payload,
        })
    }
}

impl Record {
    /// Creates a local-only record stamped with the current time.
    pub fn new(id: impl Into<String>, record_type: impl Into<String>, payload: Payload) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            backend_id: None,
            record_type: record_type.into(),
            created_at: Some(now),
            updated_at: Some(now),
            payload: sanitize_payload(payload),
        }
    }

    pub fn with_backend_id(mut self, backend_id: i64) -> Self {
        self.backend_id = Some(backend_id);
        self
    }

    /// The authoritative identity at this point of the record's lifecycle.
    pub fn identity(&self) -> Identity {
        match self.backend_id {
            Some(id) => Identity::Remote(id),
            None => Identity::Local(self.id.clone()),
        }
    }

    /// Returns true if the record has not been confirmed by the backend.
    pub fn is_pending(&self) -> bool {
        self.backend_id.is_none()
    }

    /// Dual-key lookup: matches either the local `id` or the backend id.
    pub fn matches(&self, key: &str) -> bool {
        let key = key.trim();
        if self.id == key {
            return true;
        }
        match (self.backend_id, key.parse::<i64>()) {
            (Some(backend_id), Ok(parsed)) => backend_id == parsed,
            _ => false,
        }
    }

    /// Shallow merge: patch keys overwrite, omitted keys persist.
    ///
    /// A string `type` in the patch re-tags the record. Other reserved keys
    /// are ignored.
    pub fn merge(&mut self, patch: Payload) {
        for (key, value) in patch {
            match key.as_str() {
                "type" => {
                    if let Value::String(record_type) = value {
                        self.record_type = record_type;
                    }
                }
                k if RESERVED_KEYS.contains(&k) => {}
                _ => {
                    self.payload.insert(key, value);
                }
            }
        }
        self.updated_at = Some(Utc::now());
    }
}

/// Removes reserved keys from a caller-supplied payload.
pub fn sanitize_payload(mut payload: Payload) -> Payload {
    for key in RESERVED_KEYS {
        payload.remove(key);
    }
    payload
}

/// Returns the records of one type, in collection order.
pub fn filter_by_type<'a>(records: &'a [Record], record_type: &str) -> Vec<&'a Record> {
    records
        .iter()
        .filter(|r| r.record_type == record_type)
        .collect()
}

/// Mints local record ids.
///
/// Ids are millisecond timestamps rendered as decimal strings. Successive
/// ids from one minter are strictly increasing, so two mints in the same
/// millisecond still differ.
#[derive(Debug, Default)]
pub struct IdMinter {
    last: AtomicI64,
}

impl IdMinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next.to_string(),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Advances the minter past an id already present in the collection.
    pub fn observe(&self, id: &str) {
        if let Ok(value) = id.parse::<i64>() {
            self.last.fetch_max(value, Ordering::SeqCst);
        }
    }
}

fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("invalid record id: {}", other))),
    }
}

/// Reads `__backendId`. Legacy mirrors store placeholders there: a fractional
/// number, or a string copy of the local `id`. Neither is a backend id.
fn backend_id_of(value: Option<Value>, id: &str) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) if s.trim() == id.trim() => None,
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s,
        _ => return Ok(None),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    // SQLite CURRENT_TIMESTAMP format
    Ok(NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn test_new_strips_reserved_keys() {
        let record = Record::new(
            "1",
            "client",
            payload(json!({"id": "x", "__backendId": 9, "type": "order", "name": "Acme"})),
        );
        assert_eq!(record.record_type, "client");
        assert_eq!(record.payload.len(), 1);
        assert_eq!(record.payload["name"], "Acme");
        assert!(record.is_pending());
    }

    #[test]
    fn test_serializes_flat() {
        let record = Record::new("1", "client", payload(json!({"name": "Acme"}))).with_backend_id(7);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "1");
        assert_eq!(value["__backendId"], 7);
        assert_eq!(value["type"], "client");
        assert_eq!(value["name"], "Acme");
    }

    #[test]
    fn test_pending_record_omits_backend_id() {
        let record = Record::new("1", "client", Payload::new());
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("__backendId").is_none());
    }

    #[test]
    fn test_deserializes_numeric_ids_from_backend() {
        let record: Record = serde_json::from_value(json!({
            "id": 12,
            "__backendId": 12,
            "type": "order",
            "created_at": "2024-05-01 10:00:00",
            "total": 30
        }))
        .unwrap();
        assert_eq!(record.id, "12");
        assert_eq!(record.backend_id, Some(12));
        assert!(record.created_at.is_some());
        assert_eq!(record.payload["total"], 30);
        assert!(!record.payload.contains_key("created_at"));
    }

    #[test]
    fn test_fractional_backend_id_is_not_an_identity() {
        let record: Record = serde_json::from_value(json!({
            "id": "1718000000000",
            "__backendId": 1718000000000.123,
            "type": "client"
        }))
        .unwrap();
        assert_eq!(record.backend_id, None);
        assert_eq!(record.identity(), Identity::Local("1718000000000".into()));
    }

    #[test]
    fn test_backend_id_aliasing_local_id_is_pending() {
        let record: Record = serde_json::from_value(json!({
            "id": "1718000000000",
            "__backendId": "1718000000000",
            "type": "client",
            "name": "Acme"
        }))
        .unwrap();
        assert_eq!(record.backend_id, None);
        assert!(record.is_pending());
        assert_eq!(record.identity(), Identity::Local("1718000000000".into()));
    }

    #[test]
    fn test_backend_rows_keep_numeric_backend_id() {
        // The backend store echoes its row id in both fields
        let record: Record = serde_json::from_value(json!({
            "id": "5",
            "__backendId": 5,
            "type": "client"
        }))
        .unwrap();
        assert_eq!(record.backend_id, Some(5));

        let record: Record = serde_json::from_value(json!({
            "id": "1718000000000",
            "__backendId": "42",
            "type": "client"
        }))
        .unwrap();
        assert_eq!(record.backend_id, Some(42));
    }

    #[test]
    fn test_matches_either_identity() {
        let record = Record::new("1718000000000", "client", Payload::new()).with_backend_id(42);
        assert!(record.matches("1718000000000"));
        assert!(record.matches("42"));
        assert!(!record.matches("43"));
        assert_eq!(record.identity(), Identity::Remote(42));
    }

    #[test]
    fn test_merge_overwrites_and_keeps() {
        let mut record = Record::new(
            "1",
            "client",
            payload(json!({"name": "Acme", "city": "Lisbon"})),
        );
        record.merge(payload(json!({"name": "Acme Corp", "id": "hijack", "type": "supplier"})));

        assert_eq!(record.id, "1");
        assert_eq!(record.record_type, "supplier");
        assert_eq!(record.payload["name"], "Acme Corp");
        assert_eq!(record.payload["city"], "Lisbon");
        assert!(!record.payload.contains_key("id"));
    }

    #[test]
    fn test_minter_distinct_within_same_millisecond() {
        let minter = IdMinter::new();
        let ids: Vec<String> = (0..100).map(|_| minter.mint()).collect();
        let mut sorted: Vec<i64> = ids.iter().map(|id| id.parse().unwrap()).collect();
        sorted.dedup();
        assert_eq!(sorted.len(), 100);
        assert!(sorted.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_minter_observe_skips_past_existing() {
        let minter = IdMinter::new();
        let far_future = (Utc::now().timestamp_millis() + 1_000_000).to_string();
        minter.observe(&far_future);
        let next: i64 = minter.mint().parse().unwrap();
        assert!(next > far_future.parse::<i64>().unwrap());
    }

    #[test]
    fn test_filter_by_type() {
        let records = vec![
            Record::new("1", "client", Payload::new()),
            Record::new("2", "order", Payload::new()),
            Record::new("3", "client", Payload::new()),
        ];
        let clients = filter_by_type(&records, "client");
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[1].id, "3");
    }
}
