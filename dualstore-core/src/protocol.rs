//! JSON envelope shared by the backend store and its clients.
//!
//! Every response is `{ isOk, data?, id?, message?, error? }`.

use serde::{Deserialize, Serialize};

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub is_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok() -> Self {
        Self {
            is_ok: true,
            data: None,
            id: None,
            message: None,
            error: None,
        }
    }

    pub fn ok_with_data(data: T) -> Self {
        Self {
            data: Some(data),
            ..Self::ok()
        }
    }

    pub fn ok_with_id(id: impl Into<serde_json::Value>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::ok()
        }
    }

    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            is_ok: false,
            error: Some(error.into()),
            ..Self::ok()
        }
    }

    /// Builds an envelope from an operation result.
    pub fn from_result<E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::ok_with_data(data),
            Err(e) => Self::failure(e.to_string()),
        }
    }

    /// Returns the envelope itself when `isOk` is true, the error text otherwise.
    pub fn into_result(self) -> Result<Self, String> {
        if self.is_ok {
            Ok(self)
        } else {
            Err(self
                .error
                .or(self.message)
                .unwrap_or_else(|| "request rejected".to_string()))
        }
    }
}

/// Body of `/api/register` and `/api/login`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Body of `/api/file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpload {
    pub data_id: i64,
    pub filename: String,
    /// Base64 text, optionally with a `data:<mime>;base64,` prefix.
    pub file_data: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Envelope<T> {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_decodes_payload_without_default() {
        let env: Envelope<crate::record::Record> = decode(r#"{"isOk": true, "id": 7}"#);
        assert!(env.is_ok);
        assert!(env.data.is_none());
        assert_eq!(env.id, Some(json!(7)));

        let env: Envelope<crate::record::Record> =
            decode(r#"{"isOk": true, "data": {"id": 7, "__backendId": 7, "type": "client"}}"#);
        assert_eq!(env.data.map(|r| r.backend_id), Some(Some(7)));
    }

    #[test]
    fn test_ok_with_id_shape() {
        let env: Envelope<()> = Envelope::ok_with_id(5);
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({"isOk": true, "id": 5})
        );
    }

    #[test]
    fn test_failure_shape() {
        let env: Envelope<()> = Envelope::failure("not found");
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({"isOk": false, "error": "not found"})
        );
    }

    #[test]
    fn test_into_result_prefers_error_text() {
        let env: Envelope<()> = serde_json::from_value(json!({
            "isOk": false,
            "error": "Username already exists"
        }))
        .unwrap();
        assert_eq!(env.into_result().unwrap_err(), "Username already exists");
    }

    #[test]
    fn test_from_result() {
        let ok: Envelope<u32> = Envelope::from_result(Ok::<_, String>(3));
        assert!(ok.is_ok);
        assert_eq!(ok.data, Some(3));

        let err: Envelope<u32> = Envelope::from_result(Err("boom"));
        assert!(!err.is_ok);
        assert_eq!(err.error.as_deref(), Some("boom"));
    }
}
