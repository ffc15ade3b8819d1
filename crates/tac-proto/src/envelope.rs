//! Client-facing front-socket wire format (spec §6).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_code::ErrorCode;

/// Request envelope as received on the broker's front socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_module: Option<String>,
    pub payload: serde_json::Value,
}

impl ClientRequest {
    /// Bytes of the request over the configured max payload size reject the
    /// request synchronously with `E_BAD_REQUEST` (spec §4.E.2) before any
    /// persistence write happens.
    pub fn validate(&self, max_payload_bytes: usize) -> Result<(), ErrorCode> {
        if self.method.trim().is_empty() {
            return Err(ErrorCode::EBadRequest);
        }
        let payload_len = serde_json::to_vec(&self.payload)
            .map(|v| v.len())
            .unwrap_or(usize::MAX);
        if payload_len > max_payload_bytes {
            return Err(ErrorCode::EBadRequest);
        }
        Ok(())
    }
}

/// Response envelope returned on the broker's front socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientResponse {
    pub request_id: Uuid,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub attempt: u32,
}

impl ClientResponse {
    pub fn success(request_id: Uuid, payload: serde_json::Value, attempt: u32) -> Self {
        Self {
            request_id,
            ok: true,
            payload: Some(payload),
            error_code: None,
            error_message: None,
            attempt,
        }
    }

    pub fn failure(
        request_id: Uuid,
        error_code: ErrorCode,
        error_message: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self {
            request_id,
            ok: false,
            payload: None,
            error_code: Some(error_code),
            error_message: Some(error_message.into()),
            attempt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_method_is_bad_request() {
        let req = ClientRequest {
            method: "   ".into(),
            source_module: None,
            payload: serde_json::json!({}),
        };
        assert_eq!(req.validate(1024), Err(ErrorCode::EBadRequest));
    }

    #[test]
    fn oversized_payload_is_bad_request() {
        let req = ClientRequest {
            method: "echo".into(),
            source_module: None,
            payload: serde_json::Value::String("x".repeat(2048)),
        };
        assert_eq!(req.validate(16), Err(ErrorCode::EBadRequest));
    }

    #[test]
    fn well_formed_request_validates() {
        let req = ClientRequest {
            method: "echo".into(),
            source_module: Some("scanner".into()),
            payload: serde_json::json!({"hello": "world"}),
        };
        assert!(req.validate(4096).is_ok());
    }

    #[test]
    fn response_roundtrip() {
        let id = Uuid::new_v4();
        let resp = ClientResponse::success(id, serde_json::json!("hi"), 1);
        let json = serde_json::to_string(&resp).unwrap();
        let back: ClientResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id, id);
        assert!(back.ok);
        assert_eq!(back.payload, Some(serde_json::json!("hi")));
    }

    #[test]
    fn failure_carries_error_code_string() {
        let resp = ClientResponse::failure(Uuid::new_v4(), ErrorCode::EUnknownMethod, "no such method", 1);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error_code"], "E_UNKNOWN_METHOD");
        assert_eq!(json["ok"], false);
    }
}
