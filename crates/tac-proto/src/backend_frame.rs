//! Broker<->worker back-socket wire format (spec §6).
//!
//! Tagged union on `"type"`, matching the spec's four logical frame kinds
//! literally rather than a binary framing (spec.md §6 specifies JSON or an
//! equivalent length-prefixed document; this workspace picks JSON on both
//! sockets for symmetry with the front socket).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_code::ErrorCode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendFrame {
    Ready {
        worker_id: String,
    },
    Task {
        request_id: Uuid,
        method: String,
        payload: serde_json::Value,
    },
    Response {
        request_id: Uuid,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    Heartbeat {
        worker_id: String,
    },
}

impl BackendFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendFrame::Ready { .. } => "ready",
            BackendFrame::Task { .. } => "task",
            BackendFrame::Response { .. } => "response",
            BackendFrame::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_wire_shape() {
        let frame = BackendFrame::Ready {
            worker_id: "worker-1".into(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "ready");
        assert_eq!(value["worker_id"], "worker-1");
    }

    #[test]
    fn task_roundtrip() {
        let request_id = Uuid::new_v4();
        let frame = BackendFrame::Task {
            request_id,
            method: "echo".into(),
            payload: serde_json::json!("hello"),
        };
        let bytes = frame.to_json_bytes().unwrap();
        let back = BackendFrame::from_json_bytes(&bytes).unwrap();
        match back {
            BackendFrame::Task { request_id: rid, method, payload } => {
                assert_eq!(rid, request_id);
                assert_eq!(method, "echo");
                assert_eq!(payload, serde_json::json!("hello"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn response_with_error_roundtrip() {
        let frame = BackendFrame::Response {
            request_id: Uuid::new_v4(),
            ok: false,
            payload: None,
            error_code: Some(ErrorCode::EHandlerFailure),
            error_message: Some("boom".into()),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "response");
        assert_eq!(value["error_code"], "E_HANDLER_FAILURE");
    }

    #[test]
    fn kind_names_match_spec() {
        assert_eq!(BackendFrame::Ready { worker_id: "w".into() }.kind(), "ready");
        assert_eq!(
            BackendFrame::Task {
                request_id: Uuid::nil(),
                method: "m".into(),
                payload: serde_json::Value::Null
            }
            .kind(),
            "task"
        );
        assert_eq!(
            BackendFrame::Response {
                request_id: Uuid::nil(),
                ok: true,
                payload: None,
                error_code: None,
                error_message: None
            }
            .kind(),
            "response"
        );
        assert_eq!(BackendFrame::Heartbeat { worker_id: "w".into() }.kind(), "heartbeat");
    }
}
