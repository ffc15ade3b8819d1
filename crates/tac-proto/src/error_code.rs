use serde::{Deserialize, Serialize};
use std::fmt;

/// The `error_code` taxonomy carried on the wire (spec §7).
///
/// Distinct from any crate's internal `thiserror` error types: this is the
/// value that actually crosses the front socket and the HTTP plane, so its
/// `Display`/serde representations must match the taxonomy strings exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed envelope; surfaced to client, never persisted as PENDING.
    #[serde(rename = "E_BAD_REQUEST")]
    EBadRequest,
    /// No handler registered for `method`; persisted FAILED.
    #[serde(rename = "E_UNKNOWN_METHOD")]
    EUnknownMethod,
    /// Handler threw/returned an error; persisted FAILED, never retried.
    #[serde(rename = "E_HANDLER_FAILURE")]
    EHandlerFailure,
    /// Pending-request queue full; surfaced to client, not retried.
    #[serde(rename = "E_SERVICE_OVERLOADED")]
    EServiceOverloaded,
    /// Worker died mid-task; retried while attempts remain.
    #[serde(rename = "E_WORKER_LOST")]
    EWorkerLost,
    /// Request exceeded `request_timeout`; retried while attempts remain.
    #[serde(rename = "E_TIMEOUT")]
    ETimeout,
    /// In-flight at broker crash, could not be resumed.
    #[serde(rename = "E_RECOVERY_ABORT")]
    ERecoveryAbort,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::EBadRequest => "E_BAD_REQUEST",
            ErrorCode::EUnknownMethod => "E_UNKNOWN_METHOD",
            ErrorCode::EHandlerFailure => "E_HANDLER_FAILURE",
            ErrorCode::EServiceOverloaded => "E_SERVICE_OVERLOADED",
            ErrorCode::EWorkerLost => "E_WORKER_LOST",
            ErrorCode::ETimeout => "E_TIMEOUT",
            ErrorCode::ERecoveryAbort => "E_RECOVERY_ABORT",
        }
    }

    /// Whether the broker should re-enqueue a request carrying this code,
    /// given attempts remain. Handler-level failures are excluded by design
    /// (spec.md §9 open question: surfaced directly, never retried).
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorCode::EWorkerLost | ErrorCode::ETimeout)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_match_taxonomy() {
        assert_eq!(ErrorCode::EBadRequest.as_str(), "E_BAD_REQUEST");
        assert_eq!(ErrorCode::EUnknownMethod.as_str(), "E_UNKNOWN_METHOD");
        assert_eq!(ErrorCode::EHandlerFailure.as_str(), "E_HANDLER_FAILURE");
        assert_eq!(ErrorCode::EServiceOverloaded.as_str(), "E_SERVICE_OVERLOADED");
        assert_eq!(ErrorCode::EWorkerLost.as_str(), "E_WORKER_LOST");
        assert_eq!(ErrorCode::ETimeout.as_str(), "E_TIMEOUT");
        assert_eq!(ErrorCode::ERecoveryAbort.as_str(), "E_RECOVERY_ABORT");
    }

    #[test]
    fn retry_policy() {
        assert!(ErrorCode::EWorkerLost.is_retriable());
        assert!(ErrorCode::ETimeout.is_retriable());
        assert!(!ErrorCode::EHandlerFailure.is_retriable());
        assert!(!ErrorCode::EBadRequest.is_retriable());
        assert!(!ErrorCode::EServiceOverloaded.is_retriable());
        assert!(!ErrorCode::ERecoveryAbort.is_retriable());
    }

    #[test]
    fn json_roundtrip() {
        let json = serde_json::to_string(&ErrorCode::EWorkerLost).unwrap();
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCode::EWorkerLost);
    }
}
