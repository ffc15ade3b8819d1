//! Method dispatch registry (spec §4.C).
//!
//! Grounded on `chaosgarden::ipc::server::Handler`: a plain `Send + Sync`
//! trait the daemon implements per message kind, rather than baton's async
//! MCP `Handler` (this worker has one socket and one method table, not a
//! tool-discovery surface). Dispatch itself is synchronous: the worker
//! processes one task to completion before reading the next frame, so there
//! is no need for handlers to be async.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;

/// Bound on how much of a caught panic/error message is kept in the
/// RESPONSE frame (spec §4.C: "truncated to a bounded length").
const ERROR_MESSAGE_MAX_LEN: usize = 2048;

/// A single RPC method implementation.
///
/// Handlers run on the worker's single task-processing thread of control;
/// blocking work is fine; there is nothing else for the worker to do while
/// a handler runs.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, payload: Value) -> Result<Value, String>;
}

/// `method -> handler` table, built once at startup and consulted for every
/// TASK frame.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: impl Into<String>, handler: impl Handler) -> &mut Self {
        self.handlers.insert(method.into(), Box::new(handler));
        self
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Dispatch `method(payload)`, catching handler panics as well as
    /// ordinary `Err` returns (spec §4.C: both become `E_HANDLER_FAILURE`).
    ///
    /// Returns `None` if `method` is not registered; the caller maps that to
    /// `E_UNKNOWN_METHOD`.
    pub fn dispatch(&self, method: &str, payload: Value) -> Option<Result<Value, String>> {
        let handler = self.handlers.get(method)?;
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.call(payload)));
        Some(match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(truncate(&message)),
            Err(panic) => Err(truncate(&panic_message(panic))),
        })
    }
}

fn truncate(message: &str) -> String {
    if message.len() <= ERROR_MESSAGE_MAX_LEN {
        message.to_string()
    } else {
        let mut truncated = message.chars().take(ERROR_MESSAGE_MAX_LEN).collect::<String>();
        truncated.push_str("...(truncated)");
        truncated
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked: <non-string payload>".to_string()
    }
}

/// Built-in diagnostic method: echoes the payload back unchanged. Useful for
/// the reliability-pattern test scenarios (spec §8 S1) and for operators
/// probing a worker fleet by hand.
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn call(&self, payload: Value) -> Result<Value, String> {
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingHandler;
    impl Handler for FailingHandler {
        fn call(&self, _payload: Value) -> Result<Value, String> {
            Err("deliberate failure".to_string())
        }
    }

    struct PanickingHandler;
    impl Handler for PanickingHandler {
        fn call(&self, _payload: Value) -> Result<Value, String> {
            panic!("boom");
        }
    }

    #[test]
    fn unknown_method_returns_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.dispatch("nope", Value::Null).is_none());
    }

    #[test]
    fn echo_roundtrips_payload() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", EchoHandler);
        let payload = serde_json::json!({"a": 1});
        let result = registry.dispatch("echo", payload.clone()).unwrap();
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn handler_error_is_surfaced() {
        let mut registry = HandlerRegistry::new();
        registry.register("fail", FailingHandler);
        let result = registry.dispatch("fail", Value::Null).unwrap();
        assert_eq!(result.unwrap_err(), "deliberate failure");
    }

    #[test]
    fn handler_panic_is_caught() {
        let mut registry = HandlerRegistry::new();
        registry.register("panic", PanickingHandler);
        let result = registry.dispatch("panic", Value::Null).unwrap();
        assert!(result.unwrap_err().contains("boom"));
    }

    #[test]
    fn long_error_message_is_truncated() {
        let mut registry = HandlerRegistry::new();
        struct LoudHandler;
        impl Handler for LoudHandler {
            fn call(&self, _payload: Value) -> Result<Value, String> {
                Err("x".repeat(ERROR_MESSAGE_MAX_LEN * 2))
            }
        }
        registry.register("loud", LoudHandler);
        let result = registry.dispatch("loud", Value::Null).unwrap();
        let message = result.unwrap_err();
        assert!(message.len() < ERROR_MESSAGE_MAX_LEN * 2);
        assert!(message.ends_with("...(truncated)"));
    }
}
