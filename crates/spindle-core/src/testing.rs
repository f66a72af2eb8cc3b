//! テスト用の Transform 実装

use std::time::Duration;

use serde_json::{json, Value};

use crate::ports::{Transform, TransformError};

/// Upper-cases the input; the literal input "fail" is rejected.
pub struct Upper;

impl Transform for Upper {
    fn transform(&self, input: &str, _options: &Value) -> Result<String, TransformError> {
        if input == "fail" {
            return Err(TransformError::syntax("Unexpected token name «fail»"));
        }
        Ok(input.to_uppercase())
    }
}

/// Returns the options it was called with, serialized.
pub struct EchoOptions;

impl Transform for EchoOptions {
    fn default_options(&self) -> Value {
        json!({ "default": true })
    }

    fn transform(&self, _input: &str, options: &Value) -> Result<String, TransformError> {
        Ok(options.to_string())
    }
}

/// Returns the name of the worker thread that ran it.
pub struct ThreadName;

impl Transform for ThreadName {
    fn transform(&self, _input: &str, _options: &Value) -> Result<String, TransformError> {
        Ok(std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string())
    }
}

/// Blocks the worker for a fixed time before answering.
pub struct Stall(pub Duration);

impl Transform for Stall {
    fn transform(&self, input: &str, _options: &Value) -> Result<String, TransformError> {
        std::thread::sleep(self.0);
        Ok(input.to_string())
    }
}

pub struct Panicky;

impl Transform for Panicky {
    fn transform(&self, _input: &str, _options: &Value) -> Result<String, TransformError> {
        panic!("kaboom")
    }
}

/// Panics with a payload whose destructor panics again. The second panic
/// happens outside `catch_unwind` and takes the worker thread down.
pub struct KillThread;

struct Bomb;

impl Drop for Bomb {
    fn drop(&mut self) {
        panic!("panic payload dropped");
    }
}

impl Transform for KillThread {
    fn transform(&self, _input: &str, _options: &Value) -> Result<String, TransformError> {
        std::panic::panic_any(Bomb)
    }
}
