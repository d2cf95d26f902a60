//! Invocation request and response bodies.

use serde::{Deserialize, Serialize};

/// Body of `POST /invoke`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InvokeRequest {
    /// Module name, without extension.
    pub module: String,

    /// Payload handed to the module; empty when absent.
    #[serde(default)]
    pub data: String,
}

impl InvokeRequest {
    /// Parse a raw request body.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the body is not a valid request.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// Successful invocation result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InvokeResponse {
    /// Everything the module wrote to stdout.
    pub result: String,
}

impl InvokeResponse {
    /// Wrap captured stdout; invalid UTF-8 is replaced, not rejected.
    pub fn from_output(output: &[u8]) -> Self {
        Self {
            result: String::from_utf8_lossy(output).into_owned(),
        }
    }
}
