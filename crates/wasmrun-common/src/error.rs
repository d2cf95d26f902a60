//! Error types for wasmrun.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`ConfigError`]: Missing or invalid configuration (fatal at startup)
//! - [`CacheError`]: Key-value cache connection and I/O failures
//! - [`BackendError`]: Module backend fetch failures
//! - [`LoadError`]: Module resolution failures, wrapping the module name
//! - [`PreloadError`]: Startup preload sweep failures
//! - [`InvocationError`]: Module instantiation and execution failures

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors.
///
/// Any of these aborts startup before a network call is made.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Failed to parse or deserialize configuration sources.
    #[error("Failed to parse configuration: {message}")]
    Parse { message: String },

    /// A required field is absent or empty.
    #[error("Missing required configuration field: {field}")]
    Missing { field: String },

    /// A field is present but has an unusable value.
    #[error("Invalid configuration field {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    /// Create a new `Missing` error.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing {
            field: field.into(),
        }
    }

    /// Create a new `Invalid` error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Key-value cache errors.
///
/// A cache miss is not an error: lookups return `Ok(None)`.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache never became reachable during startup.
    #[error("Failed to connect to cache at {address} after {attempts} attempts: {reason}")]
    Connect {
        address: String,
        attempts: u32,
        reason: String,
    },

    /// A runtime cache operation failed.
    #[error("Cache {operation} failed for key '{key}': {reason}")]
    Operation {
        operation: &'static str,
        key: String,
        reason: String,
    },
}

impl CacheError {
    /// Create a new `Operation` error.
    pub fn operation(operation: &'static str, key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Operation {
            operation,
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Module backend errors.
#[derive(Error, Debug)]
pub enum BackendError {
    /// No file or object exists at the canonical location.
    #[error("module not found at {location}")]
    NotFound { location: String },

    /// Reading the file or object failed.
    #[error("failed to read {location}: {reason}")]
    Io { location: String, reason: String },
}

impl BackendError {
    /// Returns `true` if the module does not exist in the backend.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Module resolution errors.
///
/// Every variant renders as `failed to load module <name>: <cause>`.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The module name cannot be mapped to a backend location.
    #[error("failed to load module {name}: invalid module name")]
    InvalidName { name: String },

    /// The backend could not supply the module.
    #[error("failed to load module {name}: {source}")]
    Backend {
        name: String,
        #[source]
        source: BackendError,
    },

    /// The module was fetched but could not be written back to the cache.
    #[error("failed to load module {name}: {source}")]
    CacheWrite {
        name: String,
        #[source]
        source: CacheError,
    },

    /// Resolution did not finish before the configured deadline.
    #[error("failed to load module {name}: timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },
}

impl LoadError {
    /// Name of the module that failed to load.
    pub fn module_name(&self) -> &str {
        match self {
            Self::InvalidName { name }
            | Self::Backend { name, .. }
            | Self::CacheWrite { name, .. }
            | Self::Timeout { name, .. } => name,
        }
    }

    /// Returns `true` if the backend reported the module as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Backend { source, .. } if source.is_not_found())
    }
}

/// Preload sweep errors.
#[derive(Error, Debug)]
pub enum PreloadError {
    /// The module directory could not be enumerated.
    #[error("failed to read module directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A module in the directory failed to load.
    #[error("failed to preload module {name}: {source}")]
    Load {
        name: String,
        #[source]
        source: LoadError,
    },
}

/// Module invocation errors.
///
/// No partial output accompanies any of these.
#[derive(Error, Debug)]
pub enum InvocationError {
    /// The bytes are not a valid WebAssembly module.
    #[error("Compilation failed: {reason}")]
    Compilation { reason: String },

    /// Linking or instantiation failed (e.g. an unsatisfied import).
    #[error("Instantiation failed: {reason}")]
    Instantiation { reason: String },

    /// The module does not export the configured entry point.
    #[error("Entry point '{entry_point}' not found")]
    MissingEntryPoint { entry_point: String },

    /// The module called `proc_exit` with a non-zero status.
    #[error("Module exited with status {code}")]
    Exit { code: i32 },

    /// Execution exhausted the configured fuel limit.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// Execution exceeded the configured timeout.
    #[error("Execution timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The module wrote more than `limit` bytes to stdout.
    #[error("Output limit exceeded: more than {limit} bytes written to stdout")]
    OutputLimit { limit: usize },

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        message: String,
        code: Option<String>,
    },

    /// The execution context could not be set up.
    #[error("Failed to prepare execution context: {reason}")]
    Setup { reason: String },
}

impl InvocationError {
    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Trap {
            message: message.into(),
            code,
        }
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self,
            Self::FuelExhausted | Self::Timeout { .. } | Self::OutputLimit { .. }
        )
    }
}
