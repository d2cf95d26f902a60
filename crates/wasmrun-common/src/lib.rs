//! Common types, errors, and configuration for wasmrun.
//!
//! This crate provides shared functionality used across the wasmrun workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures with serde defaults and validation
//! - Layered configuration loading (file + environment)

pub mod config;
pub mod config_file;
pub mod error;

pub use self::config::{
    AppConfig, BackendConfig, CacheConfig, EngineConfig, ExecutionConfig, LoaderConfig,
    LoaderKind, ObjectStoreConfig, RuntimeConfig, ServerConfig,
};
pub use self::error::{
    BackendError, CacheError, ConfigError, InvocationError, LoadError, PreloadError,
};
