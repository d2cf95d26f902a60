//! Configuration structures for wasmrun.
//!
//! This module defines configuration options for various components:
//! - [`AppConfig`]: Top-level configuration containing all settings
//! - [`ServerConfig`]: HTTP listener settings
//! - [`CacheConfig`]: Key-value cache connection settings
//! - [`LoaderConfig`]: Module backend selection and loader behaviour
//! - [`RuntimeConfig`]: Wasmtime engine and per-invocation limits
//!
//! [`AppConfig::validate`] enforces the cross-field rules that serde
//! defaults cannot express, and [`LoaderConfig::backend_config`] turns the
//! loader section into the closed [`BackendConfig`] variant.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Key-value cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Module loader configuration.
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Runtime configuration (engine + execution settings).
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    /// Check every rule that must hold before the process starts.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::missing("server.host"));
        }
        self.cache.validate()?;
        self.loader.backend_config()?;
        self.runtime.validate()?;
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host name or address to bind.
    #[serde(default = "defaults::host")]
    pub host: String,

    /// TCP port to bind.
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Request timeout in seconds.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable graceful shutdown on SIGTERM/SIGINT.
    #[serde(default = "defaults::graceful_shutdown")]
    pub graceful_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
            request_timeout_secs: defaults::request_timeout_secs(),
            graceful_shutdown: defaults::graceful_shutdown(),
        }
    }
}

impl ServerConfig {
    /// The `host:port` pair to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Key-value cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Cache address as `host:port`. Required.
    #[serde(default)]
    pub address: String,

    /// Optional password for AUTH.
    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index.
    #[serde(default)]
    pub db: i64,

    /// Connection attempts made at startup before giving up.
    #[serde(default = "defaults::connect_attempts")]
    pub connect_attempts: u32,

    /// Delay after the first failed attempt; doubled after each further one.
    #[serde(default = "defaults::connect_backoff_ms")]
    pub connect_backoff_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            password: None,
            db: 0,
            connect_attempts: defaults::connect_attempts(),
            connect_backoff_ms: defaults::connect_backoff_ms(),
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::missing("cache.address"));
        }
        if self.db < 0 {
            return Err(ConfigError::invalid("cache.db", "must be >= 0"));
        }
        if self.connect_attempts == 0 {
            return Err(ConfigError::invalid(
                "cache.connect_attempts",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Initial connect backoff as a `Duration`.
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
}

/// Which backend supplies module bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderKind {
    /// Local directory of `<name>.wasm` files.
    Fs,
    /// S3-compatible bucket of `<name>.wasm` objects.
    Objectstore,
}

/// Module loader configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoaderConfig {
    /// Backend selector. Required.
    #[serde(default)]
    pub module_loader: Option<LoaderKind>,

    /// Module directory; the backend root for `fs` and the preload source.
    #[serde(default)]
    pub module_directory: Option<PathBuf>,

    /// Object storage settings, required for `objectstore`.
    #[serde(default)]
    pub minio_config: Option<ObjectStoreConfig>,

    /// Run the preload sweep over `module_directory` at startup.
    #[serde(default = "defaults::preload")]
    pub preload: bool,

    /// Allow at most one in-flight backend fetch per module name.
    #[serde(default = "defaults::coalesce_fetches")]
    pub coalesce_fetches: bool,

    /// Deadline for a single load in milliseconds; 0 disables it.
    #[serde(default)]
    pub fetch_timeout_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            module_loader: None,
            module_directory: None,
            minio_config: None,
            preload: defaults::preload(),
            coalesce_fetches: defaults::coalesce_fetches(),
            fetch_timeout_ms: 0,
        }
    }
}

impl LoaderConfig {
    /// Resolve the active backend variant.
    ///
    /// # Errors
    ///
    /// Returns an error if the selector is absent, or if the fields the
    /// selected variant needs are missing or empty.
    pub fn backend_config(&self) -> Result<BackendConfig, ConfigError> {
        match self.module_loader {
            None => Err(ConfigError::missing("loader.module_loader")),
            Some(LoaderKind::Fs) => match &self.module_directory {
                Some(dir) if !dir.as_os_str().is_empty() => Ok(BackendConfig::Filesystem {
                    directory: dir.clone(),
                }),
                _ => Err(ConfigError::missing("loader.module_directory")),
            },
            Some(LoaderKind::Objectstore) => {
                let cfg = self
                    .minio_config
                    .as_ref()
                    .ok_or_else(|| ConfigError::missing("loader.minio_config"))?;
                cfg.validate()?;
                Ok(BackendConfig::ObjectStore(cfg.clone()))
            }
        }
    }

    /// Deadline for a single load, if one is configured.
    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_ms > 0).then(|| Duration::from_millis(self.fetch_timeout_ms))
    }
}

/// S3-compatible object storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ObjectStoreConfig {
    /// Endpoint, with or without scheme (e.g. `localhost:9000`).
    #[serde(default)]
    pub endpoint: String,

    /// Static access key.
    #[serde(default)]
    pub access_key: String,

    /// Static secret key.
    #[serde(default)]
    pub secret_key: String,

    /// Bucket holding `<name>.wasm` objects.
    #[serde(default)]
    pub bucket_name: String,

    /// Signing region.
    #[serde(default = "defaults::region")]
    pub region: String,

    /// Use HTTPS when the endpoint carries no scheme.
    #[serde(default)]
    pub secure: bool,
}

impl ObjectStoreConfig {
    /// Check that every credential and location field is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] naming the first empty field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("loader.minio_config.endpoint", &self.endpoint),
            ("loader.minio_config.access_key", &self.access_key),
            ("loader.minio_config.secret_key", &self.secret_key),
            ("loader.minio_config.bucket_name", &self.bucket_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::missing(field));
            }
        }
        Ok(())
    }

    /// Endpoint URL with an explicit scheme.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else if self.secure {
            format!("https://{}", self.endpoint)
        } else {
            format!("http://{}", self.endpoint)
        }
    }
}

/// The validated, active module backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Read `<directory>/<name>.wasm`.
    Filesystem { directory: PathBuf },
    /// Get object `<name>.wasm` from a bucket.
    ObjectStore(ObjectStoreConfig),
}

/// Runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-invocation execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl RuntimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.entry_point.is_empty() {
            return Err(ConfigError::missing("runtime.execution.entry_point"));
        }
        if self.execution.payload_env_var.is_empty() || self.execution.payload_env_var.contains('=') {
            return Err(ConfigError::invalid(
                "runtime.execution.payload_env_var",
                "must be a non-empty name without '='",
            ));
        }
        if self.engine.epoch_interruption && self.engine.epoch_tick_ms == 0 {
            return Err(ConfigError::invalid(
                "runtime.engine.epoch_tick_ms",
                "must be at least 1 when epoch interruption is enabled",
            ));
        }
        Ok(())
    }
}

/// Wasmtime engine configuration.
///
/// These settings affect the process-wide engine shared by all invocations.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for high-performance instance creation.
    ///
    /// Reserves virtual memory for `max_instances` slots up front.
    #[serde(default)]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Keep compiled modules in memory, keyed by content hash.
    ///
    /// Repeated invocations of unchanged bytes then skip Cranelift.
    #[serde(default = "defaults::cache_compiled_modules")]
    pub cache_compiled_modules: bool,

    /// Enable epoch-based interruption.
    ///
    /// This is what enforces `execution.timeout_ms`.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,

    /// Interval between epoch increments in milliseconds.
    #[serde(default = "defaults::epoch_tick_ms")]
    pub epoch_tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: false,
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            cache_compiled_modules: defaults::cache_compiled_modules(),
            epoch_interruption: defaults::epoch_interruption(),
            epoch_tick_ms: defaults::epoch_tick_ms(),
        }
    }
}

impl EngineConfig {
    /// Epoch tick interval as a `Duration`.
    pub fn epoch_tick(&self) -> Duration {
        Duration::from_millis(self.epoch_tick_ms)
    }
}

/// Per-invocation execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum fuel (CPU instructions) per invocation.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Enable fuel metering.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Execution timeout in milliseconds.
    ///
    /// Enforced in epoch ticks, so it is as precise as `epoch_tick_ms`.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum linear memory in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,

    /// Exported function run after instantiation.
    #[serde(default = "defaults::entry_point")]
    pub entry_point: String,

    /// Environment variable carrying the request payload.
    #[serde(default = "defaults::payload_env_var")]
    pub payload_env_var: String,

    /// Most bytes a module may write to stdout. Writing more fails the
    /// invocation.
    #[serde(default = "defaults::max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            fuel_metering: defaults::fuel_metering(),
            timeout_ms: defaults::timeout_ms(),
            max_memory_mb: defaults::max_memory_mb(),
            entry_point: defaults::entry_point(),
            payload_env_var: defaults::payload_env_var(),
            max_output_bytes: defaults::max_output_bytes(),
        }
    }
}

impl ExecutionConfig {
    /// Memory limit in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// Default value functions for serde.
mod defaults {
    pub fn host() -> String {
        "localhost".to_string()
    }

    pub const fn port() -> u16 {
        8080
    }

    pub const fn request_timeout_secs() -> u64 {
        30
    }

    pub const fn graceful_shutdown() -> bool {
        true
    }

    pub const fn connect_attempts() -> u32 {
        5
    }

    pub const fn connect_backoff_ms() -> u64 {
        1000
    }

    pub const fn preload() -> bool {
        true
    }

    pub const fn coalesce_fetches() -> bool {
        true
    }

    pub fn region() -> String {
        "us-east-1".to_string()
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn cache_compiled_modules() -> bool {
        true
    }

    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn epoch_tick_ms() -> u64 {
        1
    }

    pub const fn max_fuel() -> u64 {
        10_000_000_000
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub const fn timeout_ms() -> u64 {
        5_000
    }

    pub const fn max_memory_mb() -> u32 {
        128
    }

    pub fn entry_point() -> String {
        "_start".to_string()
    }

    pub fn payload_env_var() -> String {
        "WASMRUN_DATA".to_string()
    }

    pub const fn max_output_bytes() -> usize {
        1024 * 1024
    }
}
