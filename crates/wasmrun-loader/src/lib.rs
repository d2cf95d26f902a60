//! Module loading for wasmrun.
//!
//! Modules are resolved cache-aside:
//! - [`KeyValueCache`]: Fast shared lookup (Redis in production)
//! - [`ModuleBackend`]: Durable source (directory or S3-compatible bucket)
//! - [`ModuleLoader`]: Cache first, backend on miss, write-back on fetch
//!
//! ```text
//!   load(name) ──► cache.get ──hit──► Module
//!                      │
//!                     miss
//!                      ▼
//!                backend.fetch ──► cache.set ──► Module
//! ```

pub mod backend;
pub mod cache;
pub mod loader;
pub mod module;
pub mod retry;

pub use backend::{FilesystemBackend, ModuleBackend, ObjectStoreBackend};
pub use cache::{InMemoryCache, KeyValueCache, RedisCache};
pub use loader::{LoaderOptions, LoaderStats, LoaderStatsSnapshot, ModuleLoader};
pub use module::{Module, validate_module_name};
pub use retry::RetryPolicy;
