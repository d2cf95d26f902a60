//! Cache-aside module resolution.
//!
//! [`ModuleLoader::load`] consults the cache first and falls back to the
//! backend on a miss, writing fetched bytes back so the next lookup hits.
//! A cache read failure is treated as a miss; a cache write failure fails
//! the load.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::backend::{MODULE_EXTENSION, ModuleBackend};
use crate::cache::KeyValueCache;
use crate::module::{Module, validate_module_name};
use wasmrun_common::{LoadError, LoaderConfig, PreloadError};

/// Loader behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderOptions {
    /// Allow at most one in-flight backend fetch per module name.
    pub coalesce_fetches: bool,

    /// Deadline for a whole load.
    pub fetch_timeout: Option<Duration>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            coalesce_fetches: true,
            fetch_timeout: None,
        }
    }
}

impl From<&LoaderConfig> for LoaderOptions {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            coalesce_fetches: config.coalesce_fetches,
            fetch_timeout: config.fetch_timeout(),
        }
    }
}

/// Monotonic loader counters.
#[derive(Debug, Default)]
pub struct LoaderStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_errors: AtomicU64,
    backend_fetches: AtomicU64,
    cache_writes: AtomicU64,
}

/// Point-in-time copy of [`LoaderStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoaderStatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_errors: u64,
    pub backend_fetches: u64,
    pub cache_writes: u64,
}

impl LoaderStats {
    /// Read every counter.
    pub fn snapshot(&self) -> LoaderStatsSnapshot {
        LoaderStatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            backend_fetches: self.backend_fetches.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

type FetchSlots = DashMap<String, Arc<Mutex<()>>>;

/// Resolves module names to bytes through a cache and a backend.
///
/// # Thread Safety
///
/// `ModuleLoader` is `Send + Sync`; share it behind an `Arc`.
pub struct ModuleLoader {
    cache: Arc<dyn KeyValueCache>,
    backend: ModuleBackend,
    in_flight: Option<FetchSlots>,
    fetch_timeout: Option<Duration>,
    stats: LoaderStats,
}

impl ModuleLoader {
    /// Create a loader over `cache` and `backend`.
    pub fn new(
        cache: Arc<dyn KeyValueCache>,
        backend: ModuleBackend,
        options: LoaderOptions,
    ) -> Self {
        Self {
            cache,
            backend,
            in_flight: options.coalesce_fetches.then(DashMap::new),
            fetch_timeout: options.fetch_timeout,
            stats: LoaderStats::default(),
        }
    }

    /// Resolve `name` to its bytes.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::InvalidName`] without touching cache or backend
    /// for unsafe names, [`LoadError::Backend`] if the backend cannot supply
    /// the module, [`LoadError::CacheWrite`] if fetched bytes cannot be
    /// cached, and [`LoadError::Timeout`] if the configured deadline passes.
    #[instrument(skip(self), fields(module = %name))]
    pub async fn load(&self, name: &str) -> Result<Module, LoadError> {
        validate_module_name(name)?;

        match self.fetch_timeout {
            Some(deadline) => tokio::time::timeout(deadline, self.resolve(name))
                .await
                .map_err(|_| {
                    warn!(timeout_ms = deadline.as_millis(), "Module load timed out");
                    LoadError::Timeout {
                        name: name.to_string(),
                        timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    }
                })?,
            None => self.resolve(name).await,
        }
    }

    async fn resolve(&self, name: &str) -> Result<Module, LoadError> {
        if let Some(bytes) = self.lookup(name).await {
            return Ok(Module::new(name, bytes));
        }

        let Some(slots) = &self.in_flight else {
            return self.fetch_and_store(name).await;
        };

        let slot = FetchSlot::acquire(slots, name);
        let _guard = slot.lock().await;

        // Another caller may have filled the cache while we waited
        if let Some(bytes) = self.lookup(name).await {
            return Ok(Module::new(name, bytes));
        }
        self.fetch_and_store(name).await
    }

    async fn lookup(&self, name: &str) -> Option<Vec<u8>> {
        match self.cache.get(name).await {
            Ok(Some(bytes)) => {
                LoaderStats::bump(&self.stats.cache_hits);
                debug!(bytes_len = bytes.len(), "Cache hit");
                Some(bytes)
            }
            Ok(None) => {
                LoaderStats::bump(&self.stats.cache_misses);
                debug!("Cache miss");
                None
            }
            Err(e) => {
                LoaderStats::bump(&self.stats.cache_errors);
                warn!(error = %e, "Cache read failed, falling back to backend");
                None
            }
        }
    }

    async fn fetch_and_store(&self, name: &str) -> Result<Module, LoadError> {
        LoaderStats::bump(&self.stats.backend_fetches);

        let bytes = self
            .backend
            .fetch(name)
            .await
            .map_err(|source| LoadError::Backend {
                name: name.to_string(),
                source,
            })?;

        self.cache
            .set(name, &bytes)
            .await
            .map_err(|source| LoadError::CacheWrite {
                name: name.to_string(),
                source,
            })?;
        LoaderStats::bump(&self.stats.cache_writes);

        info!(bytes_len = bytes.len(), "Module fetched from backend and cached");
        Ok(Module::new(name, bytes))
    }

    /// Load every `*.wasm` regular file in `directory`, in name order.
    ///
    /// Returns the number of modules loaded. Subdirectories and files with
    /// other extensions are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PreloadError::ReadDir`] if the directory cannot be listed
    /// and [`PreloadError::Load`] for the first module that fails to load.
    #[instrument(skip(self), fields(directory = %directory.display()))]
    pub async fn preload(&self, directory: &Path) -> Result<usize, PreloadError> {
        let read_dir_error = |source| PreloadError::ReadDir {
            path: directory.to_path_buf(),
            source,
        };

        let mut entries = tokio::fs::read_dir(directory)
            .await
            .map_err(read_dir_error)?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_dir_error)? {
            let path = entry.path();
            if path.extension() != Some(OsStr::new(MODULE_EXTENSION)) {
                continue;
            }
            // Follows symlinks
            let is_file = tokio::fs::metadata(&path)
                .await
                .map_err(read_dir_error)?
                .is_file();
            if !is_file {
                continue;
            }
            match path.file_stem().and_then(OsStr::to_str) {
                Some(stem) => names.push(stem.to_string()),
                None => warn!(path = %path.display(), "Skipping non UTF-8 module file name"),
            }
        }
        names.sort_unstable();

        for name in &names {
            self.load(name)
                .await
                .map_err(|source| PreloadError::Load {
                    name: name.clone(),
                    source,
                })?;
        }

        info!(count = names.len(), "Preloaded modules");
        Ok(names.len())
    }

    /// Loader counters.
    pub fn stats(&self) -> LoaderStatsSnapshot {
        self.stats.snapshot()
    }

    /// The backend modules are fetched from.
    pub fn backend(&self) -> &ModuleBackend {
        &self.backend
    }

    /// Number of names with a fetch slot currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.as_ref().map_or(0, DashMap::len)
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("backend", &self.backend)
            .field("coalesce_fetches", &self.in_flight.is_some())
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

/// A shared per-name fetch lock.
///
/// The map entry is removed when the last holder drops its slot, including
/// when a load is cancelled by its deadline.
struct FetchSlot<'a> {
    slots: &'a FetchSlots,
    name: &'a str,
    lock: Option<Arc<Mutex<()>>>,
}

impl<'a> FetchSlot<'a> {
    fn acquire(slots: &'a FetchSlots, name: &'a str) -> Self {
        let lock = Arc::clone(slots.entry(name.to_string()).or_default().value());
        Self {
            slots,
            name,
            lock: Some(lock),
        }
    }

    async fn lock(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        match &self.lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }
}

impl Drop for FetchSlot<'_> {
    fn drop(&mut self) {
        drop(self.lock.take());
        self.slots
            .remove_if(self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}
