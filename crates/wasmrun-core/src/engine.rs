//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the foundation of the runtime. It is:
//! - Created once at startup and shared across all invocations
//! - Paired with a [`Linker`] that exposes WASI preview1 to guests
//! - Set up with fuel metering and epoch interruption for resource limiting
//!
//! Instantiation from a shared `Engine`, `Linker` and `Module` is safe under
//! concurrent calls; every invocation gets its own `Store`, so no lock sits
//! on the execution path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};
use wasmtime::{Config, Engine, InstanceAllocationStrategy, Linker, PoolingAllocationConfig};

use crate::store::WorkerContext;
use wasmrun_common::{ConfigError, EngineConfig};

/// Thread-safe WebAssembly engine wrapper.
///
/// This struct wraps a Wasmtime [`Engine`] together with the linker every
/// module is instantiated against. The linker carries the minimal capability
/// layer: clocks, args, environment, and file descriptors 0/1/2. No
/// directories are preopened and no sockets are granted.
///
/// # Example
///
/// ```ignore
/// use wasmrun_common::EngineConfig;
/// use wasmrun_core::WasmEngine;
///
/// let config = EngineConfig::default();
/// let engine = WasmEngine::new(&config)?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Engine,
    linker: Arc<Linker<WorkerContext>>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The Wasmtime configuration is invalid
    /// - The pooling allocator cannot be initialized
    /// - WASI cannot be registered on the linker
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        let mut wasmtime_config = Config::new();

        // WASI preview1 host calls are async
        wasmtime_config.async_support(true);

        // Stores without metering get u64::MAX fuel
        wasmtime_config.consume_fuel(true);

        if config.epoch_interruption {
            wasmtime_config.epoch_interruption(true);
        }

        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            ConfigError::invalid("runtime.engine", format!("Failed to create Wasmtime engine: {e}"))
        })?;

        let mut linker = Linker::new(&engine);
        wasmtime_wasi::preview1::add_to_linker_async(&mut linker, WorkerContext::wasi_mut)
            .map_err(|e| {
                ConfigError::invalid("runtime.engine", format!("Failed to register WASI: {e}"))
            })?;

        info!(
            epoch_interruption = config.epoch_interruption,
            cache_compiled_modules = config.cache_compiled_modules,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine,
            linker: Arc::new(linker),
            config: config.clone(),
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the shared linker with WASI registered.
    pub fn linker(&self) -> &Linker<WorkerContext> {
        &self.linker
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a background thread that advances the epoch every
    /// `epoch_tick_ms`.
    ///
    /// Returns `None` when epoch interruption is disabled. The thread stops
    /// when the returned [`EpochTicker`] is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start_epoch_ticker(&self) -> std::io::Result<Option<EpochTicker>> {
        if !self.config.epoch_interruption {
            return Ok(None);
        }
        EpochTicker::spawn(self.engine.clone(), self.config.epoch_tick()).map(Some)
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("epoch_interruption", &self.config.epoch_interruption)
            .field("cache_compiled_modules", &self.config.cache_compiled_modules)
            .finish_non_exhaustive()
    }
}

/// Background epoch driver.
///
/// A plain OS thread rather than a tokio task: guest code that never yields
/// would otherwise starve the ticker on the same worker.
pub struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn spawn(engine: Engine, interval: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = std::thread::Builder::new()
            .name("wasmrun-epoch".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    engine.increment_epoch();
                }
            })?;

        debug!(interval_ms = interval.as_millis(), "Epoch ticker started");

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        debug!("Epoch ticker stopped");
    }
}

impl std::fmt::Debug for EpochTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochTicker")
            .field("running", &!self.stop.load(Ordering::Relaxed))
            .finish()
    }
}
