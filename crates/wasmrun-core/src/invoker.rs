//! Module invocation.
//!
//! [`ModuleInvoker`] runs one module to completion:
//!
//! 1. Compile (or reuse) the module
//! 2. Build a fresh WASI context carrying the payload
//! 3. Instantiate against the shared linker in a fresh store
//! 4. Call the entry point and collect stdout, failing if it overflowed

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use wasmtime::Trap;
use wasmtime_wasi::I32Exit;

use crate::module::ModuleCompiler;
use crate::store::{WorkerContext, calculate_fuel_consumed, create_store, get_remaining_fuel};
use crate::WasmEngine;
use wasmrun_common::{ExecutionConfig, InvocationError};

/// `argv[0]` for modules invoked without a name.
const DEFAULT_PROGRAM_NAME: &str = "module";

/// Runs modules against a shared engine.
///
/// # Thread Safety
///
/// `ModuleInvoker` is `Send + Sync` and meant to be shared behind an `Arc`.
/// Every call creates its own [`wasmtime::Store`], so concurrent invocations
/// never observe each other.
pub struct ModuleInvoker {
    engine: Arc<WasmEngine>,
    compiler: ModuleCompiler,
    config: ExecutionConfig,
}

impl ModuleInvoker {
    /// Create an invoker with the given execution limits.
    pub fn new(engine: Arc<WasmEngine>, config: ExecutionConfig) -> Self {
        let compiler = ModuleCompiler::new(
            engine.inner().clone(),
            engine.config().cache_compiled_modules,
        );

        Self {
            engine,
            compiler,
            config,
        }
    }

    /// Run `bytes` with `payload` in the payload environment variable and
    /// return everything the module wrote to stdout.
    ///
    /// # Errors
    ///
    /// See [`InvocationError`]. No partial output is returned on failure.
    pub async fn invoke(&self, bytes: &[u8], payload: &str) -> Result<Vec<u8>, InvocationError> {
        self.invoke_named(DEFAULT_PROGRAM_NAME, bytes, payload).await
    }

    /// Like [`ModuleInvoker::invoke`], passing `name` as `argv[0]`.
    #[instrument(
        skip(self, bytes, payload),
        fields(module = %name, request_id = tracing::field::Empty)
    )]
    pub async fn invoke_named(
        &self,
        name: &str,
        bytes: &[u8],
        payload: &str,
    ) -> Result<Vec<u8>, InvocationError> {
        let request_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("request_id", request_id.as_str());

        let module = self.compiler.compile(bytes)?;

        let (context, output) =
            WorkerContext::for_invocation(request_id, name, payload, &self.config);
        let mut store = create_store(&self.engine, &self.config, context)?;
        let initial_fuel = get_remaining_fuel(&store).unwrap_or(0);

        debug!("Instantiating module");

        let instance = self
            .engine
            .linker()
            .instantiate_async(&mut store, &module)
            .await
            .map_err(|e| InvocationError::Instantiation {
                reason: format!("{e:#}"),
            })?;

        let entry_point = self.config.entry_point.as_str();
        let func = instance
            .get_typed_func::<(), ()>(&mut store, entry_point)
            .map_err(|_| InvocationError::MissingEntryPoint {
                entry_point: entry_point.to_string(),
            })?;

        let result = func.call_async(&mut store, ()).await;
        let duration = store.data().elapsed();
        let fuel_consumed = calculate_fuel_consumed(initial_fuel, &store);

        let stderr = output.stderr();
        if !stderr.is_empty() {
            debug!(stderr = %String::from_utf8_lossy(&stderr), "Module stderr");
        }

        // Overflow takes precedence over however the guest reacted to it
        let result = match output.stdout_overflow() {
            Some(limit) => Err(InvocationError::OutputLimit { limit }),
            None => result.map_err(|e| self.classify(&e)),
        };

        match result {
            Ok(()) | Err(InvocationError::Exit { code: 0 }) => {
                info!(
                    duration_ms = duration.as_millis(),
                    fuel_consumed,
                    "Invocation completed"
                );
                Ok(output.stdout())
            }
            Err(err) if err.is_resource_limit() => {
                warn!(
                    duration_ms = duration.as_millis(),
                    fuel_consumed,
                    error = %err,
                    "Invocation terminated"
                );
                Err(err)
            }
            Err(err) => {
                error!(
                    duration_ms = duration.as_millis(),
                    fuel_consumed,
                    error = %err,
                    "Invocation failed"
                );
                Err(err)
            }
        }
    }

    /// Map an entry point failure onto the error taxonomy.
    fn classify(&self, error: &wasmtime::Error) -> InvocationError {
        if let Some(exit) = error.downcast_ref::<I32Exit>() {
            return InvocationError::Exit { code: exit.0 };
        }

        match error.downcast_ref::<Trap>() {
            Some(Trap::OutOfFuel) => InvocationError::FuelExhausted,
            Some(Trap::Interrupt) => InvocationError::Timeout {
                duration_ms: self.config.timeout_ms,
            },
            Some(trap) => InvocationError::trap(format!("{error:#}"), Some(format!("{trap:?}"))),
            None => InvocationError::trap(format!("{error:#}"), None),
        }
    }

    /// Get the engine this invoker runs on.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Get the execution limits.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Number of memoised compiled modules.
    pub fn compiled_count(&self) -> usize {
        self.compiler.cached_count()
    }
}

impl std::fmt::Debug for ModuleInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInvoker")
            .field("engine", &self.engine)
            .field("entry_point", &self.config.entry_point)
            .field("compiled_count", &self.compiled_count())
            .finish_non_exhaustive()
    }
}
