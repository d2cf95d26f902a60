//! Per-invocation execution context and store management.
//!
//! This module provides:
//! - [`WorkerContext`]: Per-invocation state owned by the store
//! - [`CapturedOutput`]: In-memory stdout/stderr of one invocation
//! - [`create_store`]: A store with fuel, epoch deadline and memory limits

use std::time::{Duration, Instant};

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::pipe::MemoryOutputPipe;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use wasmrun_common::{ExecutionConfig, InvocationError};

/// Capacity of the stderr pipe; guest diagnostics beyond this are dropped.
const STDERR_CAPACITY: usize = 64 * 1024;

/// Per-invocation execution context.
///
/// Created for each invocation and destroyed with its store, so nothing a
/// guest does is visible to the next one.
pub struct WorkerContext {
    /// WASI preview1 context (args, env, stdio).
    wasi: WasiP1Ctx,

    /// Resource limits enforced by the store limiter.
    limits: StoreLimits,

    /// Unique invocation identifier for tracing.
    pub request_id: String,

    /// Execution start time.
    start_time: Instant,
}

/// Buffers receiving a guest's standard streams.
///
/// The pipes are shared with the WASI context, so their contents are
/// complete once the entry point has returned.
///
/// The stdout pipe holds one byte more than the configured limit so that a
/// module writing exactly `limit` bytes is told apart from one writing past
/// it.
#[derive(Clone)]
pub struct CapturedOutput {
    stdout: MemoryOutputPipe,
    stderr: MemoryOutputPipe,
    stdout_limit: usize,
}

impl CapturedOutput {
    fn new(stdout_limit: usize) -> Self {
        Self {
            stdout: MemoryOutputPipe::new(stdout_limit.saturating_add(1)),
            stderr: MemoryOutputPipe::new(STDERR_CAPACITY),
            stdout_limit,
        }
    }

    /// Returns the stdout limit if the guest wrote past it.
    pub fn stdout_overflow(&self) -> Option<usize> {
        (self.stdout.contents().len() > self.stdout_limit).then_some(self.stdout_limit)
    }

    /// Everything the guest wrote to fd 1.
    pub fn stdout(&self) -> Vec<u8> {
        self.stdout.contents().to_vec()
    }

    /// Everything the guest wrote to fd 2.
    pub fn stderr(&self) -> Vec<u8> {
        self.stderr.contents().to_vec()
    }
}

impl WorkerContext {
    /// Build the context for one invocation.
    ///
    /// The guest sees `program` as `argv[0]`, exactly one environment
    /// variable (`config.payload_env_var` = `payload`), an empty stdin, and
    /// stdout/stderr redirected into the returned [`CapturedOutput`].
    pub fn for_invocation(
        request_id: String,
        program: &str,
        payload: &str,
        config: &ExecutionConfig,
    ) -> (Self, CapturedOutput) {
        let output = CapturedOutput::new(config.max_output_bytes);

        let wasi = WasiCtxBuilder::new()
            .stdout(output.stdout.clone())
            .stderr(output.stderr.clone())
            .arg(program)
            .env(&config.payload_env_var, payload)
            .build_p1();

        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_bytes())
            .build();

        let context = Self {
            wasi,
            limits,
            request_id,
            start_time: Instant::now(),
        };

        (context, output)
    }

    /// Accessor handed to the WASI linker.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Get elapsed time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Create a new Wasmtime store for one invocation.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    context: WorkerContext,
) -> Result<Store<WorkerContext>, InvocationError> {
    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);

    // The engine always meters; an unmetered store just never runs dry
    let fuel = if config.fuel_metering {
        config.max_fuel
    } else {
        u64::MAX
    };
    store.set_fuel(fuel).map_err(|e| InvocationError::Setup {
        reason: format!("Failed to set fuel: {e}"),
    })?;

    if engine.config().epoch_interruption {
        store.set_epoch_deadline(deadline_ticks(config.timeout_ms, engine.config().epoch_tick_ms));
    }

    Ok(store)
}

/// Convert a timeout into whole epoch ticks, never less than one.
fn deadline_ticks(timeout_ms: u64, tick_ms: u64) -> u64 {
    (timeout_ms / tick_ms.max(1)).max(1)
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<WorkerContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<WorkerContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}
