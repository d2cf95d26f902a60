//! Wasmtime execution layer for wasmrun.
//!
//! This crate turns module bytes into stdout:
//! - [`WasmEngine`]: Shared Wasmtime engine and WASI preview1 linker
//! - [`EpochTicker`]: Background thread driving timeouts
//! - [`WorkerContext`]: Per-invocation store state
//! - [`ModuleCompiler`]: Compiled-module memo
//! - [`ModuleInvoker`]: Runs a module's entry point with a payload
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared across all requests, thread-safe)              │
//! │  - Linker with WASI preview1                            │
//! │  - Fuel metering, epoch interruption                    │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ModuleCompiler                        │
//! │  (Memoised by content hash)                             │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Store<WorkerContext> + Instance              │
//! │  (Per-invocation, isolated)                             │
//! │  - Payload environment variable                         │
//! │  - Captured stdout/stderr                               │
//! │  - Fuel, deadline and memory limits                     │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod invoker;
pub mod module;
pub mod store;

pub use engine::{EpochTicker, WasmEngine};
pub use invoker::ModuleInvoker;
pub use module::ModuleCompiler;
pub use store::{CapturedOutput, WorkerContext};
