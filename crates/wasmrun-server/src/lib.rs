//! HTTP server for wasmrun.
//!
//! This crate provides the HTTP interface for running WebAssembly modules
//! on demand. It handles:
//!
//! - Request routing and body parsing
//! - Module resolution through the loader
//! - Module invocation and result encoding
//! - Health and readiness checks
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use wasmrun_server::{AppState, WasmrunServer};
//!
//! let state = AppState::new(Arc::new(loader), Arc::new(invoker));
//! WasmrunServer::new(state, config.server.clone()).run().await?;
//! ```

pub mod handler;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod state;

pub use request::{InvokeRequest, InvokeResponse};
pub use response::ApiResponse;
pub use router::build_router;
pub use server::{TestHandle, WasmrunServer};
pub use state::AppState;
