//! Shared application state.
//!
//! This module provides [`AppState`], which holds shared resources
//! across all HTTP request handlers.

use std::sync::Arc;

use wasmrun_core::ModuleInvoker;
use wasmrun_loader::ModuleLoader;

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
/// Both components are built once at startup.
#[derive(Clone)]
pub struct AppState {
    /// Cache-aside module resolution.
    loader: Arc<ModuleLoader>,

    /// Module execution on the shared engine.
    invoker: Arc<ModuleInvoker>,
}

impl AppState {
    /// Create application state from its components.
    pub fn new(loader: Arc<ModuleLoader>, invoker: Arc<ModuleInvoker>) -> Self {
        Self { loader, invoker }
    }

    /// Get the module loader.
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Get the module invoker.
    pub fn invoker(&self) -> &ModuleInvoker {
        &self.invoker
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("loader", &self.loader)
            .field("invoker", &self.invoker)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;

    use super::*;
    use wasmrun_common::{EngineConfig, ExecutionConfig};
    use wasmrun_core::WasmEngine;
    use wasmrun_loader::{FilesystemBackend, InMemoryCache, LoaderOptions, ModuleBackend};

    /// State over an in-memory cache and a module directory.
    pub(crate) fn state_for(dir: &Path) -> AppState {
        let loader = ModuleLoader::new(
            Arc::new(InMemoryCache::new()),
            ModuleBackend::Filesystem(FilesystemBackend::new(dir)),
            LoaderOptions::default(),
        );
        let engine = Arc::new(WasmEngine::new(&EngineConfig::default()).unwrap());
        let invoker = ModuleInvoker::new(engine, ExecutionConfig::default());

        AppState::new(Arc::new(loader), Arc::new(invoker))
    }

    #[test]
    fn test_app_state_creation() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path());

        assert_eq!(state.loader().stats().backend_fetches, 0);
        assert_eq!(state.invoker().compiled_count(), 0);
        assert!(format!("{state:?}").contains("AppState"));
    }
}
