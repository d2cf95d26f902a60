//! WebAssembly module compilation.
//!
//! [`ModuleCompiler`] turns raw module bytes into a Wasmtime [`Module`].
//! Compilation is the expensive part of an invocation, so when
//! `cache_compiled_modules` is enabled compiled modules are memoised by a
//! content hash of their bytes. The memo never evicts; the module set is
//! expected to be small and slow-changing.
//!
//! Both the binary format and the text format are accepted.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, info, instrument};
use wasmtime::{Engine, Module};

use wasmrun_common::InvocationError;

/// Compiles module bytes, optionally memoising the result.
pub struct ModuleCompiler {
    engine: Engine,
    compiled: Option<DashMap<String, Module>>,
}

impl ModuleCompiler {
    /// Create a compiler for the given engine.
    ///
    /// # Arguments
    ///
    /// * `engine` - The Wasmtime engine modules are compiled for
    /// * `memoize` - Keep compiled modules keyed by content hash
    pub fn new(engine: Engine, memoize: bool) -> Self {
        Self {
            engine,
            compiled: memoize.then(DashMap::new),
        }
    }

    /// Compile `bytes`, reusing an earlier compilation of identical bytes.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError::Compilation`] if the bytes are not a valid
    /// module.
    #[instrument(skip(self, bytes), fields(bytes_len = bytes.len()))]
    pub fn compile(&self, bytes: &[u8]) -> Result<Module, InvocationError> {
        let Some(compiled) = &self.compiled else {
            return self.compile_uncached(bytes);
        };

        let key = content_key(bytes);
        if let Some(module) = compiled.get(&key) {
            debug!(content_key = %key, "Compiled module reused");
            return Ok(module.clone());
        }

        let module = self.compile_uncached(bytes)?;
        compiled.insert(key, module.clone());
        Ok(module)
    }

    fn compile_uncached(&self, bytes: &[u8]) -> Result<Module, InvocationError> {
        let start = Instant::now();

        if bytes.is_empty() {
            return Err(InvocationError::Compilation {
                reason: "empty module".into(),
            });
        }

        let module = Module::new(&self.engine, bytes).map_err(|e| InvocationError::Compilation {
            reason: format!("{e:#}"),
        })?;

        info!(
            content_key = %content_key(bytes),
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Ok(module)
    }

    /// Number of memoised compiled modules.
    pub fn cached_count(&self) -> usize {
        self.compiled.as_ref().map_or(0, DashMap::len)
    }
}

impl std::fmt::Debug for ModuleCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCompiler")
            .field("memoize", &self.compiled.is_some())
            .field("cached_count", &self.cached_count())
            .finish_non_exhaustive()
    }
}

/// Memo key: 64-bit hash of the bytes plus their length.
fn content_key(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}-{}", hasher.finish(), bytes.len())
}
