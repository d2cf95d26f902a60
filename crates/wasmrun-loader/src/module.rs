//! Named module bytes.

use wasmrun_common::LoadError;

/// A named unit of WebAssembly bytecode, as retrieved from the cache or a
/// backend.
#[derive(Clone, PartialEq, Eq)]
pub struct Module {
    name: String,
    bytes: Vec<u8>,
}

impl Module {
    /// Create a module from its name and raw bytes.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// The module name, without extension.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw module bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the module, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the module has no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Reject names that cannot be mapped safely onto `<name>.wasm`.
///
/// A valid name is non-empty and contains no path separator, no `..`, and
/// no NUL byte.
///
/// # Errors
///
/// Returns [`LoadError::InvalidName`] for any other name.
pub fn validate_module_name(name: &str) -> Result<(), LoadError> {
    let invalid =
        name.is_empty() || name.contains(['/', '\\', '\0']) || name.contains("..");

    if invalid {
        return Err(LoadError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}
