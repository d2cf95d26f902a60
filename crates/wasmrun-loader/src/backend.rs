//! Durable sources of module bytes.
//!
//! A module named `<name>` lives at `<name>.wasm`, either in a local
//! directory or as an object in an S3-compatible bucket.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use tracing::{debug, info, instrument};

use wasmrun_common::{BackendConfig, BackendError, ConfigError, ObjectStoreConfig};

/// File extension of module files and objects.
pub const MODULE_EXTENSION: &str = "wasm";

/// The active module backend.
#[derive(Debug, Clone)]
pub enum ModuleBackend {
    /// Local directory of `<name>.wasm` files.
    Filesystem(FilesystemBackend),
    /// Bucket of `<name>.wasm` objects.
    ObjectStore(ObjectStoreBackend),
}

impl ModuleBackend {
    /// Build the backend selected by validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the object store client rejects the settings.
    pub fn from_config(config: &BackendConfig) -> Result<Self, ConfigError> {
        let backend = match config {
            BackendConfig::Filesystem { directory } => {
                Self::Filesystem(FilesystemBackend::new(directory))
            }
            BackendConfig::ObjectStore(store) => {
                Self::ObjectStore(ObjectStoreBackend::from_config(store)?)
            }
        };

        info!(backend = %backend.describe(), "Module backend configured");
        Ok(backend)
    }

    /// Fetch the bytes of module `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] if there is no such module and
    /// [`BackendError::Io`] for any other failure.
    pub async fn fetch(&self, name: &str) -> Result<Vec<u8>, BackendError> {
        match self {
            Self::Filesystem(fs) => fs.fetch(name).await,
            Self::ObjectStore(store) => store.fetch(name).await,
        }
    }

    /// Short human-readable description for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Filesystem(fs) => format!("fs:{}", fs.directory.display()),
            Self::ObjectStore(store) => format!("objectstore:{}", store.bucket),
        }
    }
}

/// Reads `<directory>/<name>.wasm`.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    directory: PathBuf,
}

impl FilesystemBackend {
    /// Create a backend rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// The backend root.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[instrument(skip(self), fields(backend = "fs"))]
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, BackendError> {
        let path = self.directory.join(format!("{name}.{MODULE_EXTENSION}"));
        let location = path.display().to_string();

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(location = %location, bytes_len = bytes.len(), "Read module file");
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackendError::NotFound { location })
            }
            Err(e) => Err(BackendError::Io {
                location,
                reason: e.to_string(),
            }),
        }
    }
}

/// Gets object `<name>.wasm` from a bucket.
#[derive(Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStoreBackend {
    /// Build an S3 client from static credentials.
    ///
    /// Path-style requests are used so that self-hosted endpoints work
    /// without bucket DNS names. Plain HTTP is allowed only for `http://`
    /// endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is empty or the client cannot
    /// be built.
    pub fn from_config(config: &ObjectStoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let store = s3_builder(config)
            .build()
            .map_err(|e| ConfigError::invalid("loader.minio_config", e.to_string()))?;

        Ok(Self::new(Arc::new(store), config.bucket_name.clone()))
    }

    /// Wrap an existing store, e.g. `object_store::memory::InMemory`.
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// The bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self), fields(backend = "objectstore", bucket = %self.bucket))]
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, BackendError> {
        let key = ObjectPath::from(format!("{name}.{MODULE_EXTENSION}"));
        let location = format!("{}/{key}", self.bucket);

        let object = self.store.get(&key).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => BackendError::NotFound {
                location: location.clone(),
            },
            other => BackendError::Io {
                location: location.clone(),
                reason: other.to_string(),
            },
        })?;

        let bytes = object.bytes().await.map_err(|e| BackendError::Io {
            location: location.clone(),
            reason: e.to_string(),
        })?;

        debug!(location = %location, bytes_len = bytes.len(), "Read module object");
        Ok(bytes.to_vec())
    }
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("bucket", &self.bucket)
            .field("store", &self.store.to_string())
            .finish()
    }
}

fn s3_builder(config: &ObjectStoreConfig) -> AmazonS3Builder {
    let endpoint = config.endpoint_url();
    AmazonS3Builder::new()
        .with_endpoint(&endpoint)
        .with_allow_http(endpoint.starts_with("http://"))
        .with_virtual_hosted_style_request(false)
        .with_region(&config.region)
        .with_bucket_name(&config.bucket_name)
        .with_access_key_id(&config.access_key)
        .with_secret_access_key(&config.secret_key)
}
