//! Layered configuration loading.
//!
//! Sources are merged in order, later ones winning:
//! 1. Serde defaults
//! 2. An optional configuration file (YAML, TOML, or JSON by extension)
//! 3. Environment variables prefixed `WASMRUN__`, nested with `__`
//!
//! # Example
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 8080
//! cache:
//!   address: localhost:6379
//! loader:
//!   module_loader: fs
//!   module_directory: ./wasm_modules
//! ```
//!
//! The same cache address from the environment:
//! `WASMRUN__CACHE__ADDRESS=redis:6379`.
//!
//! Environment values are kept as strings and converted only when the target
//! field is numeric or boolean, so a password like `007` stays `007`.

use std::path::Path;

use config::{Config, Environment, File, FileFormat, Map};
use tracing::debug;

use crate::{AppConfig, ConfigError};

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "WASMRUN";

/// Separator between the prefix and nested keys.
pub const ENV_SEPARATOR: &str = "__";

impl AppConfig {
    /// Load configuration from an optional file plus the process environment,
    /// then validate it.
    ///
    /// A missing file is not an error; the environment alone may carry every
    /// required field.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// merged configuration fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`AppConfig::load`], reading overrides from `env` instead of the
    /// process environment when it is `Some`.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path.filter(|p| p.exists()) {
            let format = file_format(path)?;
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from_str(&content, format));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .source(env),
        );

        let config: AppConfig = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ConfigError::Parse {
                message: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a string in the given format.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or fails validation.
    pub fn from_str_format(content: &str, format: FileFormat) -> Result<Self, ConfigError> {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(content, format))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ConfigError::Parse {
                message: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }
}

/// Pick a parser from the file extension.
fn file_format(path: &Path) -> Result<FileFormat, ConfigError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => Ok(FileFormat::Yaml),
        Some("toml") => Ok(FileFormat::Toml),
        Some("json") => Ok(FileFormat::Json),
        other => Err(ConfigError::Parse {
            message: format!(
                "unsupported config file extension {:?} for {}",
                other.unwrap_or(""),
                path.display()
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;
    use crate::{BackendConfig, LoaderKind};

    fn env(pairs: &[(&str, &str)]) -> Option<Map<String, String>> {
        let mut map = Map::new();
        for (k, v) in pairs {
            map.insert((*k).to_string(), (*v).to_string());
        }
        Some(map)
    }

    fn write_config(name: &str, content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r"
server:
  host: 0.0.0.0
  port: 9000
cache:
  address: localhost:6379
  password: secret
  db: 2
loader:
  module_loader: fs
  module_directory: ./wasm_modules
";
        let config = AppConfig::from_str_format(yaml, FileFormat::Yaml).unwrap();

        assert_eq!(config.server.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.cache.password.as_deref(), Some("secret"));
        assert_eq!(config.cache.db, 2);
        assert_eq!(config.loader.module_loader, Some(LoaderKind::Fs));
        // Defaults applied
        assert_eq!(config.server.request_timeout_secs, 30);
    }

    #[test]
    fn test_parse_toml_objectstore_config() {
        let toml = r#"
            [cache]
            address = "redis:6379"

            [loader]
            module_loader = "objectstore"

            [loader.minio_config]
            endpoint = "minio:9000"
            access_key = "access"
            secret_key = "secret"
            bucket_name = "modules"
        "#;
        let config = AppConfig::from_str_format(toml, FileFormat::Toml).unwrap();

        let BackendConfig::ObjectStore(store) = config.loader.backend_config().unwrap() else {
            panic!("expected object store backend");
        };
        assert_eq!(store.bucket_name, "modules");
        assert_eq!(store.region, "us-east-1");
    }

    #[test]
    fn test_unknown_loader_kind_rejected() {
        let yaml = "cache:\n  address: localhost:6379\nloader:\n  module_loader: ftp\n";
        let err = AppConfig::from_str_format(yaml, FileFormat::Yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides_file() {
        let (_dir, path) = write_config(
            "config.yaml",
            "cache:\n  address: localhost:6379\nloader:\n  module_loader: fs\n  module_directory: ./a\n",
        );

        let config = AppConfig::load_with_env(
            Some(&path),
            env(&[
                ("WASMRUN__CACHE__ADDRESS", "redis:6380"),
                ("WASMRUN__SERVER__PORT", "9090"),
            ]),
        )
        .unwrap();

        assert_eq!(config.cache.address, "redis:6380");
        assert_eq!(config.server.port, 9090);
        assert_eq!(
            config.loader.module_directory.as_deref(),
            Some(Path::new("./a"))
        );
    }

    #[test]
    fn test_env_only_configuration() {
        let config = AppConfig::load_with_env(
            Some(Path::new("/nonexistent/config.yaml")),
            env(&[
                ("WASMRUN__CACHE__ADDRESS", "localhost:6379"),
                ("WASMRUN__LOADER__MODULE_LOADER", "objectstore"),
                ("WASMRUN__LOADER__MINIO_CONFIG__ENDPOINT", "minio:9000"),
                ("WASMRUN__LOADER__MINIO_CONFIG__ACCESS_KEY", "ak"),
                ("WASMRUN__LOADER__MINIO_CONFIG__SECRET_KEY", "sk"),
                ("WASMRUN__LOADER__MINIO_CONFIG__BUCKET_NAME", "modules"),
            ]),
        )
        .unwrap();

        assert!(matches!(
            config.loader.backend_config().unwrap(),
            BackendConfig::ObjectStore(_)
        ));
    }

    #[test]
    fn test_env_strings_are_not_reinterpreted() {
        let config = AppConfig::load_with_env(
            None,
            env(&[
                ("WASMRUN__CACHE__ADDRESS", "localhost:6379"),
                ("WASMRUN__CACHE__PASSWORD", "007"),
                ("WASMRUN__SERVER__PORT", "9090"),
                ("WASMRUN__SERVER__GRACEFUL_SHUTDOWN", "false"),
                ("WASMRUN__LOADER__MODULE_LOADER", "objectstore"),
                ("WASMRUN__LOADER__MINIO_CONFIG__ENDPOINT", "minio:9000"),
                ("WASMRUN__LOADER__MINIO_CONFIG__ACCESS_KEY", "0012345"),
                ("WASMRUN__LOADER__MINIO_CONFIG__SECRET_KEY", "1e3"),
                ("WASMRUN__LOADER__MINIO_CONFIG__BUCKET_NAME", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.cache.password.as_deref(), Some("007"));
        assert_eq!(config.server.port, 9090);
        assert!(!config.server.graceful_shutdown);

        let BackendConfig::ObjectStore(store) = config.loader.backend_config().unwrap() else {
            panic!("expected object store backend");
        };
        assert_eq!(store.access_key, "0012345");
        assert_eq!(store.secret_key, "1e3");
        assert_eq!(store.bucket_name, "true");
    }

    #[test]
    fn test_missing_required_fields_fail() {
        let err = AppConfig::load_with_env(None, env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
    }

    #[test]
    fn test_objectstore_with_empty_secret_fails_validation() {
        let err = AppConfig::load_with_env(
            None,
            env(&[
                ("WASMRUN__CACHE__ADDRESS", "localhost:6379"),
                ("WASMRUN__LOADER__MODULE_LOADER", "objectstore"),
                ("WASMRUN__LOADER__MINIO_CONFIG__ENDPOINT", "minio:9000"),
                ("WASMRUN__LOADER__MINIO_CONFIG__ACCESS_KEY", "ak"),
                ("WASMRUN__LOADER__MINIO_CONFIG__BUCKET_NAME", "modules"),
            ]),
        )
        .unwrap_err();

        assert!(
            matches!(&err, ConfigError::Missing { field } if field == "loader.minio_config.secret_key"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_unsupported_extension() {
        let (_dir, path) = write_config("config.ini", "x=1");
        let err = AppConfig::load_with_env(Some(&path), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = AppConfig::from_str_format("cache: [unclosed", FileFormat::Yaml);
        assert!(result.is_err());
    }
}
