//! Key-value cache of module bytes.
//!
//! This module provides:
//! - [`KeyValueCache`]: The cache interface the loader is written against
//! - [`RedisCache`]: Redis-protocol cache shared between service instances
//! - [`InMemoryCache`]: Process-local cache for tests and embedding
//!
//! Entries never expire and are never evicted.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::AsyncCommands;
use redis::aio::{ConnectionLike, ConnectionManager};
use tracing::{debug, info, instrument};
use url::Url;

use crate::retry::RetryPolicy;
use wasmrun_common::{CacheConfig, CacheError};

/// Lookup table from module name to module bytes.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Look up `key`. A miss is `Ok(None)`, never an error.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key` without expiry.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;
}

/// Cache backed by a Redis-protocol server.
///
/// Holds a [`ConnectionManager`], which multiplexes requests over one
/// connection and reconnects transparently. Cloning is cheap. Any other
/// cloneable async connection can be wrapped with
/// [`RedisCache::with_connection`].
#[derive(Clone)]
pub struct RedisCache<C = ConnectionManager> {
    connection: C,
    address: String,
}

impl RedisCache {
    /// Connect to the configured server.
    ///
    /// The connection is tested with `PING`, retried per the configured
    /// attempts and backoff.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Connect`] if the URL is malformed or every
    /// attempt fails.
    #[instrument(skip(config), fields(address = %config.address))]
    pub async fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        let policy = RetryPolicy::from(config);
        let connect_error = |attempts, reason: String| CacheError::Connect {
            address: config.address.clone(),
            attempts,
            reason,
        };

        let url = redis_url(config).map_err(|e| connect_error(0, e))?;
        let client = redis::Client::open(url.as_str()).map_err(|e| connect_error(0, e.to_string()))?;

        policy
            .retry("cache connect", |attempt| {
                let client = client.clone();
                async move {
                    debug!(attempt, "Testing cache connection");
                    let mut conn = client.get_multiplexed_async_connection().await?;
                    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
                    Ok::<_, redis::RedisError>(())
                }
            })
            .await
            .map_err(|e| connect_error(policy.attempts(), e.to_string()))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| connect_error(policy.attempts(), e.to_string()))?;

        info!(db = config.db, "Connected to cache");

        Ok(Self::with_connection(connection, config.address.clone()))
    }
}

impl<C> RedisCache<C> {
    /// Wrap an established connection.
    pub fn with_connection(connection: C, address: impl Into<String>) -> Self {
        Self {
            connection,
            address: address.into(),
        }
    }

    /// The configured `host:port`.
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl<C> KeyValueCache for RedisCache<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection.clone();
        conn.get(key)
            .await
            .map_err(|e| CacheError::operation("get", key, e))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| CacheError::operation("set", key, e))
    }
}

impl<C> std::fmt::Debug for RedisCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Build `redis://[:password@]host:port/db` from the cache settings.
///
/// An address that already carries a `redis://` or `rediss://` scheme is
/// used as the base. The password is percent-encoded.
pub fn redis_url(config: &CacheConfig) -> Result<Url, String> {
    let address = config.address.trim();
    let base = if address.contains("://") {
        address.to_string()
    } else {
        format!("redis://{address}")
    };

    let mut url = Url::parse(&base).map_err(|e| format!("invalid cache address '{address}': {e}"))?;

    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        url.set_password(Some(password))
            .map_err(|()| format!("cannot set password on '{address}'"))?;
    }
    url.set_path(&config.db.to_string());

    Ok(url)
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }
}

#[async_trait]
impl KeyValueCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
