//! Memoization of pipeline stage outputs.
//!
//! [`CacheManager`] serializes each artifact as JSON into a [`CacheStore`].
//! Staleness is controlled only by the caller's refresh flag; there is no
//! time-based expiry. An artifact that cannot be read or decoded counts as a
//! miss and is rebuilt.

mod store;

pub use store::{CacheStore, FileStore, MemoryStore};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Wraps a [`CacheStore`] with build-on-miss semantics.
#[derive(Debug)]
pub struct CacheManager<S> {
    store: S,
}

impl<S: CacheStore> CacheManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the cached artifact under `key`, or builds, persists and
    /// returns it.
    ///
    /// The builder runs when `refresh` is set, when nothing is cached, or when
    /// the cached artifact is unusable. A builder error is returned as is and
    /// nothing is written.
    pub fn get_or_build<T, F>(&self, key: &str, refresh: bool, builder: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if !refresh {
            match self.lookup(key) {
                Ok(Some(value)) => {
                    debug!(key, "cache HIT");
                    return Ok(value);
                }
                Ok(None) => debug!(key, "cache MISS"),
                Err(err) => warn!(error = %err, "treating unusable cache artifact as a miss"),
            }
        } else {
            debug!(key, "cache refresh requested");
        }

        let value = builder()?;
        let bytes = serde_json::to_vec(&value)?;
        self.store.persist(key, &bytes)?;
        debug!(key, bytes = bytes.len(), "cache PUT");
        Ok(value)
    }

    /// Decodes the artifact under `key`. Read and decode failures surface as
    /// [`PipelineError::Cache`].
    pub fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let cache_error = |message: String| PipelineError::Cache {
            key: key.to_string(),
            message,
        };
        let Some(bytes) = self.store.load(key).map_err(|err| cache_error(err.to_string()))? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| cache_error(err.to_string()))
    }
}
