//! The production [`Store`] implementation, backed by the `memcache` crate.
//!
//! This module is the single point of contact with the outside memcache
//! cluster. Everything above it — the Bloom Filter, the Lock, the Recency
//! Queue — only ever sees the [`Store`] trait.

use std::fmt;

use memcache::MemcacheError;

use super::Store;
use crate::error::{Error, Result};

/// Default connect and read timeout applied when a caller does not supply
/// their own pre-configured `memcache::Client`.
const DEFAULT_TIMEOUT_SECS: u64 = 1;

/// A [`Store`] backed by a single memcache server (or pooled client) via the
/// `memcache` crate.
pub struct MemcacheStore {
    client: memcache::Client,
    name: String,
}

impl fmt::Debug for MemcacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcacheStore").field("name", &self.name).finish()
    }
}

impl MemcacheStore {
    /// Connect to `url` (e.g. `memcache://127.0.0.1:11211`) with the default
    /// 1-second connect and read timeouts.
    pub fn connect(url: &str) -> Result<Self> {
        let timeout = std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        let mut client = memcache::Client::connect(url).map_err(|e| Error::io(url, "", e))?;
        client
            .set_read_timeout(Some(timeout))
            .map_err(|e| Error::io(url, "", e))?;
        client
            .set_write_timeout(Some(timeout))
            .map_err(|e| Error::io(url, "", e))?;
        Ok(Self { client, name: url.to_string() })
    }

    /// Wrap a caller-supplied, already-configured client. Used when callers
    /// want their own pooling, TLS, or timeout policy.
    pub fn from_client(client: memcache::Client, name: impl Into<String>) -> Self {
        Self { client, name: name.into() }
    }

    fn io_err(&self, key: &str, source: MemcacheError) -> Error {
        Error::io(self.name.clone(), key, source)
    }

    /// Whether a failed `add`/`cas` represents the ordinary "lost the race"
    /// outcome (key already existed / token stale) rather than a genuine
    /// I/O failure. Matched defensively on both the typed command error and
    /// the protocol's status text, since point releases of the underlying
    /// crate have moved this between representations.
    fn is_not_stored(err: &MemcacheError) -> bool {
        let text = err.to_string().to_ascii_uppercase();
        text.contains("NOT_STORED") || text.contains("EXISTS") || text.contains("NOT_FOUND")
    }
}

impl Store for MemcacheStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.client
            .get::<Vec<u8>>(key)
            .map_err(|e| self.io_err(key, e))
    }

    fn gets(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>> {
        let mut results = self
            .client
            .gets::<Vec<u8>>(&[key])
            .map_err(|e| self.io_err(key, e))?;
        Ok(results.remove(key).and_then(|(value, _flags, cas)| {
            cas.map(|cas_token| (value, cas_token))
        }))
    }

    fn set(&self, key: &str, value: &[u8], ttl: u32, noreply: bool) -> Result<()> {
        let result = self.client.set(key, value, ttl);
        if noreply {
            if let Err(e) = result {
                log::debug!("noreply set({key}) on {}: {e}", self.name);
            }
            return Ok(());
        }
        result.map_err(|e| self.io_err(key, e))
    }

    fn add(&self, key: &str, value: &[u8], ttl: u32, noreply: bool) -> Result<bool> {
        match self.client.add(key, value, ttl) {
            Ok(()) => Ok(true),
            Err(e) if Self::is_not_stored(&e) => Ok(false),
            Err(e) => {
                if noreply {
                    log::debug!("noreply add({key}) on {}: {e}", self.name);
                    Ok(false)
                } else {
                    Err(self.io_err(key, e))
                }
            }
        }
    }

    fn cas(&self, key: &str, value: &[u8], ttl: u32, cas_token: u64) -> Result<bool> {
        match self.client.cas(key, value, ttl, cas_token) {
            Ok(stored) => Ok(stored),
            Err(e) if Self::is_not_stored(&e) => Ok(false),
            Err(e) => Err(self.io_err(key, e)),
        }
    }

    fn delete(&self, key: &str, noreply: bool) -> Result<bool> {
        let result = self.client.delete(key);
        if noreply {
            return Ok(result.unwrap_or(false));
        }
        result.map_err(|e| self.io_err(key, e))
    }
}
