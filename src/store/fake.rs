//! An in-memory [`Store`] for deterministic tests.
//!
//! Real memcache servers are eventually-consistent-enough, networked, and
//! slow to arrange into a specific race. [`FakeStore`] gives every test in
//! this crate a handle onto one shared, `Mutex`-protected map so that CAS
//! conflicts, lease expiry, and forced I/O failures can all be driven
//! explicitly instead of hoped for.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

use super::Store;

struct Entry {
    value: Vec<u8>,
    cas: u64,
    expires_at: Option<Instant>,
}

struct Inner {
    entries: HashMap<String, Entry>,
    generation: AtomicU64,
    /// How many of the next `set`/`add`/`cas`/`delete`/`get`/`gets` calls
    /// should fail with a synthetic I/O error before behaving normally again.
    fail_next: AtomicUsize,
}

/// A cheaply-clonable, shared, in-memory [`Store`].
///
/// Clone it to hand out independent-looking handles onto the same backing
/// map, the way two processes would share one real memcache server.
#[derive(Clone)]
pub struct FakeStore {
    inner: Arc<Mutex<Inner>>,
    name: String,
}

impl fmt::Debug for FakeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeStore").field("name", &self.name).finish()
    }
}

impl Default for FakeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Injected;

impl fmt::Display for Injected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "injected fault")
    }
}

impl std::error::Error for Injected {}

impl FakeStore {
    pub fn new() -> Self {
        Self::named("fake")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                generation: AtomicU64::new(1),
                fail_next: AtomicUsize::new(0),
            })),
            name: name.into(),
        }
    }

    /// The next `n` store calls on any handle cloned from this one will
    /// return [`Error::Io`] instead of touching the map.
    pub fn fail_next_calls(&self, n: usize) {
        self.inner.lock().unwrap().fail_next.store(n, Ordering::SeqCst);
    }

    /// Force `key` to read as expired on its next access, without waiting.
    pub fn expire(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() - Duration::from_millis(1));
        }
    }

    /// Number of live (non-expired) keys currently stored. Test-only helper.
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        Self::sweep(&mut inner);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(inner: &mut Inner) {
        let now = Instant::now();
        inner
            .entries
            .retain(|_, entry| entry.expires_at.map(|at| at > now).unwrap_or(true));
    }

    fn maybe_fail(&self, inner: &Inner, key: &str) -> Result<()> {
        let remaining = inner.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            inner.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::io(self.name.clone(), key, Injected));
        }
        Ok(())
    }

    fn expiry_at(ttl: u32) -> Option<Instant> {
        if ttl == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_secs(ttl as u64))
        }
    }
}

impl Store for FakeStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_fail(&inner, key)?;
        Self::sweep(&mut inner);
        Ok(inner.entries.get(key).map(|e| e.value.clone()))
    }

    fn gets(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>> {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_fail(&inner, key)?;
        Self::sweep(&mut inner);
        Ok(inner.entries.get(key).map(|e| (e.value.clone(), e.cas)))
    }

    fn set(&self, key: &str, value: &[u8], ttl: u32, _noreply: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_fail(&inner, key)?;
        let cas = inner.generation.fetch_add(1, Ordering::SeqCst);
        inner.entries.insert(
            key.to_string(),
            Entry { value: value.to_vec(), cas, expires_at: Self::expiry_at(ttl) },
        );
        Ok(())
    }

    fn add(&self, key: &str, value: &[u8], ttl: u32, _noreply: bool) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_fail(&inner, key)?;
        Self::sweep(&mut inner);
        if inner.entries.contains_key(key) {
            return Ok(false);
        }
        let cas = inner.generation.fetch_add(1, Ordering::SeqCst);
        inner.entries.insert(
            key.to_string(),
            Entry { value: value.to_vec(), cas, expires_at: Self::expiry_at(ttl) },
        );
        Ok(true)
    }

    fn cas(&self, key: &str, value: &[u8], ttl: u32, cas_token: u64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_fail(&inner, key)?;
        Self::sweep(&mut inner);
        let current = match inner.entries.get(key) {
            Some(entry) => entry.cas,
            None => return Ok(false),
        };
        if current != cas_token {
            return Ok(false);
        }
        let next_cas = inner.generation.fetch_add(1, Ordering::SeqCst);
        inner.entries.insert(
            key.to_string(),
            Entry { value: value.to_vec(), cas: next_cas, expires_at: Self::expiry_at(ttl) },
        );
        Ok(true)
    }

    fn delete(&self, key: &str, _noreply: bool) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_fail(&inner, key)?;
        Self::sweep(&mut inner);
        Ok(inner.entries.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_add_again_fails() {
        let store = FakeStore::new();
        assert!(store.add("k", b"1", 0, false).unwrap());
        assert!(!store.add("k", b"2", 0, false).unwrap());
        assert_eq!(store.get("k").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn cas_fails_on_stale_token() {
        let store = FakeStore::new();
        store.set("k", b"1", 0, false).unwrap();
        let (_, token) = store.gets("k").unwrap().unwrap();
        store.set("k", b"2", 0, false).unwrap();
        assert!(!store.cas("k", b"3", 0, token).unwrap());
        assert_eq!(store.get("k").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn injected_fault_is_one_shot() {
        let store = FakeStore::new();
        store.fail_next_calls(1);
        assert!(store.get("k").is_err());
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn expire_makes_key_invisible_immediately() {
        let store = FakeStore::new();
        store.set("k", b"1", 60, false).unwrap();
        store.expire("k");
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn cloned_handles_share_state() {
        let a = FakeStore::new();
        let b = a.clone();
        a.set("k", b"1", 0, false).unwrap();
        assert_eq!(b.get("k").unwrap(), Some(b"1".to_vec()));
    }
}
