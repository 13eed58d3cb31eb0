//! # Recency Queue
//!
//! A bounded, deduplicating, insertion-ordered sequence persisted as one
//! JSON array in the store. Useful for "have I already processed this"
//! dedup windows where only the most recent `L` identifiers matter.
//!
//! Not safe for concurrent mutation from multiple instances — pair it with
//! [`crate::lock::Lock`] if more than one process needs to mutate the same
//! key.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::key;
use crate::store::{Store, NO_EXPIRY};

/// The key prefix used when a caller does not supply their own key.
pub const KEY_PREFIX: &str = "tmp:consumed:";

const DEFAULT_MAXLEN: u64 = 1000;

/// Construction-time parameters for a [`RecencyQueue`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of members retained. `None` means unbounded.
    /// Immutable for the life of the queue once constructed.
    pub maxlen: Option<u64>,
    /// Store key. A random key under [`KEY_PREFIX`] is generated if omitted.
    pub key: Option<String>,
    /// Whether persisting writes should be fire-and-forget. Tests generally
    /// want `false` (acknowledged) so assertions observe a settled store.
    pub noreply: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { maxlen: Some(DEFAULT_MAXLEN), key: None, noreply: false }
    }
}

struct Inner {
    sequence: Vec<String>,
    members: HashSet<String>,
}

/// A deduplicating, length-bounded, insertion-ordered set of strings.
pub struct RecencyQueue {
    store: Arc<dyn Store>,
    key: String,
    owns_key: bool,
    maxlen: Option<u64>,
    noreply: bool,
    inner: Mutex<Inner>,
}

impl fmt::Debug for RecencyQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecencyQueue")
            .field("key", &self.key)
            .field("maxlen", &self.maxlen)
            .field("len", &self.len())
            .finish()
    }
}

impl fmt::Display for RecencyQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        let items: Vec<String> = inner.sequence.iter().map(|s| format!("{s:?}")).collect();
        write!(f, "RecentlyConsumed([{}], key={}", items.join(", "), self.key)?;
        if let Some(l) = self.maxlen {
            write!(f, ", maxlen={l}")?;
        }
        write!(f, ")")
    }
}

impl RecencyQueue {
    /// Open (or create) a queue at the key named by `config`. Loads the
    /// persisted JSON array, treating an absent key as empty.
    pub fn new(store: Arc<dyn Store>, config: Config) -> Result<Self> {
        let (key, owns_key) = match config.key {
            Some(key) => (key, false),
            None => (key::generate(KEY_PREFIX), true),
        };

        let sequence = Self::load(store.as_ref(), &key, config.maxlen)?;
        let members = sequence.iter().cloned().collect();

        Ok(Self {
            store,
            key,
            owns_key,
            maxlen: config.maxlen,
            noreply: config.noreply,
            inner: Mutex::new(Inner { sequence, members }),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn maxlen(&self) -> Option<u64> {
        self.maxlen
    }

    fn load(store: &dyn Store, key: &str, maxlen: Option<u64>) -> Result<Vec<String>> {
        let sequence: Vec<String> = match store.get(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::io(store.name(), key, e))?,
            None => Vec::new(),
        };
        if let Some(l) = maxlen {
            if sequence.len() as u64 > l {
                return Err(Error::PersistedOverflow {
                    store: store.name().to_string(),
                    key: key.to_string(),
                });
            }
        }
        Ok(sequence)
    }

    fn persist(&self, sequence: &[String]) -> Result<()> {
        if sequence.is_empty() {
            self.store.delete(&self.key, self.noreply)?;
        } else {
            let json = serde_json::to_string(sequence).expect("Vec<String> always serializes");
            self.store.set(&self.key, json.as_bytes(), NO_EXPIRY, self.noreply)?;
        }
        Ok(())
    }

    /// Append a single value. A no-op if it is already a member.
    pub fn append(&self, value: impl ToString) -> Result<()> {
        self.extend(std::iter::once(value))
    }

    /// Append every not-yet-seen value in `values`, preserving the order of
    /// first occurrence among the new values, then prune from the left
    /// until the length is within `maxlen` and persist once.
    pub fn extend<T: ToString>(&self, values: impl IntoIterator<Item = T>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut appended = false;
        for value in values {
            let normalized = value.to_string();
            if inner.members.insert(normalized.clone()) {
                inner.sequence.push(normalized);
                appended = true;
            }
        }
        if !appended {
            return Ok(());
        }

        if let Some(limit) = self.maxlen {
            while inner.sequence.len() as u64 > limit {
                let evicted = inner.sequence.remove(0);
                inner.members.remove(&evicted);
            }
        }

        self.persist(&inner.sequence)
    }

    pub fn contains(&self, value: impl ToString) -> bool {
        self.inner.lock().unwrap().members.contains(&value.to_string())
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().unwrap().sequence.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the sequence and delete the persisted key.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.sequence.clear();
        inner.members.clear();
        self.store.delete(&self.key, self.noreply)?;
        Ok(())
    }
}

impl Drop for RecencyQueue {
    fn drop(&mut self) {
        if self.owns_key {
            if let Err(e) = self.store.delete(&self.key, true) {
                log::warn!("failed to clean up recency queue key {}: {e}", self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FakeStore;

    fn queue(maxlen: Option<u64>, key: &str) -> RecencyQueue {
        let store = Arc::new(FakeStore::new());
        RecencyQueue::new(store, Config { maxlen, key: Some(key.to_string()), noreply: false }).unwrap()
    }

    #[test]
    fn append_dedupes() {
        let q = queue(Some(10), "q1");
        q.append("a").unwrap();
        q.append("a").unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn bounded_extend_prunes_from_the_left() {
        let q = queue(Some(10), "q2");
        let items: Vec<String> = (1..=10).map(|i| format!("t3_{i}")).collect();
        q.extend(items).unwrap();
        assert_eq!(q.len(), 10);

        q.append("t3_11").unwrap();
        assert!(!q.contains("t3_1"));
        assert!(q.contains("t3_11"));
        assert_eq!(q.len(), 10);

        let more: Vec<String> = (12..=15).map(|i| format!("t3_{i}")).collect();
        q.extend(more).unwrap();
        for i in 2..=5 {
            assert!(!q.contains(format!("t3_{i}")));
        }
        for i in 6..=15 {
            assert!(q.contains(format!("t3_{i}")));
        }
        assert_eq!(q.len(), 10);
    }

    #[test]
    fn clear_deletes_the_key() {
        let store = Arc::new(FakeStore::new());
        let q = RecencyQueue::new(store.clone(), Config { key: Some("q3".into()), ..Config::default() }).unwrap();
        q.append("a").unwrap();
        q.clear().unwrap();
        assert_eq!(q.len(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn persistence_across_instances() {
        let store = Arc::new(FakeStore::new());
        let a = RecencyQueue::new(store.clone(), Config { key: Some("q4".into()), ..Config::default() }).unwrap();
        a.extend(["x", "y"]).unwrap();

        let b = RecencyQueue::new(store, Config { key: Some("q4".into()), ..Config::default() }).unwrap();
        assert!(b.contains("x"));
        assert!(b.contains("y"));
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn oversized_persisted_sequence_is_a_fatal_error() {
        let store = Arc::new(FakeStore::new());
        store.set("q5", br#"["a","b","c"]"#, 0, false).unwrap();
        let err = RecencyQueue::new(store, Config { maxlen: Some(2), key: Some("q5".into()), noreply: false })
            .unwrap_err();
        assert!(matches!(err, Error::PersistedOverflow { .. }));
    }

    #[test]
    fn unbounded_queue_never_prunes() {
        let q = queue(None, "q6");
        let items: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        q.extend(items).unwrap();
        assert_eq!(q.len(), 50);
    }

    #[test]
    fn auto_generated_key_is_removed_on_drop() {
        let store = Arc::new(FakeStore::new());
        {
            let q = RecencyQueue::new(store.clone(), Config::default()).unwrap();
            q.append("a").unwrap();
        }
        assert!(store.is_empty());
    }
}
