//! # Distributed Lock
//!
//! A lease-based mutual-exclusion lock built on memcache's `add`: whichever
//! process's `add` lands first holds the key until its lease expires or it
//! releases explicitly. A random per-instance token distinguishes "I hold
//! this" from "someone holds this", since `add` alone can't tell the two
//! apart.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};
use crate::key;
use crate::store::Store;
use crate::timer::Timer;

/// The key prefix used when a caller does not supply their own key.
pub const KEY_PREFIX: &str = "tmp:memlock:";

const DEFAULT_LEASE_SECS: u32 = 1;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Construction-time parameters for a [`Lock`].
#[derive(Debug, Clone)]
pub struct Config {
    /// How long the store holds the lock's value before it expires on its
    /// own, in seconds. Must be at least 1 (memcache treats a `ttl` of 0 as
    /// "never expires", which a lease-based lock can never mean).
    pub lease_secs: u32,
    /// Upper bound of the uniform jitter slept between retry attempts while
    /// blocking.
    pub retry_delay: Duration,
    /// Store key. A random key under [`KEY_PREFIX`] is generated if omitted.
    pub key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self { lease_secs: DEFAULT_LEASE_SECS, retry_delay: DEFAULT_RETRY_DELAY, key: None }
    }
}

/// A lease-based distributed mutex. Not itself shared across threads; each
/// `Lock` value is one instance's view, identified by its own random token.
pub struct Lock {
    store: Arc<dyn Store>,
    key: String,
    owns_key: bool,
    token: String,
    lease_secs: u32,
    retry_delay: Duration,
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock").field("key", &self.key).field("lease_secs", &self.lease_secs).finish()
    }
}

impl fmt::Display for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let locked = self.locked().unwrap_or(false);
        write!(f, "<MemLock key={} locked={}>", self.key, locked)
    }
}

impl Lock {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Result<Self> {
        if config.lease_secs == 0 {
            return Err(Error::InvalidConfig("lease_secs must be at least 1".into()));
        }
        let (key, owns_key) = match config.key {
            Some(key) => (key, false),
            None => (key::generate(KEY_PREFIX), true),
        };
        Ok(Self {
            store,
            key,
            owns_key,
            token: key::random_token(),
            lease_secs: config.lease_secs,
            retry_delay: config.retry_delay,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// This instance's ownership token. Two `Lock`s never share a token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Attempt to acquire the lock.
    ///
    /// `blocking = false, timeout = None`: a single attempt.
    /// `blocking = false, timeout = Some(_)`: rejected, [`Error::InvalidConfig`].
    /// `blocking = true, timeout = None`: retries forever until acquired.
    /// `blocking = true, timeout = Some(t)`: retries until `t` elapses, then
    /// returns `Ok(false)`.
    pub fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> Result<bool> {
        if !blocking && timeout.is_some() {
            return Err(Error::InvalidConfig(
                "non-blocking acquire cannot be given a timeout".into(),
            ));
        }

        let timer = Timer::start();
        loop {
            if self.store.add(&self.key, self.token.as_bytes(), self.lease_secs, false)? {
                return Ok(true);
            }

            if !blocking {
                return Ok(false);
            }
            if let Some(timeout) = timeout {
                if timer.expired(timeout) {
                    return Ok(false);
                }
            }

            let jitter = rand::thread_rng().gen_range(0.0..=self.retry_delay.as_secs_f64());
            std::thread::sleep(Duration::from_secs_f64(jitter));
        }
    }

    /// Whether the store currently holds *any* value at this lock's key.
    /// This is informational: it does not prove this instance is the
    /// holder, only that some holder hasn't (yet) released or expired.
    pub fn locked(&self) -> Result<bool> {
        Ok(self.store.get(&self.key)?.is_some())
    }

    /// Release the lock. Uses `gets`+`cas` to reconfirm this instance still
    /// holds the key at the instant of release, then deletes it; if the key
    /// is absent, already rewritten by someone else, or the reconfirming
    /// `cas` loses a race in between, raises [`Error::UnownedRelease`]
    /// rather than deleting a lease a different holder has since acquired.
    ///
    /// The reconfirming `cas` is given this lock's `lease_secs` as its `ttl`
    /// rather than `0`: `cas` always assigns a fresh expiration instead of
    /// preserving the key's existing one, so reconfirming with a permanent
    /// `ttl` would turn a leased key non-expiring on the backend if the
    /// following `delete` never lands (process crash, dropped connection).
    /// Re-arming the lease keeps that failure self-healing instead.
    pub fn release(&self) -> Result<()> {
        if let Some((value, cas_token)) = self.store.gets(&self.key)? {
            if value == self.token.as_bytes()
                && self.store.cas(&self.key, &value, self.lease_secs, cas_token)?
                && self.store.delete(&self.key, false)?
            {
                return Ok(());
            }
        }
        Err(Error::UnownedRelease { store: self.store.name().to_string(), key: self.key.clone() })
    }

    /// Acquire the lock and return a guard that releases it on drop.
    /// `Ok(None)` means `acquire` timed out rather than erroring.
    pub fn acquire_scoped(
        &self,
        blocking: bool,
        timeout: Option<Duration>,
        on_release_error: ReleaseMode,
    ) -> Result<Option<ScopedLock<'_>>> {
        if self.acquire(blocking, timeout)? {
            Ok(Some(ScopedLock { lock: self, released: false, on_release_error }))
        } else {
            Ok(None)
        }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if self.owns_key {
            // Best-effort: an auto-generated key's lease will expire on its
            // own even if this delete fails or races with another holder.
            let _ = self.store.delete(&self.key, true);
        }
    }
}

/// What a [`ScopedLock`] does if releasing on scope exit fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Propagate the release failure by panicking in `Drop`.
    Strict,
    /// Log and swallow the release failure.
    BestEffort,
}

/// An acquired [`Lock`], released automatically when dropped.
///
/// Call [`ScopedLock::release`] to release early and observe the result
/// directly; otherwise the guard releases on drop according to its
/// [`ReleaseMode`].
pub struct ScopedLock<'a> {
    lock: &'a Lock,
    released: bool,
    on_release_error: ReleaseMode,
}

impl ScopedLock<'_> {
    /// Release now, returning the result instead of deferring to `Drop`.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.release()
    }
}

impl Drop for ScopedLock<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.lock.release() {
            Ok(()) => {}
            Err(e) if self.on_release_error == ReleaseMode::Strict => {
                panic!("lock {} was not held on scope exit: {e}", self.lock.key)
            }
            Err(e) => log::warn!("best-effort release of {} failed: {e}", self.lock.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FakeStore;

    fn lock(store: Arc<FakeStore>, key: &str, lease_secs: u32) -> Lock {
        Lock::new(store, Config { lease_secs, key: Some(key.to_string()), ..Config::default() }).unwrap()
    }

    #[test]
    fn single_instance_acquires_and_releases() {
        let store = Arc::new(FakeStore::new());
        let l = lock(store, "printer", 1);
        assert!(l.acquire(false, None).unwrap());
        assert!(l.locked().unwrap());
        l.release().unwrap();
        assert!(!l.locked().unwrap());
    }

    #[test]
    fn second_non_blocking_acquire_fails_while_held() {
        let store = Arc::new(FakeStore::new());
        let a = lock(store.clone(), "printer", 1);
        let b = lock(store, "printer", 1);

        assert!(a.acquire(false, None).unwrap());
        assert!(!b.acquire(false, None).unwrap());
    }

    #[test]
    fn lease_expiry_allows_a_fresh_acquire() {
        let store = Arc::new(FakeStore::new());
        let a = lock(store.clone(), "printer", 1);
        let b = lock(store.clone(), "printer", 1);

        assert!(a.acquire(false, None).unwrap());
        store.expire("printer");
        assert!(!a.locked().unwrap());
        assert!(b.acquire(false, None).unwrap());
    }

    #[test]
    fn release_without_holding_is_unowned() {
        let store = Arc::new(FakeStore::new());
        let l = lock(store, "printer", 1);
        let err = l.release().unwrap_err();
        assert!(matches!(err, Error::UnownedRelease { .. }));
        assert!(!err.retriable());
    }

    #[test]
    fn non_blocking_with_timeout_is_invalid_config() {
        let store = Arc::new(FakeStore::new());
        let l = lock(store, "printer", 1);
        let err = l.acquire(false, Some(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn blocking_acquire_times_out_while_held() {
        let store = Arc::new(FakeStore::new());
        let a = lock(store.clone(), "printer", 1);
        let b = Lock::new(
            store,
            Config { lease_secs: 1, retry_delay: Duration::from_millis(5), key: Some("printer".into()) },
        )
        .unwrap();

        assert!(a.acquire(false, None).unwrap());
        assert!(!b.acquire(true, Some(Duration::from_millis(50))).unwrap());
    }

    #[test]
    fn scoped_lock_releases_on_drop() {
        let store = Arc::new(FakeStore::new());
        let l = lock(store, "printer", 1);
        {
            let _guard = l.acquire_scoped(false, None, ReleaseMode::Strict).unwrap().unwrap();
            assert!(l.locked().unwrap());
        }
        assert!(!l.locked().unwrap());
    }

    #[test]
    fn scoped_lock_best_effort_swallows_expired_lease() {
        let store = Arc::new(FakeStore::new());
        let l = lock(store.clone(), "printer", 1);
        let guard = l.acquire_scoped(false, None, ReleaseMode::BestEffort).unwrap().unwrap();
        store.expire("printer");
        drop(guard);
    }

    #[test]
    fn auto_generated_key_is_removed_on_drop() {
        let store = Arc::new(FakeStore::new());
        {
            let l = Lock::new(store.clone(), Config::default()).unwrap();
            l.acquire(false, None).unwrap();
        }
        assert!(store.is_empty());
    }
}
