//! # Store Adapter
//!
//! The minimum memcache surface every primitive in this crate needs, and
//! nothing else. A [`Store`] is the only component permitted to perform I/O;
//! the Bloom Filter, the Lock, and the Recency Queue treat it as opaque.
//!
//! The wire protocol, connection pooling, and per-call timeouts of the
//! underlying memcache client are out of scope here — see [`memcache`] for
//! the real adapter backed by the `memcache` crate, and [`fake`] for the
//! in-memory, fault-injecting adapter used in tests.

#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod memcache;

use std::fmt;

pub use self::memcache::MemcacheStore;
#[cfg(any(test, feature = "testing"))]
pub use fake::FakeStore;

use crate::error::Result;

/// A TTL of zero means "no expiry", matching memcache's own convention.
pub const NO_EXPIRY: u32 = 0;

/// The minimum memcache surface this crate's primitives depend on.
///
/// Implementors must guarantee memcache's usual atomicity contracts: `add`
/// succeeds iff the key was absent, `cas` succeeds iff the token it was
/// given still matches the key's current generation, and `set`/`delete` are
/// unconditional.
pub trait Store: fmt::Debug + Send + Sync {
    /// A short, human-readable identifier for this store (e.g. its server
    /// address), used only for error diagnostics.
    fn name(&self) -> &str;

    /// Read the current bytes at `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Read the current bytes at `key` plus an opaque CAS token usable in a
    /// later [`Store::cas`] call, or `None` if absent.
    fn gets(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>>;

    /// Unconditionally write `value` to `key`. `ttl` of `0` means no expiry.
    fn set(&self, key: &str, value: &[u8], ttl: u32, noreply: bool) -> Result<()>;

    /// Write `value` to `key` iff `key` is currently absent. Returns whether
    /// the write happened.
    fn add(&self, key: &str, value: &[u8], ttl: u32, noreply: bool) -> Result<bool>;

    /// Write `value` to `key` iff `key`'s current generation still matches
    /// `cas_token`. `ttl` sets the key's new expiration the same way it does
    /// for [`Store::set`]/[`Store::add`] — the wire protocol's `cas` command
    /// assigns a fresh expiration rather than preserving whatever the key
    /// already had, so callers that need a lease to survive a reconfirming
    /// `cas` must pass that lease's `ttl` through explicitly. Returns whether
    /// the write happened.
    fn cas(&self, key: &str, value: &[u8], ttl: u32, cas_token: u64) -> Result<bool>;

    /// Remove `key`. Returns whether a value was actually removed.
    fn delete(&self, key: &str, noreply: bool) -> Result<bool>;
}
