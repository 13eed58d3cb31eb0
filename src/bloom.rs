//! # Bloom Filter
//!
//! A probabilistic set backed by a single memcache value, safe for
//! concurrent mutation from many independent processes via optimistic
//! compare-and-swap.
//!
//! Sizing, hashing, and bit layout are pinned to specific reference values so
//! that two processes pointed at the same key always agree on which bits a
//! given value maps to — see [`crate::hash`] for the hashing half of that
//! contract.

use std::f64::consts::LN_2;
use std::fmt;
use std::sync::{Arc, Mutex};

use bit_vec::BitVec;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::hash::bit_positions;
use crate::key;
use crate::store::{Store, NO_EXPIRY};

/// The key prefix used when a caller does not supply their own key.
pub const KEY_PREFIX: &str = "bloom:";

const MAX_CAS_ATTEMPTS: u32 = 3;

/// Construction-time parameters for a [`BloomFilter`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Expected number of distinct elements. Must be at least 1.
    pub n: u64,
    /// Target false-positive rate. Must lie in `(0, 1)`.
    pub p: f64,
    /// Store key. A random key under [`KEY_PREFIX`] is generated if omitted.
    pub key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self { n: 1000, p: 0.001, key: None }
    }
}

struct Inner {
    bits: BitVec,
    cas_token: u64,
}

/// A Bloom Filter whose bit array lives in a memcache value at `key`.
pub struct BloomFilter {
    store: Arc<dyn Store>,
    key: String,
    owns_key: bool,
    n: u64,
    k: u32,
    m: u32,
    inner: Mutex<Inner>,
}

impl fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BloomFilter")
            .field("key", &self.key)
            .field("n", &self.n)
            .field("m", &self.m)
            .field("k", &self.k)
            .finish()
    }
}

impl fmt::Display for BloomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<BloomFilter key={}>", self.key)
    }
}

impl BloomFilter {
    /// `m = ceil(-n * ln(p) / (ln 2)^2)`, rounded up to the next multiple of 8.
    pub fn size_for(n: u64, p: f64) -> u32 {
        let raw = (-(n as f64) * p.ln() / LN_2.powi(2)).ceil() as u32;
        let remainder = raw % 8;
        if remainder == 0 { raw } else { raw + (8 - remainder) }
    }

    /// `k = ceil(floor(m / n) * ln 2)`.
    ///
    /// `m / n` is truncating integer division, not a real-valued ratio: the
    /// reference implementation this is pinned to computes it that way
    /// (Python 2, no `from __future__ import division`), and the two only
    /// happen to agree on the handful of `(n, p)` pairs SPEC_FULL.md's
    /// sizing table spells out. Using a real division and rounding instead
    /// of flooring first diverges from the reference for most other inputs.
    pub fn hashes_for(m: u32, n: u64) -> u32 {
        let truncated_ratio = (m as u64 / n) as f64;
        (truncated_ratio * LN_2).ceil() as u32
    }

    /// Open (or create) a Bloom Filter at the key named by `config`, backed
    /// by `store`. Reads the current bytes from the store if present;
    /// otherwise writes a zeroed bit array of the derived size.
    pub fn new(store: Arc<dyn Store>, config: Config) -> Result<Self> {
        if !(config.p > 0.0 && config.p < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "false-positive rate must lie in (0, 1), got {}",
                config.p
            )));
        }
        if config.n < 1 {
            return Err(Error::InvalidConfig("expected element count must be >= 1".into()));
        }

        let m = Self::size_for(config.n, config.p);
        let k = Self::hashes_for(m, config.n);
        let (key, owns_key) = match config.key {
            Some(key) => (key, false),
            None => (key::generate(KEY_PREFIX), true),
        };

        let (bits, cas_token) = Self::load_or_init(store.as_ref(), &key, m)?;

        Ok(Self { store, key, owns_key, n: config.n, k, m, inner: Mutex::new(Inner { bits, cas_token }) })
    }

    /// Like [`BloomFilter::new`], then inserts every element of `elements`.
    pub fn seeded<T, I>(store: Arc<dyn Store>, config: Config, elements: I) -> Result<Self>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let filter = Self::new(store, config)?;
        filter.update(elements)?;
        Ok(filter)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of bits in the underlying array (`m`).
    pub fn num_bits(&self) -> u32 {
        self.m
    }

    /// Number of hash functions applied per value (`k`).
    pub fn num_hashes(&self) -> u32 {
        self.k
    }

    fn load_or_init(store: &dyn Store, key: &str, m: u32) -> Result<(BitVec, u64)> {
        if let Some((bytes, cas_token)) = store.gets(key)? {
            Ok((Self::bits_from_bytes(&bytes, m), cas_token))
        } else {
            let zeroed = BitVec::from_elem(m as usize, false);
            store.set(key, &zeroed.to_bytes(), NO_EXPIRY, false)?;
            let (bytes, cas_token) = store
                .gets(key)?
                .expect("key was just written unconditionally");
            Ok((Self::bits_from_bytes(&bytes, m), cas_token))
        }
    }

    /// `bit_vec`'s own byte layout is already MSB-first within each byte,
    /// matching the wire format this type is pinned to.
    fn bits_from_bytes(bytes: &[u8], m: u32) -> BitVec {
        let mut bits = BitVec::from_bytes(bytes);
        bits.truncate(m as usize);
        bits
    }

    fn offsets<T: Serialize>(&self, value: &T) -> Vec<u32> {
        bit_positions(value, self.k, self.m)
    }

    /// Insert a single value. Equivalent to `update([value])`.
    pub fn add<T: Serialize>(&self, value: &T) -> Result<()> {
        self.update(std::iter::once(value))
    }

    /// Insert every value in `values`, persisting once after all local bits
    /// are set. Retries against a freshly reloaded array on CAS conflict.
    pub fn update<T, I>(&self, values: I) -> Result<()>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let offsets: Vec<Vec<u32>> = values.into_iter().map(|v| self.offsets(&v)).collect();
        if offsets.is_empty() {
            return Ok(());
        }
        self.mutate_with_retry(|bits| {
            for positions in &offsets {
                for &pos in positions {
                    bits.set(pos as usize, true);
                }
            }
        })
    }

    /// Whether every bit `value` hashes to is currently set, using only the
    /// locally cached array — this never touches the store.
    pub fn contains<T: Serialize>(&self, value: &T) -> bool {
        let offsets = self.offsets(value);
        let inner = self.inner.lock().unwrap();
        offsets.iter().all(|&pos| inner.bits.get(pos as usize).unwrap_or(false))
    }

    /// Approximate cardinality via the standard estimator. Not monotone
    /// under union and not exact; useful only as a rough gauge.
    pub fn len(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        let x = inner.bits.iter().filter(|&b| b).count() as f64;
        let m = self.m as f64;
        let k = self.k as f64;
        if x <= 0.0 {
            return 0;
        }
        if x >= m {
            return m as u64;
        }
        let estimate = -(m / k) * (1.0 - x / m).ln();
        estimate.floor().max(0.0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear every bit, persisting the all-zero array with CAS retry.
    pub fn clear(&self) -> Result<()> {
        let m = self.m;
        self.mutate_with_retry(move |bits| {
            *bits = BitVec::from_elem(m as usize, false);
        })
    }

    fn mutate_with_retry(&self, apply: impl Fn(&mut BitVec)) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let (bits, cas_token) = Self::load_or_init(self.store.as_ref(), &self.key, self.m)?;
            inner.bits = bits;
            inner.cas_token = cas_token;

            apply(&mut inner.bits);
            let bytes = inner.bits.to_bytes();

            if self.store.cas(&self.key, &bytes, NO_EXPIRY, inner.cas_token)? {
                if let Some((fresh_bytes, fresh_token)) = self.store.gets(&self.key)? {
                    inner.bits = Self::bits_from_bytes(&fresh_bytes, self.m);
                    inner.cas_token = fresh_token;
                }
                return Ok(());
            }

            log::debug!("bloom filter {} lost CAS race, attempt {attempt}/{MAX_CAS_ATTEMPTS}", self.key);
        }

        Err(Error::ConcurrentModification { store: self.store.name().to_string(), key: self.key.clone() })
    }
}

impl Drop for BloomFilter {
    fn drop(&mut self) {
        if self.owns_key {
            if let Err(e) = self.store.delete(&self.key, true) {
                log::warn!("failed to clean up bloom filter key {}: {e}", self.key);
            }
        }
    }
}
