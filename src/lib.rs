//! # `membrace`
//!
//! `membrace` is a small library of memcache-backed coordination and
//! deduplication primitives, meant to be shared across many independent
//! processes and machines that cooperate through a single external
//! memcache cluster. It does not talk to memcache directly — callers supply
//! a [`Store`](store::Store) implementation, and this crate is only
//! responsible for the concurrency protocol layered on top of it.
//!
//! ## Public API
//!
//! ### `BloomFilter`
//!
//! A probabilistic set whose bit array lives in a single memcache value.
//! Multiple processes can mutate the same key concurrently: every mutating
//! call reloads the array, applies its change, and writes back with `cas`,
//! retrying against a fresh reload on conflict. See [`bloom::BloomFilter`].
//!
//! ### `Lock`
//!
//! A lease-based distributed mutex built on memcache's `add`. Each instance
//! carries its own random ownership token so that `release` can tell "I
//! still hold this" from "someone else holds this now". See
//! [`lock::Lock`] and [`lock::ScopedLock`] for the RAII-guarded form.
//!
//! ### `RecencyQueue`
//!
//! A bounded, deduplicating, insertion-ordered sequence of strings,
//! persisted as one JSON array. Useful for "have I already handled this"
//! dedup windows bounded to the last `L` identifiers. See
//! [`queue::RecencyQueue`].
//!
//! ### `Store`
//!
//! The trait every primitive above is generic over. [`store::MemcacheStore`]
//! wraps a real memcache connection; [`store::FakeStore`] is an in-memory,
//! fault-injecting stand-in used throughout this crate's own test suite and
//! available to downstream crates too.
//!
//! ## Non-goals
//!
//! No local in-memory-only alternative to any primitive, no server-side
//! replication logic, no attempt to exceed the atomicity memcache itself
//! provides, no iteration over Bloom Filter contents, no exact cardinality,
//! no CLI or environment-variable surface.
//!
//! Author: Nrishinghananda Roy
//!

#![allow(dead_code)]

pub mod bloom;
pub mod error;
mod hash;
pub mod key;
pub mod lock;
pub mod queue;
pub mod store;
pub mod timer;

pub use bloom::BloomFilter;
pub use error::{Error, Result};
pub use lock::{Lock, ScopedLock};
pub use queue::RecencyQueue;
pub use store::Store;
