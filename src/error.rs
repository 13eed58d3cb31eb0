//! The typed error surface shared by all three primitives.
//!
//! Every error carries the store and key it was raised against, so a caller
//! juggling many keys across many primitives can tell which one misbehaved
//! without threading that context through by hand.

use thiserror::Error;

/// Errors raised by the coordination primitives in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A Bloom Filter mutation lost every one of its CAS retries.
    #[error("concurrent modification of {key:?} in store {store} (exhausted retries)")]
    ConcurrentModification { store: String, key: String },

    /// `Lock::release` was called on a key this instance does not currently hold.
    #[error("released a lock this instance did not hold: {key:?} in store {store}")]
    UnownedRelease { store: String, key: String },

    /// A Recency Queue loaded from the store already exceeds its configured `maxlen`.
    #[error("persisted sequence at {key:?} in store {store} exceeds its maximum length")]
    PersistedOverflow { store: String, key: String },

    /// A caller-supplied configuration combination is self-contradictory, e.g.
    /// a non-blocking lock acquisition with a finite timeout.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The store adapter reported an I/O, timeout, or protocol failure.
    #[error("store {store} failed on {key:?}: {source}")]
    Io {
        store: String,
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Whether retrying the failed operation is expected to help.
    ///
    /// Only [`Error::ConcurrentModification`] is retriable; every other
    /// variant reflects either a contract violation or a state the store
    /// will not spontaneously fix.
    pub fn retriable(&self) -> bool {
        matches!(self, Error::ConcurrentModification { .. })
    }

    /// The store name the failing call was issued against.
    pub fn store(&self) -> &str {
        match self {
            Error::ConcurrentModification { store, .. }
            | Error::UnownedRelease { store, .. }
            | Error::PersistedOverflow { store, .. }
            | Error::Io { store, .. } => store,
            Error::InvalidConfig(_) => "",
        }
    }

    /// The key the failing call was issued against, if any.
    pub fn key(&self) -> &str {
        match self {
            Error::ConcurrentModification { key, .. }
            | Error::UnownedRelease { key, .. }
            | Error::PersistedOverflow { key, .. }
            | Error::Io { key, .. } => key,
            Error::InvalidConfig(_) => "",
        }
    }

    pub(crate) fn io(
        store: impl Into<String>,
        key: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Io {
            store: store.into(),
            key: key.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
