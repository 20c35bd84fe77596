//! In-memory storage module with lazy key expiration.
//!
//! Provides a thread-safe key-value store with:
//! - Binary-safe keys and values
//! - Optional per-key expiration, checked only when a key is read
//! - Sharded locking so operations on unrelated keys do not contend
//!
//! There is no background sweeper. A key that expires and is never read
//! again stays resident until it is overwritten or the process exits.

use crate::clock::{Clock, SystemClock};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, trace};

/// A single stored entry
#[derive(Debug, Clone)]
pub struct StoreEntry {
    /// The stored value
    pub value: Bytes,
    /// Absolute expiration time (None = never expires)
    pub expires_at: Option<Instant>,
}

impl StoreEntry {
    /// Check if this entry has expired as of `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Thread-safe in-memory key-value storage
pub struct Storage {
    /// The actual storage
    data: DashMap<Bytes, StoreEntry>,
    /// Time source used for expiration
    clock: Arc<dyn Clock>,
}

impl Storage {
    /// Create a new storage instance backed by the system clock
    pub fn new() -> Arc<Self> {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a new storage instance with an explicit time source
    pub fn with_clock(clock: Arc<dyn Clock>) -> Arc<Self> {
        info!("Initializing storage");
        Arc::new(Self {
            data: DashMap::new(),
            clock,
        })
    }

    /// Calculate expiration time from TTL (None or zero = never expires).
    ///
    /// A deadline too far out to be represented as an `Instant` can never be
    /// reached, so it is stored as no expiry.
    fn calculate_expiry(&self, ttl: Option<Duration>) -> Option<Instant> {
        ttl.filter(|ttl| !ttl.is_zero())
            .and_then(|ttl| self.clock.now().checked_add(ttl))
    }

    /// Get a value from storage.
    ///
    /// An expired entry is removed as a side effect and reported as missing.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let now = self.clock.now();

        match self.data.get(key) {
            None => return None,
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => {}
        }

        // The read guard is released above. A concurrent set may have
        // replaced the entry since, so only remove it if it is still expired.
        if self
            .data
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            trace!(key = ?key, "Item expired on access");
        }
        None
    }

    /// Set a value in storage, replacing any previous entry for the key
    pub fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) {
        let entry = StoreEntry {
            value,
            expires_at: self.calculate_expiry(ttl),
        };
        trace!(key = ?key, expires_at = ?entry.expires_at, "Item stored");
        self.data.insert(key, entry);
    }

    /// Number of resident entries, including expired entries not yet read
    pub fn len(&self) -> usize {
        self.data.len()
    }
}
