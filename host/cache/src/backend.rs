use std::{
    collections::HashMap,
    fmt,
    time::{Duration, Instant},
};

use wasi_cache_abi::CacheError;

// === CacheBackend === //

/// A store of byte values keyed by strings. A missing key is an error for both `get` and
/// `delete`.
pub trait CacheBackend: Send {
    fn set(&mut self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError>;

    fn get(&mut self, key: &str) -> Result<Vec<u8>, CacheError>;

    fn delete(&mut self, key: &str) -> Result<(), CacheError>;
}

// === MemoryBackend === //

pub type Clock = Box<dyn Fn() -> Instant + Send>;

/// An in-process backend. Entries past their time to live are dropped the next time they are
/// looked up or the next time anything is stored.
pub struct MemoryBackend {
    entries: HashMap<String, MemoryEntry>,
    clock: Clock,
}

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(Box::new(Instant::now))
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            entries: HashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_expired(&mut self, now: Instant) {
        let before = self.entries.len();

        self.entries
            .retain(|_, entry| entry.expires_at.is_none_or(|at| now < at));

        let purged = before - self.entries.len();
        if purged > 0 {
            tracing::debug!("purged {purged} expired entries");
        }
    }

    fn live_entry(&mut self, key: &str) -> Option<&MemoryEntry> {
        let now = (self.clock)();
        let expired = self
            .entries
            .get(key)?
            .expires_at
            .is_some_and(|at| now >= at);

        if expired {
            tracing::debug!("entry {key:?} expired");
            self.entries.remove(key);
            return None;
        }

        self.entries.get(key)
    }
}

impl CacheBackend for MemoryBackend {
    fn set(&mut self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        let now = (self.clock)();
        let expires_at = match ttl {
            Some(ttl) => Some(now.checked_add(ttl).ok_or(CacheError::Error)?),
            None => None,
        };

        self.purge_expired(now);

        self.entries
            .insert(key.to_string(), MemoryEntry { value, expires_at });

        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<Vec<u8>, CacheError> {
        self.live_entry(key)
            .map(|entry| entry.value.clone())
            .ok_or(CacheError::Error)
    }

    fn delete(&mut self, key: &str) -> Result<(), CacheError> {
        self.live_entry(key).ok_or(CacheError::Error)?;
        self.entries.remove(key);

        Ok(())
    }
}
