//! Bounded LRU cache of tag-query results.
//!
//! Each key moves through `Populating -> Ready`. Only one caller wins the
//! `Absent -> Populating` transition, so a query is populated at most once
//! at a time. All state sits behind one mutex; fetching happens outside it.
//!
//! Populating keys are tracked beside the LRU rather than inside it, so
//! claiming a key never evicts a ready entry. Eviction happens only when a
//! population completes.

use crate::api::post::Post;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Normalized tag set: blanks dropped, sorted, joined by single spaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parts: Vec<String> = tags
            .into_iter()
            .flat_map(|tag| {
                tag.as_ref()
                    .split_whitespace()
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            })
            .collect();
        parts.sort();
        Self(parts.join(" "))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The normalized tags, in key order.
    pub fn tags(&self) -> Vec<String> {
        self.0.split_whitespace().map(str::to_owned).collect()
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub enum CacheEntry {
    Populating {
        started: Instant,
    },
    Ready {
        records: Arc<Vec<Post>>,
        created_at: Instant,
        /// Every upstream match was captured.
        complete: bool,
    },
}

impl CacheEntry {
    pub fn is_ready(&self) -> bool {
        matches!(self, CacheEntry::Ready { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMiss {
    Absent,
    Populating,
    /// A ready entry exists but holds fewer posts than requested.
    Insufficient,
}

#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(Arc<Vec<Post>>),
    Miss(CacheMiss),
}

struct CacheInner {
    entries: LruCache<QueryKey, CacheEntry>,
    populating: HashMap<QueryKey, Instant>,
    last_used: Instant,
}

pub struct QueryCache {
    inner: Mutex<CacheInner>,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("QueryCache")
            .field("len", &inner.entries.len())
            .field("populating", &inner.populating.len())
            .field("capacity", &inner.entries.cap())
            .finish()
    }
}

impl QueryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                populating: HashMap::new(),
                last_used: Instant::now(),
            }),
        }
    }

    /// Looks up `key` for a caller that needs `wanted` posts (`None` means
    /// all of them). Hits refresh recency and the idle clock.
    pub fn lookup(&self, key: &QueryKey, wanted: Option<usize>) -> CacheLookup {
        let mut inner = self.inner.lock();
        if inner.populating.contains_key(key) {
            return CacheLookup::Miss(CacheMiss::Populating);
        }
        let outcome = match inner.entries.peek(key) {
            None => CacheLookup::Miss(CacheMiss::Absent),
            Some(CacheEntry::Populating { .. }) => CacheLookup::Miss(CacheMiss::Populating),
            Some(CacheEntry::Ready {
                records, complete, ..
            }) => {
                let enough = *complete || wanted.is_some_and(|wanted| records.len() >= wanted);
                if enough {
                    CacheLookup::Hit(Arc::clone(records))
                } else {
                    CacheLookup::Miss(CacheMiss::Insufficient)
                }
            }
        };

        if let CacheLookup::Hit(_) = outcome {
            inner.entries.promote(key);
            inner.last_used = Instant::now();
        }
        outcome
    }

    /// Atomically claims population of an absent key. Returns `false` when
    /// the key is already populating or ready.
    pub fn try_begin_populate(&self, key: &QueryKey) -> bool {
        let mut inner = self.inner.lock();
        if inner.entries.contains(key) || inner.populating.contains_key(key) {
            return false;
        }
        inner.populating.insert(key.clone(), Instant::now());
        true
    }

    /// Stores the result of a population, evicting the least recently used
    /// key first when the cache is full.
    pub fn complete(&self, key: &QueryKey, records: Vec<Post>, complete: bool) {
        let now = Instant::now();
        let entry = CacheEntry::Ready {
            records: Arc::new(records),
            created_at: now,
            complete,
        };

        let mut inner = self.inner.lock();
        inner.populating.remove(key);
        if let Some((evicted, _)) = inner.entries.push(key.clone(), entry) {
            if &evicted != key {
                tracing::debug!(key = %key, evicted = %evicted, "cache full; evicted least recently used query");
            }
        }
        inner.last_used = now;
    }

    /// Replaces the records of a key that is still cached. Recency and the
    /// idle clock are left alone. Returns `false` if the key was evicted or
    /// cleared meanwhile.
    pub fn refresh(&self, key: &QueryKey, records: Vec<Post>, complete: bool) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.peek_mut(key) {
            Some(entry) => {
                *entry = CacheEntry::Ready {
                    records: Arc::new(records),
                    created_at: Instant::now(),
                    complete,
                };
                true
            }
            None => false,
        }
    }

    /// Releases a key whose population failed so a later miss can retry it.
    /// Ready entries are left alone.
    pub fn abandon(&self, key: &QueryKey) {
        self.inner.lock().populating.remove(key);
    }

    /// Removes every entry, populating claims included, and returns how many
    /// were dropped.
    pub fn clear_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let cleared = inner.entries.len() + inner.populating.len();
        inner.entries.clear();
        inner.populating.clear();
        cleared
    }

    /// Keys with ready entries, most recently used first.
    pub fn ready_keys(&self) -> Vec<QueryKey> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_ready())
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn peek(&self, key: &QueryKey) -> Option<CacheEntry> {
        let inner = self.inner.lock();
        match inner.populating.get(key) {
            Some(started) => Some(CacheEntry::Populating { started: *started }),
            None => inner.entries.peek(key).cloned(),
        }
    }

    /// Ready entries plus keys currently populating.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.entries.len() + inner.populating.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.inner.lock().entries.cap()
    }

    /// Time since the last cache hit or completed population.
    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.inner.lock().last_used)
    }
}
