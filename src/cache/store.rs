//! Byte-budgeted entry store with least-recently-accessed eviction.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

/// One stored value with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Derived cache key.
    pub key: String,
    /// The cached value.
    pub value: V,
    /// Estimated footprint counted against the budget.
    pub approx_size_bytes: usize,
    /// When the entry was stored.
    pub inserted_at: DateTime<Utc>,
    /// When the entry was last read or written.
    pub last_accessed_at: DateTime<Utc>,
    // Unique, monotonically increasing; orders entries by recency.
    access_seq: u64,
}

/// Result of an insert.
#[derive(Debug)]
pub enum InsertOutcome<V> {
    /// The entry was stored; these entries were evicted to make room.
    Stored { evicted: Vec<CacheEntry<V>> },
    /// The entry alone exceeds the budget and was not stored.
    Rejected,
}

/// Entries keyed by string, bounded by a total byte budget.
///
/// Recency is tracked with a sequence counter rather than timestamps, so
/// two entries never tie and insertion order breaks ties between entries
/// that were never read.
#[derive(Debug)]
pub struct EntryStore<V> {
    entries: HashMap<String, CacheEntry<V>>,
    recency: BTreeMap<u64, String>,
    next_seq: u64,
    budget_bytes: usize,
    used_bytes: usize,
}

impl<V> EntryStore<V> {
    /// Creates an empty store with the given budget.
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_seq: 0,
            budget_bytes,
            used_bytes: 0,
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Returns the value and marks the entry as most recently accessed.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let seq = self.bump_seq();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.access_seq);
        self.recency.insert(seq, key.to_string());
        entry.access_seq = seq;
        entry.last_accessed_at = Utc::now();
        Some(&entry.value)
    }

    /// Returns the entry without touching recency.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    /// Returns true if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Stores an entry, evicting least-recently-accessed entries until it fits.
    ///
    /// An existing entry under the same key is replaced (not counted as an
    /// eviction). An entry larger than the whole budget is rejected.
    pub fn insert(&mut self, key: String, value: V, approx_size_bytes: usize) -> InsertOutcome<V> {
        // an oversized replacement leaves the existing entry in place
        if approx_size_bytes > self.budget_bytes {
            return InsertOutcome::Rejected;
        }
        self.remove(&key);

        let mut evicted = Vec::new();
        while self.used_bytes + approx_size_bytes > self.budget_bytes {
            match self.pop_oldest() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }

        let seq = self.bump_seq();
        let now = Utc::now();
        self.recency.insert(seq, key.clone());
        self.used_bytes += approx_size_bytes;
        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                approx_size_bytes,
                inserted_at: now,
                last_accessed_at: now,
                access_seq: seq,
            },
        );

        InsertOutcome::Stored { evicted }
    }

    fn pop_oldest(&mut self) -> Option<CacheEntry<V>> {
        let (_, key) = self.recency.pop_first()?;
        let entry = self.entries.remove(&key)?;
        self.used_bytes -= entry.approx_size_bytes;
        Some(entry)
    }

    /// Removes an entry.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.access_seq);
        self.used_bytes -= entry.approx_size_bytes;
        Some(entry)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.used_bytes = 0;
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the entries' estimated sizes.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// The configured budget.
    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }
}
