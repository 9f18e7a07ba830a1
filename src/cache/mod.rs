//! In-memory result cache.
//!
//! Maps `(target, content fingerprint)` to a previously computed analysis
//! result, plus a separate namespace of keyed transformations. Both
//! namespaces share one byte budget and one least-recently-accessed
//! eviction policy. Validity is exact-match only: changed content is a
//! miss. The cache is owned by the caller and never persisted.

pub mod fingerprint;
pub mod store;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogScope;
use fingerprint::{result_key, transformation_key};
use store::{EntryStore, InsertOutcome};

pub use fingerprint::fingerprint;
pub use store::CacheEntry;

/// Per-entry bookkeeping overhead added to every size estimate.
const ENTRY_OVERHEAD_BYTES: usize = 64;

/// Default memory budget: 50 MiB.
pub const DEFAULT_MEMORY_BUDGET_BYTES: usize = 50 * 1024 * 1024;

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether executors consult a cache at all.
    pub enabled: bool,
    /// Upper bound on the summed entry size estimates.
    pub memory_budget_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
        }
    }
}

/// Errors raised by cache writes.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The value could not be serialized for storage.
    #[error("failed to serialize cached value: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Counters accumulated over the life of a cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    /// Result lookups that found a value.
    pub hits: u64,
    /// Result lookups that found nothing.
    pub misses: u64,
    /// All result lookups.
    pub total_requests: u64,
    /// Transformation lookups that found a value.
    pub transformation_hits: u64,
    /// Transformation lookups that found nothing.
    pub transformation_misses: u64,
    /// Entries currently stored, both namespaces.
    pub total_entries: usize,
    /// Current summed size estimate.
    pub memory_usage_bytes: usize,
    /// Entries removed to make room.
    pub eviction_count: u64,
    /// Writes refused because the entry alone exceeded the budget.
    pub oversize_rejections: u64,
}

impl CacheMetrics {
    /// Fraction of result lookups that hit; 0 when nothing was requested.
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.hits as f64 / self.total_requests as f64
    }
}

/// Outcome of [`ResultCache::get_or_compute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cached<V> {
    /// Served from the cache.
    Hit(V),
    /// Computed by this call and stored.
    Computed(V),
}

impl<V> Cached<V> {
    /// Returns true if the value came from the cache.
    pub fn is_hit(&self) -> bool {
        matches!(self, Cached::Hit(_))
    }

    /// Unwraps the value.
    pub fn into_inner(self) -> V {
        match self {
            Cached::Hit(value) | Cached::Computed(value) => value,
        }
    }
}

#[derive(Debug)]
enum CachedValue<V> {
    Result { target: String, value: V },
    Transformation(serde_json::Value),
}

#[derive(Debug)]
struct CacheState<V> {
    store: EntryStore<CachedValue<V>>,
    // target -> fingerprint of the content its current entry was computed from
    targets: HashMap<String, String>,
    metrics: CacheMetrics,
}

impl<V> CacheState<V> {
    fn insert(&mut self, key: String, value: CachedValue<V>, size: usize, scope: &LogScope) -> bool {
        match self.store.insert(key, value, size) {
            InsertOutcome::Stored { evicted } => {
                if !evicted.is_empty() {
                    tracing::debug!(scope = %scope, evicted = evicted.len(), "evicted cache entries");
                }
                for entry in evicted {
                    self.metrics.eviction_count += 1;
                    if let CachedValue::Result { target, .. } = entry.value {
                        let still_current = self
                            .targets
                            .get(&target)
                            .is_some_and(|fp| result_key(&target, fp) == entry.key);
                        if still_current {
                            self.targets.remove(&target);
                        }
                    }
                }
                true
            }
            InsertOutcome::Rejected => {
                self.metrics.oversize_rejections += 1;
                tracing::warn!(
                    scope = %scope,
                    size_bytes = size,
                    budget_bytes = self.store.budget_bytes(),
                    "cache entry exceeds the whole budget, not stored"
                );
                false
            }
        }
    }

    fn remove_target(&mut self, target: &str) -> bool {
        match self.targets.remove(target) {
            Some(fp) => self.store.remove(&result_key(target, &fp)).is_some(),
            None => false,
        }
    }
}

/// Content-addressed, memory-bounded cache of analysis results.
///
/// Safe to share across concurrent executors behind an `Arc`.
#[derive(Debug)]
pub struct ResultCache<V> {
    state: Mutex<CacheState<V>>,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    scope: LogScope,
}

impl<V> ResultCache<V> {
    /// Creates a cache with the given memory budget.
    pub fn new(memory_budget_bytes: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                store: EntryStore::new(memory_budget_bytes),
                targets: HashMap::new(),
                metrics: CacheMetrics::default(),
            }),
            in_flight: Mutex::new(HashMap::new()),
            scope: LogScope::new("cache"),
        }
    }

    /// Creates a cache from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.memory_budget_bytes)
    }

    /// Sets the logging scope.
    pub fn with_scope(mut self, scope: LogScope) -> Self {
        self.scope = scope;
        self
    }

    fn state(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if no stored entry matches the content for this target.
    pub fn has_changed(&self, target: &str, content: &str) -> bool {
        let state = self.state();
        state
            .targets
            .get(target)
            .map_or(true, |stored| *stored != fingerprint(content))
    }

    /// Removes the result entry for a target. Returns true if one existed.
    pub fn invalidate(&self, target: &str) -> bool {
        self.state().remove_target(target)
    }

    /// Removes every entry. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.state();
        state.store.clear();
        state.targets.clear();
    }

    /// Number of entries across both namespaces.
    pub fn len(&self) -> usize {
        self.state().store.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> CacheMetrics {
        let state = self.state();
        CacheMetrics {
            total_entries: state.store.len(),
            memory_usage_bytes: state.store.used_bytes(),
            ..state.metrics.clone()
        }
    }

    /// Looks up a transformation of `source` by kind.
    pub fn get_transformation<T: DeserializeOwned>(&self, source: &str, kind: &str) -> Option<T> {
        let key = transformation_key(kind, &fingerprint(source));
        let mut state = self.state();
        let stored = match state.store.get(&key) {
            Some(CachedValue::Transformation(json)) => Some(json.clone()),
            _ => None,
        };
        let value = stored.and_then(|json| match serde_json::from_value(json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(scope = %self.scope, kind, "cached transformation has another type: {}", e);
                None
            }
        });
        if value.is_some() {
            state.metrics.transformation_hits += 1;
        } else {
            state.metrics.transformation_misses += 1;
        }
        value
    }

    /// Stores a transformation of `source` under `kind`.
    pub fn cache_transformation<T: Serialize>(
        &self,
        source: &str,
        kind: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_value(value)?;
        let key = transformation_key(kind, &fingerprint(source));
        let size = serde_json::to_vec(&json)?.len() + key.len() + ENTRY_OVERHEAD_BYTES;
        self.state()
            .insert(key, CachedValue::Transformation(json), size, &self.scope);
        Ok(())
    }
}

impl<V: Clone + Serialize> ResultCache<V> {
    /// Looks up the result computed for this exact target content.
    pub fn get(&self, target: &str, content: &str) -> Option<V> {
        let key = result_key(target, &fingerprint(content));
        let mut state = self.state();
        state.metrics.total_requests += 1;
        let value = match state.store.get(&key) {
            Some(CachedValue::Result { value, .. }) => Some(value.clone()),
            _ => None,
        };
        if value.is_some() {
            state.metrics.hits += 1;
        } else {
            state.metrics.misses += 1;
        }
        value
    }

    fn peek(&self, target: &str, content: &str) -> Option<V> {
        let key = result_key(target, &fingerprint(content));
        match self.state().store.peek(&key).map(|entry| &entry.value) {
            Some(CachedValue::Result { value, .. }) => Some(value.clone()),
            _ => None,
        }
    }

    /// Stores a result for this exact target content, replacing any entry
    /// the target had for other content.
    ///
    /// Returns false if the entry alone exceeds the budget. Nothing is
    /// stored then, and the target's previous entry is kept.
    pub fn set(&self, target: &str, content: &str, value: V) -> bool {
        let content_fp = fingerprint(content);
        let key = result_key(target, &content_fp);
        let size = estimate_size(&value) + key.len() + target.len() + ENTRY_OVERHEAD_BYTES;

        let mut state = self.state();
        if size <= state.store.budget_bytes() {
            state.remove_target(target);
        }
        let stored = state.insert(
            key,
            CachedValue::Result {
                target: target.to_string(),
                value,
            },
            size,
            &self.scope,
        );
        if stored {
            state.targets.insert(target.to_string(), content_fp);
        }
        stored
    }

    /// Returns the cached result for this content, or computes and stores it.
    ///
    /// At most one computation per `(target, content)` runs at a time;
    /// concurrent callers for the same key wait for it and then read the
    /// stored value. A failed computation is not cached, so the next waiter
    /// computes in turn.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        target: &str,
        content: &str,
        compute: F,
    ) -> Result<Cached<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let key = result_key(target, &fingerprint(content));
        let key_lock = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(in_flight.entry(key.clone()).or_default())
        };
        let _guard = key_lock.lock().await;

        let outcome = match self.get(target, content) {
            Some(value) => Ok(Cached::Hit(value)),
            None => match compute().await {
                Ok(value) => {
                    self.set(target, content, value.clone());
                    Ok(Cached::Computed(value))
                }
                Err(e) => Err(e),
            },
        };

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .get(&key)
            .is_some_and(|lock| Arc::ptr_eq(lock, &key_lock) && Arc::strong_count(lock) <= 2)
        {
            in_flight.remove(&key);
        }
        outcome
    }

    /// Returns true if a result for this exact content is stored. Counters
    /// and recency are left alone.
    pub fn contains(&self, target: &str, content: &str) -> bool {
        self.peek(target, content).is_some()
    }
}

fn estimate_size<V: Serialize>(value: &V) -> usize {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .unwrap_or_else(|_| std::mem::size_of::<V>())
}
