//! Bounded Cache Module
//!
//! Generic thread-safe cache combining a key index with explicit recency
//! tracking, TTL expiry and size-bounded eviction. Eviction is swept
//! opportunistically on every insertion; there is no background thread.
//!
//! Lock discipline: the table lock is always acquired before any entry
//! lock, never the reverse. Public operations take the table lock in a
//! short scope that only hands out a slot handle; the entry lock is taken
//! after that scope ends. The sweep and the second phase of removal nest
//! the entry lock strictly inside the table lock, which is the same order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::trace;

use crate::cache::entry::{current_timestamp_ms, EntryState, Expiry, Slot};
use crate::cache::lru::RecencyList;
use crate::cache::stats::{CacheStats, StatsSnapshot};
use crate::config::CacheConfig;
use crate::error::Result;

// == Evict Listener ==
/// Callback invoked whenever a value leaves the cache, through eviction,
/// `set`, `replace`, `remove`, `clear` or `filter_entries`.
///
/// The listener runs while an entry lock (and sometimes the table lock) is
/// held and must not call back into the cache.
pub type EvictListener<V> = Box<dyn Fn(&str, &Arc<V>) + Send + Sync>;

// == Table ==
/// The structures guarded by the table lock.
struct Table<V> {
    slots: HashMap<String, Arc<Slot<V>>>,
    order: RecencyList,
}

// == Bounded Cache ==
/// A thread-safe, access-ordered map enforcing max-entry-count,
/// max-total-size and max-age eviction.
///
/// Values are handed out as `Arc` clones: a caller keeps its copy alive
/// even if a concurrent eviction drops the table's own reference, and must
/// treat the value as immutable.
pub struct BoundedCache<V> {
    table: Mutex<Table<V>>,
    /// Aggregate of the caller-tracked entry sizes; approximate by design.
    current_size: AtomicU64,
    stats: CacheStats,
    max_entries: usize,
    max_size_bytes: u64,
    max_age_ms: u64,
    evict_listener: Option<EvictListener<V>>,
}

impl<V> BoundedCache<V> {
    // == Constructor ==
    /// Creates a new empty cache bounded by the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            table: Mutex::new(Table {
                slots: HashMap::new(),
                order: RecencyList::new(),
            }),
            current_size: AtomicU64::new(0),
            stats: CacheStats::new(),
            max_entries: config.max_entries,
            max_size_bytes: config.max_size_bytes,
            max_age_ms: config.max_age_ms,
            evict_listener: None,
        }
    }

    /// Installs the eviction listener. Must be called before the cache is
    /// shared between threads.
    pub fn set_evict_listener(&mut self, listener: EvictListener<V>) {
        self.evict_listener = Some(listener);
    }

    // == Get ==
    /// Returns the current value for `key`, or None.
    ///
    /// Touches the recency order but does not evict: an entry past its TTL
    /// is still returned until an insertion sweeps it out.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let slot = {
            let mut table = self.lock_table();
            match table.slots.get(key) {
                Some(slot) => {
                    let slot = slot.clone();
                    table.order.touch(key);
                    slot
                }
                None => {
                    self.stats.record_miss();
                    return None;
                }
            }
        };

        let state = slot.lock();
        match &state.value {
            Some(value) => {
                self.stats.record_hit();
                Some(value.clone())
            }
            None => {
                // Deleted or not yet populated
                self.stats.record_miss();
                None
            }
        }
    }

    // == Add ==
    /// Inserts `value` if and only if there is no live value for `key`.
    ///
    /// Returns the value in the cache after this call, existing or new.
    /// A TTL of 0 uses the cache-wide default max age.
    pub fn add(&self, key: &str, value: V, ttl_ms: u64) -> Arc<V> {
        let ttl = self.resolve_ttl(ttl_ms);
        let mut value = Some(value);

        loop {
            let slot = self.slot_for_insert(key);
            {
                let mut state = slot.lock();
                if !state.expires.is_deleted() {
                    if let Some(existing) = &state.value {
                        return existing.clone();
                    }
                    let inserted = Arc::new(value.take().expect("value consumed once"));
                    state.expires = Expiry::live(current_timestamp_ms(), ttl);
                    state.size = 0;
                    state.value = Some(inserted.clone());
                    return inserted;
                }
            }
            // The entry was re-marked for deletion between lookup and lock;
            // retry until the slot is live or physically gone.
            thread::yield_now();
        }
    }

    // == Add With Factory ==
    /// Creates and inserts a value if and only if there is no live value
    /// for `key`. The factory is not invoked when a value already exists.
    ///
    /// The factory runs under the entry lock and must not call back into
    /// the cache. On factory failure the error propagates and the entry is
    /// left valueless; a later `add` will populate it.
    pub fn add_with<F>(&self, key: &str, ttl_ms: u64, create: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        let ttl = self.resolve_ttl(ttl_ms);
        let mut create = Some(create);

        loop {
            let slot = self.slot_for_insert(key);
            {
                let mut state = slot.lock();
                if !state.expires.is_deleted() {
                    if let Some(existing) = &state.value {
                        return Ok(existing.clone());
                    }
                    state.expires = Expiry::live(current_timestamp_ms(), ttl);
                    let created = Arc::new((create.take().expect("factory consumed once"))()?);
                    state.size = 0;
                    state.value = Some(created.clone());
                    return Ok(created);
                }
            }
            thread::yield_now();
        }
    }

    // == Set ==
    /// Unconditionally inserts `value`, replacing any previous value.
    ///
    /// Returns the replaced value, or None. The eviction listener fires
    /// for the replaced value.
    pub fn set(&self, key: &str, value: V, ttl_ms: u64) -> Option<Arc<V>> {
        self.set_shared(key, Arc::new(value), ttl_ms)
    }

    /// `set` over an already-shared value, so a caller can keep a handle
    /// to exactly what it installed.
    pub(crate) fn set_shared(&self, key: &str, value: Arc<V>, ttl_ms: u64) -> Option<Arc<V>> {
        let ttl = self.resolve_ttl(ttl_ms);
        let mut value = Some(value);

        loop {
            let slot = self.slot_for_insert(key);
            {
                let mut state = slot.lock();
                if !state.expires.is_deleted() {
                    let old = state.value.take();
                    if let Some(old_value) = &old {
                        self.notify_evict(key, old_value);
                    }
                    self.sub_size(state.size);
                    state.size = 0;
                    state.expires = Expiry::live(current_timestamp_ms(), ttl);
                    state.value = Some(value.take().expect("value consumed once"));
                    return old;
                }
            }
            thread::yield_now();
        }
    }

    // == Replace ==
    /// Replaces the value for `key` if and only if a live value exists.
    ///
    /// Returns the replaced value; a missing or deleted key is a no-op
    /// returning None.
    pub fn replace(&self, key: &str, value: V, ttl_ms: u64) -> Option<Arc<V>> {
        let ttl = self.resolve_ttl(ttl_ms);

        let slot = {
            let mut table = self.lock_table();
            match table.slots.get(key) {
                Some(slot) => {
                    let slot = slot.clone();
                    table.order.touch(key);
                    slot
                }
                None => return None,
            }
        };

        let mut state = slot.lock();
        if state.expires.is_deleted() || state.value.is_none() {
            return None;
        }

        let old = state.value.take().expect("checked above");
        self.notify_evict(key, &old);
        self.sub_size(state.size);
        state.size = 0;
        state.expires = Expiry::live(current_timestamp_ms(), ttl);
        state.value = Some(Arc::new(value));
        Some(old)
    }

    // == Remove ==
    /// Removes and returns the value for `key`, or None.
    ///
    /// Two-phase protocol: the entry is first marked deleted under the
    /// entry lock alone, leaving a window in which a concurrent
    /// get-or-create can resurrect it; the physical unlink then happens
    /// under table lock then entry lock, and only if the entry is still
    /// marked deleted.
    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        let slot = {
            let table = self.lock_table();
            table.slots.get(key)?.clone()
        };

        let old = {
            let mut state = slot.lock();
            let old = state.value.take();
            if old.is_some() {
                if let Some(old_value) = &old {
                    self.notify_evict(key, old_value);
                }
                self.sub_size(state.size);
                state.size = 0;
                state.expires = Expiry::Deleted;
            }
            old
        };

        self.unlink_if_deleted(key, &slot);
        old
    }

    // == Clear ==
    /// Removes all entries, invoking the eviction listener for each live
    /// value. Holds the table lock for the whole operation.
    pub fn clear(&self) {
        let mut table = self.lock_table();
        for (key, slot) in table.slots.iter() {
            let mut state = slot.lock();
            if let Some(value) = state.value.take() {
                self.notify_evict(key, &value);
            }
            state.size = 0;
            state.expires = Expiry::Deleted;
        }
        table.slots.clear();
        table.order.clear();
        self.current_size.store(0, Ordering::Relaxed);
    }

    // == Filter Entries ==
    /// Removes every live entry for which `is_stale` returns true.
    ///
    /// Works on a snapshot of the table; each removal follows the same
    /// mark-then-unlink protocol as `remove`, so a concurrent re-creation
    /// of a filtered key wins over the unlink.
    pub fn filter_entries<F>(&self, is_stale: F)
    where
        F: Fn(&str, &Arc<V>) -> bool,
    {
        let snapshot: Vec<(String, Arc<Slot<V>>)> = {
            let table = self.lock_table();
            table
                .slots
                .iter()
                .map(|(key, slot)| (key.clone(), slot.clone()))
                .collect()
        };

        for (key, slot) in snapshot {
            let marked = {
                let mut state = slot.lock();
                let stale = !state.expires.is_deleted()
                    && state.value.as_ref().is_some_and(|value| is_stale(&key, value));
                if stale {
                    let value = state.value.take().expect("checked above");
                    self.notify_evict(&key, &value);
                    self.sub_size(state.size);
                    state.size = 0;
                    state.expires = Expiry::Deleted;
                }
                stale
            };

            if marked {
                self.unlink_if_deleted(&key, &slot);
            }
        }
    }

    // == Update Size ==
    /// Records the caller-tracked size of the entry for `key`, adjusting
    /// the aggregate the eviction sweep compares against `max_size_bytes`.
    pub fn update_size(&self, key: &str, size_bytes: u64) {
        let slot = {
            let table = self.lock_table();
            match table.slots.get(key) {
                Some(slot) => slot.clone(),
                None => return,
            }
        };

        let mut state = slot.lock();
        if state.expires.is_deleted() {
            return;
        }
        let old = state.size;
        state.size = size_bytes;
        drop(state);

        if size_bytes >= old {
            self.current_size
                .fetch_add(size_bytes - old, Ordering::Relaxed);
        } else {
            self.sub_size(old - size_bytes);
        }
    }

    // == Stats ==
    /// Returns a snapshot of the performance counters.
    pub fn stats(&self) -> StatsSnapshot {
        let entries = self.len();
        self.stats.snapshot(entries)
    }

    // == Length ==
    /// Returns the current number of table entries.
    pub fn len(&self) -> usize {
        self.lock_table().slots.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current aggregate of caller-tracked entry sizes, in bytes.
    pub fn tracked_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    // == Internals ==

    fn lock_table(&self) -> MutexGuard<'_, Table<V>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// TTL of 0 means the cache-wide default max age.
    fn resolve_ttl(&self, ttl_ms: u64) -> u64 {
        if ttl_ms == 0 {
            self.max_age_ms
        } else {
            ttl_ms
        }
    }

    /// Returns the slot for `key`, creating it if missing. A slot found
    /// carrying the deletion sentinel is resurrected to a live age here,
    /// under the table lock, which cancels the pending physical removal.
    /// New insertions trigger the eviction sweep.
    fn slot_for_insert(&self, key: &str) -> Arc<Slot<V>> {
        let mut table = self.lock_table();

        if let Some(slot) = table.slots.get(key).cloned() {
            {
                let mut state = slot.lock();
                if state.expires.is_deleted() {
                    state.expires = Expiry::live(current_timestamp_ms(), self.max_age_ms);
                }
            }
            table.order.touch(key);
            return slot;
        }

        let slot = Arc::new(Slot::empty(Expiry::live(
            current_timestamp_ms(),
            self.max_age_ms,
        )));
        table.slots.insert(key.to_string(), slot.clone());
        table.order.touch(key);
        self.evict_excess(&mut table);
        slot
    }

    /// Eviction sweep, run with the table lock held after every insertion.
    ///
    /// Walks from the least-recently-used end and removes entries while
    /// the eldest one qualifies: table over `max_entries`, aggregate size
    /// over `max_size_bytes`, or entry past its age bound. A contended
    /// entry lock stalls the sweep; eviction is best-effort, not exact.
    fn evict_excess(&self, table: &mut Table<V>) {
        let now = current_timestamp_ms();

        loop {
            let key = match table.order.peek_oldest() {
                Some(key) => key.clone(),
                None => break,
            };
            let slot = match table.slots.get(&key) {
                Some(slot) => slot.clone(),
                None => {
                    // Stray order entry; discard and keep walking.
                    table.order.remove(&key);
                    continue;
                }
            };

            // Entry lock nested inside the table lock (fixed order).
            let mut state = match slot.try_lock() {
                Some(state) => state,
                None => break,
            };
            if !self.over_limit(table.slots.len(), &state, now) {
                break;
            }

            if let Some(value) = state.value.take() {
                self.notify_evict(&key, &value);
            }
            self.sub_size(state.size);
            state.size = 0;
            state.expires = Expiry::Deleted;
            drop(state);

            table.slots.remove(&key);
            table.order.remove(&key);
            self.stats.record_eviction();
            trace!(key = %key, "evicted cache entry");
        }
    }

    /// Whether the given (eldest) entry qualifies for eviction.
    fn over_limit(&self, entries: usize, state: &EntryState<V>, now_ms: u64) -> bool {
        (self.max_entries != 0 && entries > self.max_entries)
            || (self.max_size_bytes != 0
                && self.current_size.load(Ordering::Relaxed) > self.max_size_bytes)
            || state.expires.is_expired(now_ms)
    }

    /// Second phase of the deletion protocol: physically unlink the slot,
    /// but only if it is still marked deleted and still the slot mapped
    /// under `key`; otherwise the deletion was cancelled.
    fn unlink_if_deleted(&self, key: &str, slot: &Arc<Slot<V>>) {
        let mut table = self.lock_table();
        let state = slot.lock();
        if state.expires.is_deleted()
            && table
                .slots
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            table.slots.remove(key);
            table.order.remove(key);
        }
    }

    fn notify_evict(&self, key: &str, value: &Arc<V>) {
        if let Some(listener) = &self.evict_listener {
            listener(key, value);
        }
    }

    fn sub_size(&self, bytes: u64) {
        if bytes != 0 {
            let _ = self
                .current_size
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                    Some(current.saturating_sub(bytes))
                });
        }
    }
}

impl<V> std::fmt::Debug for BoundedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("entries", &self.len())
            .field("tracked_size", &self.tracked_size())
            .field("max_entries", &self.max_entries)
            .field("max_size_bytes", &self.max_size_bytes)
            .field("max_age_ms", &self.max_age_ms)
            .finish()
    }
}
