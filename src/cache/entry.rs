//! Cache Entry Module
//!
//! Defines the per-key slot of a bounded cache: its expiry state, the
//! deletion sentinel used by the remove protocol, and timestamp helpers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{SystemTime, UNIX_EPOCH};

// == Expiry ==
/// Expiry state of a cache entry.
///
/// `Deleted` is the removal sentinel: the entry is logically gone and
/// pending physical removal from the table. `Deleted` implies the entry
/// holds no value; a get-or-create lookup that observes it resurrects the
/// entry to a live state, cancelling the pending removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Expires at the given Unix-millisecond timestamp
    At(u64),
    /// Never ages out
    Never,
    /// Marked for physical removal from the table
    Deleted,
}

impl Expiry {
    /// Computes a live expiry from a TTL, starting now.
    ///
    /// A TTL of 0 means the entry never ages out; callers are expected to
    /// have already substituted the cache-wide default for a 0 TTL.
    pub fn live(now_ms: u64, ttl_ms: u64) -> Self {
        if ttl_ms == 0 {
            Expiry::Never
        } else {
            // An oversized TTL saturates instead of wrapping into the past
            Expiry::At(now_ms.saturating_add(ttl_ms))
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Expiry::Deleted)
    }

    /// Whether the entry's age bound has elapsed.
    ///
    /// Boundary condition: an entry is expired once the current time is
    /// greater than or equal to its expiry timestamp. A deleted entry is
    /// always expired.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self {
            Expiry::At(expires) => now_ms >= *expires,
            Expiry::Never => false,
            Expiry::Deleted => true,
        }
    }
}

// == Entry State ==
/// Mutable state of a cache entry, guarded by the slot's own lock.
#[derive(Debug)]
pub struct EntryState<V> {
    /// The stored value; None means deleted or not yet populated
    pub value: Option<Arc<V>>,
    /// Expiry state, including the deletion sentinel
    pub expires: Expiry,
    /// Caller-tracked size in bytes, counted into the table aggregate
    pub size: u64,
}

// == Slot ==
/// One table slot. The table owns the slot; operations clone the `Arc`
/// handle out of a short table-locked scope and only then lock the entry,
/// which enforces the table-before-entry lock order by construction.
#[derive(Debug)]
pub struct Slot<V> {
    state: Mutex<EntryState<V>>,
}

impl<V> Slot<V> {
    /// Creates an empty, live slot with the given expiry.
    pub fn empty(expires: Expiry) -> Self {
        Self {
            state: Mutex::new(EntryState {
                value: None,
                expires,
                size: 0,
            }),
        }
    }

    /// Locks the entry, recovering from a poisoned lock.
    pub fn lock(&self) -> MutexGuard<'_, EntryState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attempts to lock the entry without blocking.
    ///
    /// Used by the eviction sweep: a contended entry stalls the sweep
    /// rather than blocking it, keeping eviction best-effort.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, EntryState<V>>> {
        match self.state.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_live_with_ttl() {
        let now = current_timestamp_ms();
        let expiry = Expiry::live(now, 5_000);

        assert_eq!(expiry, Expiry::At(now + 5_000));
        assert!(!expiry.is_expired(now));
        assert!(!expiry.is_deleted());
    }

    #[test]
    fn test_expiry_live_zero_ttl_never_expires() {
        let now = current_timestamp_ms();
        let expiry = Expiry::live(now, 0);

        assert_eq!(expiry, Expiry::Never);
        assert!(!expiry.is_expired(now + u64::MAX / 2));
    }

    #[test]
    fn test_expiry_boundary_condition() {
        let now = current_timestamp_ms();
        let expiry = Expiry::At(now);

        // Expired when current time >= expiry timestamp
        assert!(expiry.is_expired(now), "Entry should be expired at boundary");
        assert!(!expiry.is_expired(now - 1));
    }

    #[test]
    fn test_expiry_huge_ttl_saturates() {
        let now = current_timestamp_ms();
        let expiry = Expiry::live(now, u64::MAX);

        assert_eq!(expiry, Expiry::At(u64::MAX));
        assert!(!expiry.is_expired(now));
        assert!(!expiry.is_expired(u64::MAX - 1));
    }

    #[test]
    fn test_deleted_sentinel() {
        let expiry = Expiry::Deleted;

        assert!(expiry.is_deleted());
        assert!(expiry.is_expired(0));
    }

    #[test]
    fn test_slot_empty_has_no_value() {
        let slot: Slot<String> = Slot::empty(Expiry::Never);
        let state = slot.lock();

        assert!(state.value.is_none());
        assert_eq!(state.expires, Expiry::Never);
        assert_eq!(state.size, 0);
    }

    #[test]
    fn test_slot_try_lock_contended() {
        let slot: Slot<String> = Slot::empty(Expiry::Never);

        let guard = slot.lock();
        assert!(slot.try_lock().is_none());
        drop(guard);
        assert!(slot.try_lock().is_some());
    }
}
