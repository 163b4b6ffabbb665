//! # Account State Cache
//!
//! The controller's last-known view of the ledger: the identity's encrypted
//! balance handle, the encrypted supply handle, whether the balance handle is
//! non-empty, and the chain timestamp of the refresh that produced them.
//!
//! The four fields move together. The only write path is
//! [`AccountStateCache::commit_if`], which applies a whole [`FetchedState`]
//! while holding the cache lock across the caller's freshness check, so a
//! session switch can never interleave between "still current?" and the
//! write.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::primitives::Handle;

/// Values read by one refresh, not yet applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchedState {
    /// Identity's encrypted balance handle.
    pub balance: Handle,
    /// Contract's encrypted total supply handle.
    pub supply: Handle,
    /// Latest block timestamp at read time.
    pub timestamp: u64,
}

/// The cached view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountState {
    /// `true` iff the balance handle is not the canonical empty handle.
    pub has_balance: bool,
    /// Last observed encrypted balance handle.
    pub encrypted_balance: Option<Handle>,
    /// Last observed encrypted supply handle.
    pub encrypted_supply: Option<Handle>,
    /// Chain time (seconds) of the last committed refresh.
    pub reference_timestamp: u64,
}

impl AccountState {
    /// Derives the full state from a fetch. `has_balance` is computed here
    /// and nowhere else.
    pub fn from_fetched(fetched: &FetchedState) -> Self {
        Self {
            has_balance: !fetched.balance.is_empty(),
            encrypted_balance: Some(fetched.balance),
            encrypted_supply: Some(fetched.supply),
            reference_timestamp: fetched.timestamp,
        }
    }

    /// The reference timestamp as a UTC datetime, if representable.
    pub fn reference_time(&self) -> Option<DateTime<Utc>> {
        if self.reference_timestamp == 0 {
            return None;
        }
        let secs = i64::try_from(self.reference_timestamp).ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }
}

#[derive(Debug, Default)]
struct Slot {
    state: AccountState,
    current: bool,
}

/// Shared, lock-protected [`AccountState`].
#[derive(Debug, Default)]
pub struct AccountStateCache {
    slot: RwLock<Slot>,
}

impl AccountStateCache {
    /// An empty cache. Not current until the first commit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the cached state.
    pub fn snapshot(&self) -> AccountState {
        self.slot.read().state
    }

    /// `true` when the cached values belong to the live session: a refresh
    /// has committed since the last session change.
    pub fn is_current(&self) -> bool {
        self.slot.read().current
    }

    /// Applies `fetched` atomically if `still_current` returns `true`.
    ///
    /// `still_current` runs with the cache write lock held. Returns whether
    /// the state was applied.
    pub fn commit_if(&self, fetched: FetchedState, still_current: impl FnOnce() -> bool) -> bool {
        let mut slot = self.slot.write();
        if !still_current() {
            return false;
        }
        slot.state = AccountState::from_fetched(&fetched);
        slot.current = true;
        true
    }

    /// Flags the cached values as belonging to a previous session. They stay
    /// readable until the next commit replaces them.
    pub fn mark_outdated(&self) {
        self.slot.write().current = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(balance: Handle) -> FetchedState {
        FetchedState {
            balance,
            supply: Handle::from_bytes([9; 32]),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn starts_empty_and_outdated() {
        let cache = AccountStateCache::new();
        assert_eq!(cache.snapshot(), AccountState::default());
        assert!(!cache.is_current());
        assert!(cache.snapshot().reference_time().is_none());
    }

    #[test]
    fn commit_applies_all_fields() {
        let cache = AccountStateCache::new();
        let f = fetched(Handle::from_bytes([1; 32]));
        assert!(cache.commit_if(f, || true));

        let s = cache.snapshot();
        assert!(s.has_balance);
        assert_eq!(s.encrypted_balance, Some(f.balance));
        assert_eq!(s.encrypted_supply, Some(f.supply));
        assert_eq!(s.reference_timestamp, 1_700_000_000);
        assert!(cache.is_current());
        assert_eq!(s.reference_time().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn empty_handle_means_no_balance() {
        let cache = AccountStateCache::new();
        cache.commit_if(fetched(Handle::EMPTY), || true);
        let s = cache.snapshot();
        assert!(!s.has_balance);
        assert_eq!(s.encrypted_balance, Some(Handle::EMPTY));
    }

    #[test]
    fn refused_commit_changes_nothing() {
        let cache = AccountStateCache::new();
        cache.commit_if(fetched(Handle::from_bytes([1; 32])), || true);
        let before = cache.snapshot();

        assert!(!cache.commit_if(fetched(Handle::EMPTY), || false));
        assert_eq!(cache.snapshot(), before);
    }

    #[test]
    fn mark_outdated_keeps_values() {
        let cache = AccountStateCache::new();
        cache.commit_if(fetched(Handle::from_bytes([1; 32])), || true);
        let before = cache.snapshot();
        cache.mark_outdated();
        assert!(!cache.is_current());
        assert_eq!(cache.snapshot(), before);
    }
}
