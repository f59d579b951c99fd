//! Per-source exclusivity.
//!
//! At most one run per source is in flight inside a process. Cross-process
//! exclusion is the revision store's job (predecessor check on insert).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

type Slots = Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>;

/// Map of per-source async mutexes. Clones share the map.
///
/// A slot lives only while some run holds or waits for it.
#[derive(Clone, Default)]
pub struct SourceLocks {
    slots: Slots,
}

/// Held for the duration of a run; releases the source on drop.
pub struct SourceGuard {
    source_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Slots,
}

impl SourceGuard {
    pub fn source_id(&self) -> Uuid {
        self.source_id
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.guard.take();
        prune(&self.slots, self.source_id);
    }
}

/// Drop the slot if nothing but the map references it.
fn prune(slots: &Slots, source_id: Uuid) {
    let mut slots = lock_slots(slots);
    if slots
        .get(&source_id)
        .is_some_and(|slot| Arc::strong_count(slot) == 1)
    {
        slots.remove(&source_id);
    }
}

// The map only holds Arcs, so a poisoned lock still has valid contents.
fn lock_slots(slots: &Slots) -> MutexGuard<'_, HashMap<Uuid, Arc<AsyncMutex<()>>>> {
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

impl SourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, source_id: Uuid) -> Arc<AsyncMutex<()>> {
        lock_slots(&self.slots).entry(source_id).or_default().clone()
    }

    fn guard(&self, source_id: Uuid, guard: OwnedMutexGuard<()>) -> SourceGuard {
        SourceGuard {
            source_id,
            guard: Some(guard),
            slots: self.slots.clone(),
        }
    }

    /// Wait until the source is free.
    pub async fn acquire(&self, source_id: Uuid) -> SourceGuard {
        let guard = self.slot(source_id).lock_owned().await;
        self.guard(source_id, guard)
    }

    /// Take the source if it is free.
    pub fn try_acquire(&self, source_id: Uuid) -> Option<SourceGuard> {
        self.slot(source_id)
            .try_lock_owned()
            .ok()
            .map(|guard| self.guard(source_id, guard))
    }

    pub fn is_locked(&self, source_id: Uuid) -> bool {
        lock_slots(&self.slots)
            .get(&source_id)
            .is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Number of sources currently held or waited on.
    pub fn tracked(&self) -> usize {
        lock_slots(&self.slots).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exclusive_per_source() {
        let locks = SourceLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let guard = locks.acquire(a).await;
        assert_eq!(guard.source_id(), a);
        assert!(locks.try_acquire(a).is_none());
        assert!(locks.try_acquire(b).is_some());
        assert!(locks.is_locked(a));

        drop(guard);
        assert!(!locks.is_locked(a));
        assert!(locks.try_acquire(a).is_some());
    }

    #[tokio::test]
    async fn test_released_slots_are_dropped() {
        let locks = SourceLocks::new();
        let a = Uuid::new_v4();

        let guard = locks.acquire(a).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(a).await })
        };
        tokio::task::yield_now().await;
        assert!(locks.try_acquire(a).is_none());
        assert_eq!(locks.tracked(), 1);

        drop(guard);
        let second = waiter.await.unwrap();
        // The waiter still holds the slot.
        assert_eq!(locks.tracked(), 1);
        assert!(locks.is_locked(a));

        drop(second);
        assert_eq!(locks.tracked(), 0);
        assert!(!locks.is_locked(a));

        for _ in 0..100 {
            drop(locks.try_acquire(Uuid::new_v4()));
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_clones_share_locks() {
        let locks = SourceLocks::new();
        let other = locks.clone();
        let id = Uuid::new_v4();

        let _guard = locks.acquire(id).await;
        assert!(other.try_acquire(id).is_none());
    }
}
