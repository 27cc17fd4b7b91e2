//! Per-key async locks for read-modify-write updates.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use stowage_codec::Key;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = (String, Key);

/// Async mutexes keyed by (collection, key), created on demand and removed
/// once nobody holds or waits for them.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<Slot, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    /// Waits until the caller is the only holder for `(collection, key)`.
    ///
    /// Waiters are served in arrival order. A waiter that is dropped before
    /// acquiring the lock gives up its place and its map entry.
    pub(crate) async fn lock(&self, collection: &str, key: &Key) -> KeyGuard<'_> {
        let slot = (collection.to_string(), key.clone());
        let lock = Arc::clone(self.locks.lock().entry(slot.clone()).or_default());
        let entry = Entry { locks: self, slot };
        let guard = lock.lock_owned().await;
        KeyGuard {
            _guard: guard,
            _entry: entry,
        }
    }

    /// Number of keys with a live lock.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Interest in one map entry; the last one out removes it.
#[derive(Debug)]
struct Entry<'a> {
    locks: &'a KeyLocks,
    slot: Slot,
}

impl Drop for Entry<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.locks.lock();
        if locks
            .get(&self.slot)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.slot);
        }
    }
}

/// Holds one key's lock until dropped.
#[derive(Debug)]
pub(crate) struct KeyGuard<'a> {
    // Released before the entry is checked.
    _guard: OwnedMutexGuard<()>,
    _entry: Entry<'a>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::LocalPool;
    use futures::task::LocalSpawnExt;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn entries_are_removed_after_use() {
        let locks = KeyLocks::default();
        futures::executor::block_on(async {
            let guard = locks.lock("users", &Key::Integer(1)).await;
            assert_eq!(locks.len(), 1);
            drop(guard);
        });
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn cancelled_waiter_leaves_no_entry() {
        let locks = KeyLocks::default();
        futures::executor::block_on(async {
            let held = locks.lock("users", &Key::Integer(1)).await;
            let mut waiting = Box::pin(locks.lock("users", &Key::Integer(1)));
            assert!(futures::poll!(waiting.as_mut()).is_pending());

            drop(held);
            assert_eq!(locks.len(), 1);
            drop(waiting);
        });
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn different_keys_do_not_block() {
        let locks = KeyLocks::default();
        futures::executor::block_on(async {
            let _a = locks.lock("users", &Key::Integer(1)).await;
            let _b = locks.lock("users", &Key::Integer(2)).await;
            let _c = locks.lock("other", &Key::Integer(1)).await;
            assert_eq!(locks.len(), 3);
        });
    }

    #[test]
    fn same_key_is_exclusive_and_fifo() {
        let locks = Rc::new(KeyLocks::default());
        let events = Rc::new(RefCell::new(Vec::new()));
        let (release, released) = futures::channel::oneshot::channel::<()>();
        let mut pool = LocalPool::new();
        let spawner = pool.spawner();

        {
            let locks = Rc::clone(&locks);
            let events = Rc::clone(&events);
            spawner
                .spawn_local(async move {
                    let _guard = locks.lock("users", &Key::Integer(1)).await;
                    events.borrow_mut().push("first acquired");
                    released.await.ok();
                    events.borrow_mut().push("first released");
                })
                .unwrap();
        }
        for name in ["second", "third"] {
            let locks = Rc::clone(&locks);
            let events = Rc::clone(&events);
            spawner
                .spawn_local(async move {
                    let _guard = locks.lock("users", &Key::Integer(1)).await;
                    events.borrow_mut().push(name);
                })
                .unwrap();
        }

        pool.run_until_stalled();
        assert_eq!(*events.borrow(), vec!["first acquired"]);

        release.send(()).unwrap();
        pool.run();
        assert_eq!(
            *events.borrow(),
            vec!["first acquired", "first released", "second", "third"]
        );
        assert_eq!(locks.len(), 0);
    }
}
