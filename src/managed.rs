//! Ticketed store for managed component objects.

use {
    parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard},
    std::any::Any,
};

type Object = Box<dyn Any + Send + Sync>;

/// Read guard over a stored object, typed to the component.
pub type ManagedRef<'a, T> = MappedRwLockReadGuard<'a, T>;

struct Slots {
    slots: Vec<Option<Object>>,
    free: Vec<i32>,
}

/// Maps integer tickets to opaque objects with free-list recycling.
///
/// `store` returns a stable non-negative ticket; `get(ticket)` yields the
/// object until `release(ticket)`, after which the ticket may be reused by a
/// later `store`. Release is idempotent; releasing a never-allocated ticket
/// is a no-op.
pub struct ManagedStore {
    inner: RwLock<Slots>,
}

impl ManagedStore {
    pub fn new() -> Self {
        ManagedStore {
            inner: RwLock::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Store an object and return its ticket, preferring recycled tickets.
    pub fn store(&self, object: Object) -> i32 {
        let mut inner = self.inner.write();
        match inner.free.pop() {
            Some(ticket) => {
                debug_assert!(inner.slots[ticket as usize].is_none());
                inner.slots[ticket as usize] = Some(object);
                ticket
            }
            None => {
                let ticket = inner.slots.len() as i32;
                inner.slots.push(Some(object));
                ticket
            }
        }
    }

    /// Typed view of a live object. `None` when the ticket is dead, was
    /// never allocated, or holds a different type.
    pub fn get<T: 'static>(&self, ticket: i32) -> Option<MappedRwLockReadGuard<'_, T>> {
        if ticket < 0 {
            return None;
        }
        RwLockReadGuard::try_map(self.inner.read(), |inner| {
            inner
                .slots
                .get(ticket as usize)?
                .as_ref()?
                .downcast_ref::<T>()
        })
        .ok()
    }

    /// True when the ticket currently maps to a live object.
    pub fn is_live(&self, ticket: i32) -> bool {
        if ticket < 0 {
            return false;
        }
        self.inner
            .read()
            .slots
            .get(ticket as usize)
            .map_or(false, |slot| slot.is_some())
    }

    /// Release a ticket, returning the object it held. Idempotent.
    pub fn release(&self, ticket: i32) -> Option<Object> {
        if ticket < 0 {
            return None;
        }
        let mut inner = self.inner.write();
        let object = inner.slots.get_mut(ticket as usize)?.take()?;
        inner.free.push(ticket);
        Some(object)
    }

    /// Number of live objects.
    pub fn live(&self) -> usize {
        let inner = self.inner.read();
        inner.slots.len() - inner.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_get_release_round_trip() {
        let store = ManagedStore::new();
        let ticket = store.store(Box::new(String::from("hello")));

        assert_eq!(store.get::<String>(ticket).unwrap().as_str(), "hello");
        assert!(store.get::<i32>(ticket).is_none());

        let released = store.release(ticket).unwrap();
        assert_eq!(released.downcast_ref::<String>().unwrap(), "hello");
        assert!(store.get::<String>(ticket).is_none());
    }

    #[test]
    fn release_is_idempotent() {
        let store = ManagedStore::new();
        let ticket = store.store(Box::new(1u32));

        assert!(store.release(ticket).is_some());
        assert!(store.release(ticket).is_none());
        assert!(store.release(9000).is_none());
        assert!(store.release(-1).is_none());
        assert_eq!(store.live(), 0);
    }

    #[test]
    fn released_tickets_are_recycled_first() {
        let store = ManagedStore::new();
        let a = store.store(Box::new(1u32));
        let b = store.store(Box::new(2u32));
        assert_ne!(a, b);

        store.release(a);
        let c = store.store(Box::new(3u32));
        assert_eq!(c, a);
        assert_eq!(*store.get::<u32>(c).unwrap(), 3);
        assert_eq!(*store.get::<u32>(b).unwrap(), 2);
    }

    #[test]
    fn concurrent_store_release() {
        use std::sync::Arc;

        let store = Arc::new(ManagedStore::new());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100u32 {
                        let ticket = store.store(Box::new(worker * 1000 + i));
                        assert!(store.is_live(ticket));
                        store.release(ticket);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.live(), 0);
    }
}
