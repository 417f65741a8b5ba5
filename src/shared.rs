//! Deduplicating, reference-counted store for managed shared values, and the
//! composite shared key that routes entities into chunk groups.

use {
    crate::registry::SharedComponent,
    hashbrown::HashMap,
    parking_lot::RwLock,
    smallvec::{smallvec, SmallVec},
    std::{
        any::{Any, TypeId},
        borrow::Borrow,
        hash::{Hash, Hasher},
        sync::Arc,
    },
};

/// Object-safe view of a shared component value: equality and hash without
/// knowing the concrete type.
pub trait SharedValue: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn SharedValue) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T: SharedComponent> SharedValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn SharedValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |other| self == other)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

impl PartialEq for dyn SharedValue {
    fn eq(&self, other: &Self) -> bool {
        self.dyn_eq(other)
    }
}

impl Eq for dyn SharedValue {}

impl Hash for dyn SharedValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dyn_hash(state)
    }
}

/// Map key sharing the entry's value allocation.
struct ValueKey(Arc<dyn SharedValue>);

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(&*other.0)
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state)
    }
}

impl Borrow<dyn SharedValue + 'static> for ValueKey {
    fn borrow(&self) -> &(dyn SharedValue + 'static) {
        &*self.0
    }
}

struct Entry {
    value: Arc<dyn SharedValue>,
    refs: u32,
}

struct Table {
    map: HashMap<ValueKey, i32>,
    entries: Vec<Option<Entry>>,
    free: Vec<i32>,
}

/// Deduplicating store: one stable index per distinct value, with reference
/// counting. A zero count removes the entry and recycles the index.
pub struct SharedValueStore {
    inner: RwLock<Table>,
}

impl SharedValueStore {
    pub fn new() -> Self {
        SharedValueStore {
            inner: RwLock::new(Table {
                map: HashMap::new(),
                entries: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Intern a value, bumping its reference count.
    pub fn acquire(&self, value: Box<dyn SharedValue>) -> i32 {
        let mut inner = self.inner.write();

        if let Some(&index) = inner.map.get(&*value) {
            inner.entries[index as usize]
                .as_mut()
                .expect("mapped index must be live")
                .refs += 1;
            return index;
        }

        let value: Arc<dyn SharedValue> = Arc::from(value);
        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                inner.entries.push(None);
                inner.entries.len() as i32 - 1
            }
        };
        inner.entries[index as usize] = Some(Entry {
            value: Arc::clone(&value),
            refs: 1,
        });
        inner.map.insert(ValueKey(value), index);
        index
    }

    /// Bump the reference count of an already-interned index.
    pub(crate) fn retain(&self, index: i32) {
        if index < 0 {
            return;
        }
        let mut inner = self.inner.write();
        if let Some(Some(entry)) = inner.entries.get_mut(index as usize) {
            entry.refs += 1;
        }
    }

    /// Drop one reference. At zero the entry is removed and the index
    /// recycled. Idempotent for dead or never-allocated indices.
    pub fn release(&self, index: i32) {
        if index < 0 {
            return;
        }
        let mut inner = self.inner.write();
        let dead = match inner.entries.get_mut(index as usize) {
            Some(Some(entry)) => {
                entry.refs -= 1;
                entry.refs == 0
            }
            _ => return,
        };
        if dead {
            if let Some(entry) = inner.entries[index as usize].take() {
                inner.map.remove(&*entry.value as &dyn SharedValue);
                inner.free.push(index);
            }
        }
    }

    /// Read-only lookup: no reference count change.
    pub fn find(&self, value: &(dyn SharedValue + 'static)) -> Option<i32> {
        self.inner.read().map.get(value).copied()
    }

    /// Clone out the concrete value at an index.
    pub fn value<T: SharedComponent>(&self, index: i32) -> Option<T> {
        if index < 0 {
            return None;
        }
        let inner = self.inner.read();
        let entry = inner.entries.get(index as usize)?.as_ref()?;
        entry.value.as_any().downcast_ref::<T>().cloned()
    }

    pub(crate) fn ref_count(&self, index: i32) -> u32 {
        if index < 0 {
            return 0;
        }
        self.inner
            .read()
            .entries
            .get(index as usize)
            .and_then(|e| e.as_ref())
            .map_or(0, |e| e.refs)
    }

    /// Number of live distinct values.
    pub fn live(&self) -> usize {
        self.inner.read().map.len()
    }
}

/// Composite per-chunk-group key: one slot per shared component type of the
/// archetype, managed slots holding store indices (`-1` unset) and unmanaged
/// slots holding raw 64-bit values (`0` unset).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SharedKey {
    managed: SmallVec<[i32; 2]>,
    unmanaged: SmallVec<[u64; 2]>,
}

impl SharedKey {
    /// The default key: every slot unset.
    pub(crate) fn default_for(managed_slots: usize, unmanaged_slots: usize) -> Self {
        SharedKey {
            managed: smallvec![-1; managed_slots],
            unmanaged: smallvec![0; unmanaged_slots],
        }
    }

    pub(crate) fn with_managed(&self, slot: usize, index: i32) -> Self {
        let mut key = self.clone();
        key.managed[slot] = index;
        key
    }

    pub(crate) fn with_unmanaged(&self, slot: usize, value: u64) -> Self {
        let mut key = self.clone();
        key.unmanaged[slot] = value;
        key
    }

    pub(crate) fn managed(&self, slot: usize) -> i32 {
        self.managed[slot]
    }

    pub(crate) fn unmanaged(&self, slot: usize) -> u64 {
        self.unmanaged[slot]
    }

    pub(crate) fn managed_slots(&self) -> &[i32] {
        &self.managed
    }

    pub fn is_default(&self) -> bool {
        self.managed.iter().all(|i| *i == -1) && self.unmanaged.iter().all(|v| *v == 0)
    }
}
