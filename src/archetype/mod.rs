//! Archetypes: one signature (component mask) with chunk groups keyed by
//! shared-component values.

mod chunk;
mod group;

pub use self::{chunk::Chunk, group::ChunkGroup};

pub(crate) use self::chunk::ChunkLayout;

use {
    crate::{
        layout::ComponentKind,
        mask::ComponentMask,
        registry::{ComponentId, ComponentRegistry},
        shared::{SharedKey, SharedValueStore},
    },
    hashbrown::{hash_map::Entry, HashMap},
    smallvec::SmallVec,
};

/// All entities whose component signature equals one mask.
///
/// Holds the kind partition of the signature's type ids, the chunk layout
/// derived from the unmanaged columns, and one chunk group per distinct
/// shared key. The default-key group is created eagerly with the archetype.
pub struct Archetype {
    mask: ComponentMask,
    layout: ChunkLayout,
    /// Unmanaged-instance ids in canonical (ascending) column order.
    columns: Box<[ComponentId]>,
    /// Managed-instance ids, ascending; index is the ticket column.
    managed: Box<[ComponentId]>,
    /// Managed-shared ids, ascending; index is the key slot.
    shared_managed: Box<[ComponentId]>,
    /// Unmanaged-shared ids, ascending; index is the key slot.
    shared_unmanaged: Box<[ComponentId]>,
    groups: HashMap<SharedKey, ChunkGroup>,
}

impl Archetype {
    /// Build the archetype for `mask`, deriving chunk capacity from the
    /// per-chunk byte budget.
    pub(crate) fn new(
        mask: ComponentMask,
        registry: &ComponentRegistry,
        chunk_budget_bytes: usize,
        default_chunk_capacity: usize,
    ) -> Self {
        let mut columns = SmallVec::<[ComponentId; 8]>::new();
        let mut sizes = SmallVec::<[usize; 8]>::new();
        let mut managed = SmallVec::<[ComponentId; 4]>::new();
        let mut shared_managed = SmallVec::<[ComponentId; 2]>::new();
        let mut shared_unmanaged = SmallVec::<[ComponentId; 2]>::new();

        // Mask iteration is ascending, so every partition is sorted.
        for id in mask.iter() {
            match registry.kind(id) {
                ComponentKind::Unmanaged => {
                    columns.push(id);
                    sizes.push(registry.descriptor(id).total_size());
                }
                ComponentKind::Managed => managed.push(id),
                ComponentKind::ManagedShared => shared_managed.push(id),
                ComponentKind::UnmanagedShared => shared_unmanaged.push(id),
            }
        }

        let payload: usize = sizes.iter().sum();
        let capacity = if payload == 0 {
            default_chunk_capacity.max(1)
        } else {
            (chunk_budget_bytes / payload).max(1)
        };

        let layout = ChunkLayout::new(capacity, &sizes, managed.len());
        log::trace!(
            "new archetype: {} columns, {} managed, {} shared slots, capacity {}",
            columns.len(),
            managed.len(),
            shared_managed.len() + shared_unmanaged.len(),
            capacity,
        );

        let default_key = SharedKey::default_for(shared_managed.len(), shared_unmanaged.len());
        let mut groups = HashMap::new();
        groups.insert(
            default_key.clone(),
            ChunkGroup::new(default_key, &layout),
        );

        Archetype {
            mask,
            layout,
            columns: columns.into_vec().into_boxed_slice(),
            managed: managed.into_vec().into_boxed_slice(),
            shared_managed: shared_managed.into_vec().into_boxed_slice(),
            shared_unmanaged: shared_unmanaged.into_vec().into_boxed_slice(),
            groups,
        }
    }

    pub fn mask(&self) -> &ComponentMask {
        &self.mask
    }

    /// Slots one chunk of this archetype holds.
    pub fn chunk_capacity(&self) -> usize {
        self.layout.capacity()
    }

    /// The all-unset key sized for this archetype's shared slots.
    pub(crate) fn default_key(&self) -> SharedKey {
        SharedKey::default_for(self.shared_managed.len(), self.shared_unmanaged.len())
    }

    /// Canonical column index of an unmanaged-instance type, if present.
    pub fn column_of(&self, id: ComponentId) -> Option<usize> {
        self.columns.binary_search(&id).ok()
    }

    /// Ticket column index of a managed-instance type, if present.
    pub fn managed_column_of(&self, id: ComponentId) -> Option<usize> {
        self.managed.binary_search(&id).ok()
    }

    /// Key slot of a managed-shared type, if present.
    pub fn shared_managed_slot(&self, id: ComponentId) -> Option<usize> {
        self.shared_managed.binary_search(&id).ok()
    }

    /// Key slot of an unmanaged-shared type, if present.
    pub fn shared_unmanaged_slot(&self, id: ComponentId) -> Option<usize> {
        self.shared_unmanaged.binary_search(&id).ok()
    }

    pub(crate) fn column_ids(&self) -> &[ComponentId] {
        &self.columns
    }

    pub(crate) fn managed_ids(&self) -> &[ComponentId] {
        &self.managed
    }

    pub(crate) fn shared_managed_ids(&self) -> &[ComponentId] {
        &self.shared_managed
    }

    pub(crate) fn shared_unmanaged_ids(&self) -> &[ComponentId] {
        &self.shared_unmanaged
    }

    /// Place an entity into the group at `key`, creating the group on first
    /// use. Group creation pins the key's shared-value indices in the store.
    pub(crate) fn add_entity(
        &mut self,
        key: &SharedKey,
        entity: i32,
        store: &SharedValueStore,
    ) -> (usize, usize) {
        let layout = &self.layout;
        let group = match self.groups.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                for index in entry.key().managed_slots() {
                    store.retain(*index);
                }
                let group = ChunkGroup::new(entry.key().clone(), layout);
                entry.insert(group)
            }
        };
        group.add_entity(entity, layout)
    }

    pub(crate) fn group(&self, key: &SharedKey) -> Option<&ChunkGroup> {
        self.groups.get(key)
    }

    pub(crate) fn groups(&self) -> impl Iterator<Item = &ChunkGroup> {
        self.groups.values()
    }

    pub fn entity_count(&self) -> usize {
        self.groups.values().map(|group| group.entity_count()).sum()
    }

    /// Chunks allocated across all groups.
    pub fn chunk_count(&self) -> usize {
        self.groups.values().map(|group| group.chunk_count()).sum()
    }

    /// Drop one reference per group on every shared-value index pinned by a
    /// group key. Called when the world closes.
    pub(crate) fn release_shared_refs(&self, store: &SharedValueStore) {
        for key in self.groups.keys() {
            for index in key.managed_slots() {
                store.release(*index);
            }
        }
    }
}
