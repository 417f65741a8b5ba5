//! Entity handles and the entity → storage-location record map.

use {crate::shared::SharedKey, hashbrown::HashMap};

/// Entity handle value.
///
/// Ids are monotonically increasing, start at 1 and are never recycled.
/// `-1` marks a free slot in chunk entity columns, so valid ids are always
/// positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Entity {
    id: i32,
}

impl Entity {
    pub(crate) fn new(id: i32) -> Self {
        debug_assert!(id > 0);
        Entity { id }
    }

    pub fn id(self) -> i32 {
        self.id
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "{}", self.id)
    }
}

/// Where an entity's data currently lives.
#[derive(Clone, Debug)]
pub(crate) struct EntityLocation {
    pub archetype: usize,
    pub key: SharedKey,
    pub chunk: usize,
    pub slot: usize,
}

/// Map of live entities to locations plus the monotonic id allocator.
pub(crate) struct EntityRecords {
    map: HashMap<i32, EntityLocation>,
    next_id: i32,
}

impl EntityRecords {
    pub fn new() -> Self {
        EntityRecords {
            map: HashMap::new(),
            next_id: 1,
        }
    }

    /// Allocate the next entity id. Ids are never reused.
    pub fn alloc(&mut self) -> Entity {
        let id = self.next_id;
        self.next_id += 1;
        Entity::new(id)
    }

    pub fn insert(&mut self, entity: Entity, location: EntityLocation) {
        self.map.insert(entity.id(), location);
    }

    pub fn get(&self, entity: Entity) -> Option<&EntityLocation> {
        self.map.get(&entity.id())
    }

    pub fn remove(&mut self, entity: Entity) -> Option<EntityLocation> {
        self.map.remove(&entity.id())
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.map.contains_key(&entity.id())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
