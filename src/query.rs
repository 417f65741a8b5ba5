//! Declarative selection over archetypes with sequential and parallel
//! iteration.

use {
    crate::{
        archetype::{Archetype, Chunk, ChunkGroup},
        entity::Entity,
        error::{Error, Result},
        handle::ComponentHandle,
        layout::ComponentKind,
        mask::ComponentMask,
        registry::{ComponentId, SharedComponent, SharedValueComponent},
        shared::{SharedKey, SharedValue},
        world::World,
    },
    smallvec::SmallVec,
    std::any::type_name,
};

/// Builds an immutable [`Query`].
///
/// `with` components of unmanaged-instance kind become bound handles in the
/// consumer's handle array, in declaration order. Duplicate `with` requests
/// are idempotent.
pub struct QueryBuilder<'w> {
    world: &'w World,
    with_ids: SmallVec<[ComponentId; 8]>,
    without: ComponentMask,
    any: Vec<ComponentMask>,
    shared_managed: SmallVec<[(ComponentId, Box<dyn SharedValue>); 1]>,
    shared_unmanaged: SmallVec<[(ComponentId, u64); 2]>,
    missing: Option<&'static str>,
}

impl<'w> QueryBuilder<'w> {
    pub(crate) fn new(world: &'w World) -> Self {
        QueryBuilder {
            world,
            with_ids: SmallVec::new(),
            without: ComponentMask::empty(),
            any: Vec::new(),
            shared_managed: SmallVec::new(),
            shared_unmanaged: SmallVec::new(),
            missing: None,
        }
    }

    fn push_with(&mut self, id: ComponentId) {
        if !self.with_ids.contains(&id) {
            self.with_ids.push(id);
        }
    }

    /// Require the component to be present.
    pub fn with<T: 'static>(mut self) -> Self {
        match self.world.component_id::<T>() {
            Some(id) => self.push_with(id),
            None => self.missing = Some(type_name::<T>()),
        }
        self
    }

    pub fn with_id(mut self, id: ComponentId) -> Self {
        self.push_with(id);
        self
    }

    /// Require the component to be absent.
    pub fn without<T: 'static>(mut self) -> Self {
        match self.world.component_id::<T>() {
            Some(id) => self.without.insert(id),
            None => self.missing = Some(type_name::<T>()),
        }
        self
    }

    pub fn without_id(mut self, id: ComponentId) -> Self {
        self.without.insert(id);
        self
    }

    /// Require at least one of the listed components. Each call adds an
    /// independent group; an empty list imposes no restriction.
    pub fn any(mut self, ids: &[ComponentId]) -> Self {
        if !ids.is_empty() {
            self.any.push(ComponentMask::from_ids(ids));
        }
        self
    }

    /// Restrict iteration to chunk groups keyed by this shared value.
    pub fn with_shared<T: SharedComponent>(mut self, value: T) -> Self {
        match self.world.component_id::<T>() {
            Some(id) => self.shared_managed.push((id, Box::new(value))),
            None => self.missing = Some(type_name::<T>()),
        }
        self
    }

    /// Restrict iteration to chunk groups keyed by this unmanaged-shared
    /// value.
    pub fn with_shared_value<T: SharedValueComponent>(mut self, value: T) -> Self {
        match self.world.component_id::<T>() {
            Some(id) => self.shared_unmanaged.push((id, value.to_bits())),
            None => self.missing = Some(type_name::<T>()),
        }
        self
    }

    /// Freeze into an immutable query snapshot.
    pub fn build(self) -> Result<Query<'w>> {
        if let Some(name) = self.missing {
            return Err(Error::ComponentNotRegistered(name));
        }

        let mut with_mask = ComponentMask::from_ids(&self.with_ids);
        // Shared filters imply presence of the shared component type.
        for (id, _) in self.shared_managed.iter() {
            with_mask.insert(*id);
        }
        for (id, _) in self.shared_unmanaged.iter() {
            with_mask.insert(*id);
        }

        let registry = self.world.registry();
        let handle_ids = self
            .with_ids
            .iter()
            .copied()
            .filter(|id| registry.kind(*id) == ComponentKind::Unmanaged)
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Query {
            world: self.world,
            with_mask,
            without: self.without,
            any: self.any.into_boxed_slice(),
            handle_ids,
            shared_managed: self.shared_managed.into_vec().into_boxed_slice(),
            shared_unmanaged: self.shared_unmanaged.into_vec().into_boxed_slice(),
        })
    }
}

/// Immutable selection predicate plus iteration entry points.
///
/// Iteration visits occupied slots in ascending order within a chunk. A slot
/// freed mid-iteration is skipped; one occupied mid-iteration may or may not
/// be visited. Writing through handles while another query reads the same
/// slots is the caller's race to avoid; the parallel path partitions work
/// chunk-per-worker so a single parallel query never races itself.
pub struct Query<'w> {
    world: &'w World,
    with_mask: ComponentMask,
    without: ComponentMask,
    any: Box<[ComponentMask]>,
    handle_ids: Box<[ComponentId]>,
    shared_managed: Box<[(ComponentId, Box<dyn SharedValue>)]>,
    shared_unmanaged: Box<[(ComponentId, u64)]>,
}

/// One parallel work item: a chunk and the archetype it belongs to.
struct ChunkTask<'w> {
    archetype: &'w Archetype,
    chunk: &'w Chunk,
}

impl<'w> Query<'w> {
    fn matches(&self, archetype: &Archetype) -> bool {
        let mask = archetype.mask();
        mask.contains_all(&self.with_mask)
            && mask.contains_none(&self.without)
            && (self.any.is_empty() || self.any.iter().any(|any| mask.intersects(any)))
    }

    /// Group restriction for a matching archetype.
    ///
    /// `None` skips the archetype (a filter value is not interned, so no
    /// group can match). `Some(None)` iterates every group; `Some(Some(key))`
    /// restricts to the single group at that key.
    fn group_restriction(&self, archetype: &Archetype) -> Option<Option<SharedKey>> {
        if self.shared_managed.is_empty() && self.shared_unmanaged.is_empty() {
            return Some(None);
        }
        let mut key = archetype.default_key();
        for (id, value) in self.shared_managed.iter() {
            let slot = archetype.shared_managed_slot(*id)?;
            let index = self.world.shared_store().find(&**value)?;
            key = key.with_managed(slot, index);
        }
        for (id, bits) in self.shared_unmanaged.iter() {
            let slot = archetype.shared_unmanaged_slot(*id)?;
            key = key.with_unmanaged(slot, *bits);
        }
        Some(Some(key))
    }

    fn columns_for(&self, archetype: &Archetype) -> SmallVec<[usize; 8]> {
        self.handle_ids
            .iter()
            .map(|id| {
                archetype
                    .column_of(*id)
                    .expect("with-mask guarantees the column exists")
            })
            .collect()
    }

    fn handles(&self) -> SmallVec<[ComponentHandle<'w>; 8]> {
        let registry = self.world.registry();
        self.handle_ids
            .iter()
            .map(|id| ComponentHandle::unbound(registry.descriptor(*id)))
            .collect()
    }

    /// Visit every matching entity sequentially.
    pub fn for_each<F>(&self, mut consumer: F)
    where
        F: FnMut(Entity, &mut [ComponentHandle<'w>], &Archetype),
    {
        let mut handles = self.handles();
        for archetype in self.world.archetypes() {
            if !self.matches(archetype) {
                continue;
            }
            let restriction = match self.group_restriction(archetype) {
                Some(restriction) => restriction,
                None => continue,
            };
            let columns = self.columns_for(archetype);
            match restriction {
                Some(key) => {
                    if let Some(group) = archetype.group(&key) {
                        visit_group(group, archetype, &columns, &mut handles, &mut consumer);
                    }
                }
                None => {
                    for group in archetype.groups() {
                        visit_group(group, archetype, &columns, &mut handles, &mut consumer);
                    }
                }
            }
        }
    }

    /// Visit every matching entity, fanning chunks across the world's worker
    /// pool. The consumer runs concurrently and must be safe for concurrent
    /// invocation; within one chunk iteration stays sequential.
    pub fn for_each_parallel<F>(&self, consumer: F)
    where
        F: Fn(Entity, &mut [ComponentHandle<'w>], &Archetype) + Send + Sync,
    {
        let mut tasks = Vec::new();
        for archetype in self.world.archetypes() {
            if !self.matches(archetype) {
                continue;
            }
            let restriction = match self.group_restriction(archetype) {
                Some(restriction) => restriction,
                None => continue,
            };
            match restriction {
                Some(key) => {
                    if let Some(group) = archetype.group(&key) {
                        for chunk in group.chunks() {
                            tasks.push(ChunkTask {
                                archetype,
                                chunk: &**chunk,
                            });
                        }
                    }
                }
                None => {
                    for group in archetype.groups() {
                        for chunk in group.chunks() {
                            tasks.push(ChunkTask {
                                archetype,
                                chunk: &**chunk,
                            });
                        }
                    }
                }
            }
        }

        self.world.pool().dispatch(&tasks, |task| {
            let columns = self.columns_for(task.archetype);
            let mut handles = self.handles();
            visit_chunk(
                task.chunk,
                task.archetype,
                &columns,
                &mut handles,
                &mut |entity, handles, archetype| consumer(entity, handles, archetype),
            );
        });
    }

    /// Count matching entities without touching component data.
    pub fn count(&self) -> usize {
        let mut total = 0;
        for archetype in self.world.archetypes() {
            if !self.matches(archetype) {
                continue;
            }
            let restriction = match self.group_restriction(archetype) {
                Some(restriction) => restriction,
                None => continue,
            };
            total += match restriction {
                Some(key) => archetype.group(&key).map_or(0, ChunkGroup::entity_count),
                None => archetype.entity_count(),
            };
        }
        total
    }
}

fn visit_group<'w>(
    group: &ChunkGroup,
    archetype: &Archetype,
    columns: &[usize],
    handles: &mut [ComponentHandle<'w>],
    consumer: &mut dyn FnMut(Entity, &mut [ComponentHandle<'w>], &Archetype),
) {
    for chunk in group.chunks() {
        visit_chunk(chunk, archetype, columns, handles, consumer);
    }
}

fn visit_chunk<'w>(
    chunk: &Chunk,
    archetype: &Archetype,
    columns: &[usize],
    handles: &mut [ComponentHandle<'w>],
    consumer: &mut dyn FnMut(Entity, &mut [ComponentHandle<'w>], &Archetype),
) {
    let mut cursor = 0;
    while let Some(slot) = chunk.next_occupied(cursor) {
        cursor = slot + 1;

        let id = chunk.entity_id(slot);
        if id <= 0 {
            // Freed between the occupancy read and the id read; skip.
            continue;
        }
        for (handle, column) in handles.iter_mut().zip(columns.iter()) {
            unsafe {
                // The slot is occupied and this dispatch owns the chunk;
                // the pointer stays valid for the consumer call.
                handle.bind(chunk.column_ptr(*column, slot));
            }
        }
        consumer(Entity::new(id), handles, archetype);
    }
}
