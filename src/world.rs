//! The archetype world: entity lifecycle, structural migration and the
//! top-level API surface.

use {
    crate::{
        archetype::Archetype,
        dispatch::WorkerPool,
        entity::{Entity, EntityLocation, EntityRecords},
        error::{Error, Result},
        handle::ComponentHandle,
        layout::{ComponentDescriptor, ComponentKind},
        managed::{ManagedRef, ManagedStore},
        mask::ComponentMask,
        query::QueryBuilder,
        registry::{
            Component, ComponentId, ComponentRegistry, ManagedComponent, SharedComponent,
            SharedValueComponent,
        },
        shared::{SharedKey, SharedValue, SharedValueStore},
    },
    hashbrown::{HashMap, HashSet},
    std::any::TypeId,
};

/// Tunables recognized at world construction.
#[derive(Clone, Debug)]
pub struct WorldConfig {
    /// Per-chunk byte budget used to derive chunk capacity.
    pub chunk_budget_bytes: usize,
    /// Chunk capacity used when the per-entity payload size is zero.
    pub default_chunk_capacity: usize,
    /// Worker threads for parallel queries; `0` means one per logical core.
    pub worker_pool_size: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            chunk_budget_bytes: 16 * 1024,
            default_chunk_capacity: 64,
            worker_pool_size: 0,
        }
    }
}

/// Container for entities, their archetype storage and the per-world stores.
pub struct World {
    config: WorldConfig,
    registry: ComponentRegistry,
    managed: ManagedStore,
    shared: SharedValueStore,
    archetypes: Vec<Archetype>,
    archetype_map: HashMap<ComponentMask, usize>,
    records: EntityRecords,
    pool: WorkerPool,
    closed: bool,
}

impl World {
    /// Open a world with default configuration.
    pub fn new() -> Result<Self> {
        World::open(WorldConfig::default())
    }

    /// Open a world with the given configuration.
    pub fn open(config: WorldConfig) -> Result<Self> {
        let pool = WorkerPool::new(config.worker_pool_size)?;
        log::debug!(
            "world open: chunk budget {} bytes, {} workers",
            config.chunk_budget_bytes,
            pool.threads(),
        );
        Ok(World {
            config,
            registry: ComponentRegistry::new(),
            managed: ManagedStore::new(),
            shared: SharedValueStore::new(),
            archetypes: Vec::new(),
            archetype_map: HashMap::new(),
            records: EntityRecords::new(),
            pool,
            closed: false,
        })
    }

    /// Open a world and run a registration hook before returning it.
    ///
    /// The hook is the place for generated register-all-components code.
    pub fn open_with(
        config: WorldConfig,
        register: impl FnOnce(&mut World) -> Result<()>,
    ) -> Result<Self> {
        let mut world = World::open(config)?;
        register(&mut world)?;
        Ok(world)
    }

    /// Release all storage and mark the world closed.
    ///
    /// Every handle, byte slice and record derived from this world is
    /// invalid afterwards; subsequent operations return
    /// [`Error::WorldClosed`]. Dropping the world is an implicit close.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        for archetype in &self.archetypes {
            archetype.release_shared_refs(&self.shared);
        }
        self.archetypes.clear();
        self.archetype_map.clear();
        self.records.clear();
        self.managed = ManagedStore::new();
        self.shared = SharedValueStore::new();
        self.closed = true;
        log::debug!("world closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::WorldClosed)
        } else {
            Ok(())
        }
    }

    // ---- registration ----

    /// Register an unmanaged-instance component type.
    pub fn register<T: Component>(&mut self) -> Result<ComponentId> {
        self.ensure_open()?;
        self.registry.register::<T>()
    }

    /// Register a managed-instance component type.
    pub fn register_managed<T: ManagedComponent>(&mut self) -> Result<ComponentId> {
        self.ensure_open()?;
        self.registry.register_managed::<T>()
    }

    /// Register a managed-shared component type.
    pub fn register_shared<T: SharedComponent>(&mut self) -> Result<ComponentId> {
        self.ensure_open()?;
        self.registry.register_shared::<T>()
    }

    /// Register an unmanaged-shared component type.
    pub fn register_shared_value<T: SharedValueComponent>(&mut self) -> Result<ComponentId> {
        self.ensure_open()?;
        self.registry.register_shared_value::<T>()
    }

    /// Register a descriptor under an explicit key.
    pub fn register_with(
        &mut self,
        key: TypeId,
        name: &'static str,
        descriptor: ComponentDescriptor,
    ) -> Result<ComponentId> {
        self.ensure_open()?;
        self.registry.register_with(key, name, descriptor)
    }

    /// Id assigned to a registered Rust type.
    pub fn component_id<T: 'static>(&self) -> Option<ComponentId> {
        self.registry.id_of::<T>()
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    // ---- entity lifecycle ----

    /// Create an entity with the given component set, all values
    /// zero-initialized. Duplicate ids in `classes` are idempotent.
    pub fn create_entity(&mut self, classes: &[ComponentId]) -> Result<Entity> {
        self.ensure_open()?;
        for id in classes {
            self.validate_id(*id)?;
        }
        let mask = ComponentMask::from_ids(classes);
        let archetype = self.archetype_index(mask);

        let entity = self.records.alloc();
        let key = self.archetypes[archetype].default_key();
        let (chunk, slot) =
            self.archetypes[archetype].add_entity(&key, entity.id(), &self.shared);
        self.records.insert(
            entity,
            EntityLocation {
                archetype,
                key,
                chunk,
                slot,
            },
        );
        Ok(entity)
    }

    /// Batch creation: the archetype and group are resolved once and slots
    /// are claimed back-to-back.
    pub fn create_entities(&mut self, classes: &[ComponentId], count: usize) -> Result<Vec<Entity>> {
        self.ensure_open()?;
        for id in classes {
            self.validate_id(*id)?;
        }
        let mask = ComponentMask::from_ids(classes);
        let archetype = self.archetype_index(mask);
        let key = self.archetypes[archetype].default_key();

        let mut entities = Vec::with_capacity(count);
        for _ in 0..count {
            let entity = self.records.alloc();
            let (chunk, slot) =
                self.archetypes[archetype].add_entity(&key, entity.id(), &self.shared);
            self.records.insert(
                entity,
                EntityLocation {
                    archetype,
                    key: key.clone(),
                    chunk,
                    slot,
                },
            );
            entities.push(entity);
        }
        Ok(entities)
    }

    /// Destroy an entity, releasing its slot and every managed ticket it
    /// held. Destroying a dead id is a silent no-op.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<()> {
        self.ensure_open()?;
        let loc = match self.records.remove(entity) {
            Some(loc) => loc,
            None => return Ok(()),
        };

        let archetype = &self.archetypes[loc.archetype];
        let group = archetype
            .group(&loc.key)
            .expect("record keys always name a live group");
        let chunk = group.chunk(loc.chunk);
        for column in 0..archetype.managed_ids().len() {
            self.managed.release(chunk.managed_ticket(column, loc.slot));
        }
        group.remove_entity(loc.chunk, loc.slot);
        Ok(())
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.records.contains(entity)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.records.len()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Worker threads serving parallel queries.
    pub fn worker_count(&self) -> usize {
        self.pool.threads()
    }

    // ---- component access ----

    pub fn has_component<T: 'static>(&self, entity: Entity) -> Result<bool> {
        let id = self.registry.expect_id::<T>()?;
        self.has_component_id(entity, id)
    }

    pub fn has_component_id(&self, entity: Entity, id: ComponentId) -> Result<bool> {
        self.ensure_open()?;
        self.validate_id(id)?;
        let loc = self.location(entity)?;
        Ok(self.archetypes[loc.archetype].mask().contains(id))
    }

    /// Byte view of an entity's component, `None` when the entity does not
    /// have it. The slice must not be retained across structural changes.
    pub fn get_component_bytes<T: Component>(&self, entity: Entity) -> Result<Option<&[u8]>> {
        let id = self.registry.expect_id::<T>()?;
        self.get_component_bytes_id(entity, id)
    }

    pub fn get_component_bytes_id(
        &self,
        entity: Entity,
        id: ComponentId,
    ) -> Result<Option<&[u8]>> {
        self.ensure_open()?;
        self.validate_id(id)?;
        let loc = self.location(entity)?;
        let archetype = &self.archetypes[loc.archetype];
        let column = match archetype.column_of(id) {
            Some(column) => column,
            None => return Ok(None),
        };
        let chunk = archetype
            .group(&loc.key)
            .expect("record keys always name a live group")
            .chunk(loc.chunk);
        Ok(Some(chunk.column_slice(column, loc.slot)))
    }

    /// Mutable typed cursor over an entity's component.
    pub fn edit_component<T: Component>(&mut self, entity: Entity) -> Result<ComponentHandle<'_>> {
        let id = self.registry.expect_id::<T>()?;
        self.edit_component_id(entity, id)
    }

    pub fn edit_component_id(
        &mut self,
        entity: Entity,
        id: ComponentId,
    ) -> Result<ComponentHandle<'_>> {
        self.ensure_open()?;
        self.validate_id(id)?;
        let loc = self.location(entity)?.clone();
        let archetype = &self.archetypes[loc.archetype];
        let column = archetype
            .column_of(id)
            .ok_or_else(|| Error::ComponentNotRegistered(self.registry.name(id)))?;
        let chunk = archetype
            .group(&loc.key)
            .expect("record keys always name a live group")
            .chunk(loc.chunk);
        let mut handle = ComponentHandle::unbound(self.registry.descriptor(id));
        unsafe {
            // Unique world borrow makes the slot exclusively ours.
            handle.bind(chunk.column_ptr(column, loc.slot));
        }
        Ok(handle)
    }

    /// Add a zero-initialized unmanaged component. Adding a component the
    /// entity already has is idempotent.
    pub fn add_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        let id = self.registry.expect_id::<T>()?;
        self.add_component_id(entity, id)
    }

    pub fn add_component_id(&mut self, entity: Entity, id: ComponentId) -> Result<()> {
        self.add_with_init(entity, id, |_| {})
    }

    /// Add a component and initialize it through a bound handle.
    pub fn add_component_with<T, F>(&mut self, entity: Entity, init: F) -> Result<()>
    where
        T: Component,
        F: FnOnce(&mut ComponentHandle<'_>),
    {
        let id = self.registry.expect_id::<T>()?;
        self.add_with_init(entity, id, init)
    }

    /// Add a component initialized from raw bytes.
    pub fn add_component_bytes<T: Component>(&mut self, entity: Entity, src: &[u8]) -> Result<()> {
        let id = self.registry.expect_id::<T>()?;
        self.add_with_init(entity, id, |handle| handle.write_bytes(src))
    }

    /// Remove a component of any kind. Removing a component the entity does
    /// not have is a no-op.
    pub fn remove_component<T: 'static>(&mut self, entity: Entity) -> Result<()> {
        let id = self.registry.expect_id::<T>()?;
        self.remove_component_id(entity, id)
    }

    pub fn remove_component_id(&mut self, entity: Entity, id: ComponentId) -> Result<()> {
        self.ensure_open()?;
        self.validate_id(id)?;
        let loc = self.location(entity)?;
        let mask = self.archetypes[loc.archetype].mask();
        if !mask.contains(id) {
            return Ok(());
        }
        let dst_mask = mask.without(id);
        self.migrate_mask(entity, dst_mask)
    }

    /// Apply one add/remove transform to a batch of entities.
    ///
    /// Entities are grouped by source location so each migration path is
    /// resolved once; destination slots are claimed first, then columns are
    /// copied column-by-column, then the source slots are released.
    pub fn mutate_components(
        &mut self,
        batch: &[Entity],
        adds: &[ComponentId],
        removes: &[ComponentId],
    ) -> Result<()> {
        self.ensure_open()?;
        for id in adds.iter().chain(removes) {
            self.validate_id(*id)?;
        }

        let mut seen = HashSet::with_capacity(batch.len());
        for entity in batch {
            if !seen.insert(entity.id()) {
                return Err(Error::InvalidBatch);
            }
        }

        // Group by (source archetype, source key): one migration path each.
        let mut paths: HashMap<(usize, SharedKey), Vec<Entity>> = HashMap::new();
        for entity in batch {
            let loc = self.location(*entity)?;
            paths
                .entry((loc.archetype, loc.key.clone()))
                .or_insert_with(Vec::new)
                .push(*entity);
        }

        for ((src_index, src_key), entities) in paths {
            let src_mask = self.archetypes[src_index].mask().clone();
            let mut dst_mask = src_mask.clone();
            for id in adds {
                dst_mask.insert(*id);
            }
            for id in removes {
                dst_mask.remove(*id);
            }
            if dst_mask == src_mask {
                continue;
            }

            let dst_index = self.archetype_index(dst_mask);
            let dst_key = translate_key(
                &self.archetypes[src_index],
                &src_key,
                &self.archetypes[dst_index],
            );
            self.migrate_batch(&entities, src_index, dst_index, dst_key)?;
        }
        Ok(())
    }

    // ---- managed components ----

    /// Store a managed object for the entity, adding the component to its
    /// signature if absent. A previously held ticket is released.
    pub fn set_managed<T: ManagedComponent>(&mut self, entity: Entity, value: T) -> Result<()> {
        let id = self.registry.expect_id::<T>()?;
        self.set_managed_object(entity, id, Box::new(value))
    }

    pub(crate) fn set_managed_object(
        &mut self,
        entity: Entity,
        id: ComponentId,
        value: Box<dyn std::any::Any + Send + Sync>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.validate_id(id)?;
        self.expect_kind(id, ComponentKind::Managed)?;

        let loc = self.location(entity)?;
        if !self.archetypes[loc.archetype].mask().contains(id) {
            let dst_mask = self.archetypes[loc.archetype].mask().with(id);
            self.migrate_mask(entity, dst_mask)?;
        }

        let loc = self.location(entity)?.clone();
        let archetype = &self.archetypes[loc.archetype];
        let column = archetype
            .managed_column_of(id)
            .expect("signature contains the managed id after migration");
        let chunk = archetype
            .group(&loc.key)
            .expect("record keys always name a live group")
            .chunk(loc.chunk);

        let old = chunk.managed_ticket(column, loc.slot);
        let ticket = self.managed.store(value);
        chunk.set_managed_ticket(column, loc.slot, ticket);
        self.managed.release(old);
        Ok(())
    }

    /// Read view of the entity's managed object, `None` when absent.
    pub fn get_managed<T: ManagedComponent>(
        &self,
        entity: Entity,
    ) -> Result<Option<ManagedRef<'_, T>>> {
        self.ensure_open()?;
        let id = self.registry.expect_id::<T>()?;
        let loc = self.location(entity)?;
        let archetype = &self.archetypes[loc.archetype];
        let column = match archetype.managed_column_of(id) {
            Some(column) => column,
            None => return Ok(None),
        };
        let chunk = archetype
            .group(&loc.key)
            .expect("record keys always name a live group")
            .chunk(loc.chunk);
        Ok(self.managed.get(chunk.managed_ticket(column, loc.slot)))
    }

    // ---- shared components ----

    /// Set a managed-shared value, migrating the entity to the chunk group
    /// keyed by it. Setting the value it already has is a no-op.
    pub fn set_shared<T: SharedComponent>(&mut self, entity: Entity, value: T) -> Result<()> {
        let id = self.registry.expect_id::<T>()?;
        self.set_shared_boxed(entity, id, Box::new(value))
    }

    pub(crate) fn set_shared_boxed(
        &mut self,
        entity: Entity,
        id: ComponentId,
        value: Box<dyn SharedValue>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.validate_id(id)?;
        self.expect_kind(id, ComponentKind::ManagedShared)?;

        let loc = self.location(entity)?;
        if !self.archetypes[loc.archetype].mask().contains(id) {
            let dst_mask = self.archetypes[loc.archetype].mask().with(id);
            self.migrate_mask(entity, dst_mask)?;
        }

        let loc = self.location(entity)?.clone();
        let slot = self.archetypes[loc.archetype]
            .shared_managed_slot(id)
            .expect("signature contains the shared id after migration");

        // Transient reference keeps the index alive until the destination
        // group (which pins it on creation) exists.
        let index = self.shared.acquire(value);
        let new_key = loc.key.with_managed(slot, index);
        if new_key == loc.key {
            self.shared.release(index);
            return Ok(());
        }
        let result = self.migrate(entity, loc.archetype, new_key);
        self.shared.release(index);
        result
    }

    /// Set an unmanaged-shared value; the value itself is the group key.
    pub fn set_shared_value<T: SharedValueComponent>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<()> {
        let id = self.registry.expect_id::<T>()?;
        self.set_shared_bits(entity, id, value.to_bits())
    }

    pub(crate) fn set_shared_bits(
        &mut self,
        entity: Entity,
        id: ComponentId,
        bits: u64,
    ) -> Result<()> {
        self.ensure_open()?;
        self.validate_id(id)?;
        self.expect_kind(id, ComponentKind::UnmanagedShared)?;

        let loc = self.location(entity)?;
        if !self.archetypes[loc.archetype].mask().contains(id) {
            let dst_mask = self.archetypes[loc.archetype].mask().with(id);
            self.migrate_mask(entity, dst_mask)?;
        }

        let loc = self.location(entity)?.clone();
        let slot = self.archetypes[loc.archetype]
            .shared_unmanaged_slot(id)
            .expect("signature contains the shared id after migration");

        let new_key = loc.key.with_unmanaged(slot, bits);
        if new_key == loc.key {
            return Ok(());
        }
        self.migrate(entity, loc.archetype, new_key)
    }

    /// Clone out the entity's managed-shared value, `None` when unset or the
    /// component is absent.
    pub fn get_shared<T: SharedComponent>(&self, entity: Entity) -> Result<Option<T>> {
        self.ensure_open()?;
        let id = self.registry.expect_id::<T>()?;
        let loc = self.location(entity)?;
        let slot = match self.archetypes[loc.archetype].shared_managed_slot(id) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        Ok(self.shared.value(loc.key.managed(slot)))
    }

    /// The entity's unmanaged-shared value; the default key reads as zero.
    pub fn get_shared_value<T: SharedValueComponent>(
        &self,
        entity: Entity,
    ) -> Result<Option<T>> {
        self.ensure_open()?;
        let id = self.registry.expect_id::<T>()?;
        let loc = self.location(entity)?;
        let slot = match self.archetypes[loc.archetype].shared_unmanaged_slot(id) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        Ok(Some(T::from_bits(loc.key.unmanaged(slot))))
    }

    // ---- queries ----

    /// Start building a query over this world.
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    /// The archetype an entity currently lives in.
    pub fn archetype_of(&self, entity: Entity) -> Result<&Archetype> {
        self.ensure_open()?;
        let loc = self.location(entity)?;
        Ok(&self.archetypes[loc.archetype])
    }

    /// All archetypes, in creation order.
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Live objects in the managed store.
    pub fn managed_count(&self) -> usize {
        self.managed.live()
    }

    /// Distinct live values in the shared value store.
    pub fn shared_value_count(&self) -> usize {
        self.shared.live()
    }

    // ---- internals ----

    pub(crate) fn shared_store(&self) -> &SharedValueStore {
        &self.shared
    }

    pub(crate) fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    fn location(&self, entity: Entity) -> Result<&EntityLocation> {
        self.records
            .get(entity)
            .ok_or(Error::EntityNotFound(entity))
    }

    fn validate_id(&self, id: ComponentId) -> Result<()> {
        if self.registry.is_valid(id) {
            Ok(())
        } else {
            Err(Error::ComponentNotRegistered("<unknown component id>"))
        }
    }

    fn expect_kind(&self, id: ComponentId, kind: ComponentKind) -> Result<()> {
        if self.registry.kind(id) == kind {
            Ok(())
        } else {
            Err(Error::ComponentNotRegistered(self.registry.name(id)))
        }
    }

    /// Index of the archetype for `mask`, creating it on first use.
    fn archetype_index(&mut self, mask: ComponentMask) -> usize {
        if let Some(index) = self.archetype_map.get(&mask) {
            return *index;
        }
        let archetype = Archetype::new(
            mask.clone(),
            &self.registry,
            self.config.chunk_budget_bytes,
            self.config.default_chunk_capacity,
        );
        self.archetypes.push(archetype);
        let index = self.archetypes.len() - 1;
        self.archetype_map.insert(mask, index);
        index
    }

    fn add_with_init(
        &mut self,
        entity: Entity,
        id: ComponentId,
        init: impl FnOnce(&mut ComponentHandle<'_>),
    ) -> Result<()> {
        self.ensure_open()?;
        self.validate_id(id)?;
        let loc = self.location(entity)?;
        let mask = self.archetypes[loc.archetype].mask();
        if !mask.contains(id) {
            let dst_mask = mask.with(id);
            self.migrate_mask(entity, dst_mask)?;
        }

        if self.registry.kind(id) != ComponentKind::Unmanaged {
            return Ok(());
        }

        let loc = self.location(entity)?.clone();
        let archetype = &self.archetypes[loc.archetype];
        let column = archetype
            .column_of(id)
            .expect("signature contains the id after migration");
        let chunk = archetype
            .group(&loc.key)
            .expect("record keys always name a live group")
            .chunk(loc.chunk);

        let mut handle = ComponentHandle::unbound(self.registry.descriptor(id));
        unsafe {
            // Unique world borrow makes the slot exclusively ours.
            handle.bind(chunk.column_ptr(column, loc.slot));
        }
        init(&mut handle);
        Ok(())
    }

    /// Move an entity to the archetype identified by `dst_mask`, carrying
    /// shared-key slots over by component id.
    fn migrate_mask(&mut self, entity: Entity, dst_mask: ComponentMask) -> Result<()> {
        let src_index = self.location(entity)?.archetype;
        if self.archetypes[src_index].mask() == &dst_mask {
            return Ok(());
        }
        let dst_index = self.archetype_index(dst_mask);
        let src_key = self.location(entity)?.key.clone();
        let dst_key = translate_key(
            &self.archetypes[src_index],
            &src_key,
            &self.archetypes[dst_index],
        );
        self.migrate(entity, dst_index, dst_key)
    }

    /// Move one entity into `(dst_index, dst_key)`: claim the destination
    /// slot, copy columns present on both sides, release source-only managed
    /// tickets, free the source slot, publish the new record.
    fn migrate(&mut self, entity: Entity, dst_index: usize, dst_key: SharedKey) -> Result<()> {
        let loc = self.location(entity)?.clone();
        if loc.archetype == dst_index && loc.key == dst_key {
            return Ok(());
        }

        let (dst_chunk_index, dst_slot) =
            self.archetypes[dst_index].add_entity(&dst_key, entity.id(), &self.shared);

        {
            let src_arch = &self.archetypes[loc.archetype];
            let dst_arch = &self.archetypes[dst_index];
            let src_group = src_arch
                .group(&loc.key)
                .expect("record keys always name a live group");
            let src_chunk = src_group.chunk(loc.chunk);
            let dst_chunk = dst_arch
                .group(&dst_key)
                .expect("destination group was just created")
                .chunk(dst_chunk_index);

            for (dst_column, id) in dst_arch.column_ids().iter().enumerate() {
                if let Some(src_column) = src_arch.column_of(*id) {
                    let bytes = src_chunk.column_slice(src_column, loc.slot);
                    unsafe {
                        // Both slots are exclusively ours under the unique
                        // world borrow.
                        dst_chunk.set_column_slice(dst_column, dst_slot, bytes);
                    }
                }
            }

            for (dst_column, id) in dst_arch.managed_ids().iter().enumerate() {
                if let Some(src_column) = src_arch.managed_column_of(*id) {
                    dst_chunk.set_managed_ticket(
                        dst_column,
                        dst_slot,
                        src_chunk.managed_ticket(src_column, loc.slot),
                    );
                }
            }
            for (src_column, id) in src_arch.managed_ids().iter().enumerate() {
                if dst_arch.managed_column_of(*id).is_none() {
                    self.managed
                        .release(src_chunk.managed_ticket(src_column, loc.slot));
                }
            }

            src_group.remove_entity(loc.chunk, loc.slot);
        }

        self.records.insert(
            entity,
            EntityLocation {
                archetype: dst_index,
                key: dst_key,
                chunk: dst_chunk_index,
                slot: dst_slot,
            },
        );
        Ok(())
    }

    /// Batch flavor of [`migrate`](World::migrate): all destination slots are
    /// claimed first, then data moves in per-column loops, then every source
    /// slot is freed.
    fn migrate_batch(
        &mut self,
        entities: &[Entity],
        src_index: usize,
        dst_index: usize,
        dst_key: SharedKey,
    ) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let mut sources = Vec::with_capacity(entities.len());
        for entity in entities {
            sources.push(self.location(*entity)?.clone());
        }

        let mut destinations = Vec::with_capacity(entities.len());
        for entity in entities {
            destinations.push(self.archetypes[dst_index].add_entity(
                &dst_key,
                entity.id(),
                &self.shared,
            ));
        }

        {
            let src_arch = &self.archetypes[src_index];
            let dst_arch = &self.archetypes[dst_index];
            let src_group = src_arch
                .group(&sources[0].key)
                .expect("record keys always name a live group");
            let dst_group = dst_arch
                .group(&dst_key)
                .expect("destination group was just created");

            for (dst_column, id) in dst_arch.column_ids().iter().enumerate() {
                if let Some(src_column) = src_arch.column_of(*id) {
                    for (src, dst) in sources.iter().zip(destinations.iter()) {
                        let bytes = src_group.chunk(src.chunk).column_slice(src_column, src.slot);
                        unsafe {
                            // Slots are exclusively ours under the unique
                            // world borrow.
                            dst_group
                                .chunk(dst.0)
                                .set_column_slice(dst_column, dst.1, bytes);
                        }
                    }
                }
            }

            for (dst_column, id) in dst_arch.managed_ids().iter().enumerate() {
                if let Some(src_column) = src_arch.managed_column_of(*id) {
                    for (src, dst) in sources.iter().zip(destinations.iter()) {
                        let ticket = src_group.chunk(src.chunk).managed_ticket(src_column, src.slot);
                        dst_group.chunk(dst.0).set_managed_ticket(dst_column, dst.1, ticket);
                    }
                }
            }
            for (src_column, id) in src_arch.managed_ids().iter().enumerate() {
                if dst_arch.managed_column_of(*id).is_none() {
                    for src in &sources {
                        self.managed
                            .release(src_group.chunk(src.chunk).managed_ticket(src_column, src.slot));
                    }
                }
            }

            for src in &sources {
                src_group.remove_entity(src.chunk, src.slot);
            }
        }

        for (entity, dst) in entities.iter().zip(destinations) {
            self.records.insert(
                *entity,
                EntityLocation {
                    archetype: dst_index,
                    key: dst_key.clone(),
                    chunk: dst.0,
                    slot: dst.1,
                },
            );
        }
        Ok(())
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.close();
    }
}

/// Carry shared-key slots from one archetype's key shape into another's,
/// matching slots by component id. Slots new to the destination stay unset.
fn translate_key(src_arch: &Archetype, src_key: &SharedKey, dst_arch: &Archetype) -> SharedKey {
    let mut key = dst_arch.default_key();
    for (slot, id) in dst_arch.shared_managed_ids().iter().enumerate() {
        if let Some(src_slot) = src_arch.shared_managed_slot(*id) {
            key = key.with_managed(slot, src_key.managed(src_slot));
        }
    }
    for (slot, id) in dst_arch.shared_unmanaged_ids().iter().enumerate() {
        if let Some(src_slot) = src_arch.shared_unmanaged_slot(*id) {
            key = key.with_unmanaged(slot, src_key.unmanaged(src_slot));
        }
    }
    key
}
