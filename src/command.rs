//! Deferred structural changes: record while queries iterate, play back at a
//! sync point.

use {
    crate::{
        entity::Entity,
        error::{Error, Result},
        registry::{ComponentId, SharedComponent, SharedValueComponent},
        shared::SharedValue,
        world::World,
    },
    parking_lot::Mutex,
    smallvec::SmallVec,
    std::any::Any,
};

type InitFn = Box<dyn FnOnce(&mut World, Entity) -> Result<()> + Send + Sync>;

enum Command {
    Create {
        classes: SmallVec<[ComponentId; 8]>,
        init: Option<InitFn>,
    },
    Add {
        entity: Entity,
        classes: SmallVec<[ComponentId; 4]>,
    },
    Remove {
        entity: Entity,
        classes: SmallVec<[ComponentId; 4]>,
    },
    Mutate {
        entity: Entity,
        adds: SmallVec<[ComponentId; 4]>,
        removes: SmallVec<[ComponentId; 4]>,
    },
    SetManaged {
        entity: Entity,
        id: ComponentId,
        value: Box<dyn Any + Send + Sync>,
    },
    SetShared {
        entity: Entity,
        id: ComponentId,
        value: Box<dyn SharedValue>,
    },
    SetSharedValue {
        entity: Entity,
        id: ComponentId,
        bits: u64,
    },
    Destroy {
        entity: Entity,
    },
}

/// Records structural commands for deferred application.
///
/// `playback` applies commands in recorded order. Commands that reference an
/// entity destroyed by the time they apply are no-ops; commands referencing
/// component ids unknown to the world fail with `ComponentNotRegistered`.
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        CommandBuffer {
            commands: Vec::new(),
        }
    }

    /// Queue creation of an entity with the given component set.
    pub fn create(&mut self, classes: &[ComponentId]) {
        self.commands.push(Command::Create {
            classes: classes.into(),
            init: None,
        });
    }

    /// Queue creation with an initializer that runs right after the entity
    /// exists.
    pub fn create_with(
        &mut self,
        classes: &[ComponentId],
        init: impl FnOnce(&mut World, Entity) -> Result<()> + Send + Sync + 'static,
    ) {
        self.commands.push(Command::Create {
            classes: classes.into(),
            init: Some(Box::new(init)),
        });
    }

    pub fn add_components(&mut self, entity: Entity, classes: &[ComponentId]) {
        self.commands.push(Command::Add {
            entity,
            classes: classes.into(),
        });
    }

    pub fn remove_components(&mut self, entity: Entity, classes: &[ComponentId]) {
        self.commands.push(Command::Remove {
            entity,
            classes: classes.into(),
        });
    }

    pub fn mutate_components(
        &mut self,
        entity: Entity,
        adds: &[ComponentId],
        removes: &[ComponentId],
    ) {
        self.commands.push(Command::Mutate {
            entity,
            adds: adds.into(),
            removes: removes.into(),
        });
    }

    pub fn set_managed(
        &mut self,
        entity: Entity,
        id: ComponentId,
        value: impl Any + Send + Sync,
    ) {
        self.commands.push(Command::SetManaged {
            entity,
            id,
            value: Box::new(value),
        });
    }

    pub fn set_shared(&mut self, entity: Entity, id: ComponentId, value: impl SharedComponent) {
        self.commands.push(Command::SetShared {
            entity,
            id,
            value: Box::new(value),
        });
    }

    pub fn set_shared_value(
        &mut self,
        entity: Entity,
        id: ComponentId,
        value: impl SharedValueComponent,
    ) {
        self.commands.push(Command::SetSharedValue {
            entity,
            id,
            bits: value.to_bits(),
        });
    }

    pub fn destroy(&mut self, entity: Entity) {
        self.commands.push(Command::Destroy { entity });
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// A writer that can record from inside a parallel query consumer.
    ///
    /// Commands land in per-worker slots; dropping the writer merges them
    /// back into this buffer, slot by slot. Order is stable within a worker,
    /// unspecified between workers.
    pub fn as_parallel_writer<'a>(&'a mut self, world: &World) -> ParallelWriter<'a> {
        let slots = (0..world.worker_count() + 1)
            .map(|_| Mutex::new(Vec::new()))
            .collect();
        ParallelWriter {
            buffer: self,
            slots,
        }
    }

    /// Apply all recorded commands against `world` in recorded order,
    /// draining the buffer.
    ///
    /// Must not run while any query over `world` is iterating; the exclusive
    /// world borrow enforces that.
    pub fn playback(&mut self, world: &mut World) -> Result<()> {
        let count = self.commands.len();
        for command in self.commands.drain(..) {
            match command {
                Command::Create { classes, init } => {
                    let entity = world.create_entity(&classes)?;
                    if let Some(init) = init {
                        init(world, entity)?;
                    }
                }
                Command::Add { entity, classes } => {
                    for id in classes {
                        tolerate_dead(world.add_component_id(entity, id))?;
                    }
                }
                Command::Remove { entity, classes } => {
                    for id in classes {
                        tolerate_dead(world.remove_component_id(entity, id))?;
                    }
                }
                Command::Mutate {
                    entity,
                    adds,
                    removes,
                } => {
                    tolerate_dead(world.mutate_components(&[entity], &adds, &removes))?;
                }
                Command::SetManaged { entity, id, value } => {
                    tolerate_dead(world.set_managed_object(entity, id, value))?;
                }
                Command::SetShared { entity, id, value } => {
                    tolerate_dead(world.set_shared_boxed(entity, id, value))?;
                }
                Command::SetSharedValue { entity, id, bits } => {
                    tolerate_dead(world.set_shared_bits(entity, id, bits))?;
                }
                Command::Destroy { entity } => {
                    world.destroy_entity(entity)?;
                }
            }
        }
        log::debug!("command buffer playback: {} commands", count);
        Ok(())
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        CommandBuffer::new()
    }
}

/// Commands against an entity that died before playback are no-ops.
fn tolerate_dead(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::EntityNotFound(_)) => Ok(()),
        other => other,
    }
}

/// Shared-reference command recorder for parallel query consumers.
///
/// Worker slot selection follows the dispatching pool's thread index;
/// records from outside the pool land in the overflow slot.
pub struct ParallelWriter<'a> {
    buffer: &'a mut CommandBuffer,
    slots: Box<[Mutex<Vec<Command>>]>,
}

impl ParallelWriter<'_> {
    fn slot(&self) -> &Mutex<Vec<Command>> {
        let index = rayon::current_thread_index()
            .map_or(self.slots.len() - 1, |index| index.min(self.slots.len() - 1));
        &self.slots[index]
    }

    pub fn create(&self, classes: &[ComponentId]) {
        self.slot().lock().push(Command::Create {
            classes: classes.into(),
            init: None,
        });
    }

    pub fn create_with(
        &self,
        classes: &[ComponentId],
        init: impl FnOnce(&mut World, Entity) -> Result<()> + Send + Sync + 'static,
    ) {
        self.slot().lock().push(Command::Create {
            classes: classes.into(),
            init: Some(Box::new(init)),
        });
    }

    pub fn add_components(&self, entity: Entity, classes: &[ComponentId]) {
        self.slot().lock().push(Command::Add {
            entity,
            classes: classes.into(),
        });
    }

    pub fn remove_components(&self, entity: Entity, classes: &[ComponentId]) {
        self.slot().lock().push(Command::Remove {
            entity,
            classes: classes.into(),
        });
    }

    pub fn mutate_components(
        &self,
        entity: Entity,
        adds: &[ComponentId],
        removes: &[ComponentId],
    ) {
        self.slot().lock().push(Command::Mutate {
            entity,
            adds: adds.into(),
            removes: removes.into(),
        });
    }

    pub fn set_managed(&self, entity: Entity, id: ComponentId, value: impl Any + Send + Sync) {
        self.slot().lock().push(Command::SetManaged {
            entity,
            id,
            value: Box::new(value),
        });
    }

    pub fn set_shared(&self, entity: Entity, id: ComponentId, value: impl SharedComponent) {
        self.slot().lock().push(Command::SetShared {
            entity,
            id,
            value: Box::new(value),
        });
    }

    pub fn set_shared_value(
        &self,
        entity: Entity,
        id: ComponentId,
        value: impl SharedValueComponent,
    ) {
        self.slot().lock().push(Command::SetSharedValue {
            entity,
            id,
            bits: value.to_bits(),
        });
    }

    pub fn destroy(&self, entity: Entity) {
        self.slot().lock().push(Command::Destroy { entity });
    }
}

impl Drop for ParallelWriter<'_> {
    fn drop(&mut self) {
        for slot in self.slots.iter_mut() {
            self.buffer.commands.append(slot.get_mut());
        }
    }
}
