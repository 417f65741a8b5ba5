//!
//! Archetype-based entity component system.
//!
//! Entities are grouped by component signature into archetypes; each
//! archetype stores its entities in fixed-capacity SoA chunks, partitioned
//! into chunk groups by shared-component key. Queries match archetypes
//! against mask predicates and iterate chunks sequentially or across a
//! worker pool, with structural changes deferred through command buffers.
//!

mod archetype;
mod command;
mod dispatch;
mod entity;
mod error;
mod handle;
mod layout;
mod managed;
mod mask;
mod query;
mod registry;
mod shared;
mod world;

pub use self::{
    archetype::{Archetype, Chunk, ChunkGroup},
    command::{CommandBuffer, ParallelWriter},
    entity::Entity,
    error::{Error, Result},
    handle::ComponentHandle,
    layout::{
        ComponentDescriptor, ComponentField, ComponentKind, DescriptorBuilder, FieldSpec,
        LayoutStrategy, Primitive,
    },
    managed::{ManagedRef, ManagedStore},
    mask::ComponentMask,
    query::{Query, QueryBuilder},
    registry::{
        Component, ComponentId, ComponentRegistry, ManagedComponent, SharedComponent,
        SharedValueComponent,
    },
    shared::{SharedKey, SharedValue, SharedValueStore},
    world::{World, WorldConfig},
};
