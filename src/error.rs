use {crate::entity::Entity, thiserror::Error};

/// Failures surfaced by world, registry and layout operations.
///
/// Concurrent-update hazards during iteration are not errors; the iteration
/// contract tolerates them. Double-free of slots, tickets and shared indices
/// are silent no-ops.
#[derive(Debug, Error)]
pub enum Error {
    /// Referenced entity was never created or has been destroyed.
    #[error("entity {0} does not exist")]
    EntityNotFound(Entity),

    /// Component type was not registered with this world's registry.
    #[error("component type `{0}` is not registered")]
    ComponentNotRegistered(&'static str),

    /// Component field description could not be resolved into a layout.
    #[error("invalid component layout: {0}")]
    InvalidLayout(String),

    /// A batch operation referenced the same entity more than once.
    #[error("batch references the same entity more than once")]
    InvalidBatch,

    /// Storage could not grow.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// Operation on a world after `close`.
    #[error("world has been closed")]
    WorldClosed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
