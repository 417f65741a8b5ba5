//! Component type registration: stable integer type ids and interned
//! descriptors.

use {
    crate::{
        error::{Error, Result},
        layout::{ComponentDescriptor, ComponentKind},
    },
    hashbrown::HashMap,
    std::{
        any::{type_name, TypeId},
        hash::Hash,
    },
};

/// Stable integer identity of a registered component type.
///
/// Ids are assigned 0, 1, 2, ... in registration order with no gaps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(u32);

impl ComponentId {
    pub(crate) fn new(index: u32) -> Self {
        ComponentId(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Unmanaged-instance component: a per-entity byte payload laid out by a
/// descriptor and stored in archetype chunk columns.
pub trait Component: Send + Sync + 'static {
    fn descriptor() -> ComponentDescriptor;
}

/// Managed-instance component: a per-entity opaque object stored by ticket
/// in the managed object store.
pub trait ManagedComponent: Send + Sync + 'static {}

/// Managed-shared component: a per-chunk-group value deduplicated by
/// equality in the shared value store.
pub trait SharedComponent: PartialEq + Eq + Hash + Clone + Send + Sync + 'static {}

/// Unmanaged-shared component: a per-chunk-group value that fits in 64 bits.
pub trait SharedValueComponent: Send + Sync + 'static {
    fn to_bits(&self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

struct RegistryEntry {
    name: &'static str,
    descriptor: ComponentDescriptor,
}

/// Assigns type ids and interns descriptors.
///
/// Registration is idempotent per Rust type: re-registering returns the
/// existing id. One registry exists per world.
pub struct ComponentRegistry {
    by_key: HashMap<TypeId, ComponentId>,
    entries: Vec<RegistryEntry>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        ComponentRegistry {
            by_key: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Register an unmanaged-instance component type.
    pub fn register<T: Component>(&mut self) -> Result<ComponentId> {
        let descriptor = T::descriptor();
        if descriptor.kind() != ComponentKind::Unmanaged {
            return Err(Error::InvalidLayout(format!(
                "descriptor for `{}` is not an unmanaged-instance descriptor",
                type_name::<T>()
            )));
        }
        self.register_with(TypeId::of::<T>(), type_name::<T>(), descriptor)
    }

    /// Register a managed-instance component type.
    pub fn register_managed<T: ManagedComponent>(&mut self) -> Result<ComponentId> {
        self.register_with(
            TypeId::of::<T>(),
            type_name::<T>(),
            ComponentDescriptor::managed(),
        )
    }

    /// Register a managed-shared component type.
    ///
    /// The `SharedComponent` bound supplies the value equality and hash the
    /// shared value store keys on.
    pub fn register_shared<T: SharedComponent>(&mut self) -> Result<ComponentId> {
        self.register_with(
            TypeId::of::<T>(),
            type_name::<T>(),
            ComponentDescriptor::managed_shared(),
        )
    }

    /// Register an unmanaged-shared component type.
    pub fn register_shared_value<T: SharedValueComponent>(&mut self) -> Result<ComponentId> {
        self.register_with(
            TypeId::of::<T>(),
            type_name::<T>(),
            ComponentDescriptor::shared_value(),
        )
    }

    /// Register a descriptor under an explicit key.
    ///
    /// Idempotent under key equality: a key registered twice keeps its first
    /// id and descriptor.
    pub fn register_with(
        &mut self,
        key: TypeId,
        name: &'static str,
        descriptor: ComponentDescriptor,
    ) -> Result<ComponentId> {
        if let Some(id) = self.by_key.get(&key) {
            return Ok(*id);
        }

        if descriptor.kind() == ComponentKind::UnmanagedShared && descriptor.total_size() > 8 {
            return Err(Error::InvalidLayout(format!(
                "unmanaged-shared component `{}` exceeds 64 bits",
                name
            )));
        }

        let id = ComponentId::new(self.entries.len() as u32);
        self.entries.push(RegistryEntry { name, descriptor });
        self.by_key.insert(key, id);
        log::trace!("registered component `{}` as {:?}", name, id);
        Ok(id)
    }

    /// Look up the id assigned to a Rust type, if registered.
    pub fn id_of<T: 'static>(&self) -> Option<ComponentId> {
        self.by_key.get(&TypeId::of::<T>()).copied()
    }

    /// Like `id_of` but surfaces the unregistered case as an error.
    pub(crate) fn expect_id<T: 'static>(&self) -> Result<ComponentId> {
        self.id_of::<T>()
            .ok_or_else(|| Error::ComponentNotRegistered(type_name::<T>()))
    }

    pub fn descriptor(&self, id: ComponentId) -> &ComponentDescriptor {
        &self.entries[id.index()].descriptor
    }

    pub fn kind(&self, id: ComponentId) -> ComponentKind {
        self.entries[id.index()].descriptor.kind()
    }

    pub fn name(&self, id: ComponentId) -> &'static str {
        self.entries[id.index()].name
    }

    /// True when `id` was produced by this registry.
    pub fn is_valid(&self, id: ComponentId) -> bool {
        id.index() < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::layout::{LayoutStrategy, Primitive},
    };

    struct Pos;
    impl Component for Pos {
        fn descriptor() -> ComponentDescriptor {
            ComponentDescriptor::builder()
                .field("x", Primitive::F32)
                .field("y", Primitive::F32)
                .resolve()
                .unwrap()
        }
    }

    struct Name;
    impl ManagedComponent for Name {}

    #[test]
    fn ids_are_dense_and_stable() {
        let mut registry = ComponentRegistry::new();
        let pos = registry.register::<Pos>().unwrap();
        let name = registry.register_managed::<Name>().unwrap();

        assert_eq!(pos.index(), 0);
        assert_eq!(name.index(), 1);
        assert_eq!(registry.register::<Pos>().unwrap(), pos);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn lookup_by_type() {
        let mut registry = ComponentRegistry::new();
        assert_eq!(registry.id_of::<Pos>(), None);
        let pos = registry.register::<Pos>().unwrap();
        assert_eq!(registry.id_of::<Pos>(), Some(pos));
        assert_eq!(registry.kind(pos), ComponentKind::Unmanaged);
    }

    #[test]
    fn oversized_shared_value_is_rejected() {
        let mut registry = ComponentRegistry::new();
        let wide = ComponentDescriptor::resolve(
            ComponentKind::UnmanagedShared,
            LayoutStrategy::Sequential,
            &[
                crate::layout::FieldSpec::new("a", Primitive::I64),
                crate::layout::FieldSpec::new("b", Primitive::I64),
            ],
            None,
        )
        .unwrap();

        let err = registry
            .register_with(TypeId::of::<u128>(), "wide", wide)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLayout(_)));
    }
}
