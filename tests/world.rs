use strata::*;

struct Pos;
struct Vel;
struct Health;

impl Component for Pos {
    fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::builder()
            .field("x", Primitive::F32)
            .field("y", Primitive::F32)
            .resolve()
            .unwrap()
    }
}

impl Component for Vel {
    fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::builder()
            .field("dx", Primitive::F32)
            .field("dy", Primitive::F32)
            .resolve()
            .unwrap()
    }
}

impl Component for Health {
    fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::builder()
            .field("hp", Primitive::I32)
            .resolve()
            .unwrap()
    }
}

struct Label(String);
impl ManagedComponent for Label {}

fn world() -> World {
    let _ = env_logger::try_init();
    World::new().unwrap()
}

#[test]
fn create_starts_zeroed() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();

    let entity = world.create_entity(&[pos]).unwrap();
    assert!(world.contains(entity));
    assert!(world.has_component::<Pos>(entity).unwrap());

    let bytes = world.get_component_bytes::<Pos>(entity).unwrap().unwrap();
    assert_eq!(bytes, &[0u8; 8][..]);
}

#[test]
fn entity_ids_are_monotonic_and_not_recycled() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();

    let a = world.create_entity(&[pos]).unwrap();
    let b = world.create_entity(&[pos]).unwrap();
    assert!(b.id() > a.id());

    world.destroy_entity(a).unwrap();
    let c = world.create_entity(&[pos]).unwrap();
    assert!(c.id() > b.id());
}

#[test]
fn chunk_boundary_spills_into_second_chunk() {
    // 1024-byte budget with an 8-byte payload gives 128 slots per chunk.
    let _ = env_logger::try_init();
    let mut world = World::open(WorldConfig {
        chunk_budget_bytes: 1024,
        ..WorldConfig::default()
    })
    .unwrap();
    let pos = world.register::<Pos>().unwrap();

    let entities = world.create_entities(&[pos], 128).unwrap();
    let archetype = world.archetype_of(entities[0]).unwrap();
    assert_eq!(archetype.chunk_capacity(), 128);
    assert_eq!(archetype.chunk_count(), 1);

    let spill = world.create_entity(&[pos]).unwrap();
    let archetype = world.archetype_of(spill).unwrap();
    assert_eq!(archetype.chunk_count(), 2);
    assert_eq!(archetype.entity_count(), 129);
}

#[test]
fn migration_preserves_unrelated_data() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    let vel = world.register::<Vel>().unwrap();
    world.register::<Health>().unwrap();

    let entity = world.create_entity(&[pos, vel]).unwrap();
    {
        let mut handle = world.edit_component::<Pos>(entity).unwrap();
        handle.set_f32(0, 3.0);
        handle.set_f32(1, 4.0);
    }
    {
        let mut handle = world.edit_component::<Vel>(entity).unwrap();
        handle.set_f32(0, 0.5);
        handle.set_f32(1, -0.5);
    }

    world.add_component::<Health>(entity).unwrap();

    let handle = world.edit_component::<Pos>(entity).unwrap();
    assert_eq!((handle.get_f32(0), handle.get_f32(1)), (3.0, 4.0));
    let handle = world.edit_component::<Vel>(entity).unwrap();
    assert_eq!((handle.get_f32(0), handle.get_f32(1)), (0.5, -0.5));
    // Freshly added unmanaged component defaults to zero.
    let handle = world.edit_component::<Health>(entity).unwrap();
    assert_eq!(handle.get_i32(0), 0);
}

#[test]
fn add_then_remove_is_observably_neutral() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    world.register::<Health>().unwrap();
    world.register_managed::<Label>().unwrap();

    let entity = world.create_entity(&[pos]).unwrap();
    world
        .add_component_with::<Pos, _>(entity, |handle| {
            handle.set_f32(0, 1.5);
            handle.set_f32(1, 2.5);
        })
        .unwrap();
    world.set_managed(entity, Label("anchor".into())).unwrap();

    world.add_component::<Health>(entity).unwrap();
    world.remove_component::<Health>(entity).unwrap();

    assert!(!world.has_component::<Health>(entity).unwrap());
    let handle = world.edit_component::<Pos>(entity).unwrap();
    assert_eq!((handle.get_f32(0), handle.get_f32(1)), (1.5, 2.5));
    assert_eq!(
        world.get_managed::<Label>(entity).unwrap().unwrap().0,
        "anchor"
    );
}

#[test]
fn remove_absent_component_is_a_noop() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    world.register::<Health>().unwrap();

    let entity = world.create_entity(&[pos]).unwrap();
    world.remove_component::<Health>(entity).unwrap();
    assert!(world.has_component::<Pos>(entity).unwrap());
}

#[test]
fn destroy_restores_entity_count() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();

    let before = world.entity_count();
    let entity = world.create_entity(&[pos]).unwrap();
    world.destroy_entity(entity).unwrap();
    assert_eq!(world.entity_count(), before);

    // Destroying a dead id is silently ignored.
    world.destroy_entity(entity).unwrap();
    assert!(matches!(
        world.get_component_bytes::<Pos>(entity),
        Err(Error::EntityNotFound(_))
    ));
}

#[test]
fn destroy_releases_managed_tickets() {
    let mut world = world();
    world.register_managed::<Label>().unwrap();

    let entity = world.create_entity(&[]).unwrap();
    world.set_managed(entity, Label("a".into())).unwrap();
    assert_eq!(world.managed_count(), 1);

    world.destroy_entity(entity).unwrap();
    assert_eq!(world.managed_count(), 0);
}

#[test]
fn set_managed_replaces_previous_object() {
    let mut world = world();
    world.register_managed::<Label>().unwrap();

    let entity = world.create_entity(&[]).unwrap();
    world.set_managed(entity, Label("first".into())).unwrap();
    world.set_managed(entity, Label("second".into())).unwrap();

    assert_eq!(world.managed_count(), 1);
    assert_eq!(
        world.get_managed::<Label>(entity).unwrap().unwrap().0,
        "second"
    );
}

#[test]
fn unregistered_component_is_an_error() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    let entity = world.create_entity(&[pos]).unwrap();

    assert!(matches!(
        world.get_component_bytes::<Health>(entity),
        Err(Error::ComponentNotRegistered(_))
    ));
    assert!(matches!(
        world.add_component::<Health>(entity),
        Err(Error::ComponentNotRegistered(_))
    ));
}

#[test]
fn empty_signature_entities_are_supported() {
    let mut world = world();
    let entity = world.create_entity(&[]).unwrap();
    assert!(world.contains(entity));
    assert_eq!(world.archetype_of(entity).unwrap().entity_count(), 1);
}

#[test]
fn mutate_components_moves_a_batch() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    let vel = world.register::<Vel>().unwrap();
    let health = world.register::<Health>().unwrap();

    let entities = world.create_entities(&[pos, vel], 10).unwrap();
    for (i, entity) in entities.iter().enumerate() {
        let mut handle = world.edit_component::<Pos>(*entity).unwrap();
        handle.set_f32(0, i as f32);
    }

    world.mutate_components(&entities, &[health], &[vel]).unwrap();

    for (i, entity) in entities.iter().enumerate() {
        assert!(world.has_component::<Health>(*entity).unwrap());
        assert!(!world.has_component::<Vel>(*entity).unwrap());
        let handle = world.edit_component::<Pos>(*entity).unwrap();
        assert_eq!(handle.get_f32(0), i as f32);
    }
}

#[test]
fn duplicate_entity_in_batch_is_rejected() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    let vel = world.register::<Vel>().unwrap();

    let entity = world.create_entity(&[pos]).unwrap();
    assert!(matches!(
        world.mutate_components(&[entity, entity], &[vel], &[]),
        Err(Error::InvalidBatch)
    ));
}

#[test]
fn slot_double_free_is_tolerated() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();

    let keep = world.create_entity(&[pos]).unwrap();
    let gone = world.create_entity(&[pos]).unwrap();

    world.destroy_entity(gone).unwrap();
    world.destroy_entity(gone).unwrap();

    let archetype = world.archetype_of(keep).unwrap();
    assert_eq!(archetype.entity_count(), 1);
}

#[test]
fn closed_world_rejects_operations() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    let entity = world.create_entity(&[pos]).unwrap();

    world.close();
    assert!(world.is_closed());
    assert!(matches!(
        world.create_entity(&[pos]),
        Err(Error::WorldClosed)
    ));
    assert!(matches!(
        world.get_component_bytes::<Pos>(entity),
        Err(Error::WorldClosed)
    ));
    // Closing twice is fine.
    world.close();
}

#[test]
fn open_with_runs_the_registration_hook() {
    let _ = env_logger::try_init();
    let world = World::open_with(WorldConfig::default(), |world| {
        world.register::<Pos>()?;
        world.register::<Vel>()?;
        Ok(())
    })
    .unwrap();

    assert!(world.component_id::<Pos>().is_some());
    assert!(world.component_id::<Vel>().is_some());
}
