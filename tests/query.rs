use strata::*;

struct Pos;
struct Vel;
struct Frozen;

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

impl Component for Frozen {
    fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::builder()
            .field("flag", Primitive::Bool)
            .resolve()
            .unwrap()
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
struct Team(&'static str);
impl SharedComponent for Team {}

struct Layer(u64);
impl SharedValueComponent for Layer {
    fn to_bits(&self) -> u64 {
        self.0
    }
    fn from_bits(bits: u64) -> Self {
        Layer(bits)
    }
}

fn world() -> World {
    let _ = env_logger::try_init();
    World::new().unwrap()
}

#[test]
fn with_without_and_any() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    let vel = world.register::<Vel>().unwrap();
    let frozen = world.register::<Frozen>().unwrap();

    world.create_entities(&[pos], 3).unwrap();
    world.create_entities(&[pos, vel], 4).unwrap();
    world.create_entities(&[pos, vel, frozen], 5).unwrap();

    assert_eq!(world.query().with::<Pos>().build().unwrap().count(), 12);
    assert_eq!(
        world
            .query()
            .with::<Pos>()
            .with::<Vel>()
            .build()
            .unwrap()
            .count(),
        9
    );
    assert_eq!(
        world
            .query()
            .with::<Pos>()
            .without::<Frozen>()
            .build()
            .unwrap()
            .count(),
        7
    );
    assert_eq!(
        world
            .query()
            .any(&[vel, frozen])
            .build()
            .unwrap()
            .count(),
        9
    );
}

#[test]
fn empty_with_mask_matches_everything() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();

    world.create_entity(&[]).unwrap();
    world.create_entity(&[pos]).unwrap();

    assert_eq!(world.query().build().unwrap().count(), 2);
}

#[test]
fn duplicate_with_requests_are_idempotent() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    world.create_entities(&[pos], 3).unwrap();

    let query = world
        .query()
        .with::<Pos>()
        .with::<Pos>()
        .build()
        .unwrap();
    assert_eq!(query.count(), 3);

    let mut handle_counts = Vec::new();
    query.for_each(|_, handles, _| handle_counts.push(handles.len()));
    assert_eq!(handle_counts, vec![1, 1, 1]);
}

#[test]
fn for_each_binds_handles_in_declaration_order() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    let vel = world.register::<Vel>().unwrap();

    let entity = world.create_entity(&[pos, vel]).unwrap();
    {
        let mut handle = world.edit_component::<Pos>(entity).unwrap();
        handle.set_f32(0, 1.0);
    }
    {
        let mut handle = world.edit_component::<Vel>(entity).unwrap();
        handle.set_f32(0, 10.0);
    }

    // `Vel` declared before `Pos`: handles follow builder order.
    world
        .query()
        .with::<Vel>()
        .with::<Pos>()
        .build()
        .unwrap()
        .for_each(|_, handles, _| {
            assert_eq!(handles[0].get_f32(0), 10.0);
            assert_eq!(handles[1].get_f32(0), 1.0);
        });
}

#[test]
fn for_each_writes_through_handles() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    let vel = world.register::<Vel>().unwrap();

    let entities = world.create_entities(&[pos, vel], 50).unwrap();
    for entity in &entities {
        let mut handle = world.edit_component::<Vel>(*entity).unwrap();
        handle.set_f32(0, 2.0);
        handle.set_f32(1, -1.0);
    }

    // One integration step: pos += vel.
    world
        .query()
        .with::<Pos>()
        .with::<Vel>()
        .build()
        .unwrap()
        .for_each(|_, handles, _| {
            let (dx, dy) = (handles[1].get_f32(0), handles[1].get_f32(1));
            let x = handles[0].get_f32(0) + dx;
            let y = handles[0].get_f32(1) + dy;
            handles[0].set_f32(0, x);
            handles[0].set_f32(1, y);
        });

    for entity in &entities {
        let handle = world.edit_component::<Pos>(*entity).unwrap();
        assert_eq!((handle.get_f32(0), handle.get_f32(1)), (2.0, -1.0));
    }
}

#[test]
fn shared_filter_selects_one_group() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    world.register_shared::<Team>().unwrap();

    let mut reds = Vec::new();
    for _ in 0..10 {
        let entity = world.create_entity(&[pos]).unwrap();
        world.set_shared(entity, Team("A")).unwrap();
        reds.push(entity);
    }
    for _ in 0..10 {
        let entity = world.create_entity(&[pos]).unwrap();
        world.set_shared(entity, Team("B")).unwrap();
    }

    let count = |world: &World, team: Team| {
        world
            .query()
            .with::<Pos>()
            .with_shared(team)
            .build()
            .unwrap()
            .count()
    };

    assert_eq!(count(&world, Team("A")), 10);
    assert_eq!(count(&world, Team("B")), 10);

    for entity in reds.drain(..3) {
        world.destroy_entity(entity).unwrap();
    }
    assert_eq!(count(&world, Team("A")), 7);
    assert_eq!(count(&world, Team("B")), 10);
}

#[test]
fn shared_filter_with_uninterned_value_matches_nothing() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    world.register_shared::<Team>().unwrap();

    let entity = world.create_entity(&[pos]).unwrap();
    world.set_shared(entity, Team("A")).unwrap();

    let count = world
        .query()
        .with::<Pos>()
        .with_shared(Team("nobody"))
        .build()
        .unwrap()
        .count();
    assert_eq!(count, 0);
}

#[test]
fn unmanaged_shared_filter_selects_by_value() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    world.register_shared_value::<Layer>().unwrap();

    for layer in [1u64, 1, 2, 3] {
        let entity = world.create_entity(&[pos]).unwrap();
        world.set_shared_value(entity, Layer(layer)).unwrap();
    }

    let count = |world: &World, layer: u64| {
        world
            .query()
            .with::<Pos>()
            .with_shared_value(Layer(layer))
            .build()
            .unwrap()
            .count()
    };
    assert_eq!(count(&world, 1), 2);
    assert_eq!(count(&world, 2), 1);
    assert_eq!(count(&world, 9), 0);
}

#[test]
fn setting_the_same_shared_value_is_a_noop() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    world.register_shared::<Team>().unwrap();

    let entity = world.create_entity(&[pos]).unwrap();
    world.set_shared(entity, Team("A")).unwrap();
    let chunks_before = world.archetype_of(entity).unwrap().chunk_count();

    world.set_shared(entity, Team("A")).unwrap();
    assert_eq!(
        world.archetype_of(entity).unwrap().chunk_count(),
        chunks_before
    );
    assert_eq!(world.get_shared::<Team>(entity).unwrap(), Some(Team("A")));
    assert_eq!(world.shared_value_count(), 1);
}

#[test]
fn reshared_entities_keep_column_data() {
    let mut world = world();
    let pos = world.register::<Pos>().unwrap();
    world.register_shared::<Team>().unwrap();

    let entity = world.create_entity(&[pos]).unwrap();
    {
        let mut handle = world.edit_component::<Pos>(entity).unwrap();
        handle.set_f32(0, 8.0);
        handle.set_f32(1, 9.0);
    }

    world.set_shared(entity, Team("A")).unwrap();
    world.set_shared(entity, Team("B")).unwrap();

    let handle = world.edit_component::<Pos>(entity).unwrap();
    assert_eq!((handle.get_f32(0), handle.get_f32(1)), (8.0, 9.0));
    assert_eq!(world.get_shared::<Team>(entity).unwrap(), Some(Team("B")));
}

#[test]
fn unregistered_type_fails_at_build() {
    let world = world();
    assert!(matches!(
        world.query().with::<Pos>().build(),
        Err(Error::ComponentNotRegistered(_))
    ));
}
