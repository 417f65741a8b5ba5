//! All chunks of one archetype that share an identical shared-component key.

use {
    super::chunk::{Chunk, ChunkLayout},
    crate::shared::SharedKey,
    bumpalo::Bump,
};

/// Arena backing a group's chunk blocks.
///
/// `Bump` is not `Sync`; this wrapper is sound because the arena is only
/// allocated from under a unique world borrow, while shared borrows of the
/// world only read the already-carved chunk blocks.
struct GroupArena(Bump);

unsafe impl Sync for GroupArena {}

/// Ordered collection of chunks for one `(archetype, shared_key)` pair.
///
/// The group owns chunk memory through a single arena; dropping the group
/// releases every block at once. Chunks are append-only and never evicted,
/// so the group created with an archetype always keeps at least one chunk.
pub struct ChunkGroup {
    key: SharedKey,
    // Declared before `arena` so chunks drop before the blocks they point to.
    chunks: Vec<Box<Chunk>>,
    arena: GroupArena,
}

impl ChunkGroup {
    /// Create a group with its first chunk allocated eagerly.
    pub(crate) fn new(key: SharedKey, layout: &ChunkLayout) -> Self {
        let arena = GroupArena(Bump::new());
        let first = Box::new(Chunk::new(layout, &arena.0));
        log::trace!(
            "allocated chunk ({} slots, {} bytes)",
            layout.capacity(),
            layout.block_size(),
        );
        ChunkGroup {
            key,
            chunks: vec![first],
            arena,
        }
    }

    /// The shared key every entity of this group carries.
    pub fn key(&self) -> &SharedKey {
        &self.key
    }

    /// Place an entity in the first chunk with a free slot, allocating a new
    /// chunk when every existing one is full.
    pub(crate) fn add_entity(&mut self, entity: i32, layout: &ChunkLayout) -> (usize, usize) {
        for (index, chunk) in self.chunks.iter().enumerate() {
            if let Some(slot) = chunk.allocate_slot(entity) {
                return (index, slot);
            }
        }

        let chunk = Box::new(Chunk::new(layout, &self.arena.0));
        log::trace!(
            "allocated chunk ({} slots, {} bytes)",
            layout.capacity(),
            layout.block_size(),
        );
        let slot = chunk
            .allocate_slot(entity)
            .expect("fresh chunk must have a free slot");
        self.chunks.push(chunk);
        (self.chunks.len() - 1, slot)
    }

    /// Release one slot. Double-free is a no-op.
    pub(crate) fn remove_entity(&self, chunk: usize, slot: usize) -> bool {
        self.chunks[chunk].free_slot(slot)
    }

    pub fn chunk(&self, index: usize) -> &Chunk {
        &self.chunks[index]
    }

    /// Snapshot of the group's chunks. Boxes keep chunk addresses stable
    /// across later appends.
    pub fn chunks(&self) -> &[Box<Chunk>] {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn entity_count(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::shared::SharedKey};

    #[test]
    fn overflow_allocates_second_chunk() {
        let layout = ChunkLayout::new(2, &[4], 0);
        let mut group = ChunkGroup::new(SharedKey::default_for(0, 0), &layout);
        assert_eq!(group.chunk_count(), 1);

        let a = group.add_entity(1, &layout);
        let b = group.add_entity(2, &layout);
        assert_eq!((a.0, b.0), (0, 0));
        assert_eq!(group.chunk_count(), 1);

        let c = group.add_entity(3, &layout);
        assert_eq!(c, (1, 0));
        assert_eq!(group.chunk_count(), 2);
        assert_eq!(group.entity_count(), 3);
    }

    #[test]
    fn freed_slots_are_reused_before_new_chunks() {
        let layout = ChunkLayout::new(2, &[4], 0);
        let mut group = ChunkGroup::new(SharedKey::default_for(0, 0), &layout);

        group.add_entity(1, &layout);
        let (chunk, slot) = group.add_entity(2, &layout);
        assert!(group.remove_entity(chunk, slot));

        let again = group.add_entity(3, &layout);
        assert_eq!(again, (chunk, slot));
        assert_eq!(group.chunk_count(), 1);
    }
}
