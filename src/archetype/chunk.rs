//! Fixed-capacity SoA chunk: one byte column per unmanaged component type,
//! an entity-id column, ticket columns for managed components, an occupancy
//! bitset and a lock-free free-slot list.

use {
    bumpalo::Bump,
    std::{
        alloc::Layout,
        mem::size_of,
        ptr::NonNull,
        slice,
        sync::atomic::{
            AtomicBool, AtomicI32, AtomicU32, AtomicU64,
            Ordering::{AcqRel, Acquire, Relaxed, Release},
        },
    },
};

/// Free-list terminator.
const NIL: u32 = u32::MAX;

/// Byte offsets of every column within a chunk's block, shared by all chunks
/// of one archetype.
#[derive(Clone, Debug)]
pub(crate) struct ChunkLayout {
    capacity: usize,
    block: Layout,
    entity_offset: usize,
    ticket_offsets: Box<[usize]>,
    columns: Box<[ColumnSpec]>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct ColumnSpec {
    pub offset: usize,
    pub size: usize,
}

impl ChunkLayout {
    /// Lay out a block for `capacity` slots: entity ids first, then one
    /// ticket column per managed component, then the unmanaged columns.
    pub fn new(capacity: usize, column_sizes: &[usize], managed_columns: usize) -> Self {
        debug_assert!(capacity > 0);

        let entity_offset = 0;
        let mut offset = capacity * size_of::<i32>();

        let ticket_offsets = (0..managed_columns)
            .map(|_| {
                let at = offset;
                offset += capacity * size_of::<i32>();
                at
            })
            .collect();

        let columns = column_sizes
            .iter()
            .map(|size| {
                offset = round_up(offset, BLOCK_ALIGN);
                let spec = ColumnSpec {
                    offset,
                    size: *size,
                };
                offset += capacity * size;
                spec
            })
            .collect();

        let block = Layout::from_size_align(round_up(offset.max(1), BLOCK_ALIGN), BLOCK_ALIGN)
            .expect("chunk block layout overflow");

        ChunkLayout {
            capacity,
            block,
            entity_offset,
            ticket_offsets,
            columns,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn block_size(&self) -> usize {
        self.block.size()
    }
}

const BLOCK_ALIGN: usize = 8;

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

fn pack(tag: u32, index: u32) -> u64 {
    (u64::from(tag) << 32) | u64::from(index)
}

fn unpack(head: u64) -> (u32, u32) {
    ((head >> 32) as u32, head as u32)
}

/// One fixed-capacity block of entity data.
///
/// Slot allocation and release are lock-free against each other and against
/// iteration. Column byte writes are not synchronized within a slot; writers
/// must own the slot they touch.
pub struct Chunk {
    base: NonNull<u8>,
    capacity: usize,
    entity_offset: usize,
    ticket_offsets: Box<[usize]>,
    columns: Box<[ColumnSpec]>,
    occupancy: Box<[AtomicU64]>,
    free_next: Box<[AtomicU32]>,
    free_head: AtomicU64,
    len: AtomicU32,
    queued: AtomicBool,
}

/// The raw block pointer targets memory owned by the group arena; the chunk
/// never outlives it.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    /// Carve a chunk block out of `arena` and initialize it empty.
    pub(crate) fn new(layout: &ChunkLayout, arena: &Bump) -> Chunk {
        let base = arena.alloc_layout(layout.block);

        unsafe {
            // Fresh arena memory is uninitialized. Zero the whole block,
            // then paint the entity-id and ticket columns with -1.
            std::ptr::write_bytes(base.as_ptr(), 0, layout.block.size());
            std::ptr::write_bytes(
                base.as_ptr().add(layout.entity_offset),
                0xFF,
                layout.capacity * size_of::<i32>(),
            );
            for offset in layout.ticket_offsets.iter() {
                std::ptr::write_bytes(
                    base.as_ptr().add(*offset),
                    0xFF,
                    layout.capacity * size_of::<i32>(),
                );
            }
        }

        let words = (layout.capacity + 63) / 64;
        let occupancy = (0..words).map(|_| AtomicU64::new(0)).collect();

        let free_next = (0..layout.capacity)
            .map(|slot| {
                let next = slot + 1;
                AtomicU32::new(if next == layout.capacity {
                    NIL
                } else {
                    next as u32
                })
            })
            .collect();

        Chunk {
            base,
            capacity: layout.capacity,
            entity_offset: layout.entity_offset,
            ticket_offsets: layout.ticket_offsets.clone(),
            columns: layout.columns.clone(),
            occupancy,
            free_next,
            free_head: AtomicU64::new(pack(0, 0)),
            len: AtomicU32::new(0),
            queued: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len.load(Acquire) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Claim a free slot for `entity`.
    ///
    /// The slot's byte columns are zeroed and its ticket cells reset before
    /// the entity id and occupancy bit are published, so a reader that
    /// observes the occupancy bit sees a cleanly initialized slot.
    pub fn allocate_slot(&self, entity: i32) -> Option<usize> {
        let slot = self.pop_free()?;

        for column in self.columns.iter() {
            unsafe {
                // Slot is exclusively ours until the occupancy bit is set.
                std::ptr::write_bytes(
                    self.base.as_ptr().add(column.offset + slot * column.size),
                    0,
                    column.size,
                );
            }
        }
        for ticket in 0..self.ticket_offsets.len() {
            self.ticket_cell(ticket, slot).store(-1, Relaxed);
        }

        self.entity_cell(slot).store(entity, Release);
        let (word, bit) = occupancy_bit(slot);
        self.occupancy[word].fetch_or(bit, Release);
        self.len.fetch_add(1, Release);
        Some(slot)
    }

    /// Release a slot back to the free list. Double-free is a no-op and
    /// returns `false`. Column bytes are left as-is; they are zeroed on the
    /// next allocation of the slot.
    pub fn free_slot(&self, slot: usize) -> bool {
        debug_assert!(slot < self.capacity);

        if self.entity_cell(slot).swap(-1, AcqRel) == -1 {
            return false;
        }

        let (word, bit) = occupancy_bit(slot);
        self.occupancy[word].fetch_and(!bit, Release);
        self.len.fetch_sub(1, Release);
        self.push_free(slot);
        true
    }

    /// Entity id at `slot`, or `-1` for a free slot.
    pub fn entity_id(&self, slot: usize) -> i32 {
        self.entity_cell(slot).load(Acquire)
    }

    /// Next occupied slot index at or after `from`.
    pub fn next_occupied(&self, from: usize) -> Option<usize> {
        if from >= self.capacity {
            return None;
        }
        let mut word = from / 64;
        let mut bits = self.occupancy[word].load(Acquire) & (!0u64 << (from % 64));
        loop {
            if bits != 0 {
                let slot = word * 64 + bits.trailing_zeros() as usize;
                return if slot < self.capacity { Some(slot) } else { None };
            }
            word += 1;
            if word == self.occupancy.len() {
                return None;
            }
            bits = self.occupancy[word].load(Acquire);
        }
    }

    /// Shared view of one element in an unmanaged column.
    pub fn column_slice(&self, column: usize, slot: usize) -> &[u8] {
        let spec = self.columns[column];
        debug_assert!(slot < self.capacity);
        unsafe {
            // In bounds per the layout; readers see bytes published before
            // the slot's occupancy bit.
            slice::from_raw_parts(
                self.base.as_ptr().add(spec.offset + slot * spec.size),
                spec.size,
            )
        }
    }

    /// Copy `src` into an element, bounded by `min(element_size, src.len())`.
    ///
    /// # Safety
    ///
    /// The caller must own the slot: no concurrent reader or writer may
    /// touch this element during the copy.
    pub unsafe fn set_column_slice(&self, column: usize, slot: usize, src: &[u8]) {
        let spec = self.columns[column];
        debug_assert!(slot < self.capacity);
        let len = spec.size.min(src.len());
        std::ptr::copy_nonoverlapping(
            src.as_ptr(),
            self.base.as_ptr().add(spec.offset + slot * spec.size),
            len,
        );
    }

    /// Raw pointer to one element of an unmanaged column.
    pub(crate) fn column_ptr(&self, column: usize, slot: usize) -> *mut u8 {
        let spec = self.columns[column];
        debug_assert!(slot < self.capacity);
        unsafe { self.base.as_ptr().add(spec.offset + slot * spec.size) }
    }

    /// Element size of an unmanaged column.
    pub fn column_size(&self, column: usize) -> usize {
        self.columns[column].size
    }

    /// Managed ticket at `(column, slot)`, `-1` when absent.
    pub fn managed_ticket(&self, column: usize, slot: usize) -> i32 {
        self.ticket_cell(column, slot).load(Acquire)
    }

    pub fn set_managed_ticket(&self, column: usize, slot: usize, ticket: i32) {
        self.ticket_cell(column, slot).store(ticket, Release);
    }

    /// Mark the chunk as queued for processing. Returns `false` when it was
    /// already queued. Scheduler helper state, irrelevant to iteration.
    pub fn try_mark_queued(&self) -> bool {
        !self.queued.swap(true, AcqRel)
    }

    pub fn clear_queued(&self) {
        self.queued.store(false, Release);
    }

    fn pop_free(&self) -> Option<usize> {
        let mut head = self.free_head.load(Acquire);
        loop {
            let (tag, slot) = unpack(head);
            if slot == NIL {
                return None;
            }
            let next = self.free_next[slot as usize].load(Relaxed);
            match self.free_head.compare_exchange_weak(
                head,
                pack(tag.wrapping_add(1), next),
                AcqRel,
                Acquire,
            ) {
                Ok(_) => return Some(slot as usize),
                Err(current) => head = current,
            }
        }
    }

    fn push_free(&self, slot: usize) {
        let mut head = self.free_head.load(Acquire);
        loop {
            let (tag, top) = unpack(head);
            self.free_next[slot].store(top, Relaxed);
            match self.free_head.compare_exchange_weak(
                head,
                pack(tag.wrapping_add(1), slot as u32),
                AcqRel,
                Acquire,
            ) {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    fn entity_cell(&self, slot: usize) -> &AtomicI32 {
        debug_assert!(slot < self.capacity);
        unsafe {
            // Offset is 4-aligned within an 8-aligned block.
            &*(self
                .base
                .as_ptr()
                .add(self.entity_offset + slot * size_of::<i32>())
                as *const AtomicI32)
        }
    }

    fn ticket_cell(&self, column: usize, slot: usize) -> &AtomicI32 {
        debug_assert!(slot < self.capacity);
        unsafe {
            // Offset is 4-aligned within an 8-aligned block.
            &*(self
                .base
                .as_ptr()
                .add(self.ticket_offsets[column] + slot * size_of::<i32>())
                as *const AtomicI32)
        }
    }
}

fn occupancy_bit(slot: usize) -> (usize, u64) {
    (slot / 64, 1u64 << (slot % 64))
}
