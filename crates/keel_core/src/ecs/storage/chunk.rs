// chunk.rs - Fixed-size SoA block
//
// A chunk is one 16 KiB block: a small typed header (list links + live row
// count) and an aligned data region holding the entity-id array followed by
// one contiguous column per component type. All offsets into the data
// region come from an ArchetypeLayout; the chunk itself knows nothing about
// which archetype owns it.

use crate::ecs::{ArchetypeLayout, ColumnLayout, Component, Entity};
use std::mem::{align_of, size_of};

/// Whole-block budget per chunk.
pub const CHUNK_BYTES: usize = 16 * 1024;

/// Reserved for the header (list links + live count) so header and data
/// together stay within the block budget.
pub const CHUNK_HEADER_BYTES: usize = 32;

/// Usable bytes for the entity array and component columns.
pub const CHUNK_DATA_BYTES: usize = CHUNK_BYTES - CHUNK_HEADER_BYTES;

/// Index of a chunk inside the pool arena.
///
/// Stands in for the raw chunk pointers of a C-style layout; every
/// dereference goes through the pool, so nothing outlives it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkId(pub(crate) u32);

impl ChunkId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Data region, aligned so the 16-byte-aligned column offsets from layout
/// planning stay aligned in memory.
#[repr(C, align(64))]
struct ChunkData([u8; CHUNK_DATA_BYTES]);

/// One fixed-size storage block.
///
/// Owned by exactly one archetype while live, or by the pool free list
/// while free; never shared, never duplicated.
pub struct Chunk {
    pub(crate) next: Option<ChunkId>,
    pub(crate) prev: Option<ChunkId>,
    live: u16,
    data: Box<ChunkData>,
}

impl Chunk {
    pub(crate) fn new() -> Self {
        Self {
            next: None,
            prev: None,
            live: 0,
            data: Box::new(ChunkData([0; CHUNK_DATA_BYTES])),
        }
    }

    /// Clear header state when the chunk returns to the free list. Stale
    /// column bytes are left in place; rows are initialized on alloc.
    pub(crate) fn reset(&mut self) {
        self.next = None;
        self.prev = None;
        self.live = 0;
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.live as usize
    }

    #[inline]
    pub fn is_full(&self, layout: &ArchetypeLayout) -> bool {
        self.live as usize >= layout.entities_per_chunk()
    }

    /// Append an entity, returning its row.
    ///
    /// No capacity check here: the owning archetype verifies
    /// `live_count() < entities_per_chunk` and rolls a new chunk otherwise.
    pub(crate) fn alloc_row(&mut self, entity: Entity, layout: &ArchetypeLayout) -> u16 {
        debug_assert!(
            (self.live as usize) < layout.entities_per_chunk(),
            "chunk overfilled: {} rows of {}",
            self.live,
            layout.entities_per_chunk()
        );
        let row = self.live;
        let start = row as usize * size_of::<Entity>();
        self.data.0[start..start + size_of::<Entity>()]
            .copy_from_slice(bytemuck::bytes_of(&entity));
        self.live += 1;
        row
    }

    /// Free a row by swap-with-last compaction.
    ///
    /// If `row` was not the last live row, the last row's entity id and
    /// every column value are copied into its slot and the displaced entity
    /// is returned so the caller can patch that entity's record.
    pub(crate) fn free_row(&mut self, row: u16, layout: &ArchetypeLayout) -> Option<Entity> {
        debug_assert!(row < self.live, "freeing row {} of {}", row, self.live);
        let last = self.live - 1;
        let moved = if row != last {
            let moved = self.entity_at(last);

            let entity_size = size_of::<Entity>();
            let src = last as usize * entity_size;
            let dst = row as usize * entity_size;
            self.data.0.copy_within(src..src + entity_size, dst);

            for col in layout.columns() {
                let size = col.component.size as usize;
                let base = col.offset as usize;
                let src = base + last as usize * size;
                let dst = base + row as usize * size;
                self.data.0.copy_within(src..src + size, dst);
            }
            Some(moved)
        } else {
            None
        };
        self.live -= 1;
        moved
    }

    /// Live entity ids, row order.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        bytemuck::cast_slice(&self.data.0[..self.live as usize * size_of::<Entity>()])
    }

    #[inline]
    pub fn entity_at(&self, row: u16) -> Entity {
        debug_assert!(row < self.live);
        let start = row as usize * size_of::<Entity>();
        bytemuck::pod_read_unaligned(&self.data.0[start..start + size_of::<Entity>()])
    }

    /// Raw bytes of one column, live rows only.
    #[inline]
    pub fn column_bytes(&self, col: &ColumnLayout) -> &[u8] {
        let start = col.offset as usize;
        let len = self.live as usize * col.component.size as usize;
        &self.data.0[start..start + len]
    }

    /// Typed view of one column, live rows only.
    ///
    /// The layout planner aligns every column offset to
    /// `MAX_COLUMN_ALIGN`, which bounds the supported component alignment.
    #[inline]
    pub fn column_slice<T: Component>(&self, col: &ColumnLayout) -> &[T] {
        debug_assert_eq!(col.component.id, T::ID);
        debug_assert_eq!(col.component.size as usize, size_of::<T>());
        debug_assert!(align_of::<T>() <= crate::ecs::MAX_COLUMN_ALIGN);
        bytemuck::cast_slice(self.column_bytes(col))
    }

    /// Mutable typed view of one column, live rows only.
    #[inline]
    pub fn column_slice_mut<T: Component>(&mut self, col: &ColumnLayout) -> &mut [T] {
        debug_assert_eq!(col.component.id, T::ID);
        debug_assert_eq!(col.component.size as usize, size_of::<T>());
        debug_assert!(align_of::<T>() <= crate::ecs::MAX_COLUMN_ALIGN);
        let start = col.offset as usize;
        let len = self.live as usize * col.component.size as usize;
        bytemuck::cast_slice_mut(&mut self.data.0[start..start + len])
    }

    /// Typed column view from a precomputed byte offset (cached queries
    /// store offsets instead of column layouts).
    #[inline]
    pub(crate) fn column_at<T: Component>(&self, offset: usize) -> &[T] {
        debug_assert!(align_of::<T>() <= crate::ecs::MAX_COLUMN_ALIGN);
        let len = self.live as usize * size_of::<T>();
        bytemuck::cast_slice(&self.data.0[offset..offset + len])
    }

    /// Mutable variant of [`Chunk::column_at`].
    #[inline]
    pub(crate) fn column_at_mut<T: Component>(&mut self, offset: usize) -> &mut [T] {
        debug_assert!(align_of::<T>() <= crate::ecs::MAX_COLUMN_ALIGN);
        let len = self.live as usize * size_of::<T>();
        bytemuck::cast_slice_mut(&mut self.data.0[offset..offset + len])
    }

    /// One read column and one write column out of the same chunk, for the
    /// common read-A-write-B system shape. The columns must be distinct.
    pub(crate) fn column_pair_at<R: Component, W: Component>(
        &mut self,
        read_offset: usize,
        write_offset: usize,
    ) -> (&[R], &mut [W]) {
        debug_assert_ne!(R::ID, W::ID, "read and write columns must differ");
        let live = self.live as usize;
        let read_end = read_offset + live * size_of::<R>();
        let write_end = write_offset + live * size_of::<W>();
        debug_assert!(
            read_end <= write_offset || write_end <= read_offset,
            "column ranges overlap"
        );
        let base = self.data.0.as_mut_ptr();
        // SAFETY: distinct columns occupy disjoint byte ranges of the data
        // region (asserted above), so the two slices never alias.
        unsafe {
            let read = std::slice::from_raw_parts(base.add(read_offset) as *const R, live);
            let write = std::slice::from_raw_parts_mut(base.add(write_offset) as *mut W, live);
            (read, write)
        }
    }

    /// Bytes of one component value.
    #[inline]
    pub fn row_bytes(&self, col: &ColumnLayout, row: u16) -> &[u8] {
        debug_assert!(row < self.live);
        let size = col.component.size as usize;
        let start = col.offset as usize + row as usize * size;
        &self.data.0[start..start + size]
    }

    /// Overwrite one component value from raw bytes.
    pub(crate) fn write_row(&mut self, col: &ColumnLayout, row: u16, src: &[u8]) {
        debug_assert!(row < self.live);
        debug_assert_eq!(src.len(), col.component.size as usize);
        let size = col.component.size as usize;
        let start = col.offset as usize + row as usize * size;
        self.data.0[start..start + size].copy_from_slice(src);
    }

    /// Copy one component value from another chunk's column into this one.
    /// Used by migration; source and destination columns must describe the
    /// same component type.
    pub(crate) fn copy_row_from(
        &mut self,
        dst_col: &ColumnLayout,
        dst_row: u16,
        src: &Chunk,
        src_col: &ColumnLayout,
        src_row: u16,
    ) {
        debug_assert_eq!(dst_col.component, src_col.component);
        self.write_row(dst_col, dst_row, src.row_bytes(src_col, src_row));
    }
}
