// archetypes.rs - One archetype's chunk list
//
// An Archetype owns an identity, its planned layout, and a doubly-linked
// list of chunks. Entities append into the tail chunk (rolling a new chunk
// when it fills) and free by swap-remove inside their own chunk; a chunk
// whose last row dies goes back to the pool.
//
// Archetypes are created once per distinct signature and live for the
// registry's lifetime; they are only ever emptied, never deleted.

use crate::ecs::archetype::{ArchetypeId, ArchetypeLayout, PlanError};
use crate::ecs::Entity;

use super::chunk::{Chunk, ChunkId};
use super::chunk_pool::ChunkPool;

pub struct Archetype {
    id: ArchetypeId,
    layout: ArchetypeLayout,
    head: Option<ChunkId>,
    tail: Option<ChunkId>,
    chunk_count: u32,
    entity_count: u32,
}

impl Archetype {
    pub fn new(id: ArchetypeId) -> Result<Self, PlanError> {
        let layout = ArchetypeLayout::plan(&id)?;
        Ok(Self {
            id,
            layout,
            head: None,
            tail: None,
            chunk_count: 0,
            entity_count: 0,
        })
    }

    #[inline]
    pub fn id(&self) -> &ArchetypeId {
        &self.id
    }

    #[inline]
    pub fn signature(&self) -> u64 {
        self.id.signature()
    }

    #[inline]
    pub fn layout(&self) -> &ArchetypeLayout {
        &self.layout
    }

    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entity_count as usize
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count as usize
    }

    #[inline]
    pub fn head(&self) -> Option<ChunkId> {
        self.head
    }

    /// Append an entity, returning where its row landed.
    pub(crate) fn alloc(&mut self, entity: Entity, pool: &mut ChunkPool) -> (ChunkId, u16) {
        let chunk_id = match self.tail {
            Some(tail) if !pool.get(tail).is_full(&self.layout) => tail,
            _ => self.push_chunk(pool),
        };
        let row = pool.get_mut(chunk_id).alloc_row(entity, &self.layout);
        self.entity_count += 1;
        (chunk_id, row)
    }

    /// Free a row. Returns the entity displaced by swap-remove, if any, so
    /// the caller can patch its record. An emptied chunk goes back to the
    /// pool.
    pub(crate) fn free(
        &mut self,
        chunk_id: ChunkId,
        row: u16,
        pool: &mut ChunkPool,
    ) -> Option<Entity> {
        let moved = pool.get_mut(chunk_id).free_row(row, &self.layout);
        self.entity_count -= 1;
        if pool.get(chunk_id).live_count() == 0 {
            self.unlink(chunk_id, pool);
            pool.free(chunk_id);
        }
        moved
    }

    /// Link a fresh chunk at the tail.
    fn push_chunk(&mut self, pool: &mut ChunkPool) -> ChunkId {
        let id = pool.allocate();
        let chunk = pool.get_mut(id);
        chunk.prev = self.tail;
        chunk.next = None;
        match self.tail {
            Some(tail) => pool.get_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.chunk_count += 1;
        id
    }

    fn unlink(&mut self, id: ChunkId, pool: &mut ChunkPool) {
        let (prev, next) = {
            let chunk = pool.get(id);
            (chunk.prev, chunk.next)
        };
        match prev {
            Some(prev) => pool.get_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => pool.get_mut(next).prev = prev,
            None => self.tail = prev,
        }
        self.chunk_count -= 1;
    }

    /// Walk the chunk list head to tail.
    pub fn chunks<'a>(&self, pool: &'a ChunkPool) -> ChunkWalk<'a> {
        ChunkWalk {
            pool,
            next: self.head,
        }
    }
}

pub struct ChunkWalk<'a> {
    pool: &'a ChunkPool,
    next: Option<ChunkId>,
}

impl<'a> Iterator for ChunkWalk<'a> {
    type Item = (ChunkId, &'a Chunk);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let chunk = self.pool.get(id);
        self.next = chunk.next;
        Some((id, chunk))
    }
}
