// chunk_pool.rs - Pooled chunk allocator
//
// Arena of chunks plus a free list. A warm pool is carved eagerly at init;
// steady-state allocation pops and pushes the free list and never touches
// the backing allocator. Overflowing the warm pool is not fatal, but it is
// logged: it means the pool was undersized for the workload.

use super::chunk::{Chunk, ChunkId};
use tracing::warn;

pub struct ChunkPool {
    chunks: Vec<Chunk>,
    free: Vec<ChunkId>,
    warm_capacity: usize,
    cold_allocations: usize,
}

impl ChunkPool {
    /// Carve `warm` chunks up front and link them all into the free list.
    pub fn with_warm_capacity(warm: usize) -> Self {
        let chunks: Vec<Chunk> = (0..warm).map(|_| Chunk::new()).collect();
        let free: Vec<ChunkId> = (0..warm as u32).rev().map(ChunkId).collect();
        Self {
            chunks,
            free,
            warm_capacity: warm,
            cold_allocations: 0,
        }
    }

    /// Hand out a chunk, preferring the free list. Falls back to a fresh
    /// allocation when the warm pool is exhausted.
    pub fn allocate(&mut self) -> ChunkId {
        if let Some(id) = self.free.pop() {
            return id;
        }
        self.cold_allocations += 1;
        warn!(
            warm = self.warm_capacity,
            total = self.chunks.len() + 1,
            "chunk pool warm capacity exceeded; cold-allocating a chunk"
        );
        let id = ChunkId(self.chunks.len() as u32);
        self.chunks.push(Chunk::new());
        id
    }

    /// Return a chunk to the free list.
    pub fn free(&mut self, id: ChunkId) {
        debug_assert!(id.index() < self.chunks.len(), "freeing unknown chunk");
        // Double-free detection (debug builds): linear scan of the free list.
        debug_assert!(
            !self.free.contains(&id),
            "chunk {:?} is already on the free list",
            id
        );
        self.chunks[id.index()].reset();
        self.free.push(id);
    }

    #[inline]
    pub fn get(&self, id: ChunkId) -> &Chunk {
        &self.chunks[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: ChunkId) -> &mut Chunk {
        &mut self.chunks[id.index()]
    }

    /// Mutable access to two distinct chunks at once (migration copies
    /// between a source and a destination chunk).
    pub fn get_pair_mut(&mut self, a: ChunkId, b: ChunkId) -> (&mut Chunk, &mut Chunk) {
        assert_ne!(a, b, "chunk pair must be distinct");
        if a.index() < b.index() {
            let (lo, hi) = self.chunks.split_at_mut(b.index());
            (&mut lo[a.index()], &mut hi[0])
        } else {
            let (lo, hi) = self.chunks.split_at_mut(a.index());
            let (b_ref, a_ref) = (&mut lo[b.index()], &mut hi[0]);
            (a_ref, b_ref)
        }
    }

    /// Total chunks in the arena (warm + cold).
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn warm_capacity(&self) -> usize {
        self.warm_capacity
    }

    /// Allocations that missed the warm pool since init.
    pub fn cold_allocations(&self) -> usize {
        self.cold_allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warm_pool_serves_without_cold_allocations() {
        let mut pool = ChunkPool::with_warm_capacity(4);
        let ids: Vec<ChunkId> = (0..4).map(|_| pool.allocate()).collect();
        assert_eq!(pool.cold_allocations(), 0);
        assert_eq!(pool.free_count(), 0);

        for id in ids {
            pool.free(id);
        }
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn exhausted_pool_cold_allocates() {
        let mut pool = ChunkPool::with_warm_capacity(1);
        let _a = pool.allocate();
        let b = pool.allocate();
        assert_eq!(pool.cold_allocations(), 1);
        assert_eq!(pool.chunk_count(), 2);

        // Cold chunks join the pool for reuse like any other.
        pool.free(b);
        assert_eq!(pool.allocate(), b);
        assert_eq!(pool.cold_allocations(), 1);
    }

    #[test]
    fn freed_chunk_header_is_reset() {
        let mut pool = ChunkPool::with_warm_capacity(2);
        let id = pool.allocate();
        pool.get_mut(id).next = Some(ChunkId(1));
        pool.free(id);
        assert!(pool.get(id).next.is_none());
        assert_eq!(pool.get(id).live_count(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "already on the free list")]
    fn double_free_is_detected_in_debug() {
        let mut pool = ChunkPool::with_warm_capacity(1);
        let id = pool.allocate();
        pool.free(id);
        pool.free(id);
    }
}
