//! Entity handle with generational index
//!
//! Entities are lightweight handles (8 bytes) that reference rows in chunk
//! storage. The generation counter prevents use-after-free bugs: destroying
//! an entity bumps the generation of its index, invalidating stale handles.

/// Entity handle (generation-indexed for safety)
///
/// Format: [32-bit index | 32-bit generation]
/// - Index: position in the registry's record table
/// - Generation: incremented on entity destruction
///
/// The handle is `Pod` because chunks store a flat `Entity` array ahead of
/// the component columns.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Serialize to 64-bit integer (for networking/save files)
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }

    /// Deserialize from 64-bit integer
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

/// Hands out entity handles, reusing freed indices with a bumped generation.
///
/// Index reuse keeps the registry's record table dense; the generation bump
/// is what turns a reused slot into a detectably different entity.
pub struct EntityAllocator {
    generations: Vec<u32>,
    free: Vec<u32>,
    live: usize,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self {
            generations: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Allocate a fresh handle. Freed indices are reused before the table
    /// grows.
    pub fn alloc(&mut self) -> Entity {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            Entity::new(index, self.generations[index as usize])
        } else {
            let index = self.generations.len() as u32;
            self.generations.push(0);
            Entity::new(index, 0)
        }
    }

    /// Release a handle. Returns false for stale or never-allocated handles.
    pub fn free(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        self.generations[entity.index as usize] = entity.generation.wrapping_add(1);
        self.free.push(entity.index);
        self.live -= 1;
        true
    }

    /// Whether the handle still addresses a live entity.
    ///
    /// Freeing bumps the stored generation immediately, so a handle in the
    /// free list can never match it.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.generations
            .get(entity.index as usize)
            .map_or(false, |&generation| generation == entity.generation)
    }

    /// Number of live entities.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Total index slots ever allocated (live + reusable).
    pub fn index_count(&self) -> usize {
        self.generations.len()
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip() {
        let entity = Entity::new(7, 3);
        assert_eq!(Entity::from_bits(entity.to_bits()), entity);
    }

    #[test]
    fn freed_index_is_reused_with_new_generation() {
        let mut allocator = EntityAllocator::new();
        let first = allocator.alloc();
        assert!(allocator.free(first));

        let second = allocator.alloc();
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());

        // The stale handle no longer validates.
        assert!(!allocator.is_alive(first));
        assert!(allocator.is_alive(second));
    }

    #[test]
    fn double_free_is_rejected() {
        let mut allocator = EntityAllocator::new();
        let entity = allocator.alloc();
        assert!(allocator.free(entity));
        assert!(!allocator.free(entity));
        assert_eq!(allocator.live_count(), 0);
    }
}
