// query.rs - Cached component queries
//
// A query is a fixed, sorted set of required component types known at
// system-registration time. Its signature is the product of the (prime)
// component ids, so `archetype.signature % query.signature == 0` is the
// subset-containment test - the same trick archetype identity uses, one
// level up.
//
// Matches are cached: a rebuilt list of matching archetypes plus the byte
// offset of every required column in each. The cache goes stale only when
// the archetype count grows, which the QueryRegistry checks once per frame.

use crate::ecs::registry::ArchetypeRegistry;
use crate::ecs::storage::{Chunk, ChunkId};
use crate::ecs::{Component, ComponentType, Entity};

/// One matching archetype and where the query's columns live inside its
/// chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryMatch {
    /// Index into the registry's archetype table.
    pub archetype: u32,
    /// Byte offset of each required column, in query component order.
    offsets: Vec<u16>,
}

/// A system's cached view of which archetypes satisfy its component set.
#[derive(Clone, Debug)]
pub struct CachedQuery {
    components: Vec<ComponentType>,
    signature: u64,
    matches: Vec<QueryMatch>,
}

impl CachedQuery {
    /// Build a query over a component set. The set is sorted and deduped;
    /// it must not be empty.
    pub fn new(components: &[ComponentType]) -> Self {
        debug_assert!(!components.is_empty(), "query over no components");
        let mut sorted = components.to_vec();
        sorted.sort_unstable_by_key(|ty| ty.id);
        sorted.dedup_by_key(|ty| ty.id);
        let signature = sorted
            .iter()
            .fold(1u64, |signature, ty| signature * ty.id as u64);
        Self {
            components: sorted,
            signature,
            matches: Vec::new(),
        }
    }

    #[inline]
    pub fn signature(&self) -> u64 {
        self.signature
    }

    /// Required components, sorted by id.
    #[inline]
    pub fn components(&self) -> &[ComponentType] {
        &self.components
    }

    #[inline]
    pub fn matches(&self) -> &[QueryMatch] {
        &self.matches
    }

    /// Re-resolve the match list against the registry's current archetypes.
    ///
    /// Linear scan; for each match the archetype's sorted column list is
    /// walked once in lock-step with the query's sorted components.
    pub fn rebuild(&mut self, registry: &ArchetypeRegistry) {
        self.matches.clear();
        for (index, archetype) in registry.archetypes().iter().enumerate() {
            if archetype.signature() % self.signature != 0 {
                continue;
            }
            let mut offsets = Vec::with_capacity(self.components.len());
            let mut wanted = self.components.iter();
            let mut next_wanted = wanted.next();
            for col in archetype.layout().columns() {
                if let Some(w) = next_wanted {
                    if w.id == col.component.id {
                        debug_assert_eq!(w.size, col.component.size);
                        offsets.push(col.offset as u16);
                        next_wanted = wanted.next();
                    }
                }
            }
            debug_assert!(
                next_wanted.is_none(),
                "signature containment disagrees with column walk"
            );
            self.matches.push(QueryMatch {
                archetype: index as u32,
                offsets,
            });
        }
    }

    /// Iterate matching chunks for reading. Borrowing the registry shared
    /// means no structural change can happen while views are alive.
    pub fn chunks<'a>(&'a self, registry: &'a ArchetypeRegistry) -> QueryState<'a> {
        QueryState {
            query: self,
            registry,
            match_cursor: 0,
            chunk_cursor: None,
        }
    }

    /// Visit matching chunks with value-write access. Requires the
    /// exclusive borrow that also gates structural changes, so writers and
    /// readers can never overlap.
    pub fn for_each_chunk_mut<F>(&self, registry: &mut ArchetypeRegistry, mut f: F)
    where
        F: FnMut(ChunkViewMut<'_>),
    {
        for m in &self.matches {
            let mut next = registry.archetypes()[m.archetype as usize].head();
            while let Some(chunk_id) = next {
                let chunk = registry.pool_mut().get_mut(chunk_id);
                next = chunk.next;
                f(ChunkViewMut {
                    chunk,
                    offsets: &m.offsets,
                    components: &self.components,
                });
            }
        }
    }

    /// Position of a component in this query's sorted set.
    fn slot_of(&self, id: u32) -> Option<usize> {
        self.components.iter().position(|ty| ty.id == id)
    }
}

/// Chunk-by-chunk cursor over a query's matches. Restartable (build a new
/// one), finite, single pass.
pub struct QueryState<'a> {
    query: &'a CachedQuery,
    registry: &'a ArchetypeRegistry,
    match_cursor: usize,
    chunk_cursor: Option<(usize, ChunkId)>,
}

impl<'a> Iterator for QueryState<'a> {
    type Item = ChunkView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((match_index, chunk_id)) = self.chunk_cursor {
                let chunk = self.registry.pool().get(chunk_id);
                self.chunk_cursor = chunk.next.map(|next| (match_index, next));
                return Some(ChunkView {
                    chunk,
                    offsets: &self.query.matches[match_index].offsets,
                    query: self.query,
                });
            }
            let match_index = self.match_cursor;
            let m = self.query.matches.get(match_index)?;
            self.match_cursor += 1;
            if let Some(head) = self.registry.archetypes()[m.archetype as usize].head() {
                self.chunk_cursor = Some((match_index, head));
            }
        }
    }
}

/// One chunk's worth of rows: the entity array plus a typed slice per
/// queried component, all valid for `len()` contiguous rows.
pub struct ChunkView<'a> {
    chunk: &'a Chunk,
    offsets: &'a [u16],
    query: &'a CachedQuery,
}

impl<'a> ChunkView<'a> {
    /// Live rows in this chunk.
    #[inline]
    pub fn len(&self) -> usize {
        self.chunk.live_count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunk.live_count() == 0
    }

    /// Entity ids, parallel to every column slice.
    #[inline]
    pub fn entities(&self) -> &'a [Entity] {
        self.chunk.entities()
    }

    /// Typed column for one of the query's components.
    pub fn column<T: Component>(&self) -> &'a [T] {
        let slot = self
            .query
            .slot_of(T::ID)
            .expect("component not part of this query");
        self.chunk.column_at::<T>(self.offsets[slot] as usize)
    }
}

/// Exclusive counterpart of [`ChunkView`] used by value-writing systems.
pub struct ChunkViewMut<'a> {
    chunk: &'a mut Chunk,
    offsets: &'a [u16],
    components: &'a [ComponentType],
}

impl<'a> ChunkViewMut<'a> {
    #[inline]
    pub fn len(&self) -> usize {
        self.chunk.live_count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunk.live_count() == 0
    }

    pub fn entities(&self) -> &[Entity] {
        self.chunk.entities()
    }

    pub fn column<T: Component>(&self) -> &[T] {
        let slot = self.slot_of(T::ID);
        self.chunk.column_at::<T>(self.offsets[slot] as usize)
    }

    pub fn column_mut<T: Component>(&mut self) -> &mut [T] {
        let slot = self.slot_of(T::ID);
        self.chunk.column_at_mut::<T>(self.offsets[slot] as usize)
    }

    /// A read column and a write column at once - the common shape of an
    /// integration system.
    pub fn column_pair_mut<R: Component, W: Component>(&mut self) -> (&[R], &mut [W]) {
        let read = self.offsets[self.slot_of(R::ID)] as usize;
        let write = self.offsets[self.slot_of(W::ID)] as usize;
        self.chunk.column_pair_at::<R, W>(read, write)
    }

    fn slot_of(&self, id: u32) -> usize {
        self.components
            .iter()
            .position(|ty| ty.id == id)
            .expect("component not part of this query")
    }
}

/// Handle to a registered query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueryId(u32);

impl QueryId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Owns every system's cached query and keeps them fresh.
///
/// Staleness is a single integer compare: the archetype count only grows,
/// so "count changed since my last rebuild" is a cheap, exact dirty check.
/// (Entities joining an existing archetype never invalidate offsets.)
pub struct QueryRegistry {
    queries: Vec<CachedQuery>,
    archetypes_seen: usize,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self {
            queries: Vec::new(),
            archetypes_seen: 0,
        }
    }

    /// Build and cache a query for a system's component set.
    pub fn register(
        &mut self,
        components: &[ComponentType],
        registry: &ArchetypeRegistry,
    ) -> QueryId {
        let mut query = CachedQuery::new(components);
        query.rebuild(registry);
        self.queries.push(query);
        QueryId((self.queries.len() - 1) as u32)
    }

    /// Rebuild all caches if the archetype count moved since the last
    /// refresh. Call once per frame, after commands are applied and before
    /// systems run. Returns whether a rebuild happened.
    pub fn refresh(&mut self, registry: &ArchetypeRegistry) -> bool {
        let count = registry.archetype_count();
        if count == self.archetypes_seen {
            return false;
        }
        for query in &mut self.queries {
            query.rebuild(registry);
        }
        self.archetypes_seen = count;
        true
    }

    pub fn get(&self, id: QueryId) -> &CachedQuery {
        &self.queries[id.index() as usize]
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
