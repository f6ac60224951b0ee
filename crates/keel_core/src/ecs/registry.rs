// registry.rs - Top-level archetype store and migration algorithms
//
// The registry owns every archetype, the chunk pool behind them, and a dense
// per-entity record table mapping entity index -> (archetype, chunk, row).
// It is the single writer: only the thread applying drained commands may
// create archetypes, migrate rows, or touch records. Everything else reads
// chunk memory through cached queries.

use crate::config::StorageSettings;
use crate::ecs::archetype::{ArchetypeId, PlanError};
use crate::ecs::builder::EntityBlueprint;
use crate::ecs::commands::{CommandKind, ComponentCommands};
use crate::ecs::storage::{Archetype, ChunkId, ChunkPool};
use crate::ecs::{Component, ComponentType, Entity, EntityAllocator};
use thiserror::Error;
use tracing::{error, trace};

/// Where one entity's component data lives. Entities with no components
/// have no record at all (their table slot is `None`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchetypeRecord {
    /// Index into the registry's archetype table.
    pub archetype: u32,
    pub chunk: ChunkId,
    pub row: u16,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Capacity exhaustion: the host sized `max_archetypes` too small.
    #[error("archetype table full ({capacity} archetypes)")]
    ArchetypeTableFull { capacity: usize },
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("entity {index}v{generation} is stale or was never created")]
    StaleEntity { index: u32, generation: u32 },
    #[error("entity already has component {component}")]
    ComponentAlreadyPresent { component: u32 },
    #[error("entity does not have component {component}")]
    ComponentMissing { component: u32 },
    #[error("invalid storage settings: {reason}")]
    InvalidSettings { reason: &'static str },
}

enum MigrationEdit<'a> {
    Add { ty: ComponentType, bytes: &'a [u8] },
    Remove { ty: ComponentType },
}

pub struct ArchetypeRegistry {
    archetypes: Vec<Archetype>,
    records: Vec<Option<ArchetypeRecord>>,
    entities: EntityAllocator,
    pool: ChunkPool,
    max_archetypes: usize,
    #[cfg(feature = "metrics")]
    counters: keel_metrics::Counter,
}

impl ArchetypeRegistry {
    pub fn new(settings: &StorageSettings) -> Result<Self, StoreError> {
        if settings.max_archetypes == 0 {
            return Err(StoreError::InvalidSettings {
                reason: "max_archetypes must be non-zero",
            });
        }
        Ok(Self {
            archetypes: Vec::new(),
            records: Vec::new(),
            entities: EntityAllocator::new(),
            pool: ChunkPool::with_warm_capacity(settings.warm_chunks),
            max_archetypes: settings.max_archetypes,
            #[cfg(feature = "metrics")]
            counters: keel_metrics::Counter::new(),
        })
    }

    /// Allocate a componentless entity.
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.entities.alloc();
        let index = entity.index() as usize;
        if index >= self.records.len() {
            self.records.resize(index + 1, None);
        } else {
            self.records[index] = None;
        }
        entity
    }

    /// Destroy an entity, freeing its row and invalidating the handle.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<(), StoreError> {
        if !self.entities.is_alive(entity) {
            return Err(Self::stale(entity));
        }
        self.free_row_of(entity);
        self.records[entity.index() as usize] = None;
        self.entities.free(entity);
        Ok(())
    }

    /// Spawn an entity directly into the archetype its blueprint describes.
    /// One row allocation; no per-component migration chain.
    pub fn spawn(&mut self, blueprint: EntityBlueprint) -> Result<Entity, StoreError> {
        if blueprint.components().is_empty() {
            return Ok(self.create_entity());
        }
        let dest = self.find_or_create(blueprint.archetype().clone())?;
        let entity = self.create_entity();
        let (chunk_id, row) = self.archetypes[dest as usize].alloc(entity, &mut self.pool);

        // Blueprint components and layout columns share the same id order.
        let layout = self.archetypes[dest as usize].layout();
        let chunk = self.pool.get_mut(chunk_id);
        for (col, part) in layout.columns().iter().zip(blueprint.components()) {
            debug_assert_eq!(col.component.id, part.component().id);
            chunk.write_row(col, row, part.bytes());
        }

        self.records[entity.index() as usize] = Some(ArchetypeRecord {
            archetype: dest,
            chunk: chunk_id,
            row,
        });
        Ok(entity)
    }

    /// Give an entity a new component, migrating its row to the archetype
    /// that includes it.
    pub fn add_component<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), StoreError> {
        self.add_component_raw(entity, ComponentType::of::<T>(), bytemuck::bytes_of(&value))
    }

    /// Raw-byte variant of [`ArchetypeRegistry::add_component`].
    pub fn add_component_raw(
        &mut self,
        entity: Entity,
        ty: ComponentType,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        debug_assert_eq!(bytes.len(), ty.size as usize, "payload/stride mismatch");
        if !self.entities.is_alive(entity) {
            return Err(Self::stale(entity));
        }
        match self.records[entity.index() as usize] {
            Some(record) => {
                let source = &self.archetypes[record.archetype as usize];
                if source.id().contains(ty.id) {
                    return Err(StoreError::ComponentAlreadyPresent { component: ty.id });
                }
                let dest_id = source.id().with_added(ty);
                let dest = self.find_or_create(dest_id)?;
                let new_record =
                    self.migrate(entity, record, dest, MigrationEdit::Add { ty, bytes });
                self.records[entity.index() as usize] = Some(new_record);
            }
            None => {
                // First component: straight into the single-component
                // archetype, nothing to migrate.
                let dest = self.find_or_create(ArchetypeId::new(ty))?;
                let (chunk_id, row) = self.archetypes[dest as usize].alloc(entity, &mut self.pool);
                let layout = self.archetypes[dest as usize].layout();
                let col = layout
                    .column_for(ty.id)
                    .expect("fresh archetype lacks its own column");
                self.pool.get_mut(chunk_id).write_row(col, row, bytes);
                self.records[entity.index() as usize] = Some(ArchetypeRecord {
                    archetype: dest,
                    chunk: chunk_id,
                    row,
                });
            }
        }
        Ok(())
    }

    /// Take a component away from an entity, migrating its row to the
    /// archetype without it. Removing the last component clears the record
    /// entirely; the entity stays alive, componentless.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<(), StoreError> {
        self.remove_component_raw(entity, ComponentType::of::<T>())
    }

    /// Raw variant of [`ArchetypeRegistry::remove_component`].
    pub fn remove_component_raw(
        &mut self,
        entity: Entity,
        ty: ComponentType,
    ) -> Result<(), StoreError> {
        if !self.entities.is_alive(entity) {
            return Err(Self::stale(entity));
        }
        let Some(record) = self.records[entity.index() as usize] else {
            return Err(StoreError::ComponentMissing { component: ty.id });
        };
        let source = &self.archetypes[record.archetype as usize];
        if !source.id().contains(ty.id) {
            return Err(StoreError::ComponentMissing { component: ty.id });
        }
        let dest_id = source.id().with_removed(ty);
        if dest_id.is_empty() {
            self.free_row_of(entity);
            self.records[entity.index() as usize] = None;
            return Ok(());
        }
        let dest = self.find_or_create(dest_id)?;
        let new_record = self.migrate(entity, record, dest, MigrationEdit::Remove { ty });
        self.records[entity.index() as usize] = Some(new_record);
        Ok(())
    }

    /// Read one component back. None for stale handles or absent components.
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        let record = self.records.get(entity.index() as usize)?.as_ref()?;
        let archetype = &self.archetypes[record.archetype as usize];
        let col = archetype.layout().column_for(T::ID)?;
        let chunk = self.pool.get(record.chunk);
        debug_assert_eq!(chunk.entity_at(record.row), entity, "record out of sync");
        Some(&chunk.column_slice::<T>(col)[record.row as usize])
    }

    /// The archetype an entity currently belongs to, if it has components.
    pub fn archetype_of(&self, entity: Entity) -> Option<&Archetype> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        let record = self.records.get(entity.index() as usize)?.as_ref()?;
        Some(&self.archetypes[record.archetype as usize])
    }

    /// Apply one frame of drained commands in insertion order, then reset
    /// the buffer.
    ///
    /// Commands aimed at entities destroyed earlier in the same drain are
    /// expected and skipped; genuine precondition violations are logged as
    /// errors and dropped (there is no safe way to retry a structural
    /// change after the fact).
    pub fn apply(&mut self, commands: &mut ComponentCommands) {
        let drained = commands.drain();
        let mut applied: usize = 0;
        let mut skipped: usize = 0;
        let mut failed: usize = 0;
        for record in drained.records() {
            let result = match record.kind {
                CommandKind::AddComponent => {
                    let ty = record.component.expect("add command without component");
                    let bytes = drained
                        .payload_of(record)
                        .expect("add command without payload");
                    self.add_component_raw(record.entity, ty, bytes)
                }
                CommandKind::RemoveComponent => {
                    let ty = record.component.expect("remove command without component");
                    self.remove_component_raw(record.entity, ty)
                }
                CommandKind::DestroyEntity => self.destroy_entity(record.entity),
            };
            match result {
                Ok(()) => applied += 1,
                Err(StoreError::StaleEntity { .. }) => {
                    skipped += 1;
                    trace!(entity = record.entity.to_bits(), "skipping command for stale entity");
                }
                Err(err) => {
                    failed += 1;
                    error!(%err, kind = ?record.kind, "structural command failed");
                }
            }
        }
        drop(drained);
        commands.reset();

        keel_metrics::metrics! {
            self.counters.increment("commands.applied", applied);
            self.counters.increment("commands.skipped", skipped);
            self.counters.increment("commands.failed", failed);
            self.counters.set("pool.cold_alloc", self.pool.cold_allocations());
        }
        let _ = (applied, skipped, failed);
    }

    /// Number of archetypes created so far. Only ever grows; query caches
    /// use it as their staleness check.
    #[inline]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    #[inline]
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Live entities.
    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entities.live_count()
    }

    #[inline]
    pub fn pool(&self) -> &ChunkPool {
        &self.pool
    }

    pub(crate) fn pool_mut(&mut self) -> &mut ChunkPool {
        &mut self.pool
    }

    /// Storage counters collected so far (metrics builds only).
    #[cfg(feature = "metrics")]
    pub fn counters(&self) -> &keel_metrics::Counter {
        &self.counters
    }

    /// Find the archetype for a signature, creating it on first miss.
    ///
    /// Linear scan by design: archetype counts stay in the tens for the
    /// lifetime of a process, and creation is rare after warmup. Revisit
    /// with a signature-keyed map only if that assumption breaks.
    fn find_or_create(&mut self, id: ArchetypeId) -> Result<u32, StoreError> {
        if let Some(index) = self
            .archetypes
            .iter()
            .position(|archetype| archetype.signature() == id.signature())
        {
            return Ok(index as u32);
        }
        if self.archetypes.len() >= self.max_archetypes {
            error!(capacity = self.max_archetypes, "archetype table full");
            return Err(StoreError::ArchetypeTableFull {
                capacity: self.max_archetypes,
            });
        }
        let archetype = Archetype::new(id)?;
        self.archetypes.push(archetype);
        keel_metrics::metrics! {
            self.counters.increment("registry.archetypes_created", 1);
        }
        Ok((self.archetypes.len() - 1) as u32)
    }

    /// Move an entity's row into `dest`, editing the column set along the
    /// way. Source and destination column lists are both sorted by id and
    /// differ by exactly one component, so a single lock-step walk copies
    /// every unaffected column.
    fn migrate(
        &mut self,
        entity: Entity,
        source_record: ArchetypeRecord,
        dest: u32,
        edit: MigrationEdit<'_>,
    ) -> ArchetypeRecord {
        let (dst_chunk_id, dst_row) =
            self.archetypes[dest as usize].alloc(entity, &mut self.pool);

        {
            let src_layout = self.archetypes[source_record.archetype as usize].layout();
            let dst_layout = self.archetypes[dest as usize].layout();
            let (dst_chunk, src_chunk) = self.pool.get_pair_mut(dst_chunk_id, source_record.chunk);
            let src_chunk = &*src_chunk;

            match edit {
                MigrationEdit::Add { ty, bytes } => {
                    let mut src_cols = src_layout.columns().iter();
                    for dst_col in dst_layout.columns() {
                        if dst_col.component.id == ty.id {
                            dst_chunk.write_row(dst_col, dst_row, bytes);
                            continue;
                        }
                        let src_col = src_cols
                            .next()
                            .expect("source columns exhausted during add migration");
                        debug_assert_eq!(src_col.component.id, dst_col.component.id);
                        dst_chunk.copy_row_from(
                            dst_col,
                            dst_row,
                            src_chunk,
                            src_col,
                            source_record.row,
                        );
                    }
                }
                MigrationEdit::Remove { ty } => {
                    let mut dst_cols = dst_layout.columns().iter();
                    for src_col in src_layout.columns() {
                        if src_col.component.id == ty.id {
                            continue;
                        }
                        let dst_col = dst_cols
                            .next()
                            .expect("destination columns exhausted during remove migration");
                        debug_assert_eq!(src_col.component.id, dst_col.component.id);
                        dst_chunk.copy_row_from(
                            dst_col,
                            dst_row,
                            src_chunk,
                            src_col,
                            source_record.row,
                        );
                    }
                }
            }
        }

        self.release_row(source_record);

        keel_metrics::metrics! {
            self.counters.increment("registry.migrations", 1);
        }

        ArchetypeRecord {
            archetype: dest,
            chunk: dst_chunk_id,
            row: dst_row,
        }
    }

    /// Free the row an entity occupies, if any, patching whichever entity
    /// the swap-remove displaced into the vacated slot.
    fn free_row_of(&mut self, entity: Entity) {
        if let Some(record) = self.records[entity.index() as usize] {
            self.release_row(record);
        }
    }

    fn release_row(&mut self, record: ArchetypeRecord) {
        let moved = self.archetypes[record.archetype as usize].free(
            record.chunk,
            record.row,
            &mut self.pool,
        );
        if let Some(moved) = moved {
            let moved_record = self.records[moved.index() as usize]
                .as_mut()
                .expect("displaced entity has no record");
            debug_assert_eq!(moved_record.chunk, record.chunk);
            moved_record.row = record.row;
        }
    }

    fn stale(entity: Entity) -> StoreError {
        StoreError::StaleEntity {
            index: entity.index(),
            generation: entity.generation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Position {
        x: f32,
        y: f32,
        z: f32,
    }
    crate::define_component!(Position, 2, "Position");

    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Velocity {
        x: f32,
        y: f32,
        z: f32,
    }
    crate::define_component!(Velocity, 3, "Velocity");

    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Health {
        value: i32,
    }
    crate::define_component!(Health, 5, "Health");

    fn registry() -> ArchetypeRegistry {
        ArchetypeRegistry::new(&StorageSettings::default()).unwrap()
    }

    #[test]
    fn add_components_walks_signatures() {
        let mut registry = registry();
        let e1 = registry.create_entity();

        registry
            .add_component(e1, Position { x: 1.0, y: 2.0, z: 3.0 })
            .unwrap();
        assert_eq!(registry.archetype_of(e1).unwrap().signature(), 2);

        registry
            .add_component(e1, Velocity { x: 4.0, y: 5.0, z: 6.0 })
            .unwrap();
        assert_eq!(registry.archetype_of(e1).unwrap().signature(), 6);
        // Position survived the migration byte for byte.
        assert_eq!(
            registry.get_component::<Position>(e1),
            Some(&Position { x: 1.0, y: 2.0, z: 3.0 })
        );

        registry.remove_component::<Position>(e1).unwrap();
        assert_eq!(registry.archetype_of(e1).unwrap().signature(), 3);
        assert_eq!(
            registry.get_component::<Velocity>(e1),
            Some(&Velocity { x: 4.0, y: 5.0, z: 6.0 })
        );
        assert!(registry.get_component::<Position>(e1).is_none());
    }

    #[test]
    fn add_then_remove_round_trips_bytes() {
        let mut registry = registry();
        let entity = registry.create_entity();
        let position = Position { x: -1.5, y: 0.25, z: 1e6 };
        let velocity = Velocity { x: 7.0, y: 8.0, z: 9.0 };
        registry.add_component(entity, position).unwrap();
        registry.add_component(entity, velocity).unwrap();
        let signature = registry.archetype_of(entity).unwrap().signature();

        registry.add_component(entity, Health { value: 77 }).unwrap();
        registry.remove_component::<Health>(entity).unwrap();

        assert_eq!(registry.archetype_of(entity).unwrap().signature(), signature);
        assert_eq!(registry.get_component::<Position>(entity), Some(&position));
        assert_eq!(registry.get_component::<Velocity>(entity), Some(&velocity));
    }

    #[test]
    fn duplicate_add_and_absent_remove_are_errors() {
        let mut registry = registry();
        let entity = registry.create_entity();
        registry
            .add_component(entity, Health { value: 1 })
            .unwrap();

        assert!(matches!(
            registry.add_component(entity, Health { value: 2 }),
            Err(StoreError::ComponentAlreadyPresent { component: 5 })
        ));
        assert!(matches!(
            registry.remove_component::<Position>(entity),
            Err(StoreError::ComponentMissing { component: 2 })
        ));
        // The failed calls left the stored value alone.
        assert_eq!(
            registry.get_component::<Health>(entity),
            Some(&Health { value: 1 })
        );
    }

    #[test]
    fn removing_last_component_clears_the_record() {
        let mut registry = registry();
        let entity = registry.create_entity();
        registry
            .add_component(entity, Health { value: 10 })
            .unwrap();
        registry.remove_component::<Health>(entity).unwrap();

        assert!(registry.archetype_of(entity).is_none());
        assert!(registry.get_component::<Health>(entity).is_none());
        // Still alive: it can pick up components again.
        registry
            .add_component(entity, Health { value: 11 })
            .unwrap();
        assert_eq!(
            registry.get_component::<Health>(entity),
            Some(&Health { value: 11 })
        );
    }

    #[test]
    fn destroy_patches_displaced_record() {
        let mut registry = registry();
        let a = registry.create_entity();
        let b = registry.create_entity();
        let c = registry.create_entity();
        for (entity, v) in [(a, 1.0f32), (b, 2.0), (c, 3.0)] {
            registry
                .add_component(entity, Position { x: v, y: v, z: v })
                .unwrap();
        }

        // Destroying the first row swap-moves the last entity (c) into it.
        registry.destroy_entity(a).unwrap();
        assert!(registry.get_component::<Position>(a).is_none());
        assert_eq!(
            registry.get_component::<Position>(c),
            Some(&Position { x: 3.0, y: 3.0, z: 3.0 })
        );
        assert_eq!(
            registry.get_component::<Position>(b),
            Some(&Position { x: 2.0, y: 2.0, z: 2.0 })
        );

        // Stale handle stays dead even after the index is reused.
        let reused = registry.create_entity();
        assert_eq!(reused.index(), a.index());
        assert!(registry.destroy_entity(a).is_err());
    }

    #[test]
    fn archetype_table_capacity_is_enforced() {
        let settings = StorageSettings {
            max_archetypes: 1,
            ..StorageSettings::default()
        };
        let mut registry = ArchetypeRegistry::new(&settings).unwrap();
        let entity = registry.create_entity();
        registry
            .add_component(entity, Position { x: 0.0, y: 0.0, z: 0.0 })
            .unwrap();
        assert!(matches!(
            registry.add_component(entity, Velocity { x: 0.0, y: 0.0, z: 0.0 }),
            Err(StoreError::ArchetypeTableFull { capacity: 1 })
        ));
    }

    #[test]
    fn apply_replays_commands_in_order_and_skips_stale() {
        let mut registry = registry();
        let a = registry.create_entity();
        let b = registry.create_entity();

        let mut commands = ComponentCommands::with_capacity(16, 1024).unwrap();
        commands.add_component(a, Position { x: 1.0, y: 1.0, z: 1.0 });
        commands.add_component(b, Position { x: 2.0, y: 2.0, z: 2.0 });
        commands.destroy_entity(a);
        // Recorded before the destroy was applied, but lands after it.
        commands.add_component(a, Velocity { x: 0.0, y: 0.0, z: 0.0 });

        registry.apply(&mut commands);

        assert!(registry.get_component::<Position>(a).is_none());
        assert_eq!(
            registry.get_component::<Position>(b),
            Some(&Position { x: 2.0, y: 2.0, z: 2.0 })
        );
        assert!(commands.is_empty());
        assert_eq!(registry.entity_count(), 1);
    }
}
