// archetype.rs - Archetype identity and chunk layout planning
//
// An archetype is a unique set of component types. Because component ids are
// distinct primes, the product of a set's ids is a unique fingerprint
// (unique factorization), and `signature % id == 0` is the membership test.
// The component list is kept sorted by id so that two archetypes differing
// by one component can be walked in lock-step during migration.

use crate::ecs::{ComponentId, ComponentType, Entity};
use crate::ecs::storage::CHUNK_DATA_BYTES;
use std::mem::size_of;
use thiserror::Error;

/// Hard cap on component types per archetype.
pub const MAX_COMPONENTS_PER_ARCHETYPE: usize = 10;

/// Column offsets are aligned to this, so any component whose Rust type has
/// `align_of::<T>() <= MAX_COLUMN_ALIGN` can be viewed as a typed slice.
pub const MAX_COLUMN_ALIGN: usize = 16;

/// Signature of the archetype with no components (empty product).
pub const EMPTY_SIGNATURE: u64 = 1;

/// Immutable identity of an archetype: its sorted component set, the
/// combined per-entity byte size, and the multiplicative signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchetypeId {
    signature: u64,
    component_bytes: u32,
    components: Vec<ComponentType>,
}

impl ArchetypeId {
    /// The sentinel identity of a componentless entity. Entities never point
    /// at an empty archetype; their record is cleared instead.
    pub fn empty() -> Self {
        Self {
            signature: EMPTY_SIGNATURE,
            component_bytes: 0,
            components: Vec::new(),
        }
    }

    /// Single-component identity.
    pub fn new(ty: ComponentType) -> Self {
        Self {
            signature: ty.id as u64,
            component_bytes: ty.size,
            components: vec![ty],
        }
    }

    /// Identity for a full component set (used when spawning from a
    /// blueprint). The input is sorted by id; duplicate ids are a
    /// precondition violation.
    pub fn from_components(mut components: Vec<ComponentType>) -> Self {
        components.sort_unstable_by_key(|ty| ty.id);
        let mut signature: u64 = EMPTY_SIGNATURE;
        let mut component_bytes: u32 = 0;
        for ty in &components {
            debug_assert!(
                signature % ty.id as u64 != 0,
                "duplicate component id {} in archetype",
                ty.id
            );
            signature *= ty.id as u64;
            component_bytes += ty.size;
        }
        Self {
            signature,
            component_bytes,
            components,
        }
    }

    #[inline]
    pub fn signature(&self) -> u64 {
        self.signature
    }

    /// Combined byte size of one entity's components.
    #[inline]
    pub fn component_bytes(&self) -> u32 {
        self.component_bytes
    }

    /// Component types, sorted ascending by id.
    #[inline]
    pub fn components(&self) -> &[ComponentType] {
        &self.components
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Membership test via the prime-product trick.
    #[inline]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.signature % id as u64 == 0
    }

    /// New identity with `ty` added. Precondition: `ty` is not present.
    pub fn with_added(&self, ty: ComponentType) -> Self {
        debug_assert!(
            !self.contains(ty.id),
            "component id {} already present in archetype {}",
            ty.id,
            self.signature
        );
        let mut components = self.components.clone();
        components.push(ty);
        components.sort_unstable_by_key(|c| c.id);
        Self {
            signature: self.signature * ty.id as u64,
            component_bytes: self.component_bytes + ty.size,
            components,
        }
    }

    /// New identity with `ty` excised. Precondition: `ty` is present.
    /// Removing the last component yields the empty sentinel.
    pub fn with_removed(&self, ty: ComponentType) -> Self {
        debug_assert!(
            self.contains(ty.id),
            "component id {} absent from archetype {}",
            ty.id,
            self.signature
        );
        let components: Vec<ComponentType> = self
            .components
            .iter()
            .copied()
            .filter(|c| c.id != ty.id)
            .collect();
        if components.is_empty() {
            return Self::empty();
        }
        Self {
            signature: self.signature / ty.id as u64,
            component_bytes: self.component_bytes - ty.size,
            components,
        }
    }
}

/// Byte placement of one component column inside a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnLayout {
    pub component: ComponentType,
    /// Offset of the column's first element from the start of the chunk's
    /// data region.
    pub offset: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("archetype has {count} components, cap is {MAX_COMPONENTS_PER_ARCHETYPE}")]
    TooManyComponents { count: usize },
    #[error(
        "{component_bytes} component bytes per entity cannot fit one row in a {CHUNK_DATA_BYTES} byte chunk"
    )]
    RowTooLarge { component_bytes: u32 },
}

/// How an archetype's entities pack into a fixed-size chunk: how many rows
/// fit, and where each component's column starts.
///
/// Derived once per archetype by [`ArchetypeLayout::plan`]; pure data,
/// independent of any live chunk memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchetypeLayout {
    entities_per_chunk: u16,
    columns: Vec<ColumnLayout>,
}

impl ArchetypeLayout {
    /// Plan the chunk layout for an identity.
    ///
    /// The data region holds `Entity[entities_per_chunk]` followed by one
    /// column per component, in id order, each aligned to
    /// [`MAX_COLUMN_ALIGN`]. Alignment padding can cost a row against the
    /// unpadded `chunk_bytes / (row_bytes)` bound, so the planner steps the
    /// row count down until the padded layout fits.
    pub fn plan(id: &ArchetypeId) -> Result<Self, PlanError> {
        let components = id.components();
        if components.len() > MAX_COMPONENTS_PER_ARCHETYPE {
            return Err(PlanError::TooManyComponents {
                count: components.len(),
            });
        }

        let row_bytes = id.component_bytes() as usize + size_of::<Entity>();
        let mut entities_per_chunk = CHUNK_DATA_BYTES / row_bytes;
        while entities_per_chunk > 0 {
            if let Some(columns) = Self::pack(components, entities_per_chunk) {
                return Ok(Self {
                    entities_per_chunk: entities_per_chunk as u16,
                    columns,
                });
            }
            entities_per_chunk -= 1;
        }
        Err(PlanError::RowTooLarge {
            component_bytes: id.component_bytes(),
        })
    }

    /// Lay columns out for a candidate row count; None if padding overflows
    /// the chunk.
    fn pack(components: &[ComponentType], rows: usize) -> Option<Vec<ColumnLayout>> {
        let mut offset = rows * size_of::<Entity>();
        let mut columns = Vec::with_capacity(components.len());
        for &component in components {
            offset = align_up(offset, MAX_COLUMN_ALIGN);
            columns.push(ColumnLayout {
                component,
                offset: offset as u32,
            });
            offset += rows * component.size as usize;
        }
        (offset <= CHUNK_DATA_BYTES).then_some(columns)
    }

    #[inline]
    pub fn entities_per_chunk(&self) -> usize {
        self.entities_per_chunk as usize
    }

    /// Column layouts in id order, matching the identity's component order.
    #[inline]
    pub fn columns(&self) -> &[ColumnLayout] {
        &self.columns
    }

    /// Column for a component id, if present (walks the sorted list).
    pub fn column_for(&self, id: ComponentId) -> Option<&ColumnLayout> {
        self.columns.iter().find(|col| col.component.id == id)
    }
}

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(id: ComponentId, size: u32) -> ComponentType {
        ComponentType { id, size }
    }

    #[test]
    fn signature_is_product_of_ids() {
        let id = ArchetypeId::new(ty(2, 12)).with_added(ty(5, 4)).with_added(ty(3, 8));
        assert_eq!(id.signature(), 30);
        assert_eq!(id.component_bytes(), 24);
        // Sorted ascending regardless of insertion order.
        let ids: Vec<u32> = id.components().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3, 5]);
    }

    #[test]
    fn signatures_unique_across_all_subsets() {
        // Every non-empty subset of a 5-prime pool must fingerprint
        // differently (unique factorization).
        let pool = [ty(2, 4), ty(3, 4), ty(5, 4), ty(7, 4), ty(11, 4)];
        let mut signatures = Vec::new();
        for mask in 1u32..(1 << pool.len()) {
            let subset: Vec<ComponentType> = pool
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, &c)| c)
                .collect();
            signatures.push(ArchetypeId::from_components(subset).signature());
        }
        signatures.sort_unstable();
        let before = signatures.len();
        signatures.dedup();
        assert_eq!(signatures.len(), before);
    }

    #[test]
    fn containment_matches_component_list() {
        let pool = [ty(2, 4), ty(3, 4), ty(5, 4), ty(7, 4)];
        for mask in 1u32..(1 << pool.len()) {
            let subset: Vec<ComponentType> = pool
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, &c)| c)
                .collect();
            let id = ArchetypeId::from_components(subset.clone());
            for probe in &pool {
                let listed = subset.iter().any(|c| c.id == probe.id);
                assert_eq!(id.contains(probe.id), listed);
            }
        }
    }

    #[test]
    fn removing_last_component_yields_empty_sentinel() {
        let id = ArchetypeId::new(ty(3, 12));
        let removed = id.with_removed(ty(3, 12));
        assert!(removed.is_empty());
        assert_eq!(removed.signature(), EMPTY_SIGNATURE);
        assert_eq!(removed.component_bytes(), 0);
    }

    #[test]
    fn add_then_remove_restores_identity() {
        let base = ArchetypeId::new(ty(2, 12)).with_added(ty(3, 12));
        let round_trip = base.with_added(ty(5, 16)).with_removed(ty(5, 16));
        assert_eq!(round_trip, base);
    }

    #[test]
    fn layout_rows_fit_chunk() {
        let id = ArchetypeId::new(ty(2, 12)).with_added(ty(3, 12));
        let layout = ArchetypeLayout::plan(&id).unwrap();

        let rows = layout.entities_per_chunk();
        assert!(rows >= 1);
        // The unpadded bound: floor(data / (components + entity handle)).
        assert!(rows <= CHUNK_DATA_BYTES / (24 + size_of::<Entity>()));

        // Columns come after the entity array, aligned, in id order, and the
        // last column ends inside the chunk.
        let mut prev_end = rows * size_of::<Entity>();
        for col in layout.columns() {
            assert_eq!(col.offset as usize % MAX_COLUMN_ALIGN, 0);
            assert!(col.offset as usize >= prev_end);
            prev_end = col.offset as usize + rows * col.component.size as usize;
        }
        assert!(prev_end <= CHUNK_DATA_BYTES);
    }

    #[test]
    fn layout_planning_is_deterministic() {
        let id = ArchetypeId::new(ty(5, 48)).with_added(ty(7, 4));
        assert_eq!(
            ArchetypeLayout::plan(&id).unwrap(),
            ArchetypeLayout::plan(&id).unwrap()
        );
    }

    #[test]
    fn oversized_row_is_rejected() {
        let id = ArchetypeId::new(ty(2, CHUNK_DATA_BYTES as u32));
        assert!(matches!(
            ArchetypeLayout::plan(&id),
            Err(PlanError::RowTooLarge { .. })
        ));
    }

    #[test]
    fn component_cap_is_enforced() {
        // 11 distinct primes, one past the cap.
        let primes = [2u32, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31];
        let components: Vec<ComponentType> = primes.iter().map(|&p| ty(p, 4)).collect();
        let id = ArchetypeId::from_components(components);
        assert!(matches!(
            ArchetypeLayout::plan(&id),
            Err(PlanError::TooManyComponents { count: 11 })
        ));
    }
}
