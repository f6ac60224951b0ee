use crate::ecs::archetype::{ArchetypeId, MAX_COMPONENTS_PER_ARCHETYPE};
use crate::ecs::{meta_of, Component, ComponentId, ComponentType};
use std::collections::HashMap;
use thiserror::Error;

/// Owned byte payload for a single component instance.
#[derive(Debug)]
pub struct ComponentBytes {
    component: ComponentType,
    bytes: Box<[u8]>,
}

impl ComponentBytes {
    #[inline]
    pub fn component(&self) -> ComponentType {
        self.component
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Fully constructed entity blueprint, ready to spawn in one allocation.
///
/// Components are sorted by id, matching the column order of the archetype
/// the blueprint describes.
#[derive(Debug)]
pub struct EntityBlueprint {
    archetype: ArchetypeId,
    components: Vec<ComponentBytes>,
}

impl EntityBlueprint {
    #[inline]
    pub fn archetype(&self) -> &ArchetypeId {
        &self.archetype
    }

    #[inline]
    pub fn components(&self) -> &[ComponentBytes] {
        &self.components
    }
}

#[derive(Debug, Error)]
pub enum EntityBuilderError {
    #[error("component id {component_id} is not registered")]
    ComponentNotRegistered { component_id: ComponentId },
    #[error(
        "component id {component_id} expects {expected} bytes but received {actual} bytes"
    )]
    SizeMismatch {
        component_id: ComponentId,
        expected: usize,
        actual: usize,
    },
    #[error("blueprint has {count} components, cap is {MAX_COMPONENTS_PER_ARCHETYPE}")]
    TooManyComponents { count: usize },
}

/// Builder for constructing entity blueprints prior to spawning.
#[derive(Default, Debug)]
pub struct EntityBuilder {
    components: HashMap<ComponentId, (ComponentType, Box<[u8]>)>,
}

impl EntityBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self {
            components: HashMap::new(),
        }
    }

    /// Add a Rust-typed component by value. Re-adding the same type
    /// replaces the earlier value.
    pub fn with<T: Component>(mut self, value: T) -> Self {
        let ty = ComponentType::of::<T>();
        let bytes = bytemuck::bytes_of(&value).to_vec().into_boxed_slice();
        self.components.insert(ty.id, (ty, bytes));
        self
    }

    /// Add a component by raw bytes (generated components, deserialization).
    /// The id must be registered and the byte count must match its size.
    pub fn with_raw_bytes(
        mut self,
        component_id: ComponentId,
        bytes: Vec<u8>,
    ) -> Result<Self, EntityBuilderError> {
        let meta = meta_of(component_id)
            .ok_or(EntityBuilderError::ComponentNotRegistered { component_id })?;
        if bytes.len() != meta.size {
            return Err(EntityBuilderError::SizeMismatch {
                component_id,
                expected: meta.size,
                actual: bytes.len(),
            });
        }
        let ty = ComponentType {
            id: component_id,
            size: meta.size as u32,
        };
        self.components.insert(ty.id, (ty, bytes.into_boxed_slice()));
        Ok(self)
    }

    /// Finalize into an `EntityBlueprint` suitable for spawning.
    pub fn build(self) -> Result<EntityBlueprint, EntityBuilderError> {
        let mut parts: Vec<(ComponentType, Box<[u8]>)> = self.components.into_values().collect();
        if parts.len() > MAX_COMPONENTS_PER_ARCHETYPE {
            return Err(EntityBuilderError::TooManyComponents { count: parts.len() });
        }
        parts.sort_unstable_by_key(|(ty, _)| ty.id);

        let archetype = ArchetypeId::from_components(parts.iter().map(|(ty, _)| *ty).collect());
        let components = parts
            .into_iter()
            .map(|(component, bytes)| ComponentBytes { component, bytes })
            .collect();

        Ok(EntityBlueprint {
            archetype,
            components,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Mass {
        kg: f32,
    }
    crate::define_component!(Mass, 101, "Mass");

    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Drag {
        linear: f32,
        angular: f32,
    }
    crate::define_component!(Drag, 103, "Drag");

    #[test]
    fn blueprint_sorts_components_by_id() {
        let blueprint = EntityBuilder::new()
            .with(Drag { linear: 0.1, angular: 0.2 })
            .with(Mass { kg: 10.0 })
            .build()
            .unwrap();

        let ids: Vec<u32> = blueprint
            .components()
            .iter()
            .map(|part| part.component().id)
            .collect();
        assert_eq!(ids, vec![101, 103]);
        assert_eq!(blueprint.archetype().signature(), 101 * 103);
    }

    #[test]
    fn raw_bytes_require_registration() {
        let err = EntityBuilder::new()
            .with_raw_bytes(0xbad_1d, vec![0u8; 4])
            .unwrap_err();
        assert!(matches!(
            err,
            EntityBuilderError::ComponentNotRegistered { .. }
        ));
    }

    #[test]
    fn raw_bytes_validate_size() {
        Mass::ensure_registered();
        let err = EntityBuilder::new()
            .with_raw_bytes(Mass::ID, vec![0u8; 3])
            .unwrap_err();
        assert!(matches!(
            err,
            EntityBuilderError::SizeMismatch {
                expected: 4,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn raw_bytes_round_trip_through_blueprint() {
        Mass::ensure_registered();
        let value = Mass { kg: 2.5 };
        let blueprint = EntityBuilder::new()
            .with_raw_bytes(Mass::ID, bytemuck::bytes_of(&value).to_vec())
            .unwrap()
            .build()
            .unwrap();
        let part = &blueprint.components()[0];
        assert_eq!(part.bytes(), bytemuck::bytes_of(&value));
    }

    #[test]
    fn empty_builder_builds_empty_blueprint() {
        let blueprint = EntityBuilder::new().build().unwrap();
        assert!(blueprint.archetype().is_empty());
        assert!(blueprint.components().is_empty());
    }
}
