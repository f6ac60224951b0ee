//! Entity Component System core types.
//!
//! Archetype-based storage: entities with the same component set share an
//! archetype, whose rows live in fixed 16 KiB chunks laid out
//! struct-of-arrays. Component ids are distinct primes, so the product of a
//! set is both its unique fingerprint and a one-modulo membership test.
//!
//! Structural changes go through [`ArchetypeRegistry`] on the owning thread;
//! worker threads defer them through [`ComponentCommands`] and read chunk
//! memory through [`CachedQuery`] iteration in between.

mod archetype;
mod builder;
mod commands;
mod component;
mod entity;
mod query;
mod registry;
mod system_descriptor;
mod system_handle;
mod system_registration_error;
mod system_registry;
pub mod storage;

pub use archetype::{
    ArchetypeId, ArchetypeLayout, ColumnLayout, PlanError, EMPTY_SIGNATURE, MAX_COLUMN_ALIGN,
    MAX_COMPONENTS_PER_ARCHETYPE,
};
pub use builder::{ComponentBytes, EntityBlueprint, EntityBuilder, EntityBuilderError};
pub use commands::{
    CommandBufferError, CommandKind, CommandRecord, ComponentCommands, DrainedCommands,
};
pub use component::{
    meta_of, register_component, Component, ComponentId, ComponentMeta, ComponentType,
};
pub use entity::{Entity, EntityAllocator};
pub use query::{
    CachedQuery, ChunkView, ChunkViewMut, QueryId, QueryMatch, QueryRegistry, QueryState,
};
pub use registry::{ArchetypeRecord, ArchetypeRegistry, StoreError};
pub use system_descriptor::SystemDescriptor;
pub use system_handle::SystemHandle;
pub use system_registration_error::SystemRegistrationError;
pub use system_registry::SystemRegistry;

/// Spawn an entity into the registry using builder-style construction.
///
/// # Example
/// ```ignore
/// let entity = spawn!(registry,
///     Position { x: 1.0, y: 2.0, z: 0.0 },
///     Velocity { x: 0.5, y: 0.0, z: 0.0 },
/// );
/// ```
#[macro_export]
macro_rules! spawn {
    ($registry:expr $(, $component:expr)+ $(,)?) => {{
        let blueprint = {
            let mut builder = $crate::ecs::EntityBuilder::new();
            $(
                builder = builder.with($component);
            )+
            builder.build().expect("invalid entity blueprint")
        };
        $registry
            .spawn(blueprint)
            .expect("failed to spawn entity")
    }};
}
