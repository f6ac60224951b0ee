// component.rs - Component identity and runtime registration
//
// Components are identified by u32 ids assigned by the build-time generator,
// not Rust TypeIds. The generator hands out distinct primes, which is what
// lets a 64-bit product of ids act as an archetype fingerprint and membership
// test (see archetype.rs).

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::mem::{align_of, size_of};
use std::sync::RwLock;

pub type ComponentId = u32;

/// Identifier plus byte size of one component type.
///
/// Identity is structural by id alone; the size rides along for layout math.
/// Invariant: all live ids are pairwise-distinct primes (guaranteed by the
/// id provider, assumed here).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ComponentType {
    pub id: ComponentId,
    pub size: u32,
}

impl ComponentType {
    /// The `ComponentType` describing a Rust component `T`.
    #[inline]
    pub fn of<T: Component>() -> Self {
        Self {
            id: T::ID,
            size: size_of::<T>() as u32,
        }
    }
}

/// Metadata describing a component's memory layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentMeta {
    pub id: ComponentId,
    pub name: String,
    pub size: usize,
    pub align: usize,
}

/// Global registry for component metadata (Rust-defined and generated alike).
static REGISTRY: Lazy<RwLock<HashMap<ComponentId, ComponentMeta>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a component's metadata.
///
/// Re-registration is allowed but must describe the same layout.
pub fn register_component(meta: ComponentMeta) {
    let mut map = REGISTRY.write().unwrap();
    if let Some(prev) = map.insert(meta.id, meta.clone()) {
        // Sanity check: re-registration must match previous layout
        assert_eq!(
            prev.size, meta.size,
            "Component size mismatch for id {}: was {}, now {}",
            meta.id, prev.size, meta.size
        );
        assert_eq!(
            prev.align, meta.align,
            "Component align mismatch for id {}: was {}, now {}",
            meta.id, prev.align, meta.align
        );
    }
}

/// Look up component metadata by ID.
pub fn meta_of(id: ComponentId) -> Option<ComponentMeta> {
    REGISTRY.read().unwrap().get(&id).cloned()
}

/// Trait for Rust-defined POD components.
///
/// The `bytemuck::Pod` bound is what makes the raw byte copies in and out of
/// chunk memory sound: no Drop, no padding surprises, no internal references.
pub trait Component: bytemuck::Pod + Send + Sync + 'static {
    /// Globally unique component ID (a prime, assigned by the generator).
    const ID: ComponentId;

    /// Human-readable name for diagnostics.
    const NAME: &'static str;

    /// Register this component's layout with the global registry.
    /// Should be called once during startup.
    fn ensure_registered() {
        register_component(ComponentMeta {
            id: Self::ID,
            name: Self::NAME.to_string(),
            size: size_of::<Self>(),
            align: align_of::<Self>(),
        });
    }
}

/// Helper macro to implement the Component trait.
///
/// # Example
/// ```ignore
/// #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
/// #[repr(C)]
/// struct Position { x: f32, y: f32, z: f32 }
///
/// define_component!(Position, 2, "Position");
/// ```
#[macro_export]
macro_rules! define_component {
    ($ty:ty, $id:expr, $name:expr) => {
        impl $crate::ecs::Component for $ty {
            const ID: $crate::ecs::ComponentId = $id;
            const NAME: &'static str = $name;
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Heading {
        yaw: f32,
        pitch: f32,
    }
    define_component!(Heading, 97, "Heading");

    #[test]
    fn component_type_carries_id_and_size() {
        let ty = ComponentType::of::<Heading>();
        assert_eq!(ty.id, 97);
        assert_eq!(ty.size, 8);
    }

    #[test]
    fn registration_is_idempotent() {
        Heading::ensure_registered();
        Heading::ensure_registered();

        let meta = meta_of(Heading::ID).expect("registered");
        assert_eq!(meta.name, "Heading");
        assert_eq!(meta.size, 8);
        assert_eq!(meta.align, 4);
    }

    #[test]
    fn unknown_id_has_no_meta() {
        assert!(meta_of(0xdead_beef).is_none());
    }
}
