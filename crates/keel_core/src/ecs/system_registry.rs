use crate::ecs::query::{QueryId, QueryRegistry};
use crate::ecs::registry::ArchetypeRegistry;
use crate::ecs::{ComponentId, SystemDescriptor, SystemHandle, SystemRegistrationError};
use std::collections::HashMap;

/// Tracks registered systems, enforces single-writer-per-component, and
/// hands each system its cached query at registration time.
pub struct SystemRegistry {
    systems: Vec<RegisteredSystem>,
    name_lookup: HashMap<String, SystemHandle>,
    component_writers: HashMap<ComponentId, SystemHandle>,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self {
            systems: Vec::new(),
            name_lookup: HashMap::new(),
            component_writers: HashMap::new(),
        }
    }

    /// Validate a descriptor and build the system's cached query from its
    /// component set.
    pub fn register(
        &mut self,
        descriptor: SystemDescriptor,
        storage: &ArchetypeRegistry,
        queries: &mut QueryRegistry,
    ) -> Result<SystemHandle, SystemRegistrationError> {
        if descriptor.is_empty() {
            return Err(SystemRegistrationError::EmptyAccess {
                name: descriptor.name().to_string(),
            });
        }

        let name_key = descriptor.name().to_string();
        if self.name_lookup.contains_key(&name_key) {
            return Err(SystemRegistrationError::DuplicateName { name: name_key });
        }

        for component in descriptor.write_components() {
            if let Some(existing_handle) = self.component_writers.get(&component.id) {
                let existing = self
                    .systems
                    .get(existing_handle.index() as usize)
                    .map(|sys| sys.descriptor.name().to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                return Err(SystemRegistrationError::ComponentWriteConflict {
                    component: component.id,
                    existing,
                    requested: descriptor.name().to_string(),
                });
            }
        }

        let handle = SystemHandle::new(self.systems.len() as u32);
        for component in descriptor.write_components() {
            self.component_writers.insert(component.id, handle);
        }

        let query = queries.register(descriptor.all_components(), storage);

        self.name_lookup.insert(name_key, handle);
        self.systems.push(RegisteredSystem {
            handle,
            descriptor,
            query,
        });

        Ok(handle)
    }

    pub fn descriptor(&self, handle: SystemHandle) -> Option<&SystemDescriptor> {
        self.systems
            .get(handle.index() as usize)
            .map(|system| &system.descriptor)
    }

    /// The cached query registered for a system.
    pub fn query_of(&self, handle: SystemHandle) -> Option<QueryId> {
        self.systems
            .get(handle.index() as usize)
            .map(|system| system.query)
    }

    pub fn lookup(&self, name: &str) -> Option<SystemHandle> {
        self.name_lookup.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SystemHandle, &SystemDescriptor)> {
        self.systems
            .iter()
            .map(|system| (system.handle, &system.descriptor))
    }
}

impl Default for SystemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct RegisteredSystem {
    handle: SystemHandle,
    descriptor: SystemDescriptor,
    query: QueryId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSettings;
    use crate::ecs::ComponentType;

    fn ty(id: u32) -> ComponentType {
        ComponentType { id, size: 4 }
    }

    fn fixtures() -> (ArchetypeRegistry, QueryRegistry, SystemRegistry) {
        (
            ArchetypeRegistry::new(&StorageSettings::default()).unwrap(),
            QueryRegistry::new(),
            SystemRegistry::new(),
        )
    }

    #[test]
    fn registration_returns_a_query_handle() {
        let (storage, mut queries, mut systems) = fixtures();
        let descriptor = SystemDescriptor::new("movement")
            .reads([ty(3)])
            .writes([ty(2)]);
        let handle = systems.register(descriptor, &storage, &mut queries).unwrap();

        let query = queries.get(systems.query_of(handle).unwrap());
        assert_eq!(query.signature(), 6);
        assert_eq!(systems.lookup("movement"), Some(handle));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let (storage, mut queries, mut systems) = fixtures();
        systems
            .register(
                SystemDescriptor::new("tick").reads([ty(2)]),
                &storage,
                &mut queries,
            )
            .unwrap();
        let err = systems
            .register(
                SystemDescriptor::new("tick").reads([ty(3)]),
                &storage,
                &mut queries,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            SystemRegistrationError::DuplicateName { .. }
        ));
    }

    #[test]
    fn two_writers_for_one_component_conflict() {
        let (storage, mut queries, mut systems) = fixtures();
        systems
            .register(
                SystemDescriptor::new("integrate").writes([ty(2)]),
                &storage,
                &mut queries,
            )
            .unwrap();
        let err = systems
            .register(
                SystemDescriptor::new("teleport").writes([ty(2)]),
                &storage,
                &mut queries,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            SystemRegistrationError::ComponentWriteConflict { component: 2, .. }
        ));
    }

    #[test]
    fn empty_access_is_rejected() {
        let (storage, mut queries, mut systems) = fixtures();
        let err = systems
            .register(SystemDescriptor::new("idle"), &storage, &mut queries)
            .unwrap_err();
        assert!(matches!(err, SystemRegistrationError::EmptyAccess { .. }));
    }
}
