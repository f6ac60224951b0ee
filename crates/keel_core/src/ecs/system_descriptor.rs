use crate::ecs::ComponentType;

/// Metadata describing how a system touches component storage: the
/// statically-known sets it reads and writes. The union of the two is what
/// its cached query is built from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemDescriptor {
    name: String,
    reads: Vec<ComponentType>,
    writes: Vec<ComponentType>,
    components: Vec<ComponentType>,
}

impl SystemDescriptor {
    /// Create a new descriptor with the provided name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reads: Vec::new(),
            writes: Vec::new(),
            components: Vec::new(),
        }
    }

    /// Replace the read-only component set for this system.
    pub fn reads<I>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = ComponentType>,
    {
        self.reads = Self::sanitize(components);
        self.rebuild_components();
        self
    }

    /// Replace the write component set for this system.
    pub fn writes<I>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = ComponentType>,
    {
        self.writes = Self::sanitize(components);
        self.rebuild_components();
        self
    }

    /// Unique system name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read-only component set.
    pub fn read_components(&self) -> &[ComponentType] {
        &self.reads
    }

    /// Writable component set.
    pub fn write_components(&self) -> &[ComponentType] {
        &self.writes
    }

    /// Union of read and write components, sorted by id.
    pub fn all_components(&self) -> &[ComponentType] {
        &self.components
    }

    /// Whether the descriptor touches any components at all.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    fn rebuild_components(&mut self) {
        self.components.clear();
        self.components.extend(&self.reads);
        self.components.extend(&self.writes);
        self.components.sort_unstable_by_key(|ty| ty.id);
        self.components.dedup_by_key(|ty| ty.id);
    }

    fn sanitize<I>(components: I) -> Vec<ComponentType>
    where
        I: IntoIterator<Item = ComponentType>,
    {
        let mut list: Vec<ComponentType> = components.into_iter().collect();
        list.sort_unstable_by_key(|ty| ty.id);
        list.dedup_by_key(|ty| ty.id);
        list
    }
}
