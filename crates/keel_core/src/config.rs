//! Storage engine settings
//!
//! Capacity knobs consumed once at initialization. Chunk size, the
//! per-archetype component cap, and the column alignment bound are
//! compile-time constants (see `ecs::archetype` and `ecs::storage::chunk`);
//! everything sized per-title lives here.

use serde::{Deserialize, Serialize};

/// Capacity configuration for the archetype storage engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Chunks carved eagerly at startup. Steady-state allocation should
    /// never leave this pool; overflowing it is logged as a warning.
    pub warm_chunks: usize,
    /// Upper bound on distinct archetypes. Exceeding it is a hard error.
    pub max_archetypes: usize,
    /// Structural commands recordable per frame before drops begin.
    pub command_capacity: usize,
    /// Byte budget for deferred component payloads per frame.
    pub command_payload_bytes: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            warm_chunks: 64,
            max_archetypes: 128,
            command_capacity: 4096,
            command_payload_bytes: 256 * 1024,
        }
    }
}
