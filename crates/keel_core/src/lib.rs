//! Keel Engine Core
//!
//! Archetype-based entity/component storage:
//! - Signature-identified archetypes (component ids are distinct primes;
//!   the product of a set is its fingerprint)
//! - Fixed 16 KiB chunks with struct-of-arrays component columns
//! - Pooled chunk allocation with a pre-carved warm pool
//! - Deferred command buffer for thread-safe structural changes
//! - Cached component queries with incremental invalidation

pub mod config;
pub mod ecs;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
