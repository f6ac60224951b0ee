//! Named counters for tracking storage events
//!
//! Counter names are `&'static str` because every call site names a fixed
//! event ("registry.migrations", "pool.cold_alloc", ...), which keeps the
//! hot-path increment free of string allocation.

use std::collections::HashMap;

pub struct Counter {
    counters: HashMap<&'static str, usize>,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            counters: HashMap::new(),
        }
    }

    pub fn increment(&mut self, name: &'static str, value: usize) {
        *self.counters.entry(name).or_insert(0) += value;
    }

    pub fn set(&mut self, name: &'static str, value: usize) {
        self.counters.insert(name, value);
    }

    pub fn get(&self, name: &str) -> usize {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn reset(&mut self, name: &'static str) {
        self.counters.insert(name, 0);
    }

    pub fn reset_all(&mut self) {
        self.counters.clear();
    }

    /// Counters sorted by name, for stable log output.
    pub fn snapshot(&self) -> Vec<(&'static str, usize)> {
        let mut entries: Vec<_> = self.counters.iter().map(|(&k, &v)| (k, v)).collect();
        entries.sort_unstable_by_key(|(name, _)| *name);
        entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (&&'static str, &usize)> {
        self.counters.iter()
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_sorted_by_name() {
        let mut counters = Counter::new();
        counters.increment("registry.migrations", 4);
        counters.increment("commands.applied", 7);
        counters.set("pool.cold_alloc", 1);

        let snap = counters.snapshot();
        assert_eq!(
            snap,
            vec![
                ("commands.applied", 7),
                ("pool.cold_alloc", 1),
                ("registry.migrations", 4),
            ]
        );
    }
}
