//! The shared model table.
//!
//! One authoritative model per target, shared across workers. Readers are
//! lock-free and observe consistent snapshots (`Arc` handles); the only
//! writer is the fixpoint's commit step. Exceeding the configured
//! capacity is fatal, with a dedicated exit code at the boundary.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::errors::StoreError;
use crate::model::Model;
use crate::target::Target;

/// Default capacity, generous enough for large codebases while still
/// catching runaway model growth.
const DEFAULT_CAPACITY: usize = 1 << 20;

/// Concurrent model table keyed by canonical target.
#[derive(Debug)]
pub struct SharedModelTable {
    models: DashMap<Target, Arc<Model>>,
    capacity: usize,
}

impl Default for SharedModelTable {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl SharedModelTable {
    /// Creates a table with the given capacity bound.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            models: DashMap::new(),
            capacity,
        }
    }

    /// A snapshot of the model for a target. `None` means the target was
    /// pruned or never seeded; callers substitute the obscure default.
    #[must_use]
    pub fn get(&self, target: &Target) -> Option<Arc<Model>> {
        self.models.get(target).map(|entry| Arc::clone(&entry))
    }

    /// Stores a model, replacing any previous one.
    pub fn put(&self, target: Target, model: Model) -> Result<(), StoreError> {
        if !self.models.contains_key(&target) && self.models.len() >= self.capacity {
            return Err(StoreError::TableFull {
                capacity: self.capacity,
            });
        }
        self.models.insert(target, Arc::new(model));
        Ok(())
    }

    /// Stores a model only when the current value still equals `expected`
    /// (`None` = no entry). Returns whether the swap happened.
    pub fn compare_and_swap(
        &self,
        target: &Target,
        expected: Option<&Model>,
        new: Model,
    ) -> Result<bool, StoreError> {
        if !self.models.contains_key(target) && self.models.len() >= self.capacity {
            return Err(StoreError::TableFull {
                capacity: self.capacity,
            });
        }
        // The entry lock makes the read-compare-write atomic per key.
        match self.models.entry(target.clone()) {
            Entry::Occupied(mut entry) => match expected {
                Some(expected) if expected == entry.get().as_ref() => {
                    entry.insert(Arc::new(new));
                    Ok(true)
                }
                _ => Ok(false),
            },
            Entry::Vacant(entry) => {
                if expected.is_none() {
                    entry.insert(Arc::new(new));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Whether a model is stored for the target.
    #[must_use]
    pub fn contains(&self, target: &Target) -> bool {
        self.models.contains_key(target)
    }

    /// Number of stored models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Every stored `(target, model)` snapshot, in canonical order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Target, Arc<Model>)> {
        let mut entries: Vec<(Target, Arc<Model>)> = self
            .models
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
