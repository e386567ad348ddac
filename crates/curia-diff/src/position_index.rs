//! Position index: groups every owner's diff units by canonical position.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use curia_core::{DataOwner, DiffUnit, LayerAdapter, LayerId, Position, Result, SourceAnnotationSet};

/// Grouping key of the index: layer plus exact position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionKey {
    pub position: Position,
    pub layer: LayerId,
}

impl PositionKey {
    pub fn of(unit: &DiffUnit) -> Self {
        Self {
            position: unit.position.clone(),
            layer: unit.layer.clone(),
        }
    }
}

/// Mapping from [`PositionKey`] to the units each owner contributes there.
///
/// Lookup is O(1). Per-key entries are ordered by owner name because owners
/// are indexed in sorted order; [`PositionIndex::keys`] yields keys in
/// canonical order so nothing observable depends on hash iteration.
#[derive(Debug, Default)]
pub struct PositionIndex {
    entries: HashMap<PositionKey, Vec<(DataOwner, DiffUnit)>>,
}

impl PositionIndex {
    /// Index all units the `adapters` extract from `sets`.
    pub fn build(
        adapters: &[Arc<dyn LayerAdapter>],
        sets: &BTreeMap<DataOwner, SourceAnnotationSet>,
    ) -> Result<Self> {
        let mut index = Self::default();
        for (owner, set) in sets {
            for adapter in adapters {
                for unit in adapter.units(set)? {
                    index.insert(owner.clone(), unit);
                }
            }
        }
        Ok(index)
    }

    pub fn insert(&mut self, owner: DataOwner, unit: DiffUnit) {
        self.entries
            .entry(PositionKey::of(&unit))
            .or_default()
            .push((owner, unit));
    }

    pub fn get(&self, key: &PositionKey) -> &[(DataOwner, DiffUnit)] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All keys in canonical order.
    pub fn keys(&self) -> Vec<&PositionKey> {
        let mut keys: Vec<&PositionKey> = self.entries.keys().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
