//! Configuration-set builder ("diff").
//!
//! For every position observed in any input set, the differ partitions the
//! contributing data owners into [`Configuration`]s of structurally equal
//! annotations. Every owner with an annotation at a position lands in exactly
//! one configuration; owners without one are absent.
//!
//! When an owner has several annotations at one position (stacking), they
//! are compared as one sorted multiset, so the owner still appears once and
//! is recorded in [`ConfigurationSet::stacked`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use curia_core::{
    Annotation, ComparisonKey, DataOwner, DiffUnit, LayerAdapter, LayerId, Position, Result,
    SourceAnnotationSet,
};

use crate::position_index::{PositionIndex, PositionKey};

/// What one owner contributes at one position.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    /// Annotations to copy when this contribution is chosen; `next` links are
    /// relative to this list.
    pub annotations: Vec<Annotation>,
    /// Indices of the contributed annotations in the owner's source set.
    pub source_indices: Vec<usize>,
}

impl Contribution {
    fn from_units(mut units: Vec<DiffUnit>) -> (ComparisonKey, Self) {
        units.sort_by(|a, b| a.key.cmp(&b.key));
        let key = if units.len() == 1 {
            units[0].key.clone()
        } else {
            ComparisonKey::concat(units.iter().map(|u| &u.key))
        };

        let mut annotations = Vec::new();
        let mut source_indices = Vec::new();
        for unit in units {
            let base = annotations.len();
            annotations.extend(unit.annotations.into_iter().map(|mut a| {
                a.next = a.next.map(|n| base + n);
                a
            }));
            source_indices.extend(unit.source_indices);
        }
        (
            key,
            Self {
                annotations,
                source_indices,
            },
        )
    }
}

/// Owners whose annotations at a position are structurally identical.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub key: ComparisonKey,
    contributions: BTreeMap<DataOwner, Contribution>,
}

impl Configuration {
    pub fn owners(&self) -> impl Iterator<Item = &DataOwner> {
        self.contributions.keys()
    }

    pub fn size(&self) -> usize {
        self.contributions.len()
    }

    pub fn contains(&self, owner: &str) -> bool {
        self.contributions.contains_key(owner)
    }

    pub fn contribution(&self, owner: &str) -> Option<&Contribution> {
        self.contributions.get(owner)
    }

    /// Contribution of the first owner by name; all are equal under the
    /// layer's comparison rules.
    pub fn representative(&self) -> Option<(&DataOwner, &Contribution)> {
        self.contributions.iter().next()
    }
}

/// Partition of all contributing owners at one position.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationSet {
    pub layer: LayerId,
    pub position: Position,
    /// Ordered by size descending, then by key.
    pub configurations: Vec<Configuration>,
    /// Owners with more than one annotation at this position.
    pub stacked: BTreeSet<DataOwner>,
}

impl ConfigurationSet {
    fn build(key: &PositionKey, entries: &[(DataOwner, DiffUnit)]) -> Self {
        let mut per_owner: BTreeMap<&DataOwner, Vec<DiffUnit>> = BTreeMap::new();
        for (owner, unit) in entries {
            per_owner.entry(owner).or_default().push(unit.clone());
        }

        let mut stacked = BTreeSet::new();
        let mut by_key: BTreeMap<ComparisonKey, BTreeMap<DataOwner, Contribution>> =
            BTreeMap::new();
        for (owner, units) in per_owner {
            if units.len() > 1 {
                stacked.insert(owner.clone());
            }
            let (key, contribution) = Contribution::from_units(units);
            by_key
                .entry(key)
                .or_default()
                .insert(owner.clone(), contribution);
        }

        let mut configurations: Vec<Configuration> = by_key
            .into_iter()
            .map(|(key, contributions)| Configuration { key, contributions })
            .collect();
        sort_configurations(&mut configurations);

        Self {
            layer: key.layer.clone(),
            position: key.position.clone(),
            configurations,
            stacked,
        }
    }

    /// All contributing owners in name order.
    pub fn owners(&self) -> BTreeSet<&DataOwner> {
        self.configurations.iter().flat_map(|c| c.owners()).collect()
    }

    pub fn configuration_of(&self, owner: &str) -> Option<&Configuration> {
        self.configurations.iter().find(|c| c.contains(owner))
    }

    /// Exactly one configuration holding every contributing owner.
    pub fn is_agreed(&self) -> bool {
        self.configurations.len() == 1
    }

    /// Single configuration of size one.
    pub fn is_uncorroborated(&self) -> bool {
        self.is_agreed() && self.configurations[0].size() == 1
    }

    /// More than one configuration.
    pub fn is_contested(&self) -> bool {
        self.configurations.len() > 1
    }

    /// Largest configuration (first in order), if any.
    pub fn largest(&self) -> Option<&Configuration> {
        self.configurations.first()
    }

    /// The same partition with `owner` removed; emptied configurations are
    /// dropped.
    pub fn without_owner(&self, owner: &str) -> ConfigurationSet {
        let mut configurations: Vec<Configuration> = self
            .configurations
            .iter()
            .filter_map(|c| {
                let mut c = c.clone();
                c.contributions.remove(owner);
                (c.size() > 0).then_some(c)
            })
            .collect();
        sort_configurations(&mut configurations);
        let mut stacked = self.stacked.clone();
        stacked.remove(owner);
        ConfigurationSet {
            layer: self.layer.clone(),
            position: self.position.clone(),
            configurations,
            stacked,
        }
    }
}

fn sort_configurations(configurations: &mut [Configuration]) {
    configurations.sort_by(|a, b| b.size().cmp(&a.size()).then_with(|| a.key.cmp(&b.key)));
}

/// Output of a diff run over one or more documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffResult {
    pub sets: Vec<ConfigurationSet>,
}

impl DiffResult {
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Positions with exactly one configuration.
    pub fn agreed_count(&self) -> usize {
        self.sets.iter().filter(|s| s.is_agreed()).count()
    }

    /// Positions with more than one configuration.
    pub fn contested_count(&self) -> usize {
        self.sets.iter().filter(|s| s.is_contested()).count()
    }

    /// Positions contributed by a single owner only.
    pub fn uncorroborated_count(&self) -> usize {
        self.sets.iter().filter(|s| s.is_uncorroborated()).count()
    }

    /// Every position agreed by every owner contributing to it.
    pub fn is_fully_agreed(&self) -> bool {
        self.sets.iter().all(ConfigurationSet::is_agreed)
    }

    pub fn find(&self, layer: &str, position: &Position) -> Option<&ConfigurationSet> {
        self.sets
            .iter()
            .find(|s| s.layer == layer && &s.position == position)
    }
}

/// Build one [`ConfigurationSet`] per distinct (layer, position) observed
/// across `sets`, in canonical position order.
pub fn diff(
    adapters: &[Arc<dyn LayerAdapter>],
    sets: &BTreeMap<DataOwner, SourceAnnotationSet>,
) -> Result<DiffResult> {
    let start = Instant::now();
    let index = PositionIndex::build(adapters, sets)?;

    let result = DiffResult {
        sets: index
            .keys()
            .into_iter()
            .map(|key| {
                let set = ConfigurationSet::build(key, index.get(key));
                trace!(
                    layer = %set.layer,
                    position = %set.position,
                    configurations = set.configurations.len(),
                    "Configuration set built"
                );
                set
            })
            .collect(),
    };

    debug!(
        subsystem = "diff",
        owners = sets.len(),
        position_count = result.len(),
        contested_count = result.contested_count(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Diff complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{ChainLayerAdapter, SpanLayerAdapter};

    fn pos(begin: usize, end: usize) -> Position {
        Position::new("doc", begin, end)
    }

    fn ner() -> Vec<Arc<dyn LayerAdapter>> {
        vec![Arc::new(SpanLayerAdapter::new("ner"))]
    }

    fn sets(entries: Vec<(&str, Vec<Annotation>)>) -> BTreeMap<DataOwner, SourceAnnotationSet> {
        entries
            .into_iter()
            .map(|(owner, annotations)| {
                let mut set = SourceAnnotationSet::new("doc", owner);
                set.annotations = annotations;
                (owner.to_string(), set)
            })
            .collect()
    }

    #[test]
    fn test_partition_by_label() {
        let input = sets(vec![
            ("alice", vec![Annotation::span(pos(0, 5), "ner", "PER")]),
            ("bob", vec![Annotation::span(pos(0, 5), "ner", "PER")]),
            ("carol", vec![Annotation::span(pos(0, 5), "ner", "ORG")]),
        ]);
        let result = diff(&ner(), &input).unwrap();
        assert_eq!(result.len(), 1);

        let set = &result.sets[0];
        assert_eq!(set.configurations.len(), 2);
        assert_eq!(set.configurations[0].size(), 2);
        assert!(set.configurations[0].contains("alice"));
        assert!(set.configurations[0].contains("bob"));
        assert!(set.configurations[1].contains("carol"));
        assert!(set.is_contested());
    }

    #[test]
    fn test_single_owner_is_uncorroborated() {
        let input = sets(vec![
            ("alice", vec![Annotation::span(pos(0, 5), "ner", "PER")]),
            ("bob", vec![]),
        ]);
        let result = diff(&ner(), &input).unwrap();
        assert_eq!(result.uncorroborated_count(), 1);
        let set = &result.sets[0];
        assert!(set.configuration_of("bob").is_none());
        assert_eq!(set.owners().len(), 1);
    }

    #[test]
    fn test_exact_boundary_policy() {
        let input = sets(vec![
            ("alice", vec![Annotation::span(pos(0, 5), "ner", "PER")]),
            ("bob", vec![Annotation::span(pos(0, 6), "ner", "PER")]),
        ]);
        let result = diff(&ner(), &input).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.agreed_count(), 2);
        assert!(result.is_fully_agreed());
    }

    #[test]
    fn test_stacked_owner_appears_once() {
        let input = sets(vec![
            (
                "alice",
                vec![
                    Annotation::span(pos(0, 5), "ner", "PER"),
                    Annotation::span(pos(0, 5), "ner", "LOC"),
                ],
            ),
            (
                "bob",
                vec![
                    Annotation::span(pos(0, 5), "ner", "LOC"),
                    Annotation::span(pos(0, 5), "ner", "PER"),
                ],
            ),
            ("carol", vec![Annotation::span(pos(0, 5), "ner", "PER")]),
        ]);
        let result = diff(&ner(), &input).unwrap();
        let set = &result.sets[0];
        assert_eq!(set.configurations.len(), 2);
        // Stacked multisets compare independent of insertion order.
        let stacked = set.configuration_of("alice").unwrap();
        assert!(stacked.contains("bob"));
        assert_eq!(stacked.contribution("alice").unwrap().annotations.len(), 2);
        assert_eq!(
            set.stacked.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["alice", "bob"]
        );
    }

    #[test]
    fn test_chain_layer_compares_full_sequence() {
        let chain = |second: &str| {
            vec![
                Annotation::span(pos(0, 4), "coref", "John").with_next(1),
                Annotation::span(pos(10, 12), "coref", second),
            ]
        };
        let input = sets(vec![
            ("alice", chain("he")),
            ("bob", chain("he")),
            ("carol", chain("she")),
        ]);
        let adapters: Vec<Arc<dyn LayerAdapter>> = vec![Arc::new(ChainLayerAdapter::new("coref"))];
        let result = diff(&adapters, &input).unwrap();
        assert_eq!(result.len(), 1);
        let set = &result.sets[0];
        assert_eq!(set.position, pos(0, 4));
        assert_eq!(set.configurations[0].size(), 2);
        assert!(set.configurations[1].contains("carol"));
    }

    #[test]
    fn test_without_owner_drops_empty_configurations() {
        let input = sets(vec![
            ("alice", vec![Annotation::span(pos(0, 5), "ner", "PER")]),
            ("bob", vec![Annotation::span(pos(0, 5), "ner", "ORG")]),
        ]);
        let result = diff(&ner(), &input).unwrap();
        let reduced = result.sets[0].without_owner("bob");
        assert_eq!(reduced.configurations.len(), 1);
        assert!(reduced.is_agreed());
        assert!(reduced.configuration_of("bob").is_none());
    }

    #[test]
    fn test_mismatch_propagates() {
        let adapters: Vec<Arc<dyn LayerAdapter>> = vec![Arc::new(
            SpanLayerAdapter::new("ner").with_declared_features(["value"]),
        )];
        let input = sets(vec![(
            "alice",
            vec![Annotation::span(pos(0, 5), "ner", "PER").with_feature("old", 1.into())],
        )]);
        assert!(diff(&adapters, &input).is_err());
    }

    #[test]
    fn test_find() {
        let input = sets(vec![("alice", vec![Annotation::span(pos(0, 5), "ner", "PER")])]);
        let result = diff(&ner(), &input).unwrap();
        assert!(result.find("ner", &pos(0, 5)).is_some());
        assert!(result.find("ner", &pos(0, 4)).is_none());
        assert!(result.find("pos", &pos(0, 5)).is_none());
    }
}
