//! Property tests for the differ and the merge strategies.
//!
//! - Diff is deterministic: two runs over the same input are identical.
//! - Completeness: every owner with an annotation at a position is in
//!   exactly one configuration of that position.
//! - Merge totality: every strategy returns one decision per set.

use std::collections::BTreeMap;
use std::sync::Arc;

use curia_diff::{
    diff, Annotation, DataOwner, LayerAdapter, MergeStrategy, Position, SourceAnnotationSet,
    SpanLayerAdapter,
};
use proptest::prelude::*;

const OWNERS: [&str; 4] = ["alice", "bob", "carol", "dave"];
const LABELS: [&str; 3] = ["PER", "ORG", "LOC"];

fn adapters() -> Vec<Arc<dyn LayerAdapter>> {
    vec![
        Arc::new(SpanLayerAdapter::new("ner")),
        Arc::new(SpanLayerAdapter::new("pos").singleton()),
    ]
}

/// (owner, layer, begin, len, label)
fn annotation_strategy() -> impl Strategy<Value = (usize, bool, usize, usize, usize)> {
    (0..OWNERS.len(), any::<bool>(), 0usize..6, 1usize..3, 0..LABELS.len())
}

fn build_sets(raw: &[(usize, bool, usize, usize, usize)]) -> BTreeMap<DataOwner, SourceAnnotationSet> {
    let mut sets: BTreeMap<DataOwner, SourceAnnotationSet> = BTreeMap::new();
    for &(owner, is_ner, begin, len, label) in raw {
        let owner = OWNERS[owner];
        let layer = if is_ner { "ner" } else { "pos" };
        sets.entry(owner.to_string())
            .or_insert_with(|| SourceAnnotationSet::new("doc", owner))
            .push(Annotation::span(
                Position::new("doc", begin, begin + len),
                layer,
                LABELS[label],
            ));
    }
    sets
}

proptest! {
    #[test]
    fn diff_is_deterministic(raw in prop::collection::vec(annotation_strategy(), 0..40)) {
        let sets = build_sets(&raw);
        let first = diff(&adapters(), &sets).unwrap();
        let second = diff(&adapters(), &sets).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn every_owner_in_exactly_one_configuration(raw in prop::collection::vec(annotation_strategy(), 0..40)) {
        let sets = build_sets(&raw);
        let result = diff(&adapters(), &sets).unwrap();

        for (owner, set) in &sets {
            for annotation in &set.annotations {
                let config_set = result
                    .find(&annotation.layer, &annotation.position)
                    .expect("every annotated position has a configuration set");
                let hits = config_set
                    .configurations
                    .iter()
                    .filter(|c| c.contains(owner))
                    .count();
                prop_assert_eq!(hits, 1);
            }
        }

        // No configuration is empty and no owner without annotations appears.
        for config_set in &result.sets {
            for configuration in &config_set.configurations {
                prop_assert!(configuration.size() > 0);
                for owner in configuration.owners() {
                    prop_assert!(sets[owner]
                        .at(&config_set.layer, &config_set.position)
                        .next()
                        .is_some());
                }
            }
        }
    }

    #[test]
    fn merge_is_total(
        raw in prop::collection::vec(annotation_strategy(), 1..40),
        min_votes in 1usize..4,
    ) {
        let sets = build_sets(&raw);
        let result = diff(&adapters(), &sets).unwrap();
        for strategy in [
            MergeStrategy::threshold(min_votes),
            MergeStrategy::Unanimous { min_votes },
            MergeStrategy::passthrough("alice"),
            MergeStrategy::Manual,
        ] {
            let decisions = strategy.decide(&result.sets, "carol");
            prop_assert_eq!(decisions.len(), result.sets.len());
            for (decision, set) in decisions.iter().zip(&result.sets) {
                prop_assert_eq!(&decision.position, &set.position);
                prop_assert_eq!(&decision.layer, &set.layer);
                if let Some(chosen) = &decision.chosen {
                    prop_assert!(!chosen.contains("carol"));
                }
            }
        }
    }
}
