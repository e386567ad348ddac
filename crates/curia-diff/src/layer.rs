//! Layer adapters: per-layer comparison rules for the differ.
//!
//! - [`SpanLayerAdapter`] compares single annotations by their feature values.
//! - [`ChainLayerAdapter`] compares whole chains. Each chain is materialized
//!   from its head into an explicit label sequence, so two owners' chains are
//!   equal only if every element matches in span and label.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use curia_core::defaults::LABEL_FEATURE;
use curia_core::{
    Annotation, ComparisonKey, DiffUnit, Error, LayerAdapter, Result, SourceAnnotationSet,
};

/// Placeholder rendered for absent feature values in comparison keys.
const ABSENT: &str = "\u{2205}";

/// Adapter for span (and document-level) layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLayerAdapter {
    layer: String,
    #[serde(default)]
    singleton: bool,
    /// Declared features; annotations carrying anything else are a
    /// structural mismatch. `None` accepts any feature.
    #[serde(default)]
    declared: Option<BTreeSet<String>>,
    /// Features taking part in the comparison. `None` compares all.
    #[serde(default)]
    compared: Option<Vec<String>>,
}

impl SpanLayerAdapter {
    pub fn new(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            singleton: false,
            declared: None,
            compared: None,
        }
    }

    /// At most one annotation per position.
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn with_declared_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared = Some(features.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_compared_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compared = Some(features.into_iter().map(Into::into).collect());
        self
    }

    fn key(&self, annotation: &Annotation) -> ComparisonKey {
        let parts = match &self.compared {
            Some(features) => features
                .iter()
                .map(|name| match annotation.features.get(name) {
                    Some(value) => format!("{name}={value}"),
                    None => format!("{name}={ABSENT}"),
                })
                .collect(),
            None => annotation
                .features
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect(),
        };
        ComparisonKey(parts)
    }

    fn check(&self, annotation: &Annotation) -> Result<()> {
        if annotation.next.is_some() {
            return Err(Error::mismatch(
                &self.layer,
                format!("span annotation at {} carries a chain link", annotation.position),
            ));
        }
        if let Some(declared) = &self.declared {
            if let Some(unknown) = annotation.features.keys().find(|f| !declared.contains(*f)) {
                return Err(Error::mismatch(
                    &self.layer,
                    format!(
                        "undeclared feature '{unknown}' at {}",
                        annotation.position
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl LayerAdapter for SpanLayerAdapter {
    fn layer(&self) -> &str {
        &self.layer
    }

    fn is_singleton(&self) -> bool {
        self.singleton
    }

    fn units(&self, set: &SourceAnnotationSet) -> Result<Vec<DiffUnit>> {
        let mut units = Vec::new();
        for (index, annotation) in set.annotations.iter().enumerate() {
            if annotation.layer != self.layer {
                continue;
            }
            self.check(annotation)?;
            units.push(DiffUnit {
                layer: self.layer.clone(),
                position: annotation.position.clone(),
                key: self.key(annotation),
                annotations: vec![annotation.clone()],
                source_indices: vec![index],
            });
        }
        trace!(layer = %self.layer, owner = %set.owner, units = units.len(), "Span units extracted");
        Ok(units)
    }
}

/// Adapter for chain layers whose annotations form singly-linked sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLayerAdapter {
    layer: String,
    /// Feature holding the element label.
    #[serde(default = "default_label_feature")]
    label_feature: String,
    #[serde(default)]
    singleton: bool,
}

fn default_label_feature() -> String {
    LABEL_FEATURE.to_string()
}

impl ChainLayerAdapter {
    pub fn new(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            label_feature: default_label_feature(),
            singleton: false,
        }
    }

    pub fn with_label_feature(mut self, feature: impl Into<String>) -> Self {
        self.label_feature = feature.into();
        self
    }

    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    /// Follow links from `head` and return the chain's indices in order.
    fn walk(&self, set: &SourceAnnotationSet, head: usize) -> Result<Vec<usize>> {
        let mut chain = vec![head];
        let mut seen: HashSet<usize> = HashSet::from([head]);
        let mut current = head;
        while let Some(next) = set.annotations[current].next {
            let target = set.annotations.get(next).ok_or_else(|| {
                Error::mismatch(
                    &self.layer,
                    format!("link from {} points past the end of the set", set.annotations[current].position),
                )
            })?;
            if target.layer != self.layer {
                return Err(Error::mismatch(
                    &self.layer,
                    format!("link into foreign layer '{}' at {}", target.layer, target.position),
                ));
            }
            if !seen.insert(next) {
                return Err(Error::mismatch(
                    &self.layer,
                    format!("cyclic chain at {}", target.position),
                ));
            }
            chain.push(next);
            current = next;
        }
        Ok(chain)
    }
}

impl LayerAdapter for ChainLayerAdapter {
    fn layer(&self) -> &str {
        &self.layer
    }

    fn is_singleton(&self) -> bool {
        self.singleton
    }

    fn units(&self, set: &SourceAnnotationSet) -> Result<Vec<DiffUnit>> {
        let members: Vec<usize> = set
            .annotations
            .iter()
            .enumerate()
            .filter(|(_, a)| a.layer == self.layer)
            .map(|(i, _)| i)
            .collect();

        let mut pointed_at: HashSet<usize> = HashSet::new();
        for &i in &members {
            if let Some(next) = set.annotations[i].next {
                if !pointed_at.insert(next) {
                    return Err(Error::mismatch(
                        &self.layer,
                        format!("two links converge on annotation {next}"),
                    ));
                }
            }
        }

        let mut visited: HashSet<usize> = HashSet::new();
        let mut units = Vec::new();
        for &head in members.iter().filter(|i| !pointed_at.contains(i)) {
            let chain = self.walk(set, head)?;
            visited.extend(chain.iter().copied());

            let last = chain.len() - 1;
            let mut annotations = Vec::with_capacity(chain.len());
            let mut parts = Vec::with_capacity(chain.len());
            for (offset, &index) in chain.iter().enumerate() {
                let element = &set.annotations[index];
                let label = element
                    .feature_label(&self.label_feature)
                    .unwrap_or_else(|| ABSENT.to_string());
                parts.push(format!(
                    "{}:{}:{label}",
                    element.position.begin, element.position.end
                ));
                let mut copy = element.clone();
                copy.next = (offset < last).then_some(offset + 1);
                annotations.push(copy);
            }

            units.push(DiffUnit {
                layer: self.layer.clone(),
                position: set.annotations[head].position.clone(),
                key: ComparisonKey(parts),
                annotations,
                source_indices: chain,
            });
        }

        if visited.len() != members.len() {
            return Err(Error::mismatch(
                &self.layer,
                format!(
                    "{} chain element(s) unreachable from any chain head",
                    members.len() - visited.len()
                ),
            ));
        }

        trace!(layer = %self.layer, owner = %set.owner, chains = units.len(), "Chain units extracted");
        Ok(units)
    }
}

/// Layer declaration as it appears in project configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerDefinition {
    Span(SpanLayerAdapter),
    Chain(ChainLayerAdapter),
}

impl LayerDefinition {
    pub fn layer(&self) -> &str {
        match self {
            LayerDefinition::Span(adapter) => adapter.layer(),
            LayerDefinition::Chain(adapter) => adapter.layer(),
        }
    }

    pub fn into_adapter(self) -> Arc<dyn LayerAdapter> {
        match self {
            LayerDefinition::Span(adapter) => Arc::new(adapter),
            LayerDefinition::Chain(adapter) => Arc::new(adapter),
        }
    }
}

/// Build adapters for a project's layers.
///
/// Fails with [`Error::InvalidConfig`] when no layer is declared or a layer
/// name appears twice.
pub fn build_adapters(definitions: Vec<LayerDefinition>) -> Result<Vec<Arc<dyn LayerAdapter>>> {
    if definitions.is_empty() {
        return Err(Error::InvalidConfig("no annotation layers configured".into()));
    }
    let mut names = HashSet::new();
    for definition in &definitions {
        if !names.insert(definition.layer().to_string()) {
            return Err(Error::InvalidConfig(format!(
                "layer '{}' declared more than once",
                definition.layer()
            )));
        }
    }
    Ok(definitions
        .into_iter()
        .map(LayerDefinition::into_adapter)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use curia_core::Position;
    use serde_json::json;

    fn pos(begin: usize, end: usize) -> Position {
        Position::new("doc", begin, end)
    }

    #[test]
    fn test_span_units_ignore_other_layers() {
        let set = SourceAnnotationSet::new("doc", "alice")
            .with(Annotation::span(pos(0, 5), "ner", "PER"))
            .with(Annotation::span(pos(0, 5), "pos", "NN"));
        let units = SpanLayerAdapter::new("ner").units(&set).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].source_indices, vec![0]);
        assert_eq!(units[0].key, ComparisonKey(vec!["value=\"PER\"".into()]));
    }

    #[test]
    fn test_span_key_uses_compared_features_only() {
        let adapter = SpanLayerAdapter::new("ner").with_compared_features(["value"]);
        let a = Annotation::span(pos(0, 5), "ner", "PER").with_feature("note", json!("x"));
        let b = Annotation::span(pos(0, 5), "ner", "PER").with_feature("note", json!("y"));
        assert_eq!(adapter.key(&a), adapter.key(&b));

        let all = SpanLayerAdapter::new("ner");
        assert_ne!(all.key(&a), all.key(&b));
    }

    #[test]
    fn test_span_undeclared_feature_is_mismatch() {
        let adapter = SpanLayerAdapter::new("ner").with_declared_features(["value"]);
        let set = SourceAnnotationSet::new("doc", "alice")
            .with(Annotation::span(pos(0, 5), "ner", "PER").with_feature("legacy", json!(1)));
        let err = adapter.units(&set).unwrap_err();
        assert!(matches!(err, Error::StructuralMismatch { .. }));
    }

    #[test]
    fn test_chain_units_materialize_sequence() {
        let set = SourceAnnotationSet::new("doc", "alice")
            .with(Annotation::span(pos(10, 12), "coref", "he"))
            .with(Annotation::span(pos(0, 4), "coref", "John").with_next(0));
        let units = ChainLayerAdapter::new("coref").units(&set).unwrap();
        assert_eq!(units.len(), 1);
        let unit = &units[0];
        assert_eq!(unit.position, pos(0, 4));
        assert_eq!(unit.source_indices, vec![1, 0]);
        assert_eq!(unit.annotations[0].next, Some(1));
        assert_eq!(unit.annotations[1].next, None);
        assert_eq!(
            unit.key,
            ComparisonKey(vec!["0:4:John".into(), "10:12:he".into()])
        );
    }

    #[test]
    fn test_chain_differs_when_any_link_label_differs() {
        let chain = |second: &str| {
            SourceAnnotationSet::new("doc", "x")
                .with(Annotation::span(pos(0, 4), "coref", "John").with_next(1))
                .with(Annotation::span(pos(10, 12), "coref", second))
        };
        let adapter = ChainLayerAdapter::new("coref");
        let a = adapter.units(&chain("he")).unwrap();
        let b = adapter.units(&chain("she")).unwrap();
        assert_eq!(a[0].position, b[0].position);
        assert_ne!(a[0].key, b[0].key);
    }

    #[test]
    fn test_chain_cycle_is_mismatch() {
        let set = SourceAnnotationSet::new("doc", "alice")
            .with(Annotation::span(pos(0, 4), "coref", "a").with_next(1))
            .with(Annotation::span(pos(5, 8), "coref", "b").with_next(0));
        let err = ChainLayerAdapter::new("coref").units(&set).unwrap_err();
        assert!(matches!(err, Error::StructuralMismatch { .. }));
    }

    #[test]
    fn test_chain_dangling_link_is_mismatch() {
        let set = SourceAnnotationSet::new("doc", "alice")
            .with(Annotation::span(pos(0, 4), "coref", "a").with_next(7));
        assert!(ChainLayerAdapter::new("coref").units(&set).is_err());
    }

    #[test]
    fn test_span_adapter_deserializes() {
        let adapter: SpanLayerAdapter =
            serde_json::from_value(json!({"layer": "ner", "singleton": true})).unwrap();
        assert!(adapter.is_singleton());
        assert_eq!(adapter.layer(), "ner");
    }

    #[test]
    fn test_layer_definitions_build_adapters() {
        let definitions: Vec<LayerDefinition> = serde_json::from_value(json!([
            {"kind": "span", "layer": "ner"},
            {"kind": "chain", "layer": "coref", "label_feature": "referenceType"},
        ]))
        .unwrap();
        let adapters = build_adapters(definitions).unwrap();
        assert_eq!(adapters.len(), 2);
        assert_eq!(adapters[1].layer(), "coref");
    }

    #[test]
    fn test_duplicate_or_missing_layers_are_invalid_config() {
        let dup = vec![
            LayerDefinition::Span(SpanLayerAdapter::new("ner")),
            LayerDefinition::Chain(ChainLayerAdapter::new("ner")),
        ];
        assert!(matches!(build_adapters(dup), Err(Error::InvalidConfig(_))));
        assert!(matches!(build_adapters(Vec::new()), Err(e) if e.is_precondition()));
    }
}
