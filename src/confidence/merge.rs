//! Merging of the OCR and LLM confidence trees into one conservative score
//! per field, plus document-level aggregates.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use super::resolver::{self, Resolver};
use super::{child_path, ConfidenceLeaf, ConfidenceNode, ConfidenceTree, WordDetail};
use crate::document::{round3, Polygon};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Treat an exact `0.0` like a missing score instead of a "not found" signal.
    #[serde(default)]
    pub ignore_zero_scores: bool,
}

/// A merged field. Evidence fields are filled in later from the OCR tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedLeaf {
    pub confidence: f64,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_polygon: Option<Polygon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_polygons: Option<Vec<Polygon>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_details: Option<Vec<WordDetail>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_numbers: Option<Vec<u32>>,
}

impl MergedLeaf {
    pub fn new(confidence: f64, value: Value) -> Self {
        Self {
            confidence,
            value,
            combined_polygon: None,
            word_polygons: None,
            word_details: None,
            page_number: None,
            page_numbers: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergedNode {
    Map(Vec<(String, MergedNode)>),
    List(Vec<MergedNode>),
    Leaf(MergedLeaf),
}

impl MergedNode {
    pub fn get(&self, key: &str) -> Option<&MergedNode> {
        match self {
            Self::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            Self::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            Self::Leaf(_) => None,
        }
    }

    fn collect_leaves<'a>(&'a self, path: &str, out: &mut Vec<(String, &'a MergedLeaf)>) {
        match self {
            Self::Map(entries) => {
                for (k, v) in entries {
                    v.collect_leaves(&child_path(path, k), out);
                }
            }
            Self::List(items) => {
                for (i, v) in items.iter().enumerate() {
                    v.collect_leaves(&child_path(path, &i.to_string()), out);
                }
            }
            Self::Leaf(leaf) => out.push((path.to_string(), leaf)),
        }
    }
}

impl Serialize for MergedNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Leaf(leaf) => leaf.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedConfidenceTree {
    pub fields: Vec<(String, MergedNode)>,
    pub total_evaluated_fields_count: usize,
    pub overall_confidence: f64,
    pub min_extracted_field_confidence: f64,
    pub min_extracted_field_confidence_field: Vec<String>,
    pub zero_confidence_fields: Vec<String>,
    pub zero_confidence_fields_count: usize,
}

impl MergedConfidenceTree {
    pub fn new(fields: Vec<(String, MergedNode)>) -> Self {
        let mut tree = Self {
            fields,
            total_evaluated_fields_count: 0,
            overall_confidence: 0.0,
            min_extracted_field_confidence: 0.0,
            min_extracted_field_confidence_field: Vec::new(),
            zero_confidence_fields: Vec::new(),
            zero_confidence_fields_count: 0,
        };
        tree.recompute_aggregates();
        tree
    }

    pub fn get(&self, key: &str) -> Option<&MergedNode> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Every leaf with its index-aware dotted path, in traversal order.
    pub fn leaves(&self) -> Vec<(String, &MergedLeaf)> {
        let mut out = Vec::new();
        for (k, v) in &self.fields {
            v.collect_leaves(k, &mut out);
        }
        out
    }

    /// Refresh the document-level statistics from the current leaves.
    pub fn recompute_aggregates(&mut self) {
        let leaves = self.leaves();
        let scores: Vec<f64> = leaves.iter().map(|(_, l)| l.confidence).collect();

        let total = leaves.len();
        let overall = round3(resolver::mean(&scores));
        let (min, min_fields) = match resolver::ScoreResolver::Min.resolve(&scores) {
            Some(min) => (
                min,
                leaves
                    .iter()
                    .filter(|(_, l)| l.confidence == min)
                    .map(|(p, _)| p.clone())
                    .collect(),
            ),
            None => (0.0, Vec::new()),
        };
        let zero_fields: Vec<String> = leaves
            .iter()
            .filter(|(_, l)| l.confidence == 0.0)
            .map(|(p, _)| p.clone())
            .collect();

        self.total_evaluated_fields_count = total;
        self.overall_confidence = overall;
        self.min_extracted_field_confidence = min;
        self.min_extracted_field_confidence_field = min_fields;
        self.zero_confidence_fields_count = zero_fields.len();
        self.zero_confidence_fields = zero_fields;
    }
}

impl Serialize for MergedConfidenceTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 6))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.serialize_entry("total_evaluated_fields_count", &self.total_evaluated_fields_count)?;
        map.serialize_entry("overall_confidence", &self.overall_confidence)?;
        map.serialize_entry(
            "min_extracted_field_confidence",
            &self.min_extracted_field_confidence,
        )?;
        map.serialize_entry(
            "min_extracted_field_confidence_field",
            &self.min_extracted_field_confidence_field,
        )?;
        map.serialize_entry("zero_confidence_fields", &self.zero_confidence_fields)?;
        map.serialize_entry("zero_confidence_fields_count", &self.zero_confidence_fields_count)?;
        map.end()
    }
}

struct Merger<'a> {
    resolver: &'a dyn Resolver,
    options: MergeOptions,
}

/// Merge `a` (primary, usually OCR) with `b` (usually LLM).
///
/// Every leaf takes `resolver` over the scores both sides actually have;
/// lists are merged positionally and truncated to the shorter side.
pub fn merge(
    a: &ConfidenceTree,
    b: &ConfidenceTree,
    resolver: &dyn Resolver,
    options: MergeOptions,
) -> MergedConfidenceTree {
    let merger = Merger { resolver, options };
    let tree = MergedConfidenceTree::new(merger.merge_entries(&a.fields, &b.fields));
    debug!(
        "Merged {} fields, overall {:.3}, {} at zero",
        tree.total_evaluated_fields_count, tree.overall_confidence, tree.zero_confidence_fields_count
    );
    tree
}

impl Merger<'_> {
    fn merge_entries(
        &self,
        a: &[(String, ConfidenceNode)],
        b: &[(String, ConfidenceNode)],
    ) -> Vec<(String, MergedNode)> {
        let mut merged: Vec<(String, MergedNode)> = Vec::new();
        for (key, node) in a.iter().filter(|(k, _)| !k.starts_with('_')) {
            merged.push((key.clone(), self.merge_node(Some(node), lookup(b, key))));
        }
        for (key, node) in b.iter().filter(|(k, _)| !k.starts_with('_')) {
            if lookup(a, key).is_none() {
                merged.push((key.clone(), self.merge_node(Some(node), None)));
            }
        }
        merged
    }

    fn merge_node(&self, a: Option<&ConfidenceNode>, b: Option<&ConfidenceNode>) -> MergedNode {
        use ConfidenceNode::{Leaf, List, Map};

        match (a, b) {
            (Some(Map(ea)), Some(Map(eb))) => MergedNode::Map(self.merge_entries(ea, eb)),
            (Some(Map(ea)), _) => MergedNode::Map(self.merge_entries(ea, &[])),
            (Some(List(la)), Some(List(lb))) => {
                if la.len() != lb.len() {
                    debug!(
                        "List length mismatch while merging ({} vs {}), truncating",
                        la.len(),
                        lb.len()
                    );
                }
                MergedNode::List(
                    la.iter()
                        .zip(lb)
                        .map(|(x, y)| self.merge_node(Some(x), Some(y)))
                        .collect(),
                )
            }
            (Some(List(la)), _) => {
                MergedNode::List(la.iter().map(|x| self.merge_node(Some(x), None)).collect())
            }
            (Some(Leaf(la)), Some(Leaf(lb))) => MergedNode::Leaf(self.merge_leaf(Some(la), Some(lb))),
            (Some(Leaf(la)), _) => MergedNode::Leaf(self.merge_leaf(Some(la), None)),
            (None, Some(node)) => self.merge_node(Some(node), None),
            (None, None) => MergedNode::Map(Vec::new()),
        }
    }

    fn merge_leaf(&self, a: Option<&ConfidenceLeaf>, b: Option<&ConfidenceLeaf>) -> MergedLeaf {
        let valid: Vec<f64> = [a, b]
            .into_iter()
            .flatten()
            .filter_map(|l| l.confidence)
            .filter(|c| !(self.options.ignore_zero_scores && *c == 0.0))
            .collect();
        let confidence = round3(self.resolver.resolve(&valid).unwrap_or(0.0));
        let value = a
            .or(b)
            .map(|l| l.value.clone())
            .unwrap_or(Value::Null);
        MergedLeaf::new(confidence, value)
    }
}

fn lookup<'e>(entries: &'e [(String, ConfidenceNode)], key: &str) -> Option<&'e ConfidenceNode> {
    entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}
