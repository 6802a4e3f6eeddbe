//! Per-field confidence trees.
//!
//! Both evaluators mirror the shape of the extracted value tree: objects
//! become [`ConfidenceNode::Map`], arrays [`ConfidenceNode::List`] and every
//! scalar a [`ConfidenceLeaf`]. The OCR side also records where on the page
//! the value was found; the LLM side only scores it.

pub mod llm;
pub mod merge;
pub mod ocr;
pub mod resolver;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::document::Polygon;

/// Field name used when the extracted tree is not an object.
pub const ROOT_FIELD: &str = "value";

/// Evidence for a single OCR word supporting a value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordDetail {
    pub content: String,
    pub confidence: f64,
    pub polygon: Polygon,
    pub page_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceLeaf {
    /// `None` only when the evaluator had no signal at all; serialized as `0.0`
    /// so every emitted leaf score stays within `[0, 1]`.
    #[serde(serialize_with = "score_or_zero")]
    pub confidence: Option<f64>,
    pub value: Value,
    pub matching_lines_count: usize,
    pub normalized_polygons: Vec<Polygon>,
    pub word_polygons: Vec<Polygon>,
    pub word_details: Vec<WordDetail>,
    pub combined_polygon: Option<Polygon>,
    pub page_number: Option<u32>,
    pub page_numbers: Vec<u32>,
    pub field_path: String,
}

fn score_or_zero<S: Serializer>(confidence: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(confidence.unwrap_or(0.0))
}

impl ConfidenceLeaf {
    /// A leaf carrying only a score.
    pub fn scored(field_path: &str, value: &Value, confidence: Option<f64>) -> Self {
        Self {
            confidence,
            value: value.clone(),
            matching_lines_count: 0,
            normalized_polygons: Vec::new(),
            word_polygons: Vec::new(),
            word_details: Vec::new(),
            combined_polygon: None,
            page_number: None,
            page_numbers: Vec::new(),
            field_path: field_path.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfidenceNode {
    Map(Vec<(String, ConfidenceNode)>),
    List(Vec<ConfidenceNode>),
    Leaf(ConfidenceLeaf),
}

impl ConfidenceNode {
    pub fn get(&self, key: &str) -> Option<&ConfidenceNode> {
        match self {
            Self::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a ConfidenceLeaf>) {
        match self {
            Self::Map(entries) => entries.iter().for_each(|(_, n)| n.collect_leaves(out)),
            Self::List(items) => items.iter().for_each(|n| n.collect_leaves(out)),
            Self::Leaf(leaf) => out.push(leaf),
        }
    }
}

impl Serialize for ConfidenceNode {
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

/// A confidence mirror of one extracted value tree plus its overall score.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceTree {
    pub fields: Vec<(String, ConfidenceNode)>,
    /// Mean of all scored leaves, `0.0` without leaves.
    pub overall: f64,
}

impl ConfidenceTree {
    fn new(fields: Vec<(String, ConfidenceNode)>) -> Self {
        let mut tree = Self { fields, overall: 0.0 };
        let scores: Vec<f64> = tree.leaves().iter().filter_map(|l| l.confidence).collect();
        tree.overall = resolver::mean(&scores);
        tree
    }

    pub fn get(&self, key: &str) -> Option<&ConfidenceNode> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// All leaves in traversal order.
    pub fn leaves(&self) -> Vec<&ConfidenceLeaf> {
        let mut out = Vec::new();
        for (_, node) in &self.fields {
            node.collect_leaves(&mut out);
        }
        out
    }
}

impl Serialize for ConfidenceTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.serialize_entry("_overall", &self.overall)?;
        map.end()
    }
}

/// Scores one scalar. Implementors may carry traversal state between calls.
pub trait LeafEvaluator {
    fn evaluate_leaf(&mut self, field_path: &str, value: &Value) -> ConfidenceLeaf;
}

/// Dotted child path: `items` + `0` -> `items.0`.
pub fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

/// Walk `extracted` depth-first in document order, scoring every scalar.
pub fn build_tree(extracted: &Value, evaluator: &mut dyn LeafEvaluator) -> ConfidenceTree {
    let fields = match extracted {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), walk(v, k, evaluator)))
            .collect(),
        other => vec![(ROOT_FIELD.to_string(), walk(other, ROOT_FIELD, evaluator))],
    };
    ConfidenceTree::new(fields)
}

fn walk(value: &Value, path: &str, evaluator: &mut dyn LeafEvaluator) -> ConfidenceNode {
    match value {
        Value::Object(map) => ConfidenceNode::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), walk(v, &child_path(path, k), evaluator)))
                .collect(),
        ),
        Value::Array(items) => ConfidenceNode::List(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| walk(v, &child_path(path, &i.to_string()), evaluator))
                .collect(),
        ),
        scalar => ConfidenceNode::Leaf(evaluator.evaluate_leaf(path, scalar)),
    }
}
