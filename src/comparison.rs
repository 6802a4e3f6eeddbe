//! Flat extraction-vs-confidence report rows.
//!
//! Paths here join object keys with dots only; arrays are not expanded, so a
//! list of line items becomes one row scored by its weakest item.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::confidence::merge::{MergedConfidenceTree, MergedNode};
use crate::confidence::resolver::{Resolver, ScoreResolver};
use crate::confidence::{child_path, ROOT_FIELD};
use crate::document::Polygon;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonItem {
    pub field: String,
    pub value: Value,
    /// Percentage with two decimals, e.g. `"87.50%"`.
    pub confidence: String,
    pub is_above_threshold: bool,
    pub polygon: Option<Polygon>,
    pub page_number: Option<u32>,
}

/// Merged data for one flattened path.
#[derive(Debug, Clone, Default)]
struct Scored {
    value: Value,
    confidence: f64,
    polygon: Option<Polygon>,
    page_number: Option<u32>,
}

pub fn format_percentage(confidence: f64) -> String {
    format!("{:.2}%", confidence * 100.0)
}

/// One row per flattened field of either tree, sorted by field path.
pub fn flatten_to_comparison(
    extracted: &Value,
    merged: &MergedConfidenceTree,
    threshold: f64,
) -> Vec<ComparisonItem> {
    let mut values = BTreeMap::new();
    match extracted {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_value(v, k, &mut values);
            }
        }
        other => flatten_value(other, ROOT_FIELD, &mut values),
    }

    let mut scored = BTreeMap::new();
    for (k, node) in &merged.fields {
        flatten_merged(node, k, &mut scored);
    }

    let mut keys: Vec<&String> = values.keys().chain(scored.keys()).collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .map(|key| {
            let s = scored.get(key).cloned().unwrap_or_default();
            let value = values.get(key).cloned().unwrap_or(s.value);
            ComparisonItem {
                field: key.clone(),
                value,
                confidence: format_percentage(s.confidence),
                is_above_threshold: s.confidence >= threshold,
                polygon: s.polygon,
                page_number: s.page_number,
            }
        })
        .collect()
}

fn flatten_value(value: &Value, path: &str, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_value(v, &child_path(path, k), out);
            }
        }
        other => {
            out.insert(path.to_string(), other.clone());
        }
    }
}

fn flatten_merged(node: &MergedNode, path: &str, out: &mut BTreeMap<String, Scored>) {
    match node {
        MergedNode::Map(entries) => {
            for (k, v) in entries {
                flatten_merged(v, &child_path(path, k), out);
            }
        }
        MergedNode::Leaf(leaf) => {
            out.insert(
                path.to_string(),
                Scored {
                    value: leaf.value.clone(),
                    confidence: leaf.confidence,
                    polygon: leaf.combined_polygon.clone(),
                    page_number: leaf.page_number,
                },
            );
        }
        MergedNode::List(_) => {
            let mut confidences = Vec::new();
            let mut pages = Vec::new();
            collect_list(node, &mut confidences, &mut pages);
            out.insert(
                path.to_string(),
                Scored {
                    value: merged_value(node),
                    confidence: ScoreResolver::Min.resolve(&confidences).unwrap_or(0.0),
                    polygon: None,
                    page_number: pages.into_iter().min(),
                },
            );
        }
    }
}

fn collect_list(node: &MergedNode, confidences: &mut Vec<f64>, pages: &mut Vec<u32>) {
    match node {
        MergedNode::Map(entries) => entries
            .iter()
            .for_each(|(_, v)| collect_list(v, confidences, pages)),
        MergedNode::List(items) => items
            .iter()
            .for_each(|v| collect_list(v, confidences, pages)),
        MergedNode::Leaf(leaf) => {
            confidences.push(leaf.confidence);
            pages.extend(leaf.page_number);
        }
    }
}

fn merged_value(node: &MergedNode) -> Value {
    match node {
        MergedNode::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), merged_value(v)))
                .collect(),
        ),
        MergedNode::List(items) => Value::Array(items.iter().map(merged_value).collect()),
        MergedNode::Leaf(leaf) => leaf.value.clone(),
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Render the rows as a CSV table.
pub fn to_csv(items: &[ComparisonItem]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["Field", "Value", "Confidence", "Above Threshold", "Page", "Polygon"])?;

    for item in items {
        let polygon = match &item.polygon {
            Some(p) => serde_json::to_string(p)?,
            None => String::new(),
        };
        writer.write_record([
            item.field.clone(),
            cell(&item.value),
            item.confidence.clone(),
            item.is_above_threshold.to_string(),
            item.page_number.map(|p| p.to_string()).unwrap_or_default(),
            polygon,
        ])?;
    }

    let bytes = writer.into_inner().context("Failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}
