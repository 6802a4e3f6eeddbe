//! Visual evidence for merged fields.
//!
//! The merger only carries scores and values; page and polygon data live on
//! the OCR side and are copied back onto the merged tree here.

use serde::Serialize;
use serde_json::Value;

use crate::confidence::merge::{MergedConfidenceTree, MergedLeaf, MergedNode};
use crate::confidence::{ConfidenceLeaf, ConfidenceNode, ConfidenceTree};
use crate::document::Polygon;

/// Copy OCR evidence onto merged leaves, never overwriting what is set.
pub fn enrich_with_polygons(merged: &mut MergedConfidenceTree, ocr: &ConfidenceTree) {
    for (key, ocr_node) in &ocr.fields {
        if let Some((_, node)) = merged.fields.iter_mut().find(|(k, _)| k == key) {
            enrich_node(node, ocr_node);
        }
    }
}

fn enrich_node(merged: &mut MergedNode, ocr: &ConfidenceNode) {
    match (merged, ocr) {
        (MergedNode::Map(entries), ConfidenceNode::Map(ocr_entries)) => {
            for (key, ocr_child) in ocr_entries {
                if let Some((_, child)) = entries.iter_mut().find(|(k, _)| k == key) {
                    enrich_node(child, ocr_child);
                }
            }
        }
        (MergedNode::List(items), ConfidenceNode::List(ocr_items)) => {
            for (item, ocr_item) in items.iter_mut().zip(ocr_items) {
                enrich_node(item, ocr_item);
            }
        }
        (MergedNode::Leaf(leaf), ConfidenceNode::Leaf(ocr_leaf)) => copy_evidence(leaf, ocr_leaf),
        _ => {}
    }
}

fn copy_evidence(leaf: &mut MergedLeaf, ocr: &ConfidenceLeaf) {
    if leaf.combined_polygon.is_none() {
        leaf.combined_polygon = ocr.combined_polygon.clone();
    }
    if leaf.word_polygons.is_none() {
        leaf.word_polygons = Some(ocr.word_polygons.clone());
    }
    if leaf.word_details.is_none() {
        leaf.word_details = Some(ocr.word_details.clone());
    }
    if leaf.page_number.is_none() {
        leaf.page_number = ocr.page_number;
    }
    if leaf.page_numbers.is_none() {
        leaf.page_numbers = Some(ocr.page_numbers.clone());
    }
}

/// Resolve an index-aware dotted path such as `items.0.description`.
pub fn find_evidence<'a>(merged: &'a MergedConfidenceTree, path: &str) -> Option<&'a MergedLeaf> {
    let mut parts = path.split('.');
    let mut node = merged.get(parts.next()?)?;
    for part in parts {
        node = node.get(part)?;
    }
    match node {
        MergedNode::Leaf(leaf) => Some(leaf),
        _ => None,
    }
}

/// Where a field was found, for overlaying on the rendered page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldEvidence {
    pub field_path: String,
    pub value: Value,
    pub confidence: f64,
    pub page_number: Option<u32>,
    pub polygon: Option<Polygon>,
}

/// Every merged field with its location; fields never seen on a page have
/// no page or polygon.
pub fn collect_evidence(merged: &MergedConfidenceTree) -> Vec<FieldEvidence> {
    merged
        .leaves()
        .into_iter()
        .map(|(field_path, leaf)| FieldEvidence {
            field_path,
            value: leaf.value.clone(),
            confidence: leaf.confidence,
            page_number: leaf.page_number,
            polygon: leaf.combined_polygon.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::merge::{merge, MergeOptions};
    use crate::confidence::ocr::OcrConfidenceEvaluator;
    use crate::confidence::resolver::ScoreResolver;
    use crate::confidence::{build_tree, LeafEvaluator};
    use crate::document::{Line, NormalizedDocument, Page, Point, Span, Word};
    use serde_json::json;

    struct Half;

    impl LeafEvaluator for Half {
        fn evaluate_leaf(&mut self, field_path: &str, value: &Value) -> ConfidenceLeaf {
            ConfidenceLeaf::scored(field_path, value, Some(0.5))
        }
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon {
        vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    fn document() -> NormalizedDocument {
        let page = |number: u32, text: &str| Page {
            page_number: number,
            width: 100.0,
            height: 100.0,
            unit: None,
            lines: vec![Line {
                content: text.to_string(),
                span: Some(Span::new(0, text.len())),
                polygon: Some(rect(10.0, 20.0, 60.0, 30.0)),
            }],
            words: vec![Word {
                content: text.to_string(),
                span: Some(Span::new(0, text.len())),
                polygon: Some(rect(10.0, 20.0, 60.0, 30.0)),
                confidence: Some(0.9),
            }],
        };
        NormalizedDocument {
            pages: vec![page(1, "ACME"), page(2, "Widget")],
        }
    }

    fn merged_with_ocr(extracted: &Value) -> (MergedConfidenceTree, ConfidenceTree) {
        let evaluator: OcrConfidenceEvaluator = OcrConfidenceEvaluator::default();
        let ocr = evaluator.evaluate(extracted, &document());
        let llm = build_tree(extracted, &mut Half);
        let merged = merge(&ocr, &llm, &ScoreResolver::Min, MergeOptions::default());
        (merged, ocr)
    }

    #[test]
    fn test_enrich_copies_ocr_evidence() {
        let extracted = json!({"vendor": "ACME", "items": [{"name": "Widget"}]});
        let (mut merged, ocr) = merged_with_ocr(&extracted);
        enrich_with_polygons(&mut merged, &ocr);

        let vendor = find_evidence(&merged, "vendor").unwrap();
        assert_eq!(vendor.page_number, Some(1));
        assert_eq!(vendor.combined_polygon, Some(rect(0.1, 0.2, 0.6, 0.3)));

        let item = find_evidence(&merged, "items.0.name").unwrap();
        assert_eq!(item.page_number, Some(2));
        assert_eq!(item.page_numbers, Some(vec![2]));
    }

    #[test]
    fn test_enrich_never_overwrites() {
        let extracted = json!({"vendor": "ACME"});
        let (mut merged, ocr) = merged_with_ocr(&extracted);
        if let Some((_, MergedNode::Leaf(leaf))) = merged.fields.first_mut() {
            leaf.page_number = Some(7);
        }
        enrich_with_polygons(&mut merged, &ocr);
        assert_eq!(find_evidence(&merged, "vendor").unwrap().page_number, Some(7));
    }

    #[test]
    fn test_enrich_is_idempotent() {
        let extracted = json!({"vendor": "ACME", "missing": "nowhere", "items": [{"name": "Widget"}]});
        let (mut once, ocr) = merged_with_ocr(&extracted);
        enrich_with_polygons(&mut once, &ocr);
        let mut twice = once.clone();
        enrich_with_polygons(&mut twice, &ocr);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_find_evidence_bad_paths() {
        let (merged, _) = merged_with_ocr(&json!({"items": [{"name": "Widget"}]}));
        assert!(find_evidence(&merged, "items").is_none());
        assert!(find_evidence(&merged, "items.3.name").is_none());
        assert!(find_evidence(&merged, "items.x").is_none());
    }

    #[test]
    fn test_collect_evidence() {
        let extracted = json!({"vendor": "ACME", "missing": "nowhere"});
        let (mut merged, ocr) = merged_with_ocr(&extracted);
        enrich_with_polygons(&mut merged, &ocr);
        let evidence = collect_evidence(&merged);
        assert_eq!(evidence.len(), 2);
        assert_eq!(evidence[0].page_number, Some(1));
        assert!(evidence[1].polygon.is_none());
        assert_eq!(evidence[1].confidence, 0.0);
    }
}
