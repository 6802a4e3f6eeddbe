//! OCR-side confidence: how well the page itself supports each value.

use serde_json::Value;
use tracing::debug;

use super::resolver::{Resolver, ScoreResolver};
use super::{build_tree, ConfidenceLeaf, ConfidenceTree, LeafEvaluator, WordDetail};
use crate::document::{bounding_rectangle, NormalizedDocument};
use crate::lines::{extract_lines, EnrichedLine};
use crate::matcher::{
    find_matching_lines, normalize_text, normalize_word, value_as_text, ContainmentMatcher,
    TextMatcher,
};

pub struct OcrConfidenceEvaluator<R = ScoreResolver, M = ContainmentMatcher> {
    resolver: R,
    matcher: M,
}

impl Default for OcrConfidenceEvaluator {
    fn default() -> Self {
        Self::new(ScoreResolver::Min, ContainmentMatcher)
    }
}

impl<R: Resolver, M: TextMatcher> OcrConfidenceEvaluator<R, M> {
    pub fn new(resolver: R, matcher: M) -> Self {
        Self { resolver, matcher }
    }

    /// Score every scalar of `extracted` against the document's OCR lines.
    pub fn evaluate(&self, extracted: &Value, document: &NormalizedDocument) -> ConfidenceTree {
        let lines = extract_lines(document, &self.resolver);
        let mut leaf_eval = OcrLeafEvaluator {
            lines: &lines,
            resolver: &self.resolver,
            matcher: &self.matcher,
        };
        let tree = build_tree(extracted, &mut leaf_eval);
        debug!(
            "OCR confidence: {} fields, overall {:.3}",
            tree.leaves().len(),
            tree.overall
        );
        tree
    }
}

struct OcrLeafEvaluator<'a> {
    lines: &'a [EnrichedLine],
    resolver: &'a dyn Resolver,
    matcher: &'a dyn TextMatcher,
}

impl LeafEvaluator for OcrLeafEvaluator<'_> {
    fn evaluate_leaf(&mut self, field_path: &str, value: &Value) -> ConfidenceLeaf {
        let matched = find_matching_lines(value, self.lines, self.matcher);
        let mut leaf = ConfidenceLeaf::scored(field_path, value, Some(0.0));
        if matched.is_empty() {
            return leaf;
        }

        let scores: Vec<f64> = matched.iter().filter_map(|l| l.confidence).collect();
        leaf.confidence = Some(self.resolver.resolve(&scores).unwrap_or(0.0));
        leaf.matching_lines_count = matched.len();
        leaf.normalized_polygons = matched.iter().map(|l| l.normalized_polygon.clone()).collect();

        let text = value_as_text(value).unwrap_or_default();
        let value_norm = normalize_text(&text);
        let tokens: Vec<String> = text.split(' ').map(normalize_word).collect();

        for line in &matched {
            for word in &line.contained_words {
                let (Some(polygon), Some(confidence)) = (word.polygon.as_ref(), word.confidence)
                else {
                    continue;
                };
                let content = normalize_word(&word.content);
                if content.is_empty() {
                    continue;
                }
                if tokens.iter().any(|t| *t == content) || value_norm.contains(&content) {
                    let normalized = line.normalize(polygon);
                    leaf.word_polygons.push(normalized.clone());
                    leaf.word_details.push(WordDetail {
                        content: word.content.clone(),
                        confidence,
                        polygon: normalized,
                        page_number: line.page_number,
                    });
                }
            }
        }

        leaf.combined_polygon = bounding_rectangle(&leaf.word_polygons);

        let mut pages: Vec<u32> = matched.iter().map(|l| l.page_number).collect();
        pages.sort_unstable();
        pages.dedup();
        leaf.page_number = pages.first().copied();
        leaf.page_numbers = pages;
        leaf
    }
}
