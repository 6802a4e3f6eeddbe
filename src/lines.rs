//! Line extraction: attaches contained words, a line confidence and a
//! page-normalized polygon to every OCR line.

use serde::Serialize;
use tracing::debug;

use crate::confidence::resolver::Resolver;
use crate::document::{NormalizedDocument, Polygon, Span, Word};

/// An OCR line with its derived attributes, computed once per evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedLine {
    pub content: String,
    pub span: Span,
    pub page_number: u32,
    #[serde(skip)]
    pub page_width: f64,
    #[serde(skip)]
    pub page_height: f64,
    /// `None` when no scored word lies inside the line.
    pub confidence: Option<f64>,
    pub contained_words: Vec<Word>,
    pub polygon: Polygon,
    pub normalized_polygon: Polygon,
}

impl EnrichedLine {
    /// Normalize a page-unit polygon using this line's page dimensions.
    pub fn normalize(&self, polygon: &[crate::document::Point]) -> Polygon {
        crate::document::normalize_polygon(polygon, self.page_width, self.page_height)
    }
}

/// Extract every usable line of every page, in page then line order.
///
/// Lines missing a span or polygon are skipped, as are words missing a span,
/// polygon or confidence.
pub fn extract_lines(document: &NormalizedDocument, resolver: &dyn Resolver) -> Vec<EnrichedLine> {
    let mut result = Vec::new();
    let mut skipped = 0usize;

    for page in &document.pages {
        for line in &page.lines {
            let (Some(span), Some(polygon)) = (line.span, line.polygon.as_ref()) else {
                skipped += 1;
                continue;
            };

            let contained_words: Vec<Word> = page
                .words
                .iter()
                .filter(|w| w.polygon.is_some() && w.confidence.is_some())
                .filter(|w| w.span.map(|s| span.contains(&s)).unwrap_or(false))
                .cloned()
                .collect();

            let scores: Vec<f64> = contained_words
                .iter()
                .filter_map(|w| w.confidence)
                .collect();

            result.push(EnrichedLine {
                content: line.content.clone(),
                span,
                page_number: page.page_number,
                page_width: page.width,
                page_height: page.height,
                confidence: resolver.resolve(&scores),
                contained_words,
                polygon: polygon.clone(),
                normalized_polygon: page.normalize_polygon(polygon),
            });
        }
    }

    debug!(
        "Extracted {} lines from {} pages ({} skipped)",
        result.len(),
        document.pages.len(),
        skipped
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::resolver::ScoreResolver;
    use crate::document::{Line, Page, Point};

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon {
        vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    fn word(content: &str, offset: usize, confidence: f64) -> Word {
        Word {
            content: content.to_string(),
            span: Some(Span::new(offset, content.len())),
            polygon: Some(rect(offset as f64, 0.0, (offset + content.len()) as f64, 10.0)),
            confidence: Some(confidence),
        }
    }

    fn sample_document() -> NormalizedDocument {
        NormalizedDocument {
            pages: vec![Page {
                page_number: 1,
                width: 100.0,
                height: 200.0,
                unit: Some("pixel".to_string()),
                lines: vec![
                    Line {
                        content: "Invoice INV-1".to_string(),
                        span: Some(Span::new(0, 13)),
                        polygon: Some(rect(0.0, 0.0, 50.0, 20.0)),
                    },
                    Line {
                        content: "Total 10.00".to_string(),
                        span: Some(Span::new(14, 11)),
                        polygon: Some(rect(0.0, 30.0, 50.0, 40.0)),
                    },
                    Line {
                        content: "no span".to_string(),
                        span: None,
                        polygon: Some(rect(0.0, 0.0, 1.0, 1.0)),
                    },
                ],
                words: vec![
                    word("Invoice", 0, 0.99),
                    word("INV-1", 8, 0.8),
                    word("Total", 14, 0.95),
                    Word {
                        content: "10.00".to_string(),
                        span: Some(Span::new(20, 5)),
                        polygon: None,
                        confidence: Some(0.1),
                    },
                ],
            }],
        }
    }

    #[test]
    fn test_contained_words_and_min_confidence() {
        let lines = extract_lines(&sample_document(), &ScoreResolver::Min);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].contained_words.len(), 2);
        assert_eq!(lines[0].confidence, Some(0.8));
        assert_eq!(lines[0].page_number, 1);
    }

    #[test]
    fn test_malformed_word_is_excluded() {
        let lines = extract_lines(&sample_document(), &ScoreResolver::Min);
        // "10.00" has no polygon, so only "Total" scores the line.
        assert_eq!(lines[1].contained_words.len(), 1);
        assert_eq!(lines[1].confidence, Some(0.95));
    }

    #[test]
    fn test_normalized_polygon() {
        let lines = extract_lines(&sample_document(), &ScoreResolver::Min);
        assert_eq!(lines[0].normalized_polygon[2], Point::new(0.5, 0.1));
    }

    #[test]
    fn test_line_without_words_has_no_confidence() {
        let mut doc = sample_document();
        doc.pages[0].words.clear();
        let lines = extract_lines(&doc, &ScoreResolver::Min);
        assert!(lines.iter().all(|l| l.confidence.is_none()));
    }

    #[test]
    fn test_overflowing_word_span_is_not_contained() {
        let mut doc = sample_document();
        let huge: Word = serde_json::from_value(serde_json::json!({
            "content": "??",
            "span": {"offset": 18446744073709551615u64, "length": 2},
            "polygon": [{"x": 0.0, "y": 0.0}, {"x": 1.0, "y": 0.0}, {"x": 1.0, "y": 1.0}, {"x": 0.0, "y": 1.0}],
            "confidence": 0.01
        }))
        .unwrap();
        doc.pages[0].words.push(huge);

        let lines = extract_lines(&doc, &ScoreResolver::Min);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].confidence, Some(0.8));
        assert_eq!(lines[1].confidence, Some(0.95));
    }
}
