//! Normalizer for layout-analysis `analyzeResult` payloads.
//!
//! Polygons arrive as flat `[x1, y1, x2, y2, ...]` arrays in page units and
//! lines may carry several spans. Individual lines or words that do not parse
//! are dropped; only a payload without pages is rejected.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::document::{Line, NormalizedDocument, Page, Point, Polygon, Span, Word};
use crate::error::LayoutError;

#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(default)]
    content: String,
    #[serde(default)]
    polygon: Option<Vec<f64>>,
    #[serde(default)]
    spans: Vec<RawSpan>,
}

#[derive(Debug, Deserialize)]
struct RawWord {
    #[serde(default)]
    content: String,
    #[serde(default)]
    polygon: Option<Vec<f64>>,
    #[serde(default)]
    span: Option<RawSpan>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct RawSpan {
    offset: usize,
    length: usize,
}

/// Convert a raw analyze result (bare or wrapped in `{"analyzeResult": ...}`).
pub fn normalize(raw: &Value) -> Result<NormalizedDocument, LayoutError> {
    let result = raw.get("analyzeResult").unwrap_or(raw);
    let pages = result
        .get("pages")
        .and_then(Value::as_array)
        .ok_or(LayoutError::MissingPages)?;

    let mut dropped = 0usize;
    let mut normalized = Vec::with_capacity(pages.len());
    for (index, page) in pages.iter().enumerate() {
        let lines = nodes(page, "lines")
            .filter_map(|l| {
                let parsed = serde_json::from_value::<RawLine>(l.clone()).ok().map(to_line);
                dropped += parsed.is_none() as usize;
                parsed
            })
            .collect();
        let words = nodes(page, "words")
            .filter_map(|w| {
                let parsed = serde_json::from_value::<RawWord>(w.clone()).ok().map(to_word);
                dropped += parsed.is_none() as usize;
                parsed
            })
            .collect();

        let page_number = page
            .get("pageNumber")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(index as u32 + 1);
        normalized.push(Page {
            page_number,
            width: dimension(page, "width"),
            height: dimension(page, "height"),
            unit: page.get("unit").and_then(Value::as_str).map(str::to_string),
            lines,
            words,
        });
    }

    let document = NormalizedDocument { pages: normalized };
    debug!(
        "Normalized layout result: {} pages, {} words, {} malformed nodes dropped",
        document.page_count(),
        document.word_count(),
        dropped
    );
    Ok(document)
}

/// Array field of a page; anything other than an array reads as empty.
fn nodes<'a>(page: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    page.get(key)
        .and_then(Value::as_array)
        .map(|a| a.as_slice())
        .unwrap_or_default()
        .iter()
}

/// Finite page dimension, or 0 (unscaled) when missing or mistyped.
fn dimension(page: &Value, key: &str) -> f64 {
    page.get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Pair up flat coordinates; fewer than four points is no polygon.
fn to_polygon(flat: Option<Vec<f64>>) -> Option<Polygon> {
    let points: Polygon = flat?
        .chunks_exact(2)
        .map(|xy| Point::new(xy[0], xy[1]))
        .collect();
    (points.len() >= 4).then_some(points)
}

fn to_line(raw: RawLine) -> Line {
    let start = raw.spans.iter().map(|s| s.offset).min();
    let end = raw.spans.iter().map(|s| s.offset.saturating_add(s.length)).max();
    Line {
        content: raw.content,
        span: start.zip(end).map(|(s, e)| Span::new(s, e - s)),
        polygon: to_polygon(raw.polygon),
    }
}

fn to_word(raw: RawWord) -> Word {
    Word {
        content: raw.content,
        span: raw.span.map(|s| Span::new(s.offset, s.length)),
        polygon: to_polygon(raw.polygon),
        confidence: raw.confidence.map(|c| c.clamp(0.0, 1.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "status": "succeeded",
            "analyzeResult": {
                "content": "Invoice INV-1\nTotal 10.00",
                "pages": [{
                    "pageNumber": 1,
                    "width": 8.5,
                    "height": 11,
                    "unit": "inch",
                    "lines": [
                        {
                            "content": "Invoice INV-1",
                            "polygon": [1, 1, 3, 1, 3, 1.5, 1, 1.5],
                            "spans": [{"offset": 0, "length": 7}, {"offset": 8, "length": 5}]
                        },
                        {"content": "broken", "polygon": "nope"}
                    ],
                    "words": [
                        {"content": "Invoice", "polygon": [1, 1, 2, 1, 2, 1.5, 1, 1.5],
                         "span": {"offset": 0, "length": 7}, "confidence": 0.995},
                        {"content": "INV-1", "polygon": [2.1, 1, 3, 1, 3, 1.5, 2.1],
                         "span": {"offset": 8, "length": 5}, "confidence": 1.2}
                    ]
                }]
            }
        })
    }

    #[test]
    fn test_normalize_wrapped_result() {
        let doc = normalize(&sample()).unwrap();
        assert_eq!(doc.page_count(), 1);
        let page = &doc.pages[0];
        assert_eq!(page.width, 8.5);
        assert_eq!(page.unit.as_deref(), Some("inch"));
        assert_eq!(page.lines.len(), 1);
        assert_eq!(page.lines[0].span, Some(Span::new(0, 13)));
        assert_eq!(page.lines[0].polygon.as_ref().unwrap().len(), 4);
    }

    #[test]
    fn test_short_polygon_becomes_missing() {
        let doc = normalize(&sample()).unwrap();
        let word = &doc.pages[0].words[1];
        // Seven coordinates pair up into three points.
        assert!(word.polygon.is_none());
        assert_eq!(word.confidence, Some(1.0));
    }

    #[test]
    fn test_missing_pages_is_an_error() {
        let err = normalize(&json!({"analyzeResult": {"content": ""}})).unwrap_err();
        assert!(matches!(err, LayoutError::MissingPages));
    }

    #[test]
    fn test_malformed_page_fields_keep_other_pages() {
        let raw = json!({"pages": [
            {"pageNumber": 1, "lines": null, "words": "none", "width": "8.5", "height": null},
            {
                "pageNumber": 2,
                "width": 8.5,
                "height": 11,
                "lines": [{"content": "Total 10.00", "spans": [{"offset": 0, "length": 11}]}],
                "words": [{"content": "Total", "span": {"offset": 0, "length": 5}, "confidence": 0.9}]
            }
        ]});
        let doc = normalize(&raw).unwrap();
        assert_eq!(doc.page_count(), 2);
        assert!(doc.pages[0].lines.is_empty());
        assert!(doc.pages[0].words.is_empty());
        assert_eq!(doc.pages[0].width, 0.0);
        assert_eq!(doc.pages[1].page_number, 2);
        assert_eq!(doc.pages[1].lines[0].content, "Total 10.00");
        assert_eq!(doc.word_count(), 1);
    }

    #[test]
    fn test_line_span_end_saturates() {
        let raw = json!({"pages": [{
            "lines": [{"content": "x", "spans": [{"offset": usize::MAX, "length": 2}]}]
        }]});
        let doc = normalize(&raw).unwrap();
        assert_eq!(doc.pages[0].lines[0].span, Some(Span::new(usize::MAX, 0)));
    }

    #[test]
    fn test_page_number_defaults_to_position() {
        let doc = normalize(&json!({"pages": [{}, {"width": 100}]})).unwrap();
        assert_eq!(doc.pages[1].page_number, 2);
        assert!(doc.pages[0].lines.is_empty());
    }
}
