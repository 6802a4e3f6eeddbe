//! Normalized document model produced from layout-analysis output.
//!
//! Pages own their lines and words. Every optional field may be missing in
//! real OCR payloads; consumers skip what they cannot use instead of failing.

use serde::{Deserialize, Serialize};

/// A single (x, y) coordinate, in page units or normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Ordered list of points describing a region.
pub type Polygon = Vec<Point>;

/// Character offset + length into the document's text stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
}

impl Span {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset, saturating at `usize::MAX`.
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.length)
    }

    /// True if `other` lies fully within this span.
    pub fn contains(&self, other: &Span) -> bool {
        other.offset >= self.offset && other.end() <= self.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub span: Option<Span>,
    #[serde(default)]
    pub polygon: Option<Polygon>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub span: Option<Span>,
    #[serde(default)]
    pub polygon: Option<Polygon>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// 1-indexed.
    pub page_number: u32,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub lines: Vec<Line>,
    #[serde(default)]
    pub words: Vec<Word>,
}

impl Page {
    /// Scale a page-unit polygon into `[0, 1]` page space, rounded to 3 decimals.
    ///
    /// Non-positive dimensions leave coordinates unscaled.
    pub fn normalize_polygon(&self, polygon: &[Point]) -> Polygon {
        normalize_polygon(polygon, self.width, self.height)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    #[serde(default)]
    pub pages: Vec<Page>,
}

impl NormalizedDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn word_count(&self) -> usize {
        self.pages.iter().map(|p| p.words.len()).sum()
    }
}

/// Round to 3 decimal places.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

pub fn normalize_polygon(polygon: &[Point], width: f64, height: f64) -> Polygon {
    let sx = if width > 0.0 { width } else { 1.0 };
    let sy = if height > 0.0 { height } else { 1.0 };
    polygon
        .iter()
        .map(|p| Point::new(round3(p.x / sx), round3(p.y / sy)))
        .collect()
}

/// Axis-aligned bounding rectangle (TL, TR, BR, BL) over all points of all polygons.
pub fn bounding_rectangle<'a, I>(polygons: I) -> Option<Polygon>
where
    I: IntoIterator<Item = &'a Polygon>,
{
    let mut bounds: Option<(f64, f64, f64, f64)> = None;
    for point in polygons.into_iter().flatten() {
        bounds = Some(match bounds {
            None => (point.x, point.y, point.x, point.y),
            Some((min_x, min_y, max_x, max_y)) => (
                min_x.min(point.x),
                min_y.min(point.y),
                max_x.max(point.x),
                max_y.max(point.y),
            ),
        });
    }

    bounds.map(|(min_x, min_y, max_x, max_y)| {
        let (min_x, min_y, max_x, max_y) =
            (round3(min_x), round3(min_y), round3(max_x), round3(max_y));
        vec![
            Point::new(min_x, min_y),
            Point::new(max_x, min_y),
            Point::new(max_x, max_y),
            Point::new(min_x, max_y),
        ]
    })
}
