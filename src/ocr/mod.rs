//! Layout-analysis provider abstraction.
//!
//! Defines the [`LayoutProvider`] trait so the OCR backend can be swapped
//! (a hosted layout service, a fixture in tests) while the confidence core
//! only ever sees a [`NormalizedDocument`].

pub mod analyze_result;
pub mod layout_client;

use crate::document::NormalizedDocument;

/// Raw document bytes handed to a layout provider.
pub struct OcrInput {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Async trait implemented by each layout-analysis backend.
#[async_trait::async_trait]
pub trait LayoutProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn analyze(&self, input: &OcrInput) -> anyhow::Result<NormalizedDocument>;
}

/// Guess a content type from the file extension.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
