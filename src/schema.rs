//! Persisted document record and its partial-update patch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One uploaded document and where its processing artifacts live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    pub status: ProcessingStatus,
    pub source_url: String,
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(source_url: String, profile: String) -> Self {
        Self {
            id: format!("doc_{}", Uuid::new_v4().simple()),
            status: ProcessingStatus::Pending,
            source_url,
            profile,
            content_hash: None,
            confidence_url: None,
            comparison_url: None,
            overall_confidence: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// File name part of the source URL, used for content-type sniffing.
    pub fn filename(&self) -> &str {
        let path = self.source_url.split(['?', '#']).next().unwrap_or("");
        path.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("document")
    }

    /// Apply the set fields of `patch` and bump `updated_at`.
    pub fn apply(&mut self, patch: RecordPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if patch.content_hash.is_some() {
            self.content_hash = patch.content_hash;
        }
        if patch.confidence_url.is_some() {
            self.confidence_url = patch.confidence_url;
        }
        if patch.comparison_url.is_some() {
            self.comparison_url = patch.comparison_url;
        }
        if patch.overall_confidence.is_some() {
            self.overall_confidence = patch.overall_confidence;
        }
        if patch.error.is_some() {
            self.error = patch.error;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordPatch {
    pub fn status(status: ProcessingStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(ProcessingStatus::Failed),
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_pending() {
        let record = DocumentRecord::new("https://blob/inv/a.pdf".into(), "invoice".into());
        assert!(record.id.starts_with("doc_"));
        assert_eq!(record.status, ProcessingStatus::Pending);
        assert_eq!(record.filename(), "a.pdf");
    }

    #[test]
    fn test_filename_strips_query() {
        let record = DocumentRecord::new("https://blob/x/scan.png?sig=abc".into(), "invoice".into());
        assert_eq!(record.filename(), "scan.png");
        let bare = DocumentRecord::new("https://blob/".into(), "invoice".into());
        assert_eq!(bare.filename(), "document");
    }

    #[test]
    fn test_apply_patch_keeps_unset_fields() {
        let mut record = DocumentRecord::new("u".into(), "invoice".into());
        record.apply(RecordPatch {
            content_hash: Some("abc".into()),
            ..RecordPatch::status(ProcessingStatus::Processing)
        });
        record.apply(RecordPatch::failed("boom"));
        assert_eq!(record.status, ProcessingStatus::Failed);
        assert_eq!(record.content_hash.as_deref(), Some("abc"));
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = DocumentRecord::new("u".into(), "invoice".into());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "pending");
        assert!(value.get("sourceUrl").is_some());
        assert!(value.get("contentHash").is_none());
    }
}
