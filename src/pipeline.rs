//! Document processing pipeline: layout analysis and structured extraction,
//! followed by the confidence reconciliation over both results.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::comparison::{flatten_to_comparison, ComparisonItem};
use crate::confidence::llm::{ByteTokenDecoder, LlmConfidenceEvaluator, TokenLogprob, TokenTextDecoder};
use crate::confidence::merge::{merge, MergedConfidenceTree};
use crate::confidence::ocr::OcrConfidenceEvaluator;
use crate::config::{EvaluationProfile, ProfileStore};
use crate::document::NormalizedDocument;
use crate::error::{LayoutError, PipelineError};
use crate::evidence::{collect_evidence, enrich_with_polygons, FieldEvidence};
use crate::llm::{Message, StructuredExtractor};
use crate::matcher::ContainmentMatcher;
use crate::ocr::{analyze_result, content_type_for, LayoutProvider, OcrInput};
use crate::schema::{ProcessingStatus, RecordPatch};
use crate::store::{BlobStore, RecordStore};

const MAX_DOCUMENT_CHARS: usize = 150_000;

const EXTRACTION_INSTRUCTIONS: &str = "Based on the document above, fill in every field of the \
response schema. Copy values exactly as they appear in the document text.";

/// Reconciled result for one document.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub confidence: MergedConfidenceTree,
    pub comparison: Vec<ComparisonItem>,
    pub evidence: Vec<FieldEvidence>,
}

/// Run both confidence evaluators over already-fetched inputs and reconcile them.
///
/// Without a decoder the LLM side contributes no scores and the result rests
/// on the OCR evidence alone.
pub fn evaluate_document(
    document: &NormalizedDocument,
    extracted: &Value,
    generated_text: &str,
    logprobs: &[TokenLogprob],
    decoder: Option<&dyn TokenTextDecoder>,
    profile: &EvaluationProfile,
) -> EvaluationReport {
    let ocr_tree = OcrConfidenceEvaluator::new(profile.score_resolver, ContainmentMatcher)
        .evaluate(extracted, document);
    let llm_tree = LlmConfidenceEvaluator::new().evaluate(extracted, generated_text, logprobs, decoder);

    let mut confidence = merge(&ocr_tree, &llm_tree, &profile.score_resolver, profile.merge);
    enrich_with_polygons(&mut confidence, &ocr_tree);

    let comparison = flatten_to_comparison(extracted, &confidence, profile.confidence_threshold);
    let evidence = collect_evidence(&confidence);

    info!(
        "Evaluated {} fields with profile {}: overall {:.3} (ocr {:.3}, llm {:.3}), {} at zero",
        confidence.total_evaluated_fields_count,
        profile.name,
        confidence.overall_confidence,
        ocr_tree.overall,
        llm_tree.overall,
        confidence.zero_confidence_fields_count
    );

    EvaluationReport {
        confidence,
        comparison,
        evidence,
    }
}

/// Body of an evaluation over inputs the caller already has.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    #[serde(default)]
    pub document: Option<NormalizedDocument>,
    /// Raw layout-analysis output, used when `document` is absent.
    #[serde(default)]
    pub analyze_result: Option<Value>,
    pub extracted: Value,
    #[serde(default)]
    pub generated_text: String,
    #[serde(default)]
    pub logprobs: Vec<TokenLogprob>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// Resolve the profile and document of `request`, then evaluate it.
///
/// A request without token log-probabilities is evaluated on OCR evidence only.
pub fn evaluate_request(
    request: EvaluateRequest,
    profiles: &ProfileStore,
) -> Result<EvaluationReport, PipelineError> {
    let mut profile = profiles
        .resolve(request.profile.as_deref())
        .ok_or_else(|| PipelineError::UnknownProfile(request.profile.clone().unwrap_or_default()))?;
    if let Some(threshold) = request.threshold {
        profile.confidence_threshold = threshold;
    }

    let document = match (request.document, request.analyze_result) {
        (Some(document), _) => document,
        (None, Some(raw)) => analyze_result::normalize(&raw)?,
        (None, None) => return Err(LayoutError::MissingPages.into()),
    };

    let decoder: Option<&dyn TokenTextDecoder> = if request.logprobs.is_empty() {
        None
    } else {
        Some(&ByteTokenDecoder)
    };

    Ok(evaluate_document(
        &document,
        &request.extracted,
        &request.generated_text,
        &request.logprobs,
        decoder,
        &profile,
    ))
}

/// Summary of a successful processing run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOutcome {
    pub id: String,
    pub content_hash: String,
    pub confidence_url: String,
    pub comparison_url: String,
    pub overall_confidence: f64,
    pub total_evaluated_fields_count: usize,
}

/// Pipeline orchestrator.
pub struct Pipeline {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    ocr: Arc<dyn LayoutProvider>,
    llm: Arc<dyn StructuredExtractor>,
    profiles: Arc<ProfileStore>,
}

impl Pipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
        ocr: Arc<dyn LayoutProvider>,
        llm: Arc<dyn StructuredExtractor>,
        profiles: Arc<ProfileStore>,
    ) -> Self {
        Self {
            blobs,
            records,
            ocr,
            llm,
            profiles,
        }
    }

    /// Process one stored document end to end.
    ///
    /// On failure the record is marked `Failed` with the error message and the
    /// error is returned.
    pub async fn process(&self, id: &str) -> Result<ProcessingOutcome, PipelineError> {
        match self.run(id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Processing {} failed: {}", id, e);
                if let Err(write_err) = self.records.write_record(id, RecordPatch::failed(e.to_string())).await {
                    warn!("Could not mark {} as failed: {}", id, write_err);
                }
                Err(e)
            }
        }
    }

    async fn run(&self, id: &str) -> Result<ProcessingOutcome, PipelineError> {
        let record = self.records.read_record(id).await?;
        let profile = self
            .profiles
            .get(&record.profile)
            .ok_or_else(|| PipelineError::UnknownProfile(record.profile.clone()))?;

        self.records
            .write_record(id, RecordPatch::status(ProcessingStatus::Processing))
            .await?;

        let data = self.blobs.download(&record.source_url).await?;
        let content_hash = {
            let mut hasher = Sha256::new();
            hasher.update(&data);
            format!("{:x}", hasher.finalize())
        };
        let filename = record.filename().to_string();
        let mime = content_type_for(&filename);
        info!(
            "Processing {} ({}, {} bytes, provider={}) with profile {}",
            id,
            filename,
            data.len(),
            self.ocr.name(),
            profile.name
        );

        // Images go to the model alongside the OCR text.
        let image = mime.starts_with("image/").then(|| data.clone());
        let document = self
            .ocr
            .analyze(&OcrInput { filename, data })
            .await
            .map_err(PipelineError::Ocr)?;

        let messages = build_messages(&profile, &document, image.as_deref().map(|d| (mime, d)));
        let completion = self
            .llm
            .extract(messages, &profile.name, profile.json_schema.clone())
            .await
            .map_err(PipelineError::Llm)?;

        let report = evaluate_document(
            &document,
            &completion.extracted,
            &completion.generated_text,
            &completion.logprobs,
            Some(&ByteTokenDecoder),
            &profile,
        );

        let confidence_url = self
            .blobs
            .upload_json(&format!("{}/confidence.json", id), &serde_json::to_value(&report.confidence)?)
            .await?;
        let comparison_url = self
            .blobs
            .upload_json(&format!("{}/comparison.json", id), &serde_json::to_value(&report.comparison)?)
            .await?;

        let overall_confidence = report.confidence.overall_confidence;
        self.records
            .write_record(
                id,
                RecordPatch {
                    status: Some(ProcessingStatus::Completed),
                    content_hash: Some(content_hash.clone()),
                    confidence_url: Some(confidence_url.clone()),
                    comparison_url: Some(comparison_url.clone()),
                    overall_confidence: Some(overall_confidence),
                    error: None,
                },
            )
            .await?;

        info!("Processing complete: {} (overall {:.3})", id, overall_confidence);
        Ok(ProcessingOutcome {
            id: id.to_string(),
            content_hash,
            confidence_url,
            comparison_url,
            overall_confidence,
            total_evaluated_fields_count: report.confidence.total_evaluated_fields_count,
        })
    }
}

/// Profile prompt plus the full document in the system message, instructions
/// (and the page image, if any) in the user message.
fn build_messages(
    profile: &EvaluationProfile,
    document: &NormalizedDocument,
    image: Option<(&str, &[u8])>,
) -> Vec<Message> {
    let text = document_text(document);
    debug!("Document text for extraction: {} chars", text.len());

    let system_prompt = format!(
        "{}\n\n--- DOCUMENT START (pages 1-{}) ---\n\n{}\n\n--- DOCUMENT END ---",
        profile.prompt,
        document.page_count(),
        truncate_for_context(&text, MAX_DOCUMENT_CHARS)
    );

    let user = match image {
        Some((mime, data)) => Message::user_with_image(EXTRACTION_INSTRUCTIONS, mime, data),
        None => Message::user(EXTRACTION_INSTRUCTIONS),
    };
    vec![Message::system(system_prompt), user]
}

/// OCR lines of every page, with page markers.
fn document_text(document: &NormalizedDocument) -> String {
    document
        .pages
        .iter()
        .map(|p| {
            let lines: Vec<&str> = p.lines.iter().map(|l| l.content.as_str()).collect();
            format!("--- Page {} ---\n{}", p.page_number, lines.join("\n"))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate_for_context(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        text
    } else {
        let mut end = max_chars;
        while !text.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        &text[..end]
    }
}
