//! Invoice Evidence - reconciles OCR and LLM extraction into per-field
//! confidence with page evidence.

mod comparison;
mod confidence;
mod config;
mod document;
mod error;
mod evidence;
mod lines;
mod llm;
mod matcher;
mod ocr;
mod pipeline;
mod schema;
mod store;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use confidence::merge::MergedLeaf;
use config::{AppConfig, EvaluationProfile, ProfileStore};
use error::{PipelineError, StoreError};
use llm::ChatClient;
use ocr::layout_client::LayoutClient;
use pipeline::{EvaluateRequest, EvaluationReport, Pipeline, ProcessingOutcome};
use schema::DocumentRecord;
use store::{MemoryStore, RecordStore};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    profiles: Arc<ProfileStore>,
    store: MemoryStore,
    pipeline: Option<Arc<Pipeline>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "invoice_evidence=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    let profiles = Arc::new(ProfileStore::load_or_default(std::path::Path::new(
        &config.profiles_dir,
    ))?);
    info!("Loaded {} profiles: {:?}", profiles.list().len(), profiles.list());

    let store = MemoryStore::new();
    let pipeline = match (config.layout.clone(), config.llm.clone()) {
        (Some(layout), Some(llm)) => {
            let client = reqwest::Client::new();
            info!("Layout and LLM clients initialized (model={})", llm.model);
            Some(Arc::new(Pipeline::new(
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                Arc::new(LayoutClient::new(client.clone(), layout)),
                Arc::new(ChatClient::new(client, llm)),
                profiles.clone(),
            )))
        }
        _ => None,
    };

    let state = AppState {
        profiles,
        store,
        pipeline,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/profiles", get(list_profiles))
        .route("/profiles/:name", get(get_profile))
        .route("/evaluate", post(evaluate))
        .route("/documents", post(create_document))
        .route("/documents/:id", get(get_document))
        .route("/documents/:id/confidence", get(get_confidence))
        .route("/documents/:id/process", post(process_document))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// List available profiles.
async fn list_profiles(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.profiles.list())
}

/// Get a specific profile.
async fn get_profile(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<EvaluationProfile>, StatusCode> {
    state.profiles.get(&name).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(serde::Deserialize)]
struct EvaluateQuery {
    format: Option<String>,
    /// Dotted field path, e.g. `items.0.amount`.
    field: Option<String>,
}

/// Evaluate already-extracted data against an OCR result.
///
/// `?format=csv` returns only the comparison table; `?field=path` returns the
/// evidence of a single field.
async fn evaluate(
    State(state): State<AppState>,
    Query(query): Query<EvaluateQuery>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Response, (StatusCode, String)> {
    let report = pipeline::evaluate_request(request, &state.profiles).map_err(error_response)?;

    if let Some(path) = query.field.as_deref() {
        return lookup_field(&report, path).map(|leaf| Json(leaf).into_response());
    }

    match query.format.as_deref() {
        Some("csv") => {
            let csv = comparison::to_csv(&report.comparison).map_err(|e| {
                error!("CSV export failed: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("CSV export failed: {}", e))
            })?;
            Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], csv).into_response())
        }
        _ => Ok(Json(report).into_response()),
    }
}

fn lookup_field(report: &EvaluationReport, path: &str) -> Result<MergedLeaf, (StatusCode, String)> {
    evidence::find_evidence(&report.confidence, path)
        .cloned()
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("No evaluated field at {}", path)))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDocument {
    source_url: String,
    profile: Option<String>,
    /// Inline file content, stored under `source_url`.
    content_base64: Option<String>,
}

/// Register a document for processing.
async fn create_document(
    State(state): State<AppState>,
    Json(body): Json<CreateDocument>,
) -> Result<Json<DocumentRecord>, (StatusCode, String)> {
    let profile = body.profile.unwrap_or_else(|| "invoice".to_string());
    if state.profiles.get(&profile).is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Unknown profile: {}. Available: {:?}", profile, state.profiles.list()),
        ));
    }

    if let Some(content) = body.content_base64 {
        let data = BASE64
            .decode(content.as_bytes())
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid base64 content: {}", e)))?;
        state
            .store
            .put_blob(&body.source_url, data)
            .map_err(|e| error_response(e.into()))?;
    }

    let record = state
        .store
        .insert_record(DocumentRecord::new(body.source_url, profile))
        .map_err(|e| error_response(e.into()))?;
    info!("Registered document {} ({})", record.id, record.source_url);
    Ok(Json(record))
}

/// Get a document record by ID.
async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentRecord>, (StatusCode, String)> {
    state
        .store
        .read_record(&id)
        .await
        .map(Json)
        .map_err(|e| error_response(e.into()))
}

/// Get the stored confidence tree of a processed document.
async fn get_confidence(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, String)> {
    stored_confidence(&state.store, &id).await.map(Json)
}

async fn stored_confidence(store: &MemoryStore, id: &str) -> Result<Value, (StatusCode, String)> {
    let record = store
        .read_record(id)
        .await
        .map_err(|e| error_response(e.into()))?;
    let url = record.confidence_url.ok_or_else(|| {
        (
            StatusCode::CONFLICT,
            format!("Document {} has not been processed ({:?})", id, record.status),
        )
    })?;
    store
        .get_json(&url)
        .ok_or_else(|| error_response(StoreError::BlobNotFound(url.clone()).into()))
}

/// Run the full pipeline for a registered document.
async fn process_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProcessingOutcome>, (StatusCode, String)> {
    let pipeline = state.pipeline.as_ref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Layout and LLM services are not configured".to_string(),
        )
    })?;
    pipeline.process(&id).await.map(Json).map_err(error_response)
}

fn error_response(e: PipelineError) -> (StatusCode, String) {
    let status = match &e {
        PipelineError::UnknownProfile(_) | PipelineError::Layout(_) => StatusCode::BAD_REQUEST,
        PipelineError::Store(StoreError::RecordNotFound(_) | StoreError::BlobNotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        PipelineError::Ocr(_) | PipelineError::Llm(_) => StatusCode::BAD_GATEWAY,
        PipelineError::Store(StoreError::Backend(_)) | PipelineError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::BlobStore;

    #[test]
    fn test_error_status_mapping() {
        let (status, _) = error_response(PipelineError::UnknownProfile("x".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, message) =
            error_response(StoreError::RecordNotFound("doc_1".into()).into());
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(message, "record not found: doc_1");

        let (status, _) = error_response(PipelineError::Llm(anyhow::anyhow!("timeout")));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_lookup_field() {
        let request: EvaluateRequest = serde_json::from_value(serde_json::json!({
            "document": {"pages": []},
            "extracted": {"invoiceId": "INV-1", "items": [{"amount": 5}]}
        }))
        .unwrap();
        let profiles = ProfileStore::from_profiles(vec![config::default_invoice_profile()]);
        let report = pipeline::evaluate_request(request, &profiles).unwrap();

        let leaf = lookup_field(&report, "items.0.amount").unwrap();
        assert_eq!(leaf.value, serde_json::json!(5));
        assert_eq!(leaf.confidence, 0.0);

        let (status, _) = lookup_field(&report, "items.1.amount").unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stored_confidence() {
        let store = MemoryStore::new();
        let record = store
            .insert_record(DocumentRecord::new("u".into(), "invoice".into()))
            .unwrap();

        let (status, _) = stored_confidence(&store, &record.id).await.unwrap_err();
        assert_eq!(status, StatusCode::CONFLICT);

        let url = store
            .upload_json("doc/confidence.json", &serde_json::json!({"overallConfidence": 0.9}))
            .await
            .unwrap();
        store
            .write_record(
                &record.id,
                schema::RecordPatch {
                    confidence_url: Some(url),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let tree = stored_confidence(&store, &record.id).await.unwrap();
        assert_eq!(tree["overallConfidence"], 0.9);

        let (status, _) = stored_confidence(&store, "doc_missing").await.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
