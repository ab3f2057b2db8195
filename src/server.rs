//! Operator-facing HTTP surface over the ingestion and sync pipeline.

use crate::ai_extract::AiExtractor;
use crate::config::Config;
use crate::dedup::{check_duplicate, DuplicateQuery};
use crate::error::IngestError;
use crate::fetcher::{Fetcher, ReqwestFetcher};
use crate::import::{ImportOptions, ImportOrchestrator};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::schema_org::SchemaOrgStatus;
use crate::sources::create_source;
use crate::storage::RecordStore;
use crate::sync::{SyncBatchParams, SyncField, SyncOrchestrator};
use crate::types::{CandidateEvent, ListingParams};
use crate::venue_match::{match_venue, VenueQuery};
use axum::{
    extract::ConnectInfo,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use chrono::{DateTime, Utc};
use hyper::Server;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RecordStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub import: ImportOrchestrator,
    pub sync: Arc<SyncOrchestrator>,
    pub limiter: RateLimiter,
    pub ai: AiExtractor,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RecordStore>) -> Self {
        let fetcher: Arc<dyn Fetcher> = Arc::new(ReqwestFetcher::new(&config.fetch));
        let import = ImportOrchestrator::new(store.clone(), config.matching.clone());
        let sync = Arc::new(SyncOrchestrator::new(
            store.clone(),
            fetcher.clone(),
            config.sync.workers,
        ));
        let limiter = RateLimiter::new(config.server.rate_limit_per_min);
        let ai = AiExtractor::new(config.ai.endpoint.clone());
        Self {
            store,
            fetcher,
            import,
            sync,
            limiter,
            ai,
            config,
        }
    }
}

fn error_response(e: &IngestError) -> Response {
    let status = match e {
        IngestError::Validation(_) | IngestError::MissingField(_) => StatusCode::BAD_REQUEST,
        IngestError::Fetch { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {e}");
    }
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

fn rate_limited(retry_after_secs: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after_secs.to_string())],
        Json(json!({
            "error": "rate limit exceeded, try again later",
            "retryAfterSeconds": retry_after_secs,
        })),
    )
        .into_response()
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "eventdir-ingest",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewRequest {
    source_id: String,
    limit: Option<usize>,
}

async fn preview_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<PreviewRequest>,
) -> Response {
    let Some(source) = create_source(&state.config, &request.source_id, state.fetcher.clone())
    else {
        return error_response(&IngestError::Validation(format!(
            "unknown source: {}",
            request.source_id
        )));
    };
    match state
        .import
        .preview(
            source.as_ref(),
            &ListingParams {
                limit: request.limit,
            },
        )
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportRequest {
    source_id: Option<String>,
    events: Vec<CandidateEvent>,
    venue_id: Option<Uuid>,
    promoter_id: Uuid,
    #[serde(default)]
    fetch_details: bool,
    #[serde(default)]
    update_existing: bool,
}

async fn import_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<ImportRequest>,
) -> Response {
    if request.events.is_empty() {
        return error_response(&IngestError::Validation(
            "no events selected for import".to_string(),
        ));
    }
    let source = request
        .source_id
        .as_deref()
        .and_then(|id| create_source(&state.config, id, state.fetcher.clone()));
    let options = ImportOptions {
        venue_id: request.venue_id,
        promoter_id: request.promoter_id,
        fetch_details: request.fetch_details,
        update_existing: request.update_existing,
    };
    // Partial failures live inside the outcome body; the call itself
    // succeeds even when zero of N imported.
    match state
        .import
        .import(source.as_deref(), request.events, &options)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn check_duplicate_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(query): Json<DuplicateQuery>,
) -> Response {
    if let RateDecision::Limited { retry_after_secs } =
        state.limiter.check(&addr.ip().to_string())
    {
        return rate_limited(retry_after_secs);
    }
    if query.is_empty() {
        return error_response(&IngestError::Validation(
            "provide sourceUrl, or name together with startDate".to_string(),
        ));
    }
    match check_duplicate(state.store.as_ref(), &state.config.matching, &query).await {
        Ok(verdict) => Json(verdict).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn match_venue_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(query): Json<VenueQuery>,
) -> Response {
    if let RateDecision::Limited { retry_after_secs } =
        state.limiter.check(&addr.ip().to_string())
    {
        return rate_limited(retry_after_secs);
    }
    if query.venue_name.trim().is_empty() {
        return error_response(&IngestError::Validation("venueName is required".to_string()));
    }
    match match_venue(state.store.as_ref(), &state.config.matching, &query).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn sync_batch_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(params): Json<SyncBatchParams>,
) -> Response {
    match state.sync.run_batch(params).await {
        Ok(output) => Json(output).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractRequest {
    url: String,
}

/// Best-effort AI extraction from an arbitrary event page. Always
/// HTTP 200: a degraded outcome tells the UI to fall back to manual
/// entry instead of surfacing a failure.
async fn extract_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<ExtractRequest>,
) -> Response {
    let outcome = match state.fetcher.fetch(&request.url).await {
        Ok(page) => {
            let text = crate::html::extract_text(&page.body);
            let metadata = crate::html::extract_metadata(&page.body);
            state.ai.extract(&text, &metadata).await
        }
        Err(e) => crate::ai_extract::Extraction::Degraded {
            reason: format!("could not fetch page: {e}"),
        },
    };
    Json(outcome).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SchemaOrgStats {
    total: usize,
    available: usize,
    not_found: usize,
    invalid: usize,
    error: usize,
    total_fetches: u64,
    last_fetched_at: Option<DateTime<Utc>>,
}

async fn schema_org_stats_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let records = match state.store.list_schema_org().await {
        Ok(records) => records,
        Err(e) => return error_response(&e),
    };
    let mut stats = SchemaOrgStats {
        total: records.len(),
        available: 0,
        not_found: 0,
        invalid: 0,
        error: 0,
        total_fetches: 0,
        last_fetched_at: None,
    };
    for record in &records {
        match record.status {
            SchemaOrgStatus::Available => stats.available += 1,
            SchemaOrgStatus::NotFound => stats.not_found += 1,
            SchemaOrgStatus::Invalid => stats.invalid += 1,
            SchemaOrgStatus::Error => stats.error += 1,
        }
        stats.total_fetches += u64::from(record.fetch_count);
        if stats
            .last_fetched_at
            .map(|latest| record.last_fetched_at > latest)
            .unwrap_or(true)
        {
            stats.last_fetched_at = Some(record.last_fetched_at);
        }
    }
    Json(stats).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiffRequest {
    event_id: Uuid,
}

async fn schema_org_diff_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<DiffRequest>,
) -> Response {
    match state.sync.diff_for_event(request.event_id).await {
        Ok(diffs) => Json(json!({ "eventId": request.event_id, "diffs": diffs })).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyRequest {
    event_id: Uuid,
    fields: Vec<SyncField>,
}

async fn schema_org_apply_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<ApplyRequest>,
) -> Response {
    if request.fields.is_empty() {
        return error_response(&IngestError::Validation(
            "no fields selected to apply".to_string(),
        ));
    }
    match state.sync.apply_fields(request.event_id, &request.fields).await {
        Ok(event) => Json(event).into_response(),
        Err(e) => error_response(&e),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/import/preview", post(preview_handler))
        .route("/api/import", post(import_handler))
        .route("/api/events/check-duplicate", post(check_duplicate_handler))
        .route("/api/venues/match", post(match_venue_handler))
        .route("/api/extract", post(extract_handler))
        .route("/api/schema-org/sync", post(sync_batch_handler))
        .route("/api/schema-org/stats", get(schema_org_stats_handler))
        .route("/api/schema-org/diff", post(schema_org_diff_handler))
        .route("/api/schema-org/apply", post(schema_org_apply_handler))
        .layer(ServiceBuilder::new().layer(cors).layer(Extension(state)))
}

pub async fn serve(state: Arc<AppState>, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(state);
    info!("Operator API listening on http://{addr}");
    Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;
    Ok(())
}
