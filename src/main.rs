mod config;
mod extract;
mod generation;
mod http;
mod jobs;
mod llm;
mod metrics;
mod models;
mod pipeline;
mod pricing;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use extract::{PriceQuote, ProductRecord, StrategyReport};
use generation::{CategoryRun, GenerationRun};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, BatchRequest, BatchResponse, DescribeRequest, ExtractRequest, ItemRequest,
    ItemResponse, QuoteRequest, SelectCategoryRequest,
};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use serde::Serialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "lister.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let pipeline = Pipeline::from_env();
    info!(
        target = "lister.config",
        output_dir = %pipeline.config.output_dir.display(),
        models = ?pipeline.config.generation.models,
        categories = pipeline.config.categories.len(),
        credential = ?pipeline.config.credential,
        "pipeline configured"
    );
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
    let app = build_app(AppState::new(pipeline, queue, prometheus_handle));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "lister.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

impl AppState {
    fn new(pipeline: Pipeline, queue: jobs::JobQueue, prometheus_handle: PrometheusHandle) -> Self {
        let openapi = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or_else(|_| json!({"openapi": "3.0.3"}));
        Self {
            pipeline,
            queue,
            openapi: Arc::new(openapi),
            prometheus_handle,
        }
    }
}

fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/products", post(create_product))
        .route("/batches", post(create_batch))
        .nest(
            "/stages",
            Router::new()
                .route("/extract", post(stage_extract))
                .route("/describe", post(stage_describe))
                .route("/select_category", post(stage_select_category))
                .route("/quote", post(stage_quote)),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/batches", post(enqueue_batch_job))
                .route("/{id}", get(get_job_status)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

/// Health and readiness check.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "lister-api-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY")
        && header_value(&headers, "X-Docs-Key") != key
    {
        return Err(AppError::Unauthorized);
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Lister API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY")
        && header_value(&headers, "X-Metrics-Key") != secret
    {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Extract and enrich one product.
///
/// - Method: `POST`
/// - Path: `/products`
/// - Body: `ItemRequest`
/// - Response: `ItemResponse` (record + per-stage transcript)
async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<ItemRequest>,
) -> Result<Json<ItemResponse>, AppError> {
    crate::metrics::inc_requests("/products");
    info!(target = "lister.api", source = %payload.source, "product pipeline invoked");
    let response = state.pipeline.run_item(payload).await?;
    Ok(Json(response))
}

/// Run a batch synchronously. Items that fail are listed under `skipped`.
async fn create_batch(
    State(state): State<AppState>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    crate::metrics::inc_requests("/batches");
    ensure_sources(&payload)?;
    Ok(Json(state.pipeline.run_batch(payload).await))
}

fn ensure_sources(payload: &BatchRequest) -> Result<(), AppError> {
    if payload.sources.entries().is_empty() {
        return Err(PipelineError::invalid_input("batch", "no sources provided").into());
    }
    Ok(())
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    NotFound(&'static str),
    Unauthorized,
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_batch_job(
    State(state): State<AppState>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/batches");
    ensure_sources(&payload)?;
    let id = state
        .queue
        .enqueue_batch(payload)
        .await
        .map_err(|err| AppError::Pipeline(PipelineError::internal("enqueue", err.error)))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(PipelineError::invalid_input("jobs", "invalid_job_id").into());
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("job"))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, payload)
            }
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: "not_found".into(),
                    detail: Some(format!("{what} not found")),
                },
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: "unauthorized".into(),
                    detail: None,
                },
            ),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

// -------- Stage endpoints (manual granular control) --------

#[derive(Debug, Serialize)]
struct ExtractResponse {
    record: ProductRecord,
    strategies: Vec<StrategyReport>,
}

async fn stage_extract(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, AppError> {
    crate::metrics::inc_requests("/stages/extract");
    let (record, strategies) = state.pipeline.stage_extract(&req.source).await?;
    Ok(Json(ExtractResponse { record, strategies }))
}

async fn stage_describe(
    State(state): State<AppState>,
    Json(req): Json<DescribeRequest>,
) -> Result<Json<GenerationRun>, AppError> {
    crate::metrics::inc_requests("/stages/describe");
    let run = state
        .pipeline
        .stage_describe(
            &req.title,
            req.image_path.as_deref(),
            req.instructions.as_deref(),
            req.api_key.as_deref(),
        )
        .await?;
    Ok(Json(run))
}

async fn stage_select_category(
    State(state): State<AppState>,
    Json(req): Json<SelectCategoryRequest>,
) -> Result<Json<CategoryRun>, AppError> {
    crate::metrics::inc_requests("/stages/select_category");
    let run = state
        .pipeline
        .stage_select_category(&req.title, req.categories.as_deref(), req.api_key.as_deref())
        .await?;
    Ok(Json(run))
}

async fn stage_quote(
    State(state): State<AppState>,
    Json(req): Json<QuoteRequest>,
) -> Json<PriceQuote> {
    crate::metrics::inc_requests("/stages/quote");
    Json(
        state
            .pipeline
            .stage_quote(req.price_krw, req.weight_raw.as_deref(), req.weight_kg),
    )
}
