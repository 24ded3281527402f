//! HTTP API gateway for Delve.
//!
//! Exposes the research endpoint, health checks, and the v1 history and
//! usage API.
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use delve_config::AppConfig;
use delve_core::{CollaboratorError, ResearchRequest};
use delve_history::TraceLog;
use delve_research::{PipelineError, ResearchPipeline, ResearchResponse};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub pipeline: Arc<ResearchPipeline>,
    pub log: Arc<TraceLog>,
}

impl GatewayState {
    pub fn new(pipeline: Arc<ResearchPipeline>) -> Self {
        let log = pipeline.log().clone();
        Self { pipeline, log }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - CORS for GET/POST/DELETE with JSON bodies
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/research", post(research_handler))
        .route("/research/", post(research_handler))
        .nest("/v1", api_v1::v1_router())
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    if !config.has_api_key() {
        info!("No agent API key configured; research requests will be sent unauthenticated");
    }

    let pipeline = Arc::new(ResearchPipeline::from_config(&config)?);
    let state = Arc::new(GatewayState::new(pipeline));
    let app = build_router(state);

    info!(
        addr = %addr,
        traces = %config.traces_path().display(),
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
}

async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Research API",
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) detail: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            detail: detail.into(),
        }),
    )
}

async fn research_handler(
    State(state): State<SharedState>,
    Json(request): Json<ResearchRequest>,
) -> Result<Json<ResearchResponse>, ApiError> {
    info!(
        tool = %request.tool_name,
        species = request.species.as_deref().unwrap_or("-"),
        "Research request received"
    );

    match state.pipeline.run(&request).await {
        // The report job keeps running in the background.
        Ok(run) => Ok(Json(run.response)),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!(error = %e, "Research request failed");
            }
            Err(api_error(status, e.to_string()))
        }
    }
}

fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::EmptyQuery => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::NoResult(_) => StatusCode::BAD_REQUEST,
        PipelineError::Collaborator(CollaboratorError::UnknownTool(_)) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
