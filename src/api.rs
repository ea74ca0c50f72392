use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::db::Prospect;
use crate::pipeline::Pipeline;
use crate::sheets::SyncJob;

pub struct AppState {
    pub config: Config,
    /// `None` when Chrome failed to launch; scraping answers 500 until restart.
    pub pipeline: Option<Pipeline>,
    /// `None` when no sheet is configured.
    pub sync_job: Option<Arc<SyncJob>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Browser runtime is not available")]
    BrowserUnavailable,
    #[error("{0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("❌ {}", self);
        let body = MessageResponse {
            message: self.to_string(),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ScrapeParams {
    /// Free-text search query
    pub query: Option<String>,
    /// Searches "<default trade> <city>" when no query is given
    pub city: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncResponse {
    /// Data rows written, header excluded
    pub rows: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub browser: bool,
}

fn resolve_query(config: &Config, params: &ScrapeParams) -> String {
    let non_blank = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from);

    if let Some(query) = non_blank(&params.query) {
        return query;
    }
    if let Some(city) = non_blank(&params.city) {
        return format!("{} {}", config.default_trade, city);
    }
    config.default_query.clone()
}

async fn run_queries(state: &AppState, queries: Vec<String>) -> Result<Response, ApiError> {
    let pipeline = state.pipeline.as_ref().ok_or(ApiError::BrowserUnavailable)?;

    let report = pipeline.run(&queries).await;
    if report.hits == 0 {
        return Ok(Json(MessageResponse {
            message: "no sites found".to_string(),
        })
        .into_response());
    }

    Ok(Json(report.saved()).into_response())
}

#[utoipa::path(
    get,
    path = "/scrape",
    params(ScrapeParams),
    responses(
        (status = 200, description = "Prospects saved by this run, or a \"no sites found\" message", body = [Prospect]),
        (status = 500, description = "Browser runtime unavailable", body = MessageResponse)
    ),
    tag = "scrape"
)]
pub async fn scrape(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ScrapeParams>,
) -> Result<Response, ApiError> {
    let query = resolve_query(&state.config, &params);
    info!("📥 Scrape requested: {:?}", query);
    run_queries(&state, vec![query]).await
}

#[utoipa::path(
    get,
    path = "/scrape/cities",
    responses(
        (status = 200, description = "Prospects saved across every configured city", body = [Prospect]),
        (status = 500, description = "Browser runtime unavailable", body = MessageResponse)
    ),
    tag = "scrape"
)]
pub async fn scrape_cities(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let queries: Vec<String> = state
        .config
        .cities
        .iter()
        .map(|city| format!("{} {}", state.config.default_trade, city))
        .collect();
    info!("📥 Scrape requested for {} cities", queries.len());
    run_queries(&state, queries).await
}

#[utoipa::path(
    get,
    path = "/sync",
    responses(
        (status = 200, description = "Sheet replaced with every stored prospect", body = SyncResponse),
        (status = 500, description = "Sheet not configured or export failed", body = MessageResponse)
    ),
    tag = "sync"
)]
pub async fn sync(State(state): State<Arc<AppState>>) -> Result<Json<SyncResponse>, ApiError> {
    let job = state
        .sync_job
        .as_ref()
        .ok_or_else(|| ApiError::Internal("Sheet sync is not configured (SHEET_ID)".to_string()))?;

    let rows = job.run().await?;
    Ok(Json(SyncResponse { rows }))
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "health"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        browser: state.pipeline.is_some(),
    })
}

#[derive(OpenApi)]
#[openapi(
    paths(scrape, scrape_cities, sync, health),
    components(schemas(Prospect, MessageResponse, SyncResponse, HealthResponse)),
    tags(
        (name = "scrape", description = "Lead generation runs"),
        (name = "sync", description = "Spreadsheet export"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/scrape", get(scrape))
        .route("/scrape/cities", get(scrape_cities))
        .route("/sync", get(sync))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
