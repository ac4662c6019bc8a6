//! Axum HTTP surface for the fetcher directory service.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fetchdir_core::{Fetcher, FetcherPatch, FetcherSchedule, NewFetcher, NewFetcherSchedule};
use fetchdir_store::{FetcherStore, SortSpec, StoreError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "fetchdir-web";

#[derive(Clone)]
pub struct AppState {
    pub store: FetcherStore,
}

impl AppState {
    pub fn new(store: FetcherStore) -> Self {
        Self { store }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://fetchdir.db".to_string()),
            port: std::env::var("FETCHDIR_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// Wrapper that renders store failures as `{"detail": ...}` bodies with the
/// matching status code.
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::Validation(_) => StatusCode::BAD_REQUEST,
            StoreError::FetcherNotFound(_)
            | StoreError::FetcherNotFoundByName(_)
            | StoreError::ScheduleNotFound(_) => StatusCode::NOT_FOUND,
            StoreError::ConfnameTaken(_) => StatusCode::CONFLICT,
            StoreError::Database(_) | StoreError::Migrate(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                detail: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct BatchIds {
    ids: Vec<i64>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/fetcher/", get(list_fetchers).post(create_fetcher))
        .route(
            "/fetcher/{id}/",
            get(get_fetcher)
                .put(replace_fetcher)
                .patch(patch_fetcher)
                .delete(delete_fetcher),
        )
        .route("/fetcher/{id}/restart/", post(restart_fetcher))
        .route("/fetcher:activate/", post(activate_fetchers))
        .route("/fetcher:deactivate/", post(deactivate_fetchers))
        .route("/fetcher:delete/", post(delete_fetchers))
        .route("/fetcher:restart/", post(restart_fetchers))
        .route("/fetcherschedule/", get(list_schedules).post(create_schedule))
        .route(
            "/fetcherschedule/{id}/",
            get(get_schedule).put(replace_schedule).delete(delete_schedule),
        )
        .with_state(state)
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    let store = FetcherStore::connect(&config.database_url).await?;
    store.migrate().await?;
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "fetcher directory listening");
    axum::serve(listener, app(AppState::new(store))).await?;
    Ok(())
}

async fn create_fetcher(
    State(state): State<AppState>,
    Json(new): Json<NewFetcher>,
) -> ApiResult<(StatusCode, Json<Fetcher>)> {
    let fetcher = state.store.create_fetcher(&new).await?;
    Ok((StatusCode::CREATED, Json(fetcher)))
}

async fn list_fetchers(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<Fetcher>>> {
    let order = order_specs_from_query(&params)?;
    Ok(Json(state.store.list_fetchers(&order).await?))
}

/// Collect sort tokens from every `order_by` query parameter; each parameter
/// value may itself carry a comma-separated token list.
fn order_specs_from_query(params: &[(String, String)]) -> Result<Vec<SortSpec>, StoreError> {
    let mut specs = Vec::new();
    for (key, value) in params {
        if key != "order_by" {
            continue;
        }
        for token in value.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            specs.push(SortSpec::parse(token)?);
        }
    }
    Ok(specs)
}

async fn get_fetcher(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Fetcher>> {
    Ok(Json(state.store.get_fetcher(id).await?))
}

async fn replace_fetcher(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(new): Json<NewFetcher>,
) -> ApiResult<Json<Fetcher>> {
    Ok(Json(state.store.replace_fetcher(id, &new).await?))
}

async fn patch_fetcher(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<FetcherPatch>,
) -> ApiResult<Json<Fetcher>> {
    Ok(Json(state.store.patch_fetcher(id, patch).await?))
}

async fn delete_fetcher(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Fetcher>> {
    Ok(Json(state.store.delete_fetcher(id).await?))
}

/// Restart stub: verifies the fetcher exists, performs no further effect.
async fn restart_fetcher(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<String>> {
    let fetcher = state.store.get_fetcher(id).await?;
    debug!(id, confname = %fetcher.confname, "restart requested");
    Ok(Json(format!(
        "Successfully restarted fetcher '{}'.",
        fetcher.confname
    )))
}

async fn activate_fetchers(
    State(state): State<AppState>,
    Json(batch): Json<BatchIds>,
) -> ApiResult<StatusCode> {
    state.store.batch_set_active(&batch.ids, true).await?;
    Ok(StatusCode::OK)
}

async fn deactivate_fetchers(
    State(state): State<AppState>,
    Json(batch): Json<BatchIds>,
) -> ApiResult<StatusCode> {
    state.store.batch_set_active(&batch.ids, false).await?;
    Ok(StatusCode::OK)
}

async fn delete_fetchers(
    State(state): State<AppState>,
    Json(batch): Json<BatchIds>,
) -> ApiResult<StatusCode> {
    state.store.batch_delete(&batch.ids).await?;
    Ok(StatusCode::OK)
}

/// Batch restart stub: nonexistent and inactive entries are ignored silently,
/// matching the other batch calls; no effect is performed yet.
async fn restart_fetchers(
    State(_state): State<AppState>,
    Json(batch): Json<BatchIds>,
) -> ApiResult<StatusCode> {
    debug!(requested = batch.ids.len(), "batch restart accepted");
    Ok(StatusCode::OK)
}

async fn create_schedule(
    State(state): State<AppState>,
    Json(new): Json<NewFetcherSchedule>,
) -> ApiResult<(StatusCode, Json<FetcherSchedule>)> {
    let schedule = state.store.create_schedule(&new).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

async fn list_schedules(State(state): State<AppState>) -> ApiResult<Json<Vec<FetcherSchedule>>> {
    Ok(Json(state.store.list_schedules().await?))
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<FetcherSchedule>> {
    Ok(Json(state.store.get_schedule(id).await?))
}

async fn replace_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(new): Json<NewFetcherSchedule>,
) -> ApiResult<Json<FetcherSchedule>> {
    Ok(Json(state.store.replace_schedule(id, &new).await?))
}

async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<FetcherSchedule>> {
    Ok(Json(state.store.delete_schedule(id).await?))
}
