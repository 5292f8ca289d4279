// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Web dashboard: JSON API, one HTML page and a live event feed

pub mod browse;

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use minijinja::{context, Environment};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::db::{FileMoveRecord, LogQuery, LogStats, LogStore, MoveStatus};
use crate::organizer::{Organizer, OrganizeSummary, LAST_ORGANIZE_RUN};
use crate::service::{WatchHandle, WatchStatus, LAST_WATCH_START};
use crate::{Result, TidyError};

use browse::{DirectoryListing, DiskUsage, FileEntry};

const INDEX_TEMPLATE: &str = include_str!("templates/index.html");

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 1000;
const DEFAULT_RECENT_FILES: usize = 10;

/// Shared application state
pub struct AppState {
    pub store: LogStore,
    pub config: AppConfig,
    pub organizer: Arc<Organizer>,
    pub watch: WatchHandle,
    templates: Environment<'static>,
}

impl AppState {
    pub fn new(store: LogStore, config: AppConfig, organizer: Arc<Organizer>, watch: WatchHandle) -> Result<Self> {
        let mut templates = Environment::new();
        templates
            .add_template("index.html", INDEX_TEMPLATE)
            .map_err(|e| TidyError::Server(format!("dashboard template: {}", e)))?;
        templates.add_filter("filesizeformat", filesizeformat);
        Ok(Self {
            store,
            config,
            organizer,
            watch,
            templates,
        })
    }
}

/// Human-readable byte count for the dashboard, e.g. `1.5 MB`
pub fn filesizeformat(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    if bytes.abs() < 1024.0 {
        return format!("{} bytes", bytes as i64);
    }
    let mut value = bytes / 1024.0;
    let mut unit = 0;
    while value.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Error body returned by every API handler
pub struct ApiError(TidyError);

impl From<TidyError> for ApiError {
    fn from(err: TidyError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TidyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            TidyError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// `Query` whose rejections come back as the usual JSON error body
pub struct ApiQuery<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        Query::<T>::try_from_uri(&parts.uri)
            .map(|Query(value)| ApiQuery(value))
            .map_err(|rejection| ApiError(TidyError::InvalidRequest(rejection.body_text())))
    }
}

/// Run blocking filesystem or database work off the async workers
async fn blocking<T, F>(work: F) -> std::result::Result<T, ApiError>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| TidyError::Server(format!("worker task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// Create the web application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/api/status", get(api_status))
        .route("/api/stats", get(api_stats))
        .route("/api/files", get(api_files))
        .route("/api/logs", get(api_logs))
        .route("/api/recent-files", get(api_recent_files))
        .route("/api/organize", post(api_organize))
        .route("/api/categories", get(api_categories))
        .route("/api/settings", get(api_settings))
        .route("/api/settings/:key", put(api_put_setting))
        .route("/api/events", get(api_events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// === Page Handlers ===

async fn index_page(State(state): State<Arc<AppState>>) -> std::result::Result<Html<String>, ApiError> {
    let store = state.store.clone();
    let (stats, recent) = blocking(move || Ok((store.stats()?, store.recent(10)?))).await?;

    let html = state
        .templates
        .get_template("index.html")
        .and_then(|tpl| {
            tpl.render(context! {
                stats => stats,
                recent => recent,
                categories => state.config.categories,
                status => state.watch.status(),
                organized_folder => state.organizer.organized_root().display().to_string(),
            })
        })
        .map_err(|e| TidyError::Server(format!("render failed: {}", e)))?;
    Ok(Html(html))
}

// === API Handlers ===

#[derive(Serialize)]
struct DatabaseHealth {
    healthy: bool,
    records: Option<i64>,
    error: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    watcher: WatchStatus,
    organized_folder: String,
    database: DatabaseHealth,
    last_organize_run: Option<serde_json::Value>,
    last_watch_start: Option<serde_json::Value>,
}

async fn api_status(State(state): State<Arc<AppState>>) -> ApiResult<StatusResponse> {
    let store = state.store.clone();
    let (database, last_organize_run, last_watch_start) = blocking(move || {
        let database = match store.ping().and_then(|_| store.count()) {
            Ok(records) => DatabaseHealth {
                healthy: true,
                records: Some(records),
                error: None,
            },
            Err(e) => DatabaseHealth {
                healthy: false,
                records: None,
                error: Some(e.to_string()),
            },
        };
        let last_run = store.get_setting(LAST_ORGANIZE_RUN).unwrap_or(None);
        let last_start = store.get_setting(LAST_WATCH_START).unwrap_or(None);
        Ok((database, last_run, last_start))
    })
    .await?;

    Ok(Json(StatusResponse {
        watcher: state.watch.status(),
        organized_folder: state.organizer.organized_root().display().to_string(),
        database,
        last_organize_run,
        last_watch_start,
    }))
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    log: LogStats,
    storage: DiskUsage,
}

async fn api_stats(State(state): State<Arc<AppState>>) -> ApiResult<StatsResponse> {
    let store = state.store.clone();
    let root = state.organizer.organized_root().to_path_buf();
    let response = blocking(move || {
        Ok(StatsResponse {
            log: store.stats()?,
            storage: browse::disk_usage(&root),
        })
    })
    .await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
struct FilesQuery {
    #[serde(default)]
    path: String,
}

async fn api_files(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<FilesQuery>,
) -> ApiResult<DirectoryListing> {
    let root = state.organizer.organized_root().to_path_buf();
    let listing = blocking(move || browse::list_directory(&root, &query.path)).await?;
    Ok(Json(listing))
}

#[derive(Serialize)]
struct LogsResponse {
    logs: Vec<FileMoveRecord>,
}

async fn api_logs(
    State(state): State<Arc<AppState>>,
    ApiQuery(mut query): ApiQuery<LogQuery>,
) -> ApiResult<LogsResponse> {
    query.limit = Some(query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT));
    let store = state.store.clone();
    let logs = blocking(move || store.query(&query)).await?;
    Ok(Json(LogsResponse { logs }))
}

#[derive(Deserialize)]
struct RecentFilesQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct RecentFilesResponse {
    files: Vec<FileEntry>,
}

/// Newest organized files that still exist; falls back to file times when the log has none
async fn api_recent_files(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<RecentFilesQuery>,
) -> ApiResult<RecentFilesResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_FILES).min(MAX_LOG_LIMIT);
    let store = state.store.clone();
    let root = state.organizer.organized_root().to_path_buf();

    let files = blocking(move || {
        let logged = store.query(&LogQuery {
            status: Some(MoveStatus::Success),
            limit: Some(MAX_LOG_LIMIT),
            ..LogQuery::default()
        })?;
        let files: Vec<FileEntry> = logged
            .iter()
            .filter_map(|record| record.destination_path.as_deref())
            .filter_map(|dest| browse::existing_file(&root, std::path::Path::new(dest)))
            .take(limit)
            .collect();
        if files.is_empty() {
            return Ok(browse::recent_files(&root, limit));
        }
        Ok(files)
    })
    .await?;
    Ok(Json(RecentFilesResponse { files }))
}

#[derive(Debug, Default, Deserialize)]
struct OrganizeRequest {
    folder: Option<PathBuf>,
}

#[derive(Serialize)]
struct OrganizeResponse {
    success: bool,
    #[serde(flatten)]
    summary: OrganizeSummary,
}

async fn api_organize(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<OrganizeResponse> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        OrganizeRequest::default()
    } else {
        serde_json::from_slice::<OrganizeRequest>(&body)
            .map_err(|e| TidyError::InvalidRequest(format!("invalid organize request: {}", e)))?
    };
    info!("Organize requested for {:?}", request.folder);

    let organizer = Arc::clone(&state.organizer);
    let summary = blocking(move || organizer.organize_existing(request.folder.as_deref())).await?;
    Ok(Json(OrganizeResponse { success: true, summary }))
}

#[derive(Serialize)]
struct CategoryResponse {
    name: String,
    extensions: Vec<String>,
}

async fn api_categories(State(state): State<Arc<AppState>>) -> Json<Vec<CategoryResponse>> {
    let mut categories: Vec<_> = state
        .config
        .categories
        .iter()
        .map(|rule| CategoryResponse {
            name: rule.name.clone(),
            extensions: rule.extensions.clone(),
        })
        .collect();
    categories.push(CategoryResponse {
        name: crate::rules::FALLBACK_CATEGORY.to_string(),
        extensions: Vec::new(),
    });
    Json(categories)
}

async fn api_settings(State(state): State<Arc<AppState>>) -> ApiResult<BTreeMap<String, serde_json::Value>> {
    let store = state.store.clone();
    Ok(Json(blocking(move || store.get_settings()).await?))
}

async fn api_put_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(value): Json<serde_json::Value>,
) -> ApiResult<serde_json::Value> {
    if key.trim().is_empty() {
        return Err(TidyError::InvalidRequest("setting key must not be empty".to_string()).into());
    }
    let store = state.store.clone();
    let stored = value.clone();
    let name = key.clone();
    blocking(move || store.set_setting(&name, &stored)).await?;
    Ok(Json(serde_json::json!({ "key": key, "value": value })))
}

async fn api_events(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let events = state.organizer.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, events))
}

/// Push each organize record to the client until either side goes away
async fn stream_events(mut socket: WebSocket, mut events: broadcast::Receiver<FileMoveRecord>) {
    debug!("Live feed client connected");
    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            record = events.recv() => match record {
                Ok(record) => {
                    let text = match serde_json::to_string(&record) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!("Could not encode live event: {}", e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Live feed client fell behind, {} events dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("Live feed client disconnected");
}

/// Serve the dashboard until `shutdown` flips to true
pub async fn start_server(state: Arc<AppState>, addr: SocketAddr, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Dashboard available at http://{}", listener.local_addr()?);

    let router = create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| TidyError::Server(format!("Server error: {}", e)))?;

    info!("Dashboard stopped");
    Ok(())
}
