//! HTTP server for running and sharing snippets
//!
//! Routes:
//! - `POST /run` `{code, input?}` runs the program and answers `{output}` or `{error}`
//! - `POST /save` `{code}` stores a snippet and answers `{id}`
//! - `GET /code/:id` answers `{code}`
//! - `GET /health` reports the runtime and run counters

use crate::config::ServerConfig;
use crate::error::ApiError;
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use snipbox_sandbox::{RunCoordinator, RunRequest, RunResult};
use snipbox_store::{SnippetId, SnippetStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct AppState {
    coordinator: Arc<RunCoordinator>,
    store: Arc<dyn SnippetStore>,
}

impl AppState {
    pub fn new(coordinator: Arc<RunCoordinator>, store: Arc<dyn SnippetStore>) -> Self {
        Self { coordinator, store }
    }

    pub fn coordinator(&self) -> &Arc<RunCoordinator> {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<dyn SnippetStore> {
        &self.store
    }
}

#[derive(Debug, Deserialize)]
struct RunBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    input: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SaveBody {
    #[serde(default)]
    code: Option<String>,
}

/// Create the HTTP router
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/run", post(handle_run))
        .route("/save", post(handle_save))
        .route("/code/:id", get(handle_fetch))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors_layer(config.allowed_origin.as_deref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the browser client: one configured origin, or any when unset
pub fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    match allowed_origin {
        None => cors.allow_origin(Any),
        Some(origin) => match HeaderValue::from_str(origin) {
            Ok(origin) => cors.allow_origin(origin),
            Err(_) => {
                warn!("Ignoring unusable CORS origin {:?}", origin);
                cors
            }
        },
    }
}

/// Serve `app` on `listener` until `shutdown` resolves
pub async fn start_server<F>(listener: tokio::net::TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_addr = listener
        .local_addr()
        .context("Failed to obtain HTTP server bind address")?;
    info!("Starting HTTP server on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;

    info!("HTTP server stopped");
    Ok(())
}

/// Handle POST /run
async fn handle_run(
    State(state): State<AppState>,
    Json(body): Json<RunBody>,
) -> Result<Json<Value>, ApiError> {
    let request = RunRequest::new(body.code.unwrap_or_default())
        .with_stdin(body.input.unwrap_or_default());

    let body = match state.coordinator.handle_run(request).await? {
        RunResult::Success { stdout } => json!({ "output": stdout }),
        RunResult::Failure { stderr, .. } => json!({ "error": stderr }),
        RunResult::TimedOut => json!({
            "error": timeout_message(state.coordinator.limits().timeout)
        }),
        RunResult::SystemError { message } => return Err(ApiError::Internal(message)),
    };
    Ok(Json(body))
}

/// Handle POST /save
async fn handle_save(
    State(state): State<AppState>,
    Json(body): Json<SaveBody>,
) -> Result<Json<Value>, ApiError> {
    let snippet = state.store.save(body.code.unwrap_or_default()).await?;
    debug!(id = %snippet.id, "Snippet shared");
    Ok(Json(json!({ "id": snippet.id })))
}

/// Handle GET /code/:id
async fn handle_fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = SnippetId::parse(&id).ok_or(ApiError::NotFound)?;
    let snippet = state.store.fetch(&id).await?;
    Ok(Json(json!({ "code": snippet.source })))
}

/// Handle GET /health
async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "runtime": state.coordinator.runtime_name(),
        "max_concurrent_runs": state.coordinator.max_concurrent_runs(),
        "stats": state.coordinator.stats(),
        "store": state.store.name(),
        "snippets": state.store.len().await,
    }))
}

/// Error text reported for a run killed at `timeout`
pub fn timeout_message(timeout: Duration) -> String {
    format!("Execution timed out after {} seconds", format_seconds(timeout))
}

fn format_seconds(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.1}", duration.as_secs_f64())
    }
}
