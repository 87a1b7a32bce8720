use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::artist::runner::{SharedToolCommandRunner, TokioToolCommandRunner};
use crate::artist::service::GenerationService;
use crate::config::{ArtistConfig, ConfigError};

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub generation: GenerationService,
}

impl AppState {
    pub fn new(generation: GenerationService) -> Self {
        Self {
            service_name: "artist-backend",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            generation,
        }
    }
}

pub fn generation_service_from_config(
    config: &ArtistConfig,
) -> Result<GenerationService, ConfigError> {
    let registry = Arc::new(config.build_registry()?);
    let runner: SharedToolCommandRunner =
        Arc::new(TokioToolCommandRunner::new(config.job_timeout()));
    Ok(GenerationService::new(
        registry,
        runner,
        config.generation_options(),
    ))
}

pub fn build_router(generation: GenerationService) -> Router {
    let state = AppState::new(generation);
    Router::new()
        .route("/health", get(health_handler))
        .route("/painting", post(crate::api::painting::painting_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, generation: GenerationService) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let versions = generation
        .registry()
        .versions()
        .iter()
        .map(|v| v.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let app = build_router(generation);
    info!(bind = %addr, tools = %versions, "starting artist-backend HTTP surface");
    axum::serve(listener, app).await
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let tools = state
        .generation
        .registry()
        .versions()
        .into_iter()
        .map(|v| v.as_str())
        .collect::<Vec<_>>();
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "tools": tools,
        })),
    )
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
