use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::pipeline::RagPipeline;

// Request struct
#[derive(Debug, Deserialize)]
pub struct PipeRequest {
    pub user_message: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub body: Value,
}

// App state
pub struct AppState {
    pub pipeline: RagPipeline,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/pipe", post(pipe))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(pipeline: RagPipeline, addr: SocketAddr) -> Result<()> {
    let state = Arc::new(AppState { pipeline });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "on_startup: milvus pipeline listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("on_shutdown: milvus pipeline stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "collections": state.pipeline.collections(),
    }))
}

// Handler for the hosted pipeline
async fn pipe(State(state): State<Arc<AppState>>, Json(payload): Json<PipeRequest>) -> Response {
    if let Some(user) = payload.body.get("user") {
        info!(
            name = user.get("name").and_then(serde_json::Value::as_str).unwrap_or_default(),
            id = user.get("id").and_then(serde_json::Value::as_str).unwrap_or_default(),
            message = %payload.user_message,
            "pipe request from user"
        );
    }
    if let Some(model_id) = &payload.model_id {
        info!(model_id = %model_id, history = payload.messages.len(), "pipe");
    }

    match state.pipeline.answer(&payload.user_message).await {
        Ok(answer) => Json(answer).into_response(),
        Err(e) => {
            error!(error = %format!("{e:#}"), "pipeline failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": format!("{e:#}") })),
            )
                .into_response()
        }
    }
}
