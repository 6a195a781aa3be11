//! HTTP tool server.
//!
//! | Method | Path | Body / result |
//! |--------|------|---------------|
//! | `GET`  | `/tools/list` | `{ "tools": [ToolInfo] }` |
//! | `POST` | `/tools/{name}` | JSON parameters → `{ "result": ... }` |
//! | `GET`  | `/health` | version, tool count, knowledge-base root, vector backend |
//!
//! A tool that hits a recoverable problem (missing file, unreachable index)
//! still answers `200`; the problem is in `result.status`. Only requests the
//! server cannot route or run produce an error body:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "missing required parameter: path" } }
//! ```
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::sync::SyncEngine;
use crate::tools::{validate_params, ToolContext, ToolInfo, ToolRegistry};

#[derive(Clone)]
struct ServerState {
    ctx: ToolContext,
    registry: Arc<ToolRegistry>,
}

/// Build the router without binding, so it can be served or tested.
pub fn router(engine: Arc<SyncEngine>, registry: Arc<ToolRegistry>) -> Router {
    let state = ServerState {
        ctx: ToolContext::new(engine),
        registry,
    };

    Router::new()
        .route("/tools/list", get(list_tools))
        .route("/tools/{name}", post(call_tool))
        .route("/health", get(health))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve the built-in tools on `[server].bind` until the process exits.
pub async fn run_server(engine: Arc<SyncEngine>) -> anyhow::Result<()> {
    let bind_addr = engine.config().server.bind.clone();
    let registry = Arc::new(ToolRegistry::with_builtins());

    for tool in registry.tools() {
        tracing::info!(tool = tool.name(), "registered");
    }

    let app = router(engine, registry);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("kbsync tool server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Errors ============

#[derive(Debug)]
enum ApiError {
    InvalidParams(String),
    UnknownTool(String),
    ToolFailed { tool: String, message: String },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownTool(_) => StatusCode::NOT_FOUND,
            ApiError::ToolFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidParams(_) => "bad_request",
            ApiError::UnknownTool(_) => "not_found",
            ApiError::ToolFailed { .. } => "tool_error",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::InvalidParams(m) => m.clone(),
            ApiError::UnknownTool(name) => format!("no tool registered with name: {}", name),
            ApiError::ToolFailed { tool, message } => format!("{}: {}", tool, message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": { "code": self.code(), "message": self.message() }
        });
        (self.status(), Json(body)).into_response()
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    tools: usize,
    kb_root: String,
    vector_index: String,
}

async fn health(State(state): State<ServerState>) -> Json<Health> {
    let engine = state.ctx.engine();
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tools: state.registry.len(),
        kb_root: engine.config().kb.root.display().to_string(),
        vector_index: engine.index().name().to_string(),
    })
}

#[derive(Serialize)]
struct ToolList {
    tools: Vec<ToolInfo>,
}

async fn list_tools(State(state): State<ServerState>) -> Json<ToolList> {
    Json(ToolList {
        tools: state.registry.infos(),
    })
}

async fn call_tool(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let tool = state
        .registry
        .find(&name)
        .ok_or_else(|| ApiError::UnknownTool(name.clone()))?;

    let params = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| ApiError::InvalidParams(e.to_string()))?;

    let result = tool
        .execute(params, &state.ctx)
        .await
        .map_err(|e| ApiError::ToolFailed {
            tool: name.clone(),
            message: format!("{:#}", e),
        })?;

    tracing::info!(
        tool = %name,
        status = result.get("status").and_then(serde_json::Value::as_str).unwrap_or("-"),
        "tool call"
    );
    Ok(Json(json!({ "result": result })))
}
