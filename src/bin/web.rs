//! aigent HTTP 接口
//!
//! 启动: cargo run --bin aigent-web --features web
//! 事件流: curl -N http://127.0.0.1:8080/api/events?client_id=me

#![cfg(feature = "web")]

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use aigent::broker::EventBroker;
use aigent::core::{create_engine_builder, Engine};
use aigent::retrieval::InMemoryRetriever;
use aigent::tools::{ToolExecutor, ToolInfo};

struct AppState {
    engine: Arc<Engine>,
    tools: Arc<ToolExecutor>,
    retriever: Arc<InMemoryRetriever>,
    broker: EventBroker,
}

type ApiError = (StatusCode, String);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    aigent::observability::init();

    let config_path = std::env::var("AIGENT_CONFIG").ok().map(PathBuf::from);
    let components = create_engine_builder(config_path)?.build()?;
    let bind_addr = components.config.server.bind_addr.clone();

    let state = Arc::new(AppState {
        engine: components.engine,
        tools: components.tools,
        retriever: components.retriever,
        broker: components.broker,
    });

    let app = Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/agent/status", get(api_agent_status))
        .route("/api/agent/execute", post(api_agent_execute))
        .route("/api/tools", get(api_tools_list))
        .route("/api/documents", post(api_documents_add))
        .route("/api/events", get(api_events))
        .with_state(Arc::clone(&state));

    tracing::info!("aigent web: http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.broker.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    clients: usize,
    client_ids: Vec<String>,
}

/// GET /api/agent/status：当前订阅者
async fn api_agent_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let client_ids = state.broker.client_ids().await;
    Json(StatusResponse {
        clients: client_ids.len(),
        client_ids,
    })
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    query: String,
}

#[derive(Debug, Serialize)]
struct ExecuteResponse {
    accepted: bool,
    query: String,
}

/// POST /api/agent/execute：后台运行，进度与结果通过 /api/events 推送
async fn api_agent_execute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<ExecuteResponse>), ApiError> {
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "query must not be empty".to_string()));
    }
    let engine = Arc::clone(&state.engine);
    let goal = query.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.execute(&goal).await {
            tracing::warn!(kind = e.kind(), error = %e, "background run failed");
        }
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(ExecuteResponse {
            accepted: true,
            query,
        }),
    ))
}

/// GET /api/tools：已注册工具
async fn api_tools_list(State(state): State<Arc<AppState>>) -> Json<Vec<ToolInfo>> {
    Json(state.tools.tool_infos())
}

#[derive(Debug, Deserialize)]
struct DocumentRequest {
    id: String,
    content: String,
}

/// POST /api/documents：向内存检索后端添加（或替换）文档
async fn api_documents_add(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DocumentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "id must not be empty".to_string()));
    }
    state
        .retriever
        .add_document(req.id.clone(), req.content)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({
        "id": req.id,
        "documents": state.retriever.len(),
    })))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    client_id: Option<String>,
}

/// GET /api/events：事件流；对端断开时 body 被丢弃，订阅随之注销
async fn api_events(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    let client_id = q
        .client_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("client_{}", uuid::Uuid::new_v4().simple()));
    let subscription = state
        .broker
        .subscribe(client_id)
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    let body = subscription
        .into_stream(state.broker.config().keep_alive)
        .map(|frame| Ok::<String, Infallible>(frame.to_string()));
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
