//! HTTP 路由
//!
//! - `POST /quiz`：校验凭证后受理链路，立即返回
//! - `GET /`：存活检查
//! - `GET /health`：配置是否完整 + 会话统计
//! - `GET /sessions/:id`：单个会话的当前 / 最终状态

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::orchestrator::SessionDispatcher;

/// 路由共享状态
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<Config>,
    pub dispatcher: SessionDispatcher,
}

/// `POST /quiz` 请求体
#[derive(Debug, Deserialize)]
pub struct QuizRequest {
    pub email: String,
    pub secret: String,
    pub url: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/quiz", post(start_quiz))
        .route("/sessions/:id", get(session_status))
        .with_state(state)
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

async fn start_quiz(State(state): State<ApiState>, body: Bytes) -> Response {
    let value: JsonValue = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            warn!("⚠️ 收到无效的 JSON 请求体");
            return detail(StatusCode::BAD_REQUEST, "Invalid JSON payload");
        }
    };
    let request: QuizRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            warn!("⚠️ 请求结构不合法: {}", e);
            return detail(StatusCode::BAD_REQUEST, "Invalid request structure");
        }
    };

    if request.secret != state.config.student_secret {
        warn!("⚠️ 密钥错误，邮箱: {}", request.email);
        return detail(StatusCode::FORBIDDEN, "Invalid secret");
    }
    if request.email != state.config.student_email {
        warn!("⚠️ 邮箱不匹配: {}", request.email);
        return detail(StatusCode::FORBIDDEN, "Email does not match");
    }

    let session_id = state.dispatcher.dispatch(request.url.clone()).await;
    info!("📥 已受理链路 {}: {}", session_id, request.url);

    (
        StatusCode::OK,
        Json(json!({
            "status": "processing",
            "message": "Quiz solving started",
            "url": request.url,
            "session_id": session_id,
        })),
    )
        .into_response()
}

async fn root(State(state): State<ApiState>) -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "message": "Quiz chain solver is running",
        "email": state.config.student_email,
    }))
}

async fn health(State(state): State<ApiState>) -> Json<JsonValue> {
    Json(json!({
        "status": "healthy",
        "config_valid": state.config.is_valid(),
        "sessions": state.dispatcher.counts().await,
    }))
}

async fn session_status(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Response {
    match state.dispatcher.snapshot(&id).await {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => detail(StatusCode::NOT_FOUND, "Session not found"),
    }
}
