use crate::bot::BotStats;
use crate::supervisor::{BotStatus, ControlError, Supervisor};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Body of every control endpoint except `/stats`
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub status: String,
    pub message: String,
}

impl ControlResponse {
    fn new(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    status: BotStatus,
    stats: Option<BotStats>,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let code = match &self {
            ControlError::AlreadyRunning | ControlError::NotRunning => StatusCode::BAD_REQUEST,
            ControlError::Construction(_) | ControlError::Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (code, Json(ControlResponse::new("error", self.to_string()))).into_response()
    }
}

/// Routes for controlling the bot, served both at the root and under `/api`
pub fn build_router(supervisor: Arc<Supervisor>) -> Router {
    let routes = Router::new()
        .route("/start", post(start_bot))
        .route("/stop", post(stop_bot))
        .route("/status", get(bot_status))
        .route("/stats", get(bot_stats));

    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .with_state(supervisor)
}

async fn start_bot(
    State(supervisor): State<Arc<Supervisor>>,
) -> Result<Json<ControlResponse>, ControlError> {
    supervisor.start().await?;
    Ok(Json(ControlResponse::new(
        "success",
        "Bot started successfully",
    )))
}

async fn stop_bot(
    State(supervisor): State<Arc<Supervisor>>,
) -> Result<Json<ControlResponse>, ControlError> {
    supervisor.stop().await?;
    Ok(Json(ControlResponse::new(
        "success",
        "Bot stopped successfully",
    )))
}

async fn bot_status(State(supervisor): State<Arc<Supervisor>>) -> Json<ControlResponse> {
    let status = supervisor.status();
    let message = match status {
        BotStatus::Running => "Bot is currently running",
        BotStatus::Stopped => "Bot is not running",
    };
    Json(ControlResponse::new(status.to_string(), message))
}

async fn bot_stats(State(supervisor): State<Arc<Supervisor>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        status: supervisor.status(),
        stats: supervisor.stats().await,
    })
}
