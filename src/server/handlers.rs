//! Request handlers of the intake API.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::Board;
use crate::services::IntakeService;

#[derive(Debug, Deserialize)]
pub struct BoardRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub exists: bool,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: usize,
}

/// Error answered as `400 {"error": message}`.
#[derive(Debug)]
pub struct ApiError(String);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        Self(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::warn!("Rejected request: {}", self.0);
        let body = serde_json::json!({ "error": self.0 });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

fn decode<T>(operation: &str, body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value).map_err(|e| {
        log::debug!("{} body rejected: {}", operation, e);
        ApiError(format!("{operation} failed: Can't decode JSON request"))
    })
}

pub async fn enqueue_board(
    State(intake): State<IntakeService>,
    body: Result<Json<BoardRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Board>), ApiError> {
    let request = decode("EnqueueBoard", body)?;
    let board = intake.enqueue(&request.url).await?;
    Ok((StatusCode::CREATED, Json(board)))
}

pub async fn exists_board(
    State(intake): State<IntakeService>,
    body: Result<Json<PathRequest>, JsonRejection>,
) -> Result<Json<ExistsResponse>, ApiError> {
    let request = decode("existsBoard", body)?;
    log::info!("Incoming exists request: {}", request.path);
    let exists = intake.exists(&request.path).await?;
    Ok(Json(ExistsResponse {
        exists,
        path: request.path,
    }))
}

pub async fn count_board(
    State(intake): State<IntakeService>,
    body: Result<Json<PathRequest>, JsonRejection>,
) -> Result<Json<CountResponse>, ApiError> {
    let request = decode("countBoard", body)?;
    log::info!("Incoming count request: {}", request.path);
    let count = intake.count(&request.path).await?;
    Ok(Json(CountResponse { count }))
}
