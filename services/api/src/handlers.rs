//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for the
//! revision flow. It uses `utoipa` doc comments to generate OpenAPI
//! documentation.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use edubot_core::{error::FlowError, quiz::TopicLimits};
use std::sync::Arc;
use tracing::error;

use crate::{
    models::{
        ContinueRevisionPayload, ErrorResponse, RevisionResponse, StartRevisionPayload, TopicInfo,
        TopicsResponse,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Maps flow errors onto API responses, keeping the "start a new session"
/// hint for unknown sessions.
fn map_flow_error(err: FlowError) -> ApiError {
    match err {
        FlowError::SessionNotFound(_) => ApiError::NotFound(
            "Session not found. Please start a new revision session.".to_string(),
        ),
        other => ApiError::InternalServerError(other.into()),
    }
}

/// Start a new revision session for a topic.
#[utoipa::path(
    post,
    path = "/revision/start",
    request_body = StartRevisionPayload,
    responses(
        (status = 201, description = "Session started successfully", body = RevisionResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn start_revision(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StartRevisionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.topic.trim().is_empty() {
        return Err(ApiError::BadRequest("topic must not be empty".to_string()));
    }
    if payload.student_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "student_id must not be empty".to_string(),
        ));
    }

    let output = state
        .controller
        .start_session(&payload.topic, &payload.student_id, payload.session_id)
        .await
        .map_err(map_flow_error)?;

    Ok((StatusCode::CREATED, Json(RevisionResponse::from(output))))
}

/// Continue an existing revision session with an optional user message.
#[utoipa::path(
    post,
    path = "/revision/continue",
    request_body = ContinueRevisionPayload,
    responses(
        (status = 200, description = "Turn processed", body = RevisionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn continue_revision(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ContinueRevisionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let output = state
        .controller
        .process_turn(&payload.session_id, payload.text.as_deref())
        .await
        .map_err(map_flow_error)?;

    Ok((StatusCode::OK, Json(RevisionResponse::from(output))))
}

/// List all topics that have study material available.
#[utoipa::path(
    get,
    path = "/topics",
    responses(
        (status = 200, description = "Available topics", body = TopicsResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_topics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TopicsResponse>, ApiError> {
    let rows = state.db.list_topics().await?;
    let topics = rows
        .into_iter()
        .map(|row| {
            let limits = TopicLimits::from_chunk_count(row.chunk_count.max(0) as usize);
            TopicInfo {
                description: format!("Study material with {} content sections", row.chunk_count),
                topic: row.topic,
                chunk_count: row.chunk_count,
                max_conversations: limits.max_conversations,
                quiz_frequency: limits.quiz_frequency,
            }
        })
        .collect();
    Ok(Json(TopicsResponse { topics }))
}
