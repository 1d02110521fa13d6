//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ContinueRevisionPayload, ErrorResponse, RevisionResponse, StartRevisionPayload, TopicInfo,
        TopicsResponse,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::start_revision,
        handlers::continue_revision,
        handlers::list_topics,
    ),
    components(
        schemas(StartRevisionPayload, ContinueRevisionPayload, RevisionResponse, TopicInfo, TopicsResponse, ErrorResponse)
    ),
    tags(
        (name = "EduBot API", description = "Session management for the progressive topic revision tutor")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/topics", get(handlers::list_topics))
        .route("/revision/start", post(handlers::start_revision))
        .route("/revision/continue", post(handlers::continue_revision))
        .route("/ws", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
