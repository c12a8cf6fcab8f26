//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        CreateSessionPayload, ErrorResponse, ExtractKeywordPayload, ExtractKeywordResponse,
        InitializeLearningPayload, LinkCorpusPayload, MessageView, PhaseView, SessionSummary,
        TransitionPayload, TransitionResponse,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::list_sessions,
        handlers::get_session,
        handlers::delete_session,
        handlers::list_messages,
        handlers::get_phase,
        handlers::transition,
        handlers::link_corpus,
        handlers::initialize_learning,
        handlers::extract_keyword,
    ),
    components(
        schemas(
            SessionSummary, MessageView, PhaseView, TransitionResponse, CreateSessionPayload,
            TransitionPayload, LinkCorpusPayload, InitializeLearningPayload,
            ExtractKeywordPayload, ExtractKeywordResponse, ErrorResponse
        )
    ),
    tags(
        (name = "Feynman Tutor API", description = "Adaptive Feynman tutoring sessions")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/{id}/messages", get(handlers::list_messages))
        .route("/sessions/{id}/phase", get(handlers::get_phase))
        .route("/sessions/{id}/transition", post(handlers::transition))
        .route("/sessions/{id}/corpus", put(handlers::link_corpus))
        .route(
            "/sessions/{id}/initialize-learning",
            post(handlers::initialize_learning),
        )
        .route("/extract-keyword", post(handlers::extract_keyword))
        .route("/ws/sessions/{id}", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for expected in [
            "/sessions",
            "/sessions/{id}",
            "/sessions/{id}/messages",
            "/sessions/{id}/phase",
            "/sessions/{id}/transition",
            "/sessions/{id}/corpus",
            "/sessions/{id}/initialize-learning",
            "/extract-keyword",
        ] {
            assert!(paths.contains(&expected), "missing {expected}");
        }
    }
}
