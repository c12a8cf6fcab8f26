//! Axum Handlers for the REST API
//!
//! Session lifecycle, phase navigation and keyword extraction over HTTP.
//! It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use feynman_tutor_core::TutorError;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    db::SessionRow,
    models::{
        CreateSessionPayload, ErrorResponse, ExtractKeywordPayload, ExtractKeywordResponse,
        InitializeLearningPayload, LinkCorpusPayload, MessageView, PhaseView, SessionSummary,
        TransitionPayload, TransitionResponse,
    },
    state::AppState,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    InternalServerError(anyhow::Error),
}

impl From<TutorError> for ApiError {
    fn from(err: TutorError) -> Self {
        match err {
            TutorError::Validation(m) => ApiError::BadRequest(m),
            e @ TutorError::NotFound(_) => ApiError::NotFound(e.to_string()),
            e @ (TutorError::State { .. } | TutorError::UnknownPhase(_)) => {
                ApiError::Conflict(e.to_string())
            }
            e @ (TutorError::UpstreamUnavailable(_) | TutorError::UpstreamMalformed(_)) => {
                ApiError::BadGateway(e.to_string())
            }
            e @ TutorError::Storage(_) => ApiError::InternalServerError(e.into()),
        }
    }
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
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::BadGateway(message) => {
                warn!(%message, "Upstream failure surfaced to client");
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { message })).into_response()
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

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<TutorError>() {
            Ok(tutor) => tutor.into(),
            Err(other) => Self::InternalServerError(other),
        }
    }
}

fn user_id(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("x-user-id header is required".to_string()))
}

/// Loads a session row, hiding sessions owned by someone else.
async fn owned_session(state: &AppState, id: Uuid, user_id: &str) -> Result<SessionRow, ApiError> {
    state
        .db
        .get_session(id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{}' not found", id)))
}

fn summary(row: SessionRow) -> SessionSummary {
    SessionSummary::new(row.id, &row.context.0).with_timestamps(row.created_at, row.updated_at)
}

/// Create a new tutoring session at HOME.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionPayload,
    responses(
        (status = 201, description = "Session created successfully", body = SessionSummary),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user creating the session")
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id(&headers)?;
    let corpus_id = payload.corpus_id.filter(|c| !c.trim().is_empty());
    let (id, ctx) = state.orchestrator.open_session(user_id, corpus_id).await?;
    Ok((StatusCode::CREATED, Json(SessionSummary::new(id, &ctx))))
}

/// List all sessions for a user, newest first.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "List of sessions", body = [SessionSummary]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let user_id = user_id(&headers)?;
    let sessions = state.db.list_sessions(user_id).await?;
    Ok(Json(sessions.into_iter().map(summary).collect()))
}

/// Get a specific session by its ID.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionSummary),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, ApiError> {
    let user_id = user_id(&headers)?;
    let row = owned_session(&state, id, user_id).await?;
    Ok(Json(summary(row)))
}

/// Delete a session and its message log.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    responses(
        (status = 204, description = "Session deleted"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user_id = user_id(&headers)?;
    owned_session(&state, id, user_id).await?;
    if !state.orchestrator.delete_session(id).await? {
        return Err(TutorError::NotFound(id).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Get the message log of a session.
#[utoipa::path(
    get,
    path = "/sessions/{id}/messages",
    responses(
        (status = 200, description = "Messages in order", body = [MessageView]),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let user_id = user_id(&headers)?;
    owned_session(&state, id, user_id).await?;
    let messages = state.orchestrator.history(id).await?;
    Ok(Json(messages.into_iter().map(MessageView::from).collect()))
}

/// Get the current phase with its title and instruction.
#[utoipa::path(
    get,
    path = "/sessions/{id}/phase",
    responses(
        (status = 200, description = "Current phase", body = PhaseView),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_phase(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<PhaseView>, ApiError> {
    let user_id = user_id(&headers)?;
    let row = owned_session(&state, id, user_id).await?;
    Ok(Json(PhaseView::from(row.context.0.phase())))
}

/// Apply a phase choice. A missing choice means `continue`.
#[utoipa::path(
    post,
    path = "/sessions/{id}/transition",
    request_body = TransitionPayload,
    responses(
        (status = 200, description = "Transition applied", body = TransitionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Choice not valid in the current phase", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn transition(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionPayload>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    owned_session(&state, id, user_id).await?;
    let outcome = state
        .orchestrator
        .handle_transition(id, payload.choice.as_deref())
        .await?;
    Ok(Json(TransitionResponse::from(&outcome)))
}

/// Link or unlink the reference corpus of a session.
#[utoipa::path(
    put,
    path = "/sessions/{id}/corpus",
    request_body = LinkCorpusPayload,
    responses(
        (status = 200, description = "Corpus link updated", body = SessionSummary),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn link_corpus(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<LinkCorpusPayload>,
) -> Result<Json<SessionSummary>, ApiError> {
    let user_id = user_id(&headers)?;
    owned_session(&state, id, user_id).await?;
    let ctx = state.orchestrator.link_corpus(id, payload.corpus_id).await?;
    Ok(Json(SessionSummary::new(id, &ctx)))
}

/// Start a cycle from a study material excerpt instead of a question.
#[utoipa::path(
    post,
    path = "/sessions/{id}/initialize-learning",
    request_body = InitializeLearningPayload,
    responses(
        (status = 200, description = "Session moved to knowledge check", body = SessionSummary),
        (status = 400, description = "Empty material", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session is not at home", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn initialize_learning(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<InitializeLearningPayload>,
) -> Result<Json<SessionSummary>, ApiError> {
    let user_id = user_id(&headers)?;
    owned_session(&state, id, user_id).await?;
    let ctx = state
        .orchestrator
        .initialize_learning(id, &payload.concept)
        .await?;
    Ok(Json(SessionSummary::new(id, &ctx)))
}

/// Extract the core concept of a question.
#[utoipa::path(
    post,
    path = "/extract-keyword",
    request_body = ExtractKeywordPayload,
    responses(
        (status = 200, description = "Extracted keyword, or the original text on failure", body = ExtractKeywordResponse),
        (status = 400, description = "Empty text", body = ErrorResponse)
    )
)]
pub async fn extract_keyword(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExtractKeywordPayload>,
) -> Result<Json<ExtractKeywordResponse>, ApiError> {
    let (keyword, _) = state.orchestrator.extract_keyword(&payload.text).await?;
    Ok(Json(ExtractKeywordResponse {
        original_text: payload.text,
        extracted_keyword: keyword,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use feynman_tutor_core::Phase;

    fn status_of(err: TutorError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_tutor_error_status_mapping() {
        assert_eq!(status_of(TutorError::Validation("empty".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(TutorError::NotFound(Uuid::new_v4())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(TutorError::state(Phase::Home, "no transition")),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(TutorError::UpstreamUnavailable("down".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(TutorError::UpstreamMalformed("garbage".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(TutorError::Storage("pool closed".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_anyhow_wrapping_tutor_error_keeps_status() {
        let err = anyhow::Error::new(TutorError::NotFound(Uuid::new_v4()));
        assert_eq!(ApiError::from(err).into_response().status(), StatusCode::NOT_FOUND);

        let err = anyhow::anyhow!("connection reset");
        assert_eq!(
            ApiError::from(err).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_user_id_header_required() {
        let mut headers = HeaderMap::new();
        assert!(matches!(user_id(&headers), Err(ApiError::BadRequest(_))));
        headers.insert("x-user-id", "user-1".parse().unwrap());
        assert_eq!(user_id(&headers).unwrap(), "user-1");
    }
}
