use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info};
use zkauth::{
    core::authorization_request::{
        parameters::{CallbackQuery, SessionId},
        AuthorizationRequest,
    },
    verifier::{
        error::{ErrorKind, IssuanceError, VerificationError},
        session::{Outcome, Status},
        AuthenticatedSubject,
    },
};

use super::AppState;

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "zkauth-verifier"
    }))
}

/// GET /api/sign-in
///
/// Issues an authorization request under a new session. The session id is carried in the
/// request's callback url.
pub async fn sign_in(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AuthorizationRequest>, AppError> {
    let (session_id, request) = state
        .verifier
        .issue_request(
            &state.flow_label,
            &state.challenge_message,
            state.claim_query.clone(),
        )
        .await?;

    info!("Created authorization request with session_id: {}", session_id);

    Ok(Json(request))
}

/// POST /api/callback?sessionId=<id>
///
/// Receives the holder's response, as plain JSON or as a JWZ token.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(CallbackQuery { session_id }): Query<CallbackQuery>,
    body: Bytes,
) -> Result<Json<AuthenticatedSubject>, AppError> {
    info!("Received authorization response for session: {}", session_id);

    let subject = state.verifier.verify_response(&session_id, &body).await?;

    Ok(Json(subject))
}

/// GET /api/status/:session_id
///
/// Returns the current status of an authorization session.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = state
        .verifier
        .poll_status(&SessionId::from(session_id))
        .await?;

    let status_json = match status {
        Status::Issued => serde_json::json!({
            "status": "issued",
            "message": "Waiting for the holder's response"
        }),
        Status::PendingResponse => serde_json::json!({
            "status": "pending_response",
            "message": "Response received, not accepted yet"
        }),
        Status::Complete(Outcome::Verified { subject }) => serde_json::json!({
            "status": "complete",
            "result": "verified",
            "subject": subject
        }),
        Status::Complete(Outcome::Failed { reason }) => serde_json::json!({
            "status": "complete",
            "result": "failed",
            "reason": reason
        }),
    };

    Ok(Json(status_json))
}

#[derive(Debug)]
pub enum AppError {
    Issuance(IssuanceError),
    Verification(VerificationError),
}

impl From<IssuanceError> for AppError {
    fn from(e: IssuanceError) -> Self {
        AppError::Issuance(e)
    }
}

impl From<VerificationError> for AppError {
    fn from(e: VerificationError) -> Self {
        AppError::Verification(e)
    }
}

fn status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UnknownSession
        | ErrorKind::MalformedResponse
        | ErrorKind::RequestResponseMismatch
        | ErrorKind::IncompleteResponse => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidProof => StatusCode::UNAUTHORIZED,
        ErrorKind::IssuerNotAllowed
        | ErrorKind::StateNotTrusted
        | ErrorKind::InconsistentSubject => StatusCode::FORBIDDEN,
        ErrorKind::SessionAlreadyConsumed => StatusCode::CONFLICT,
        ErrorKind::VerificationKeyUnavailable | ErrorKind::SchemaUnavailable => {
            StatusCode::BAD_GATEWAY
        }
        ErrorKind::StateResolutionFailed | ErrorKind::StoreUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            AppError::Verification(e) => (
                status_code(e.kind()),
                serde_json::to_value(e.kind()).unwrap_or_default(),
                e.to_string(),
            ),
            AppError::Issuance(e) => {
                error!("Failed to issue authorization request: {}", e);
                let (status, kind) = match &e {
                    IssuanceError::InvalidConfiguration(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "invalid_configuration")
                    }
                    IssuanceError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
                };
                (status, kind.into(), e.to_string())
            }
        };

        (
            status,
            Json(serde_json::json!({ "error": kind, "message": message })),
        )
            .into_response()
    }
}
