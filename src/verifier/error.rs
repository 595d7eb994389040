use serde::Serialize;

use crate::core::{authorization_request::parameters::SessionId, circuits::CircuitId};

use super::session::SessionStoreError;

/// Failure to build or record an authorization request.
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("unable to record session: {0}")]
    Store(#[from] SessionStoreError),
}

/// Why a response was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("no outstanding request for session {session_id}")]
    UnknownSession { session_id: SessionId },
    #[error("session {session_id} has already been completed")]
    SessionAlreadyConsumed { session_id: SessionId },
    #[error("malformed response: {cause:#}")]
    MalformedResponse { cause: anyhow::Error },
    #[error("response does not answer the request: {reason}")]
    RequestResponseMismatch { reason: String },
    #[error("response has no proof for request {request_id}")]
    IncompleteResponse { request_id: u32 },
    #[error("verification key for {circuit_id} is unavailable: {cause:#}")]
    VerificationKeyUnavailable {
        circuit_id: CircuitId,
        cause: anyhow::Error,
    },
    #[error("schema {url} is unavailable: {cause:#}")]
    SchemaUnavailable { url: String, cause: anyhow::Error },
    #[error("invalid proof: {reason}")]
    InvalidProof { reason: String },
    #[error("identity state could not be resolved: {cause:#}")]
    StateResolutionFailed { cause: anyhow::Error },
    #[error("identity state is not trusted: {reason}")]
    StateNotTrusted { reason: String },
    #[error("issuer {issuer} is not allowed")]
    IssuerNotAllowed { issuer: String },
    #[error("inconsistent subject: {reason}")]
    InconsistentSubject { reason: String },
    #[error("session store is unavailable: {cause:#}")]
    StoreUnavailable { cause: anyhow::Error },
}

/// The kind of a [VerificationError], without its details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownSession,
    SessionAlreadyConsumed,
    MalformedResponse,
    RequestResponseMismatch,
    IncompleteResponse,
    VerificationKeyUnavailable,
    SchemaUnavailable,
    InvalidProof,
    StateResolutionFailed,
    StateNotTrusted,
    IssuerNotAllowed,
    InconsistentSubject,
    StoreUnavailable,
}

impl VerificationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownSession { .. } => ErrorKind::UnknownSession,
            Self::SessionAlreadyConsumed { .. } => ErrorKind::SessionAlreadyConsumed,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::RequestResponseMismatch { .. } => ErrorKind::RequestResponseMismatch,
            Self::IncompleteResponse { .. } => ErrorKind::IncompleteResponse,
            Self::VerificationKeyUnavailable { .. } => ErrorKind::VerificationKeyUnavailable,
            Self::SchemaUnavailable { .. } => ErrorKind::SchemaUnavailable,
            Self::InvalidProof { .. } => ErrorKind::InvalidProof,
            Self::StateResolutionFailed { .. } => ErrorKind::StateResolutionFailed,
            Self::StateNotTrusted { .. } => ErrorKind::StateNotTrusted,
            Self::IssuerNotAllowed { .. } => ErrorKind::IssuerNotAllowed,
            Self::InconsistentSubject { .. } => ErrorKind::InconsistentSubject,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
        }
    }

    /// Infrastructure failures. The session stays pending and the holder may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::StateResolutionFailed
                | ErrorKind::VerificationKeyUnavailable
                | ErrorKind::SchemaUnavailable
                | ErrorKind::StoreUnavailable
        )
    }

    /// Rejections that complete the session as failed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RequestResponseMismatch
                | ErrorKind::IncompleteResponse
                | ErrorKind::InvalidProof
                | ErrorKind::StateNotTrusted
                | ErrorKind::IssuerNotAllowed
                | ErrorKind::InconsistentSubject
        )
    }

    pub(crate) fn mismatch(reason: impl Into<String>) -> Self {
        Self::RequestResponseMismatch {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn classification() {
        let retryable = VerificationError::StateResolutionFailed {
            cause: anyhow!("connection refused"),
        };
        assert!(retryable.is_retryable());
        assert!(!retryable.is_terminal());

        let malformed = VerificationError::MalformedResponse {
            cause: anyhow!("not json"),
        };
        assert!(!malformed.is_retryable());
        assert!(!malformed.is_terminal());

        let rejected = VerificationError::IssuerNotAllowed {
            issuer: "issuerY".into(),
        };
        assert!(rejected.is_terminal());
        assert_eq!(
            serde_json::to_value(rejected.kind()).unwrap(),
            serde_json::json!("issuer_not_allowed")
        );
    }
}
