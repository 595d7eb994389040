use tokio::time::Instant;
use tracing::info;
use url::Url;

use crate::{
    core::{
        authorization_request::{callback_url, parameters::SessionId, AuthorizationRequest},
        identifier::validate_did,
        query::ClaimQuery,
    },
    utils::NonEmptyVec,
};

use super::{
    error::IssuanceError,
    session::{Session, Status},
    Verifier,
};

/// Id of the single proof request every authorization request carries.
const PROOF_REQUEST_ID: u32 = 1;

#[derive(Debug, Clone)]
#[must_use]
pub struct RequestBuilder<'a> {
    verifier: &'a Verifier,
    verifier_identifier: String,
    callback_endpoint: Url,
    reason: String,
    message: Option<String>,
    claim_query: Option<ClaimQuery>,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(verifier: &'a Verifier) -> Self {
        Self {
            verifier,
            verifier_identifier: verifier.verifier_identifier.clone(),
            callback_endpoint: verifier.callback_endpoint.clone(),
            reason: String::new(),
            message: None,
            claim_query: None,
        }
    }

    /// Override the verifier's DID for this request.
    pub fn with_verifier_identifier(mut self, verifier_identifier: impl Into<String>) -> Self {
        self.verifier_identifier = verifier_identifier.into();
        self
    }

    /// Override the callback endpoint for this request.
    pub fn with_callback_endpoint(mut self, endpoint: Url) -> Self {
        self.callback_endpoint = endpoint;
        self
    }

    /// Label of the flow, shown to the holder as the reason of the request.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Message the holder is asked to sign.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the claim the holder must prove.
    pub fn with_claim_query(mut self, claim_query: ClaimQuery) -> Self {
        self.claim_query = Some(claim_query);
        self
    }

    /// Build the request and record it under a fresh session.
    ///
    /// ## Returns
    /// - Session id that can be used by the application frontend to poll for the status of this
    ///   request.
    /// - The request to hand to the holder.
    pub async fn build(self) -> Result<(SessionId, AuthorizationRequest), IssuanceError> {
        let session_id = SessionId::generate();

        let request = self.build_with_session_id(session_id.clone()).await?;

        Ok((session_id, request))
    }

    pub async fn build_with_session_id(
        self,
        session_id: SessionId,
    ) -> Result<AuthorizationRequest, IssuanceError> {
        validate_did(&self.verifier_identifier).map_err(|e| {
            IssuanceError::InvalidConfiguration(format!("verifier identifier: {e}"))
        })?;

        if !matches!(self.callback_endpoint.scheme(), "http" | "https")
            || self.callback_endpoint.cannot_be_a_base()
        {
            return Err(IssuanceError::InvalidConfiguration(format!(
                "callback endpoint '{}' is not an absolute http(s) url",
                self.callback_endpoint
            )));
        }

        let Some(claim_query) = self.claim_query else {
            return Err(IssuanceError::InvalidConfiguration(
                "claim query is required, see `with_claim_query`".into(),
            ));
        };
        if !claim_query.circuit_id.is_query_circuit() {
            return Err(IssuanceError::InvalidConfiguration(format!(
                "circuit {} cannot prove a claim query",
                claim_query.circuit_id
            )));
        }
        if claim_query.query.predicate().is_none() {
            return Err(IssuanceError::InvalidConfiguration(
                "claim query needs a predicate".into(),
            ));
        }

        let circuit_id = claim_query.circuit_id;
        let authorization_request = AuthorizationRequest::new(
            self.verifier_identifier,
            callback_url(&self.callback_endpoint, &session_id),
            self.reason,
            self.message,
            NonEmptyVec::new(claim_query.into_proof_request(PROOF_REQUEST_ID)),
        );

        let session = Session {
            session_id: session_id.clone(),
            status: Status::Issued,
            authorization_request: authorization_request.clone(),
            expires_at: Instant::now() + self.verifier.session_ttl,
        };

        self.verifier.session_store.initiate(session).await?;

        info!(
            session_id = %session_id,
            thid = %authorization_request.thid,
            %circuit_id,
            "issued authorization request"
        );

        Ok(authorization_request)
    }
}
