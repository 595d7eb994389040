use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::utils::NonEmptyVec;

use self::parameters::{
    CallbackQuery, ProofRequest, SessionId, AUTHORIZATION_REQUEST_TYPE, PLAIN_MESSAGE_MEDIA_TYPE,
};

pub mod parameters;

/// An iden3comm authorization request, asking a holder to prove one or more claims and post the
/// proofs to `body.callbackUrl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub id: Uuid,
    pub thid: Uuid,
    pub typ: String,
    #[serde(rename = "type")]
    pub message_type: String,
    /// The verifier's DID.
    pub from: String,
    pub body: AuthorizationRequestBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequestBody {
    #[serde(rename = "callbackUrl")]
    pub callback_url: Url,
    /// Label of the flow the request belongs to.
    pub reason: String,
    /// Message the holder is asked to sign.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub scope: NonEmptyVec<ProofRequest>,
}

impl AuthorizationRequest {
    /// A single round request: `thid` is the request `id`.
    pub fn new(
        from: String,
        callback_url: Url,
        reason: String,
        message: Option<String>,
        scope: NonEmptyVec<ProofRequest>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            thid: id,
            typ: PLAIN_MESSAGE_MEDIA_TYPE.to_owned(),
            message_type: AUTHORIZATION_REQUEST_TYPE.to_owned(),
            from,
            body: AuthorizationRequestBody {
                callback_url,
                reason,
                message,
                scope,
            },
        }
    }

    /// The session id carried in the callback url.
    pub fn session_id(&self) -> Result<SessionId> {
        let query = self
            .body
            .callback_url
            .query()
            .context("callback url has no query")?;
        let CallbackQuery { session_id } =
            serde_urlencoded::from_str(query).context("callback url has no session id")?;
        Ok(session_id)
    }

    pub fn scope(&self) -> &[ProofRequest] {
        &self.body.scope
    }

    pub fn proof_request(&self, id: u32) -> Option<&ProofRequest> {
        self.scope().iter().find(|request| request.id == id)
    }
}

/// Append the session id to the callback base url, keeping any query it already has.
pub fn callback_url(base: &Url, session_id: &SessionId) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair("sessionId", session_id.as_str());
    url
}
