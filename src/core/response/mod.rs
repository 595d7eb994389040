use serde::{Deserialize, Serialize};

use self::parameters::ProofResponse;

pub mod envelope;
pub mod parameters;

/// An iden3comm authorization response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub id: String,
    /// Thread of the request being answered. Kept as received so that a foreign thread is
    /// reported as a mismatch.
    pub thid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(rename = "type")]
    pub message_type: String,
    /// The holder's identifier.
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub body: AuthorizationResponseBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponseBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub scope: Vec<ProofResponse>,
}

impl AuthorizationResponse {
    pub fn proof(&self, id: u32) -> Option<&ProofResponse> {
        self.body.scope.iter().find(|proof| proof.id == id)
    }
}
