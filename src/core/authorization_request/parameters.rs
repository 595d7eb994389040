use std::fmt;

use base64::prelude::*;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::core::{circuits::CircuitId, query::Query};

/// Message type of an authorization request.
pub const AUTHORIZATION_REQUEST_TYPE: &str =
    "https://iden3-communication.io/authorization/1.0/request";
/// Message type of an authorization response.
pub const AUTHORIZATION_RESPONSE_TYPE: &str =
    "https://iden3-communication.io/authorization/1.0/response";
/// Media type of an unprotected message.
pub const PLAIN_MESSAGE_MEDIA_TYPE: &str = "application/iden3comm-plain-json";
/// Media type of a message wrapped in a JWZ token.
pub const ZKP_MESSAGE_MEDIA_TYPE: &str = "application/iden3-zkp-json";

const SESSION_ID_BYTES: usize = 32;

/// Identifies an outstanding authorization request. Carried in the callback url.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// 256 bits from the OS CSPRNG, base64url encoded without padding.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(BASE64_URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Query string of the callback url.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

/// One provable claim the holder is asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRequest {
    pub id: u32,
    pub circuit_id: CircuitId,
    pub rules: Rules,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rules {
    pub query: Query,
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn session_ids_are_long_and_url_safe() {
        let ids: HashSet<_> = (0..64).map(|_| SessionId::generate()).collect();
        assert_eq!(ids.len(), 64);
        for id in ids {
            assert_eq!(BASE64_URL_SAFE_NO_PAD.decode(id.as_str()).unwrap().len(), 32);
            assert!(!id.as_str().contains(['+', '/', '=']));
        }
    }

    #[test]
    fn callback_query() {
        let query: CallbackQuery = serde_urlencoded::from_str("sessionId=abc-_123").unwrap();
        assert_eq!(query.session_id.as_str(), "abc-_123");
        assert!(serde_urlencoded::from_str::<CallbackQuery>("session=abc").is_err());
    }
}
