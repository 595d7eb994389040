use std::{path::PathBuf, time::Duration};

use serde::Deserialize;
use url::Url;

const DEFAULT_SESSION_TTL_SECS: u64 = 300;
const DEFAULT_COLLABORATOR_TIMEOUT_SECS: u64 = 10;
const DEFAULT_NON_REVOCATION_STATE_MAX_AGE_SECS: u64 = 3600;

/// Everything a [Verifier](crate::verifier::Verifier) needs to know about its deployment.
#[derive(Deserialize, Debug, Clone)]
pub struct VerifierConfig {
    /// DID the verifier presents itself as (`from` of every request).
    pub verifier_identifier: String,
    /// Endpoint the holder posts its response to. The session id is appended as a query parameter.
    pub callback_base_url: Url,
    /// JSON-RPC endpoint of the ledger that anchors identity states.
    pub ledger_endpoint: Url,
    /// Address of the identity state contract, `0x` prefixed.
    pub state_contract_address: String,
    /// Directory holding one `<circuitId>.json` verification key per supported circuit.
    pub key_directory: PathBuf,
    /// Gateway used to fetch `ipfs://` schemas.
    pub schema_fetch_endpoint: BaseUrl,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_collaborator_timeout")]
    pub collaborator_timeout_secs: u64,
    /// Oldest replaced identity state still accepted. `None` accepts any corroborated state.
    #[serde(default)]
    pub historical_state_max_age_secs: Option<u64>,
    /// Oldest replaced issuer non-revocation state still accepted.
    #[serde(default = "default_non_revocation_state_max_age")]
    pub non_revocation_state_max_age_secs: u64,
    /// Accept responses that are not wrapped in a JWZ token.
    #[serde(default)]
    pub accept_plain_responses: bool,
}

impl VerifierConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }

    pub fn historical_state_max_age(&self) -> Option<Duration> {
        self.historical_state_max_age_secs.map(Duration::from_secs)
    }

    pub fn non_revocation_state_max_age(&self) -> Duration {
        Duration::from_secs(self.non_revocation_state_max_age_secs)
    }
}

fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_collaborator_timeout() -> u64 {
    DEFAULT_COLLABORATOR_TIMEOUT_SECS
}

fn default_non_revocation_state_max_age() -> u64 {
    DEFAULT_NON_REVOCATION_STATE_MAX_AGE_SECS
}

/// A url that is always a base (can be safely join()'ed with further path elements without
/// mangling).
#[derive(Deserialize, Debug, Clone, Hash, PartialEq, Eq)]
#[serde(try_from = "String")]
pub struct BaseUrl(Url);

impl std::ops::Deref for BaseUrl {
    type Target = Url;

    fn deref(&self) -> &Url {
        &self.0
    }
}

impl TryFrom<String> for BaseUrl {
    type Error = url::ParseError;

    fn try_from(mut url: String) -> Result<Self, Self::Error> {
        // Make URL a base.
        if !url.ends_with('/') {
            url += "/"
        }
        url.parse().map(Self)
    }
}

impl std::str::FromStr for BaseUrl {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}
