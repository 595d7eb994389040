use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use request_builder::RequestBuilder;
use serde::{Deserialize, Serialize};
use session::{SessionStore, SessionStoreError, Status};
use url::Url;

use crate::{
    config::VerifierConfig,
    core::{
        authorization_request::{parameters::SessionId, AuthorizationRequest},
        query::ClaimQuery,
        util::ReqwestClient,
    },
};

use self::{
    error::{IssuanceError, VerificationError},
    loaders::{FsKeyLoader, HttpSchemaLoader, KeyLoader, SchemaLoader},
    oracle::{Groth16Oracle, ProofOracle},
    session::MemoryStore,
    state::{EthStateResolver, StateResolver},
};

pub mod error;
pub mod loaders;
pub mod oracle;
pub mod request_builder;
pub mod session;
pub mod state;
mod verification;

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);
const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_NON_REVOCATION_STATE_MAX_AGE: Duration = Duration::from_secs(3600);

/// The identity a verified response authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedSubject {
    /// Base58 iden3 identifier of the holder.
    pub subject: String,
}

/// A verifier of zero-knowledge authorization responses, also known as the relying party.
#[derive(Debug, Clone)]
pub struct Verifier {
    verifier_identifier: String,
    callback_endpoint: Url,
    session_store: Arc<dyn SessionStore + Send + Sync>,
    key_loader: Arc<dyn KeyLoader + Send + Sync>,
    schema_loader: Arc<dyn SchemaLoader + Send + Sync>,
    state_resolver: Arc<dyn StateResolver + Send + Sync>,
    oracle: Arc<dyn ProofOracle + Send + Sync>,
    session_ttl: Duration,
    collaborator_timeout: Duration,
    historical_state_max_age: Option<Duration>,
    non_revocation_state_max_age: Duration,
    accept_plain_responses: bool,
}

impl Verifier {
    /// Build a new verifier.
    pub fn builder() -> VerifierBuilder {
        VerifierBuilder::default()
    }

    /// Begin building a new authorization request.
    pub fn build_authorization_request(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(self)
    }

    /// Issue a request asking the holder to prove `claim_query`, under a fresh session.
    pub async fn issue_request(
        &self,
        flow_label: &str,
        challenge_message: &str,
        claim_query: ClaimQuery,
    ) -> Result<(SessionId, AuthorizationRequest), IssuanceError> {
        self.build_authorization_request()
            .with_reason(flow_label)
            .with_message(challenge_message)
            .with_claim_query(claim_query)
            .build()
            .await
    }

    /// Retrieve the current status of an authorization request.
    ///
    /// This should be triggered by a request from the application frontend.
    pub async fn poll_status(&self, session_id: &SessionId) -> Result<Status, VerificationError> {
        match self.session_store.get_session(session_id).await {
            Ok(session) => Ok(session.status),
            Err(SessionStoreError::NotFound) => Err(VerificationError::UnknownSession {
                session_id: session_id.clone(),
            }),
            Err(e) => Err(VerificationError::StoreUnavailable { cause: e.into() }),
        }
    }

    pub fn verifier_identifier(&self) -> &str {
        &self.verifier_identifier
    }

    pub fn session_store(&self) -> &Arc<dyn SessionStore + Send + Sync> {
        &self.session_store
    }
}

/// Builder struct for [Verifier].
#[derive(Debug, Clone, Default)]
pub struct VerifierBuilder {
    verifier_identifier: Option<String>,
    callback_endpoint: Option<Url>,
    session_store: Option<Arc<dyn SessionStore + Send + Sync>>,
    key_loader: Option<Arc<dyn KeyLoader + Send + Sync>>,
    schema_loader: Option<Arc<dyn SchemaLoader + Send + Sync>>,
    state_resolver: Option<Arc<dyn StateResolver + Send + Sync>>,
    oracle: Option<Arc<dyn ProofOracle + Send + Sync>>,
    session_ttl: Option<Duration>,
    collaborator_timeout: Option<Duration>,
    historical_state_max_age: Option<Duration>,
    non_revocation_state_max_age: Option<Duration>,
    accept_plain_responses: bool,
}

impl VerifierBuilder {
    /// A builder wired with the default collaborators for `config`: verification keys from the
    /// key directory, schemas over HTTP and IPFS, states from the ledger, Groth16 proofs and an
    /// in-memory session store.
    pub fn from_config(config: &VerifierConfig) -> Result<Self> {
        let state_resolver = EthStateResolver::new(
            ReqwestClient::new()?,
            config.ledger_endpoint.clone(),
            config.state_contract_address.clone(),
        )
        .context("invalid state contract configuration")?;
        let schema_loader =
            HttpSchemaLoader::new(ReqwestClient::new()?, config.schema_fetch_endpoint.clone());

        Ok(Self::default()
            .with_config(config)
            .with_session_store(Arc::new(MemoryStore::new()))
            .with_key_loader(Arc::new(FsKeyLoader::new(&config.key_directory)))
            .with_schema_loader(Arc::new(schema_loader))
            .with_state_resolver(Arc::new(state_resolver))
            .with_oracle(Arc::new(Groth16Oracle)))
    }

    /// Build the verifier.
    pub async fn build(self) -> Result<Verifier> {
        let Self {
            verifier_identifier,
            callback_endpoint,
            session_store,
            key_loader,
            schema_loader,
            state_resolver,
            oracle,
            session_ttl,
            collaborator_timeout,
            historical_state_max_age,
            non_revocation_state_max_age,
            accept_plain_responses,
        } = self;

        let Some(verifier_identifier) = verifier_identifier else {
            bail!("verifier identifier is required, see `with_verifier_identifier`")
        };

        let Some(callback_endpoint) = callback_endpoint else {
            bail!("callback endpoint is required, see `with_callback_endpoint`")
        };

        let Some(session_store) = session_store else {
            bail!("session store is required, see `with_session_store`")
        };

        let Some(key_loader) = key_loader else {
            bail!("key loader is required, see `with_key_loader`")
        };

        let Some(schema_loader) = schema_loader else {
            bail!("schema loader is required, see `with_schema_loader`")
        };

        let Some(state_resolver) = state_resolver else {
            bail!("state resolver is required, see `with_state_resolver`")
        };

        let Some(oracle) = oracle else {
            bail!("proof oracle is required, see `with_oracle`")
        };

        Ok(Verifier {
            verifier_identifier,
            callback_endpoint,
            session_store,
            key_loader,
            schema_loader,
            state_resolver,
            oracle,
            session_ttl: session_ttl.unwrap_or(DEFAULT_SESSION_TTL),
            collaborator_timeout: collaborator_timeout.unwrap_or(DEFAULT_COLLABORATOR_TIMEOUT),
            historical_state_max_age,
            non_revocation_state_max_age: non_revocation_state_max_age
                .unwrap_or(DEFAULT_NON_REVOCATION_STATE_MAX_AGE),
            accept_plain_responses,
        })
    }

    /// Take identifier, callback endpoint and timing settings from `config`.
    pub fn with_config(self, config: &VerifierConfig) -> Self {
        let builder = self
            .with_verifier_identifier(config.verifier_identifier.clone())
            .with_callback_endpoint(config.callback_base_url.clone())
            .with_session_ttl(config.session_ttl())
            .with_collaborator_timeout(config.collaborator_timeout())
            .with_non_revocation_state_max_age(config.non_revocation_state_max_age())
            .with_plain_responses(config.accept_plain_responses);
        match config.historical_state_max_age() {
            Some(max_age) => builder.with_historical_state_max_age(max_age),
            None => builder,
        }
    }

    /// Set the DID the [Verifier] presents itself as.
    pub fn with_verifier_identifier(mut self, verifier_identifier: String) -> Self {
        self.verifier_identifier = Some(verifier_identifier);
        self
    }

    /// Set the [Url] that the [Verifier] will listen at to receive responses. Every request
    /// carries this url with its session id appended.
    pub fn with_callback_endpoint(mut self, endpoint: Url) -> Self {
        self.callback_endpoint = Some(endpoint);
        self
    }

    /// Set the [SessionStore] that the [Verifier] will use to maintain session state across
    /// transactions.
    pub fn with_session_store(
        mut self,
        session_store: Arc<dyn SessionStore + Send + Sync>,
    ) -> Self {
        self.session_store = Some(session_store);
        self
    }

    pub fn with_key_loader(mut self, key_loader: Arc<dyn KeyLoader + Send + Sync>) -> Self {
        self.key_loader = Some(key_loader);
        self
    }

    pub fn with_schema_loader(mut self, schema_loader: Arc<dyn SchemaLoader + Send + Sync>) -> Self {
        self.schema_loader = Some(schema_loader);
        self
    }

    pub fn with_state_resolver(
        mut self,
        state_resolver: Arc<dyn StateResolver + Send + Sync>,
    ) -> Self {
        self.state_resolver = Some(state_resolver);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ProofOracle + Send + Sync>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// How long an issued request stays answerable. Defaults to five minutes.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = Some(ttl);
        self
    }

    /// Upper bound for each key, schema and state lookup. Defaults to ten seconds.
    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = Some(timeout);
        self
    }

    /// Reject identity states that were replaced longer ago than `max_age`.
    pub fn with_historical_state_max_age(mut self, max_age: Duration) -> Self {
        self.historical_state_max_age = Some(max_age);
        self
    }

    /// Reject issuer non-revocation states that were replaced longer ago than `max_age`, so that
    /// a revoked credential cannot be proven against an old revocation tree. Defaults to one
    /// hour.
    pub fn with_non_revocation_state_max_age(mut self, max_age: Duration) -> Self {
        self.non_revocation_state_max_age = Some(max_age);
        self
    }

    /// Accept plain JSON responses that are not wrapped in a JWZ token. Such responses are not
    /// bound to the session by any proof, so this is off by default.
    pub fn with_plain_responses(mut self, accept: bool) -> Self {
        self.accept_plain_responses = accept;
        self
    }
}
