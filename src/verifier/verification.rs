use std::{
    collections::BTreeSet,
    future::Future,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::anyhow;
use num_bigint::BigUint;
use tracing::{debug, info, warn};

use crate::core::{
    authorization_request::{
        parameters::{ProofRequest, SessionId, AUTHORIZATION_RESPONSE_TYPE},
        AuthorizationRequest,
    },
    circuits::{AtomicQueryPubSignals, AuthPubSignals, CircuitId, VALUE_ARRAY_SIZE},
    identifier::{same_identity, Iden3Id},
    query::Query,
    response::{
        envelope::{self, JwzAuth},
        parameters::{ProofResponse, ZkProof},
    },
    schema::{schema_hash, SchemaContext},
};

use super::{
    error::VerificationError,
    oracle::OracleError,
    session::{Outcome, SessionStoreError, Status},
    state::StateResolution,
    AuthenticatedSubject, Verifier,
};

impl Verifier {
    /// Verify the raw response posted to the callback of session `session_id`.
    ///
    /// This should be triggered by a request from the holder's wallet. Unless plain responses
    /// are enabled, the response must be a JWZ token whose auth proof commits to the message,
    /// which binds the proofs to this session's thread. Verification runs without
    /// holding the session, and its outcome is recorded only if no other call completed the
    /// session in the meantime. Retryable failures and malformed payloads leave the session
    /// pending.
    pub async fn verify_response(
        &self,
        session_id: &SessionId,
        raw_response: &[u8],
    ) -> Result<AuthenticatedSubject, VerificationError> {
        let session = self
            .session_store
            .get_session(session_id)
            .await
            .map_err(|e| store_error(session_id, e))?;

        match session.status {
            Status::Complete(_) => {
                return Err(VerificationError::SessionAlreadyConsumed {
                    session_id: session_id.clone(),
                })
            }
            Status::Issued => self
                .session_store
                .update_status(session_id, Status::PendingResponse)
                .await
                .map_err(|e| store_error(session_id, e))?,
            Status::PendingResponse => {}
        }

        match self
            .check_response(&session.authorization_request, raw_response)
            .await
        {
            Ok(subject) => {
                self.session_store
                    .complete(
                        session_id,
                        Outcome::Verified {
                            subject: subject.subject.clone(),
                        },
                    )
                    .await
                    .map_err(|e| store_error(session_id, e))?;
                info!(%session_id, subject = %subject.subject, "response verified");
                Ok(subject)
            }
            Err(error) if error.is_terminal() => {
                warn!(%session_id, kind = ?error.kind(), "response rejected: {error}");
                self.session_store
                    .complete(
                        session_id,
                        Outcome::Failed {
                            reason: error.to_string(),
                        },
                    )
                    .await
                    .map_err(|e| store_error(session_id, e))?;
                Err(error)
            }
            Err(error) => {
                debug!(%session_id, kind = ?error.kind(), "response not accepted yet: {error}");
                Err(error)
            }
        }
    }

    async fn check_response(
        &self,
        request: &AuthorizationRequest,
        raw_response: &[u8],
    ) -> Result<AuthenticatedSubject, VerificationError> {
        let envelope = envelope::decode(raw_response)
            .map_err(|cause| VerificationError::MalformedResponse { cause })?;
        let response = &envelope.message;
        if envelope.auth.is_none() && !self.accept_plain_responses {
            return Err(VerificationError::MalformedResponse {
                cause: anyhow!("response is not wrapped in a JWZ token"),
            });
        }

        if response.thid != request.thid.to_string() {
            return Err(VerificationError::mismatch(format!(
                "response answers thread {}, expected {}",
                response.thid, request.thid
            )));
        }
        if response.message_type != AUTHORIZATION_RESPONSE_TYPE {
            return Err(VerificationError::mismatch(format!(
                "unexpected message type '{}'",
                response.message_type
            )));
        }
        if let Some(to) = &response.to {
            if to != &request.from {
                return Err(VerificationError::mismatch(format!(
                    "response is addressed to '{to}'"
                )));
            }
        }

        let mut answered = BTreeSet::new();
        for proof in &response.body.scope {
            if request.proof_request(proof.id).is_none() {
                return Err(VerificationError::mismatch(format!(
                    "proof {} answers no request",
                    proof.id
                )));
            }
            if !answered.insert(proof.id) {
                return Err(VerificationError::mismatch(format!(
                    "request {} is answered twice",
                    proof.id
                )));
            }
        }

        let sender = match &envelope.auth {
            Some(auth) => Some(self.check_sender(auth).await?),
            None => None,
        };

        let mut subjects = Vec::with_capacity(request.scope().len());
        for proof_request in request.scope() {
            let proof = response.proof(proof_request.id).ok_or(
                VerificationError::IncompleteResponse {
                    request_id: proof_request.id,
                },
            )?;
            subjects.push(self.check_proof(proof_request, proof).await?);
        }

        let subject = subjects.first().copied().ok_or_else(|| {
            VerificationError::IncompleteResponse {
                request_id: request.scope().first().map(|r| r.id).unwrap_or_default(),
            }
        })?;
        if let Some(other) = subjects.iter().find(|s| **s != subject) {
            return Err(VerificationError::InconsistentSubject {
                reason: format!("proofs are held by {subject} and {other}"),
            });
        }
        if let Some(sender) = sender.filter(|sender| *sender != subject) {
            return Err(VerificationError::InconsistentSubject {
                reason: format!("token is signed by {sender}, proofs are held by {subject}"),
            });
        }
        if !same_identity(&response.from, &subject.to_string()) {
            return Err(VerificationError::InconsistentSubject {
                reason: format!(
                    "response is sent by '{}', proofs are held by {subject}",
                    response.from
                ),
            });
        }

        Ok(AuthenticatedSubject {
            subject: subject.to_string(),
        })
    }

    /// Verify the auth proof of a JWZ token and return the identity that signed it.
    async fn check_sender(&self, auth: &JwzAuth) -> Result<Iden3Id, VerificationError> {
        debug!("verifying JWZ auth proof");
        let key = self.load_key(auth.circuit_id).await?;
        self.run_oracle(auth.circuit_id, key, &auth.proof, &auth.pub_signals)
            .await?;

        let signals =
            AuthPubSignals::parse(&auth.pub_signals).map_err(|e| VerificationError::InvalidProof {
                reason: format!("auth proof signals: {e:#}"),
            })?;
        if signals.challenge != auth.expected_challenge {
            return Err(VerificationError::InvalidProof {
                reason: "auth proof does not commit to the token".into(),
            });
        }

        self.check_state(
            &signals.user_id,
            &signals.user_state,
            self.historical_state_max_age,
        )
        .await?;
        Ok(signals.user_id)
    }

    /// Verify the proof answering `proof_request` and return the identity that holds the claim.
    async fn check_proof(
        &self,
        proof_request: &ProofRequest,
        proof: &ProofResponse,
    ) -> Result<Iden3Id, VerificationError> {
        let circuit_id = proof_request.circuit_id;
        if proof.circuit_id != circuit_id.as_str() {
            return Err(VerificationError::mismatch(format!(
                "request {} expects circuit {circuit_id}, got '{}'",
                proof_request.id, proof.circuit_id
            )));
        }
        let query = &proof_request.rules.query;

        debug!(request_id = proof_request.id, %circuit_id, "verifying query proof");
        let key = self.load_key(circuit_id).await?;
        let schema = self.load_schema(query).await?;
        self.run_oracle(circuit_id, key, &proof.proof, &proof.pub_signals)
            .await?;

        let signals = AtomicQueryPubSignals::parse(&proof.pub_signals)
            .map_err(|e| VerificationError::mismatch(format!("{e:#}")))?;
        check_query(query, &schema, &signals)?;

        self.check_state(
            &signals.user_id,
            &signals.user_state,
            self.historical_state_max_age,
        )
        .await?;
        let non_rev_max_age = Some(match self.historical_state_max_age {
            Some(max_age) => max_age.min(self.non_revocation_state_max_age),
            None => self.non_revocation_state_max_age,
        });
        if signals.issuer_non_rev_state != signals.issuer_state {
            self.check_state(
                &signals.issuer_id,
                &signals.issuer_state,
                self.historical_state_max_age,
            )
            .await?;
        }
        self.check_state(
            &signals.issuer_id,
            &signals.issuer_non_rev_state,
            non_rev_max_age,
        )
        .await?;

        if !query.allows_issuer(&signals.issuer_id.to_string()) {
            return Err(VerificationError::IssuerNotAllowed {
                issuer: signals.issuer_id.to_string(),
            });
        }

        Ok(signals.user_id)
    }

    async fn load_key(&self, circuit_id: CircuitId) -> Result<Vec<u8>, VerificationError> {
        self.bounded("verification key", self.key_loader.load(circuit_id))
            .await
            .map_err(|cause| VerificationError::VerificationKeyUnavailable { circuit_id, cause })
    }

    /// What the proof must commit to for the queried schema. Without a predicate only the
    /// schema hash is constrained.
    async fn load_schema(&self, query: &Query) -> Result<ExpectedSchema, VerificationError> {
        let schema_ref = query.schema();
        let unavailable = |cause| VerificationError::SchemaUnavailable {
            url: schema_ref.url.clone(),
            cause,
        };
        let document = self
            .bounded("schema", self.schema_loader.load(&schema_ref.url))
            .await
            .map_err(unavailable)?;

        match query.predicate() {
            Some(predicate) => {
                SchemaContext::new(&document, &schema_ref.schema_type, predicate.field())
                    .map(|context| ExpectedSchema {
                        hash: context.hash,
                        slot_index: Some(context.slot_index),
                    })
                    .map_err(unavailable)
            }
            None => Ok(ExpectedSchema {
                hash: schema_hash(&document, &schema_ref.schema_type),
                slot_index: None,
            }),
        }
    }

    /// Run the oracle on the blocking pool.
    async fn run_oracle(
        &self,
        circuit_id: CircuitId,
        key: Vec<u8>,
        proof: &ZkProof,
        pub_signals: &[String],
    ) -> Result<(), VerificationError> {
        let oracle = self.oracle.clone();
        let proof = proof.clone();
        let pub_signals = pub_signals.to_vec();
        let verified =
            tokio::task::spawn_blocking(move || oracle.verify(&key, &proof, &pub_signals)).await;

        match verified {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(VerificationError::InvalidProof {
                reason: format!("{circuit_id} proof does not verify"),
            }),
            Ok(Err(OracleError::Key(reason))) => {
                Err(VerificationError::VerificationKeyUnavailable {
                    circuit_id,
                    cause: anyhow!(reason),
                })
            }
            Ok(Err(OracleError::Proof(reason))) => Err(VerificationError::InvalidProof {
                reason: format!("{circuit_id} proof: {reason}"),
            }),
            Err(e) => Err(VerificationError::InvalidProof {
                reason: format!("{circuit_id} proof verification did not complete: {e}"),
            }),
        }
    }

    /// Resolve `state` of `id` on the ledger. A replaced state is accepted only while it was
    /// replaced less than `max_age` ago.
    async fn check_state(
        &self,
        id: &Iden3Id,
        state: &BigUint,
        max_age: Option<Duration>,
    ) -> Result<(), VerificationError> {
        let resolution = self
            .bounded("state resolution", self.state_resolver.resolve(id, state))
            .await
            .map_err(|cause| VerificationError::StateResolutionFailed { cause })?;

        match resolution {
            StateResolution::Latest | StateResolution::Genesis => Ok(()),
            StateResolution::Historical { replaced_at } => match max_age {
                Some(max_age) if unix_now().saturating_sub(replaced_at) > max_age.as_secs() => {
                    Err(VerificationError::StateNotTrusted {
                        reason: format!("state of {id} was replaced at {replaced_at}"),
                    })
                }
                _ => Ok(()),
            },
            StateResolution::Untrusted { reason } => {
                Err(VerificationError::StateNotTrusted { reason })
            }
        }
    }

    async fn bounded<T>(
        &self,
        what: &str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        match tokio::time::timeout(self.collaborator_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "{what} timed out after {:?}",
                self.collaborator_timeout
            )),
        }
    }
}

struct ExpectedSchema {
    hash: BigUint,
    slot_index: Option<u64>,
}

fn check_query(
    query: &Query,
    schema: &ExpectedSchema,
    signals: &AtomicQueryPubSignals,
) -> Result<(), VerificationError> {
    if signals.claim_schema != schema.hash {
        return Err(VerificationError::mismatch(format!(
            "proof is for schema {}, expected {}",
            signals.claim_schema, schema.hash
        )));
    }
    if let Some(slot_index) = schema.slot_index {
        if signals.slot_index != slot_index {
            return Err(VerificationError::mismatch(format!(
                "proof is over slot {}, expected {slot_index}",
                signals.slot_index
            )));
        }
    }
    let operator = query.operator();
    if signals.operator != operator.code() {
        return Err(VerificationError::mismatch(format!(
            "proof uses operator {}, expected {operator}",
            signals.operator
        )));
    }

    let mut expected = query
        .predicate()
        .map(|predicate| predicate.values().to_vec())
        .unwrap_or_default();
    expected.resize(VALUE_ARRAY_SIZE, BigUint::default());
    if signals.values != expected {
        return Err(VerificationError::mismatch(
            "proof compares against different values",
        ));
    }
    Ok(())
}

fn store_error(session_id: &SessionId, error: SessionStoreError) -> VerificationError {
    match error {
        SessionStoreError::NotFound => VerificationError::UnknownSession {
            session_id: session_id.clone(),
        },
        SessionStoreError::AlreadyComplete => VerificationError::SessionAlreadyConsumed {
            session_id: session_id.clone(),
        },
        other => VerificationError::StoreUnavailable {
            cause: other.into(),
        },
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
