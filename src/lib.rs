//! This library provides a verifier for zero-knowledge authentication of [iden3] decentralized
//! identities, following the iden3comm authorization protocol.
//!
//! [iden3]: <https://docs.iden3.io>
//!
//! # Verifier Usage
//!
//! You can create a verifier implementation using the [`Verifier`] type as follows:
//!
//! ```ignore
//! use zkauth::verifier::{Verifier, VerifierBuilder};
//! use zkauth::core::query::{Operator, QueryBuilder};
//!
//! // Setup verifier with the default collaborators.
//! let verifier = VerifierBuilder::from_config(&config)?.build().await?;
//!
//! // Build the claim the holder must prove.
//! let claim_query = QueryBuilder::new()
//!     .with_schema(AGE_SCHEMA_URL, "AgeCredential")
//!     .allow_any_issuer()
//!     .with_predicate("WhenUserWasVaccinated", Operator::Lt, [20201008u64])
//!     .build()?;
//!
//! // Issue an authorization request and hand it to the holder (e.g., as a QR code).
//! let (session_id, request) = verifier
//!     .issue_request("test flow", "message to sign", claim_query)
//!     .await?;
//!
//! // When the holder posts its response to the callback url, verify it.
//! let subject = verifier.verify_response(&session_id, &raw_response).await?;
//! ```
//!
//! The verifier's behavior can be customized by implementing the [`SessionStore`],
//! [`KeyLoader`], [`SchemaLoader`], [`StateResolver`] and [`ProofOracle`] traits.
//!
//! [`Verifier`]: crate::verifier::Verifier
//! [`SessionStore`]: crate::verifier::session::SessionStore
//! [`KeyLoader`]: crate::verifier::loaders::KeyLoader
//! [`SchemaLoader`]: crate::verifier::loaders::SchemaLoader
//! [`StateResolver`]: crate::verifier::state::StateResolver
//! [`ProofOracle`]: crate::verifier::oracle::ProofOracle
//!
//! # Protocol Overview
//!
//! ## Authorization Request
//!
//! 1. *Verifier creates request*: The verifier creates an [`AuthorizationRequest`] holding a
//!    single proof request: a circuit and a [`Query`] over a credential schema.
//! 2. *Session*: The request is recorded under an unguessable session id, which is appended to
//!    the callback url the holder will answer to.
//!
//! [`AuthorizationRequest`]: crate::core::authorization_request::AuthorizationRequest
//! [`Query`]: crate::core::query::Query
//!
//! ## Authorization Response
//!
//! 3. *Holder proves*: The holder produces a zero-knowledge proof of the query and posts an
//!    [`AuthorizationResponse`] wrapped in a JWZ token signed with the `auth` circuit. Plain JSON
//!    responses are only accepted when the verifier is built with `with_plain_responses`.
//!
//! [`AuthorizationResponse`]: crate::core::response::AuthorizationResponse
//!
//! ## Verification
//!
//! 4. *Binding*: The response must answer the request's thread and be addressed to the verifier.
//! 5. *Proofs*: Every proof is checked with its circuit's verification key, and its public
//!    signals are checked against the stored query and the schema.
//! 6. *Trust anchors*: The identity states the proofs commit to are resolved against the ledger.
//!    The issuer's non-revocation state must be recent.
//! 7. *Outcome*: The session completes as verified, naming the authenticated subject, or as
//!    failed. Infrastructure failures leave it open for a retry.

pub mod config;
pub mod core;
pub mod utils;
pub mod verifier;
