use std::{
    sync::{atomic::Ordering, Arc},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use fixtures::{
    plain_response, proof_response, query_signals, response, sign, signed, vaccination_query,
    valid_response, Harness, Identity, AGE_SCHEMA_URL, AGE_TYPE, CALLBACK, VACCINATION_FIELD,
    VERIFIER_DID,
};
use zkauth::{
    core::{
        authorization_request::{parameters::SessionId, AuthorizationRequest},
        circuits::CircuitId,
        query::{Operator, QueryBuilder},
        response::AuthorizationResponse,
    },
    verifier::{
        error::{ErrorKind, VerificationError},
        session::{Outcome, Status},
        state::StateResolution,
    },
};


#[tokio::test]
async fn vaccination_date_sign_in() {
    let harness = Harness::new().await;
    let verifier = &harness.verifier;

    let (session_id, request) = verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();

    assert_eq!(request.from, VERIFIER_DID);
    assert_eq!(request.body.reason, "test flow");
    assert_eq!(request.body.message.as_deref(), Some("message to sign"));
    assert_eq!(request.thid, request.id);
    assert!(request
        .body
        .callback_url
        .as_str()
        .starts_with(&format!("{CALLBACK}?sessionId=")));
    assert_eq!(request.session_id().unwrap(), session_id);

    let [proof_request] = request.scope() else {
        panic!("expected a single proof request")
    };
    assert_eq!(proof_request.id, 1);
    assert_eq!(proof_request.circuit_id, CircuitId::AtomicQuerySig);
    let query = &proof_request.rules.query;
    assert_eq!(query.schema().url, AGE_SCHEMA_URL);
    assert_eq!(query.schema().schema_type, AGE_TYPE);
    assert_eq!(query.operator(), Operator::Lt);
    assert_eq!(query.allowed_issuers(), ["*"]);

    assert_eq!(
        verifier.poll_status(&session_id).await.unwrap(),
        Status::Issued
    );

    let subject = verifier
        .verify_response(&session_id, &valid_response(&harness, &request))
        .await
        .unwrap();
    assert_eq!(subject.subject, harness.holder.id.to_string());

    assert_eq!(
        verifier.poll_status(&session_id).await.unwrap(),
        Status::Complete(Outcome::Verified {
            subject: harness.holder.id.to_string()
        })
    );
}

#[tokio::test]
async fn responses_are_accepted_once() {
    let harness = Harness::new().await;
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    let raw = valid_response(&harness, &request);

    harness
        .verifier
        .verify_response(&session_id, &raw)
        .await
        .unwrap();
    let replay = harness
        .verifier
        .verify_response(&session_id, &raw)
        .await
        .unwrap_err();
    assert_eq!(replay.kind(), ErrorKind::SessionAlreadyConsumed);
}

#[tokio::test]
async fn unknown_session() {
    let harness = Harness::new().await;
    let session_id = SessionId::generate();

    let error = harness
        .verifier
        .verify_response(&session_id, b"{}")
        .await
        .unwrap_err();
    assert!(matches!(error, VerificationError::UnknownSession { .. }));
    assert_eq!(
        harness.verifier.poll_status(&session_id).await.unwrap_err().kind(),
        ErrorKind::UnknownSession
    );
}

#[tokio::test]
async fn issuer_allow_list() {
    let harness = Harness::new().await;
    let stranger = Identity::new(37);
    harness.resolver.register(&stranger);

    let claim_query = QueryBuilder::new()
        .with_schema(AGE_SCHEMA_URL, AGE_TYPE)
        .allow_issuer(harness.issuer.id.to_string())
        .with_predicate(VACCINATION_FIELD, Operator::Lt, [20201008u64])
        .build()
        .unwrap();

    let (allowed_session, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", claim_query.clone())
        .await
        .unwrap();
    harness
        .verifier
        .verify_response(&allowed_session, &valid_response(&harness, &request))
        .await
        .unwrap();

    let (rejected_session, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", claim_query)
        .await
        .unwrap();
    let signals = query_signals(&harness.holder, &stranger, 20201008);
    let raw = signed(
        &harness,
        &response(&request, &harness.holder, vec![proof_response(1, signals)]),
    );

    let error = harness
        .verifier
        .verify_response(&rejected_session, &raw)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::IssuerNotAllowed);
    assert!(matches!(
        harness.verifier.poll_status(&rejected_session).await.unwrap(),
        Status::Complete(Outcome::Failed { .. })
    ));
}

#[tokio::test]
async fn proof_of_a_different_query_is_rejected() {
    let harness = Harness::new().await;
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();

    let signals = query_signals(&harness.holder, &harness.issuer, 20301008);
    let raw = signed(
        &harness,
        &response(&request, &harness.holder, vec![proof_response(1, signals)]),
    );

    let error = harness
        .verifier
        .verify_response(&session_id, &raw)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::RequestResponseMismatch);
    assert!(harness
        .verifier
        .poll_status(&session_id)
        .await
        .unwrap()
        .is_complete());
}

#[tokio::test]
async fn forged_signals_fail_the_proof() {
    let harness = Harness::new().await;
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();

    // A proof generated for an honest value, replayed with the signals of another identity.
    let honest = query_signals(&harness.holder, &harness.issuer, 20201008);
    let mut proof = proof_response(1, honest);
    proof.pub_signals = query_signals(&Identity::new(41), &harness.issuer, 20201008);
    let raw = signed(&harness, &response(&request, &harness.holder, vec![proof]));

    let error = harness
        .verifier
        .verify_response(&session_id, &raw)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidProof);
    assert!(matches!(
        harness.verifier.poll_status(&session_id).await.unwrap(),
        Status::Complete(Outcome::Failed { .. })
    ));
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let harness = Arc::new(Harness::new().await);

    let mut issued = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let harness = harness.clone();
        issued.spawn(async move {
            harness
                .verifier
                .issue_request("test flow", "message to sign", vaccination_query())
                .await
                .unwrap()
        });
    }

    let mut sessions = Vec::new();
    while let Some(result) = issued.join_next().await {
        sessions.push(result.unwrap());
    }
    let mut ids = sessions
        .iter()
        .map(|(session_id, _)| session_id.clone())
        .collect::<Vec<_>>();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 16);

    let mut verified = tokio::task::JoinSet::new();
    for (session_id, request) in sessions {
        let harness = harness.clone();
        verified.spawn(async move {
            let raw = valid_response(&harness, &request);
            harness
                .verifier
                .verify_response(&session_id, &raw)
                .await
                .unwrap()
        });
    }
    while let Some(result) = verified.join_next().await {
        assert_eq!(result.unwrap().subject, harness.holder.id.to_string());
    }
}

#[tokio::test]
async fn ledger_outage_leaves_the_session_open() {
    let harness = Harness::new().await;
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    let raw = valid_response(&harness, &request);

    harness.resolver.offline.store(true, Ordering::SeqCst);
    let error = harness
        .verifier
        .verify_response(&session_id, &raw)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::StateResolutionFailed);
    assert!(error.is_retryable());
    assert_eq!(
        harness.verifier.poll_status(&session_id).await.unwrap(),
        Status::PendingResponse
    );

    harness.resolver.offline.store(false, Ordering::SeqCst);
    harness
        .verifier
        .verify_response(&session_id, &raw)
        .await
        .unwrap();
}

#[tokio::test]
async fn missing_verification_key_is_retryable() {
    let harness = Harness::new().await;
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();

    harness.key_loader.offline.store(true, Ordering::SeqCst);
    let error = harness
        .verifier
        .verify_response(&session_id, &valid_response(&harness, &request))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        VerificationError::VerificationKeyUnavailable {
            circuit_id: CircuitId::Auth,
            ..
        }
    ));
    assert_eq!(
        harness.verifier.poll_status(&session_id).await.unwrap(),
        Status::PendingResponse
    );
}

#[tokio::test]
async fn sender_must_hold_the_proofs() {
    let harness = Harness::new().await;
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();

    let signals = query_signals(&harness.holder, &harness.issuer, 20201008);
    let raw = signed(
        &harness,
        &response(&request, &Identity::new(43), vec![proof_response(1, signals)]),
    );

    let error = harness
        .verifier
        .verify_response(&session_id, &raw)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InconsistentSubject);
}

#[tokio::test]
async fn unanswered_proof_request() {
    let harness = Harness::new().await;
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();

    let raw = signed(&harness, &response(&request, &harness.holder, vec![]));
    let error = harness
        .verifier
        .verify_response(&session_id, &raw)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        VerificationError::IncompleteResponse { request_id: 1 }
    ));
}

#[tokio::test]
async fn untrusted_issuer_state() {
    let harness = Harness::new().await;
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();

    let mut issuer = harness.issuer.clone();
    issuer.state += 1u32;
    let signals = query_signals(&harness.holder, &issuer, 20201008);
    let raw = signed(
        &harness,
        &response(&request, &harness.holder, vec![proof_response(1, signals)]),
    );

    let error = harness
        .verifier
        .verify_response(&session_id, &raw)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::StateNotTrusted);
}

#[tokio::test]
async fn stale_historical_states() {
    let harness = Harness::with(|builder| {
        builder.with_historical_state_max_age(Duration::from_secs(3600))
    })
    .await;
    let now = unix_now();

    harness.resolver.register_as(
        &harness.issuer,
        StateResolution::Historical {
            replaced_at: now - 60,
        },
    );
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    harness
        .verifier
        .verify_response(&session_id, &valid_response(&harness, &request))
        .await
        .unwrap();

    harness.resolver.register_as(
        &harness.issuer,
        StateResolution::Historical {
            replaced_at: now - 7200,
        },
    );
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    let error = harness
        .verifier
        .verify_response(&session_id, &valid_response(&harness, &request))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::StateNotTrusted);
}

#[tokio::test(start_paused = true)]
async fn expired_sessions_are_unknown() {
    let harness =
        Harness::with(|builder| builder.with_session_ttl(Duration::from_secs(60))).await;
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;

    let error = harness
        .verifier
        .verify_response(&session_id, &valid_response(&harness, &request))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::UnknownSession);
}

#[tokio::test]
async fn response_to_another_thread() {
    let harness = Harness::new().await;
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();

    let signals = query_signals(&harness.holder, &harness.issuer, 20201008);
    let mut message = response(&request, &harness.holder, vec![proof_response(1, signals)]);
    message.thid = uuid::Uuid::new_v4().to_string();
    let raw = signed(&harness, &message);

    let error = harness
        .verifier
        .verify_response(&session_id, &raw)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::RequestResponseMismatch);
}

#[tokio::test]
async fn garbage_does_not_consume_the_session() {
    let harness = Harness::new().await;
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();

    let error = harness
        .verifier
        .verify_response(&session_id, b"not a response")
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::MalformedResponse);
    assert_eq!(
        harness.verifier.poll_status(&session_id).await.unwrap(),
        Status::PendingResponse
    );

    harness
        .verifier
        .verify_response(&session_id, &valid_response(&harness, &request))
        .await
        .unwrap();
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[tokio::test]
async fn captured_proofs_do_not_open_other_sessions() {
    let harness = Harness::new().await;
    let impostor = Identity::new(53);
    harness.resolver.register(&impostor);

    let (first_session, first_request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    let token = valid_response(&harness, &first_request);
    harness
        .verifier
        .verify_response(&first_session, &token)
        .await
        .unwrap();

    let (second_session, second_request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    let captured: AuthorizationResponse =
        serde_json::from_slice(&plain_response(&harness, &first_request)).unwrap();
    let mut rewrapped = captured.clone();
    rewrapped.thid = second_request.thid.to_string();

    // Unsigned, under the second thread.
    let error = harness
        .verifier
        .verify_response(&second_session, &serde_json::to_vec(&rewrapped).unwrap())
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::MalformedResponse);
    assert_eq!(
        harness.verifier.poll_status(&second_session).await.unwrap(),
        Status::PendingResponse
    );

    // The holder's token, as captured.
    let error = harness
        .verifier
        .verify_response(&second_session, &token)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::RequestResponseMismatch);

    // Signed by someone who does not hold the proofs.
    let (third_session, third_request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    let mut rewrapped = captured;
    rewrapped.thid = third_request.thid.to_string();
    let error = harness
        .verifier
        .verify_response(
            &third_session,
            &sign(&impostor, &serde_json::to_vec(&rewrapped).unwrap()),
        )
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InconsistentSubject);
}

#[tokio::test]
async fn plain_responses_are_opt_in() {
    let harness = Harness::new().await;
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    let error = harness
        .verifier
        .verify_response(&session_id, &plain_response(&harness, &request))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::MalformedResponse);

    let harness = Harness::with(|builder| builder.with_plain_responses(true)).await;
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    let subject = harness
        .verifier
        .verify_response(&session_id, &plain_response(&harness, &request))
        .await
        .unwrap();
    assert_eq!(subject.subject, harness.holder.id.to_string());
}

#[tokio::test]
async fn jwz_signed_by_someone_else() {
    let harness = Harness::new().await;
    let impostor = Identity::new(53);
    harness.resolver.register(&impostor);
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();

    let token = sign(&impostor, &plain_response(&harness, &request));
    let error = harness
        .verifier
        .verify_response(&session_id, &token)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InconsistentSubject);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_responses_complete_a_session_once() {
    let harness = Arc::new(Harness::new().await);
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    let token = Arc::new(valid_response(&harness, &request));

    let mut attempts = tokio::task::JoinSet::new();
    for _ in 0..32 {
        let harness = harness.clone();
        let session_id = session_id.clone();
        let token = token.clone();
        attempts.spawn(async move { harness.verifier.verify_response(&session_id, &token).await });
    }

    let mut verified = 0;
    while let Some(result) = attempts.join_next().await {
        match result.unwrap() {
            Ok(_) => verified += 1,
            Err(error) => assert_eq!(error.kind(), ErrorKind::SessionAlreadyConsumed),
        }
    }
    assert_eq!(verified, 1);
    assert!(matches!(
        harness.verifier.poll_status(&session_id).await.unwrap(),
        Status::Complete(Outcome::Verified { .. })
    ));
}

#[tokio::test]
async fn field_missing_from_the_schema() {
    let harness = Harness::new().await;
    let claim_query = QueryBuilder::new()
        .with_schema(AGE_SCHEMA_URL, AGE_TYPE)
        .allow_any_issuer()
        .with_predicate("favouriteColour", Operator::Eq, [3u64])
        .build()
        .unwrap();
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", claim_query)
        .await
        .unwrap();

    let error = harness
        .verifier
        .verify_response(&session_id, &valid_response(&harness, &request))
        .await
        .unwrap_err();
    assert!(matches!(
        &error,
        VerificationError::SchemaUnavailable { url, .. } if url == AGE_SCHEMA_URL
    ));
    assert!(error.is_retryable());
    assert_eq!(
        harness.verifier.poll_status(&session_id).await.unwrap(),
        Status::PendingResponse
    );
}

#[tokio::test]
async fn non_revocation_state_must_be_recent() {
    let harness = Harness::new().await;
    let revocation_tree = Identity {
        id: harness.issuer.id,
        state: &harness.issuer.state + 1u32,
    };
    let answer = |request: &AuthorizationRequest| {
        let mut signals = query_signals(&harness.holder, &harness.issuer, 20201008);
        signals[5] = revocation_tree.state.to_string();
        signed(
            &harness,
            &response(request, &harness.holder, vec![proof_response(1, signals)]),
        )
    };

    // Replaced two hours ago: the credential may have been revoked since.
    harness.resolver.register_as(
        &revocation_tree,
        StateResolution::Historical {
            replaced_at: unix_now() - 7200,
        },
    );
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    let error = harness
        .verifier
        .verify_response(&session_id, &answer(&request))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::StateNotTrusted);

    harness.resolver.register_as(
        &revocation_tree,
        StateResolution::Historical {
            replaced_at: unix_now() - 600,
        },
    );
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    harness
        .verifier
        .verify_response(&session_id, &answer(&request))
        .await
        .unwrap();
}

#[tokio::test]
async fn old_holder_states_are_not_bound_by_the_revocation_window() {
    let harness = Harness::new().await;
    harness.resolver.register_as(
        &harness.holder,
        StateResolution::Historical {
            replaced_at: unix_now() - 7200,
        },
    );
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    harness
        .verifier
        .verify_response(&session_id, &valid_response(&harness, &request))
        .await
        .unwrap();
}

#[tokio::test]
async fn custom_revocation_window() {
    let harness = Harness::with(|builder| {
        builder.with_non_revocation_state_max_age(Duration::from_secs(3 * 3600))
    })
    .await;
    harness.resolver.register_as(
        &harness.issuer,
        StateResolution::Historical {
            replaced_at: unix_now() - 7200,
        },
    );
    let (session_id, request) = harness
        .verifier
        .issue_request("test flow", "message to sign", vaccination_query())
        .await
        .unwrap();
    harness
        .verifier
        .verify_response(&session_id, &valid_response(&harness, &request))
        .await
        .unwrap();
}
