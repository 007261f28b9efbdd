use super::*;
use crate::fake::{envelope_ok, FakeTransport};
use crate::transport::Method;
use serde_json::json;

fn gateway(fake: &Arc<FakeTransport>, retries: u32) -> BackendGateway {
    BackendGateway::new(fake.clone(), Role::Reviewer).with_retries(retries, Duration::ZERO)
}

fn evidence_payload(version: i64) -> Value {
    json!({
        "id": "E1",
        "project_id": "P1",
        "period_id": "2024-Q1",
        "type": "TEXT",
        "title": "Minutes",
        "uri": "coordination meeting minutes",
        "status": "SUBMITTED",
        "version": version,
        "submitted_at": "2024-03-01T10:00:00Z",
        "created_at": "2024-02-28T10:00:00Z",
        "updated_at": "2024-03-02T10:00:00Z"
    })
}

const REVIEW_PATH: &str = "/periods/2024-Q1/evidences/E1/review";

#[test]
fn test_idempotency_key_is_stable_and_scoped() {
    let a = idempotency_key("scope", &json!({"b": 1, "a": 2}));
    let b = idempotency_key("scope", &json!({"a": 2, "b": 1}));
    let c = idempotency_key("other", &json!({"a": 2, "b": 1}));
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
}

#[test]
fn test_classify() {
    let ok = classify(&envelope_ok(json!({"x": 1}))).unwrap();
    assert_eq!(ok, json!({"x": 1}));

    let unavailable = classify(&TransportResponse {
        status: 503,
        body: "upstream".into(),
    });
    assert!(matches!(unavailable, Err(GatewayError::Unavailable(_))));

    let conflict = classify(&crate::fake::envelope_err(409, "STALE", "version 3 != 4"));
    assert_eq!(conflict, Err(GatewayError::VersionConflict("version 3 != 4".into())));

    let coded = classify(&crate::fake::envelope_err(400, "VERSION_CONFLICT", "stale"));
    assert!(matches!(coded, Err(GatewayError::VersionConflict(_))));

    let rejected = classify(&crate::fake::envelope_err(403, "FORBIDDEN", "role"));
    assert!(matches!(rejected, Err(GatewayError::Rejected { status: 403, .. })));

    let html_404 = classify(&TransportResponse {
        status: 404,
        body: "<h1>Not Found</h1>".into(),
    });
    assert!(matches!(html_404, Err(GatewayError::Rejected { status: 404, .. })));

    let garbage_200 = classify(&TransportResponse {
        status: 200,
        body: "[]".into(),
    });
    assert!(matches!(garbage_200, Err(GatewayError::UnrecognizedPayload(_))));
}

#[test]
fn test_gateway_errors_map_to_workflow_kinds() {
    use bimscore_model::ErrorKind;
    let cases = [
        (GatewayError::Unavailable("x".into()), ErrorKind::Unavailable),
        (GatewayError::VersionConflict("x".into()), ErrorKind::Conflict),
        (GatewayError::UnrecognizedPayload("x".into()), ErrorKind::Schema),
        (
            GatewayError::Rejected {
                status: 422,
                code: "INVALID".into(),
                message: "x".into(),
            },
            ErrorKind::Conflict,
        ),
    ];
    for (err, kind) in cases {
        assert_eq!(WorkflowError::from(err).kind(), kind);
    }
}

#[tokio::test]
async fn test_review_sends_headers_and_body() {
    let fake = Arc::new(FakeTransport::new());
    fake.ok(
        Method::Post,
        REVIEW_PATH,
        json!({
            "evidence": evidence_payload(5),
            "review": {
                "decision": "ACCEPTABLE",
                "reason": "complete",
                "reviewed_by": "ho-1",
                "reviewed_at": "2024-03-02T10:00:00Z"
            }
        }),
    );
    let gw = gateway(&fake, 0);

    let response = gw
        .review_evidence("P1", "2024-Q1", "E1", ReviewOutcome::Acceptable, "complete", 4)
        .await
        .unwrap();
    assert_eq!(response.evidence.version, Some(5));
    assert_eq!(response.entry.unwrap().outcome, ReviewOutcome::Acceptable);

    let sent = fake.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].header(ROLE_HEADER), Some("REVIEWER"));
    assert!(sent[0].header(IDEMPOTENCY_HEADER).is_some());
    let body = sent[0].body.as_ref().unwrap();
    assert_eq!(body["decision"], "ACCEPTABLE");
    assert_eq!(body["if_match_version"], 4);
    assert_eq!(body["evidence_id"], "E1");
}

#[tokio::test]
async fn test_unavailable_is_retried_with_same_key() {
    let fake = Arc::new(FakeTransport::new());
    fake.offline(Method::Post, REVIEW_PATH)
        .respond(
            Method::Post,
            REVIEW_PATH,
            Ok(TransportResponse {
                status: 502,
                body: String::new(),
            }),
        )
        .ok(Method::Post, REVIEW_PATH, json!({ "evidence": evidence_payload(5) }));
    let gw = gateway(&fake, 3);

    let response = gw
        .review_evidence("P1", "2024-Q1", "E1", ReviewOutcome::Rejected, "blurry", 4)
        .await
        .unwrap();
    assert!(response.entry.is_none());

    let sent = fake.requests_to(Method::Post, REVIEW_PATH);
    assert_eq!(sent.len(), 3);
    let keys: Vec<_> = sent.iter().map(|r| r.header(IDEMPOTENCY_HEADER)).collect();
    assert!(keys.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let fake = Arc::new(FakeTransport::new());
    fake.offline(Method::Post, "/periods/2024-Q1/approve");
    let gw = gateway(&fake, 2);

    let err = gw.approve_period("P1", "2024-Q1", "ok", 7).await.unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable(_)));
    assert_eq!(fake.requests().len(), 3);
}

#[tokio::test]
async fn test_version_conflict_is_not_retried() {
    let fake = Arc::new(FakeTransport::new());
    fake.fail(Method::Post, REVIEW_PATH, 409, "VERSION_CONFLICT", "expected 6");
    let gw = gateway(&fake, 5);

    let err = gw
        .review_evidence("P1", "2024-Q1", "E1", ReviewOutcome::Acceptable, "ok", 4)
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::VersionConflict("expected 6".into()));
    assert_eq!(fake.requests().len(), 1);
}

#[tokio::test]
async fn test_reads_are_single_attempt() {
    let fake = Arc::new(FakeTransport::new());
    let gw = gateway(&fake, 5);
    let err = gw.list_evidence("P1", "2024-Q1").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(fake.requests().len(), 1);
    assert_eq!(fake.requests()[0].query, vec![("project_id".to_string(), "P1".to_string())]);
}
