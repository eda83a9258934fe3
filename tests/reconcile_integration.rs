//! Reconciliation driver tests against a mocked Compute Engine API
//!
//! Each test invokes the driver repeatedly on the same node context, the way
//! the host does after a retry signal, and checks that every resource sees at
//! most one mutating call.

use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{bearer_token, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gcp_lifecycle::config::GcpConfig;
use gcp_lifecycle::error::OperationError;
use gcp_lifecycle::gcp::auth::GcpCredentials;
use gcp_lifecycle::gcp::client::{Endpoints, GcpClient};
use gcp_lifecycle::gcp::operation::Operation;
use gcp_lifecycle::host::NodeContext;
use gcp_lifecycle::lifecycle::{handle_multiple_calls, ReconciliationBatch, RetryPolicy};
use gcp_lifecycle::resource::firewall::FirewallRule;
use gcp_lifecycle::resource::{ResourceHandle, Verb};

const FIREWALLS: &str = "/compute/v1/projects/test-project/global/firewalls";
const OPERATIONS: &str = "/compute/v1/projects/test-project/global/operations";

fn client(server: &MockServer) -> GcpClient {
    let config = GcpConfig {
        project: "test-project".to_string(),
        zone: "us-central1-a".to_string(),
        ..GcpConfig::default()
    };
    GcpClient::with_credentials(&config, GcpCredentials::from_static("test-token"))
        .unwrap()
        .with_endpoints(Endpoints::with_base(&server.uri()))
}

fn rule(name: &str) -> FirewallRule {
    FirewallRule::new(ResourceHandle::global(name, "test-project"), "global/networks/default")
        .with_sources(vec!["10.0.0.0/8".to_string()])
}

fn conflict() -> Value {
    json!({
        "error": {
            "code": 409,
            "message": "The resource is in use",
            "errors": [{"domain": "global", "reason": "resourceInUseByAnotherResource"}]
        }
    })
}

fn retry_message(err: OperationError) -> String {
    match err {
        OperationError::Retry { message, .. } => message,
        other => panic!("expected a retry signal, got {other:?}"),
    }
}

#[tokio::test]
async fn test_create_resumes_pending_rule_without_reissuing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(FIREWALLS))
        .and(bearer_token("test-token"))
        .and(body_partial_json(json!({"name": "rule-a"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "op-a",
            "status": "DONE"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(FIREWALLS))
        .and(body_partial_json(json!({"name": "rule-b"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "op-b",
            "status": "PENDING"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}/op-b", OPERATIONS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "op-b",
            "status": "DONE"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let policy = RetryPolicy::default();
    let rules = vec![rule("rule-a"), rule("rule-b")];
    let mut ctx = NodeContext::new("sg", "security_group", "sg_a1b2c3");

    let first = handle_multiple_calls(&mut ctx, &client, &rules, Verb::Create, &policy).await;
    let message = retry_message(assert_err!(first));
    assert!(message.contains("rule-b"));
    assert!(!message.contains("rule-a"));

    let batch = ReconciliationBatch::load(&ctx).unwrap();
    assert!(batch.is_done("rule-a"));
    assert!(!batch.is_done("rule-b"));

    let second = handle_multiple_calls(&mut ctx, &client, &rules, Verb::Create, &policy).await;
    assert_ok!(second);

    let batch = ReconciliationBatch::load(&ctx).unwrap();
    assert!(batch.is_done("rule-a"));
    assert!(batch.is_done("rule-b"));
}

#[tokio::test]
async fn test_delete_with_persistent_conflict_keeps_retrying() {
    let server = MockServer::start().await;

    for name in ["rule-1", "rule-3"] {
        Mock::given(method("DELETE"))
            .and(path(format!("{}/{}", FIREWALLS, name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": format!("op-{}", name),
                "status": "DONE"
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    Mock::given(method("DELETE"))
        .and(path(format!("{}/rule-2", FIREWALLS)))
        .respond_with(ResponseTemplate::new(409).set_body_json(conflict()))
        .expect(3)
        .mount(&server)
        .await;

    let client = client(&server);
    let policy = RetryPolicy::default();
    let rules = vec![rule("rule-1"), rule("rule-2"), rule("rule-3")];
    let mut ctx = NodeContext::new("sg", "security_group", "sg_a1b2c3");

    for _ in 0..3 {
        let result = handle_multiple_calls(&mut ctx, &client, &rules, Verb::Delete, &policy).await;
        let message = retry_message(assert_err!(result));
        assert!(message.contains("rule-2"));
        assert!(!message.contains("rule-1"));
        assert!(!message.contains("rule-3"));

        let batch = ReconciliationBatch::load(&ctx).unwrap();
        assert!(batch.is_done("rule-1"));
        assert!(batch.is_done("rule-3"));
        assert!(batch.get("rule-2").is_none());
    }
}

#[tokio::test]
async fn test_completed_batch_issues_no_calls() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server);
    let rules = vec![rule("rule-a")];
    let mut ctx = NodeContext::new("sg", "security_group", "sg_a1b2c3");
    ctx.runtime_mut().insert(
        "_operations",
        json!({"rule-a": {"name": "op-a", "status": "DONE"}}),
    );

    let result = handle_multiple_calls(&mut ctx, &client, &rules, Verb::Create, &RetryPolicy::default()).await;
    assert_ok!(result);
}

#[tokio::test]
async fn test_done_operation_with_error_is_terminal_and_forgotten() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(FIREWALLS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "op-a",
            "status": "DONE",
            "error": {"errors": [{"code": "INVALID_USAGE", "message": "Invalid source range"}]}
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    let rules = vec![rule("rule-a")];
    let mut ctx = NodeContext::new("sg", "security_group", "sg_a1b2c3");

    let err = handle_multiple_calls(&mut ctx, &client, &rules, Verb::Create, &RetryPolicy::default())
        .await
        .unwrap_err();
    assert!(!err.is_retry());
    assert!(err.to_string().contains("Invalid source range"));

    let batch = ReconciliationBatch::load(&ctx).unwrap();
    assert!(batch.get("rule-a").is_none());
}

#[tokio::test]
async fn test_malformed_request_is_terminal_after_persisting_progress() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(FIREWALLS))
        .and(body_partial_json(json!({"name": "rule-a"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "op-a",
            "status": "PENDING"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(FIREWALLS))
        .and(body_partial_json(json!({"name": "rule-b"})))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "Invalid value for field", "errors": [{"reason": "invalid"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let rules = vec![rule("rule-a"), rule("rule-b")];
    let mut ctx = NodeContext::new("sg", "security_group", "sg_a1b2c3");

    let err = handle_multiple_calls(&mut ctx, &client, &rules, Verb::Create, &RetryPolicy::default())
        .await
        .unwrap_err();
    assert!(!err.is_retry());
    assert!(err.to_string().contains("Invalid value for field"));

    let batch = ReconciliationBatch::load(&ctx).unwrap();
    assert_eq!(batch.get("rule-a").unwrap()["name"], "op-a");
}

#[tokio::test]
async fn test_delete_of_missing_rule_counts_as_done() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path(format!("{}/rule-gone", FIREWALLS)))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": 404, "message": "not found", "errors": [{"reason": "notFound"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let rules = vec![rule("rule-gone")];
    let mut ctx = NodeContext::new("sg", "security_group", "sg_a1b2c3");

    let result = handle_multiple_calls(&mut ctx, &client, &rules, Verb::Delete, &RetryPolicy::default()).await;
    assert_ok!(result);
    assert!(ReconciliationBatch::load(&ctx).unwrap().is_done("rule-gone"));
}

#[tokio::test]
async fn test_corrupt_batch_is_terminal() {
    let server = MockServer::start().await;
    let client = client(&server);
    let mut ctx = NodeContext::new("sg", "security_group", "sg_a1b2c3");
    ctx.runtime_mut().insert("_operations", json!(["rule-a"]));

    let err = handle_multiple_calls(&mut ctx, &client, &[rule("rule-a")], Verb::Create, &RetryPolicy::default())
        .await
        .unwrap_err();
    assert!(!err.is_retry());
}

#[tokio::test]
async fn test_operation_wait_polls_until_done() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/op-wait", OPERATIONS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "op-wait", "status": "RUNNING"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}/op-wait", OPERATIONS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "op-wait",
            "status": "DONE",
            "targetLink": "https://compute/projects/test-project/global/firewalls/fw-a"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let operation = assert_ok!(Operation::from_response(
        &json!({"name": "op-wait", "status": "PENDING"}),
        "test-project"
    ));
    let done = assert_ok!(operation.wait(&client(&server)).await);
    assert_eq!(done["status"], "DONE");
    assert!(done["targetLink"].as_str().is_some_and(|link| link.ends_with("fw-a")));
}

#[tokio::test]
async fn test_operation_wait_reports_operation_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/op-bad", OPERATIONS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "op-bad",
            "status": "DONE",
            "error": {"errors": [{"code": "QUOTA_EXCEEDED", "message": "Quota exceeded"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let operation = assert_ok!(Operation::from_response(
        &json!({"name": "op-bad", "status": "RUNNING"}),
        "test-project"
    ));
    let err = assert_err!(operation.wait(&client(&server)).await);
    assert!(err.to_string().contains("Quota exceeded"));
}
