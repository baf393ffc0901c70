//! Label client behavior against a mock API.

use std::time::Duration;

use ci_connection::config::ApiConfig;
use ci_connection::labels::{LabelClient, LabelSet, LabelSource};
use ci_connection::CiEnvironment;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LABELS_PATH: &str = "/repos/octo/repo/issues/7/labels";

fn client(server: &MockServer, extra: &[(&str, &str)]) -> LabelClient {
    let api = ApiConfig {
        base_url: server.uri(),
        attempts: 3,
        backoff_base_seconds: 0,
        request_timeout_seconds: 5,
        ..ApiConfig::default()
    };
    let mut vars = vec![
        ("GITHUB_REPOSITORY", "octo/repo"),
        ("GITHUB_REF", "refs/pull/7/merge"),
    ];
    vars.extend_from_slice(extra);
    LabelClient::new(&api, &CiEnvironment::from_vars(vars))
        .expect("client builds")
        .with_backoff_base(Duration::from_millis(5))
}

async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map_or(0, |requests| requests.len())
}

#[tokio::test]
async fn parses_label_names() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LABELS_PATH))
        .and(header("accept", "application/vnd.github+json"))
        .and(header("x-github-api-version", "2022-11-28"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"name": "bug"}, {"name": "CI Connection Halt - Always"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let labels = client(&server, &[("GITHUB_TOKEN", "tok")])
        .fetch_labels("7")
        .await;

    assert_eq!(
        labels,
        Some(LabelSet::from(["bug", "CI Connection Halt - Always"]))
    );
}

#[tokio::test]
async fn not_found_stops_after_one_request() {
    let server = MockServer::start().await;
    Mock::given(path(LABELS_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let labels = client(&server, &[("GITHUB_TOKEN", "tok")])
        .fetch_labels("7")
        .await;

    assert_eq!(labels, None);
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn unauthorized_retries_without_token() {
    let server = MockServer::start().await;
    Mock::given(path(LABELS_PATH))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path(LABELS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "ok"}])))
        .mount(&server)
        .await;

    // A long backoff would stall this fetch if the downgrade slept.
    let client =
        client(&server, &[("GITHUB_TOKEN", "tok")]).with_backoff_base(Duration::from_secs(30));
    let labels = tokio::time::timeout(Duration::from_secs(2), client.fetch_labels("7"))
        .await
        .expect("downgrade retried without backoff");

    assert_eq!(labels, Some(LabelSet::from(["ok"])));
    let requests = server.received_requests().await.expect("recording on");
    assert_eq!(requests.len(), 2);
    assert!(requests[1].headers.get("authorization").is_none());
}

#[tokio::test]
async fn anonymous_rate_limit_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(path(LABELS_PATH))
        .respond_with(ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "0"))
        .mount(&server)
        .await;

    let labels = client(&server, &[]).fetch_labels("7").await;

    assert_eq!(labels, None);
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn downgrade_then_anonymous_failure_uses_two_attempts() {
    let server = MockServer::start().await;
    Mock::given(path(LABELS_PATH))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let labels = client(&server, &[("GITHUB_TOKEN", "tok")])
        .fetch_labels("7")
        .await;

    assert_eq!(labels, None);
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn server_errors_exhaust_attempts() {
    let server = MockServer::start().await;
    Mock::given(path(LABELS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let labels = client(&server, &[("GITHUB_TOKEN", "tok")])
        .fetch_labels("7")
        .await;

    assert_eq!(labels, None);
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn server_error_then_success() {
    let server = MockServer::start().await;
    Mock::given(path(LABELS_PATH))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(path(LABELS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let labels = client(&server, &[]).fetch_labels("7").await;

    assert_eq!(labels, Some(LabelSet::default()));
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn malformed_body_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(path(LABELS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let labels = client(&server, &[]).fetch_labels("7").await;

    assert_eq!(labels, None);
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn non_pr_ref_has_no_labels_and_no_requests() {
    let server = MockServer::start().await;

    let labels = client(&server, &[("GITHUB_REF", "refs/heads/main")])
        .retrieve_labels()
        .await;

    assert_eq!(labels, Some(LabelSet::default()));
    assert_eq!(request_count(&server).await, 0);
}

#[tokio::test]
async fn missing_ref_is_undetermined() {
    let server = MockServer::start().await;
    let api = ApiConfig {
        base_url: server.uri(),
        ..ApiConfig::default()
    };
    let client = LabelClient::new(&api, &CiEnvironment::default()).expect("client builds");

    assert_eq!(client.labels().await, None);
}

#[tokio::test]
async fn falls_back_to_event_file() {
    let server = MockServer::start().await;
    Mock::given(path(LABELS_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir");
    let event = temp.path().join("event.json");
    std::fs::write(
        &event,
        json!({"pull_request": {"labels": [{"name": "stale"}]}}).to_string(),
    )
    .expect("write event");
    let event = event.to_str().expect("utf8 path");

    let labels = client(&server, &[("GITHUB_EVENT_PATH", event)])
        .retrieve_labels()
        .await;

    assert_eq!(labels, Some(LabelSet::from(["stale"])));
}

#[tokio::test]
async fn event_file_without_pull_request_is_empty() {
    let server = MockServer::start().await;
    Mock::given(path(LABELS_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir");
    let event = temp.path().join("event.json");
    std::fs::write(&event, r#"{"action": "opened"}"#).expect("write event");
    let event = event.to_str().expect("utf8 path");

    let labels = client(&server, &[("GITHUB_EVENT_PATH", event)])
        .retrieve_labels()
        .await;

    assert_eq!(labels, Some(LabelSet::default()));
}

#[tokio::test]
async fn api_and_event_file_both_failing_is_undetermined() {
    let server = MockServer::start().await;
    Mock::given(path(LABELS_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let labels = client(&server, &[("GITHUB_EVENT_PATH", "/nonexistent/event.json")])
        .retrieve_labels()
        .await;

    assert_eq!(labels, None);
}

#[test]
fn labels_url_uses_repository() {
    let api = ApiConfig {
        base_url: "https://api.example/".into(),
        ..ApiConfig::default()
    };
    let env = CiEnvironment::from_vars([("GITHUB_REPOSITORY", "octo/repo")]);
    let client = LabelClient::new(&api, &env).expect("client builds");

    assert_eq!(
        client.labels_url("12").as_deref(),
        Some("https://api.example/repos/octo/repo/issues/12/labels")
    );
}
