use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use issues_gateway::github::{GithubClient, GithubConfig};
use issues_gateway::http_server::{router, AppState};
use issues_gateway::store::EventStore;
use issues_gateway::verification;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &[u8] = b"s3cr3t";

struct TestContext {
    state: AppState,
    _dir: TempDir,
}

impl TestContext {
    fn new(api_url: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let events = EventStore::in_dir(dir.path()).unwrap();
        let github = GithubClient::new(GithubConfig {
            api_url: api_url.to_string(),
            token: "test-token".to_string(),
            owner: "octo".to_string(),
            repo: "hello".to_string(),
            ..Default::default()
        })
        .unwrap();
        Self {
            state: AppState::new(github, events, SECRET.to_vec()),
            _dir: dir,
        }
    }

    fn app(&self) -> Router {
        router(self.state.clone())
    }
}

fn webhook_request(body: &[u8], signature: Option<&str>, event: &str, delivery: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-GitHub-Event", event);
    if let Some(signature) = signature {
        builder = builder.header("X-Hub-Signature-256", signature);
    }
    if let Some(delivery) = delivery {
        builder = builder.header("X-GitHub-Delivery", delivery);
    }
    builder.body(Body::from(body.to_vec())).unwrap()
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn bad_signature_is_rejected_and_nothing_stored() {
    let ctx = TestContext::new("http://127.0.0.1:9");
    let body = json!({"zen": "Keep it logically awesome."}).to_string();

    let response = ctx
        .app()
        .oneshot(webhook_request(body.as_bytes(), Some("sha256=deadbeef"), "ping", Some("delivery-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let error = body_json(response).await;
    assert_eq!(error["error"], "signature mismatch");
    assert!(ctx.state.events().is_empty());
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let ctx = TestContext::new("http://127.0.0.1:9");
    let response = ctx
        .app()
        .oneshot(webhook_request(b"{}", None, "ping", Some("delivery-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "missing or invalid signature");
}

#[tokio::test]
async fn signed_ping_is_stored_and_read_back() {
    let ctx = TestContext::new("http://127.0.0.1:9");
    let body = json!({"zen": "Keep it logically awesome.", "hook_id": 1}).to_string();
    let signature = verification::sign(SECRET, body.as_bytes()).unwrap();

    let response = ctx
        .app()
        .oneshot(webhook_request(body.as_bytes(), Some(&signature), "ping", Some("delivery-1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let events = ctx.state.events().read_events(1).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].delivery_id, "delivery-1");
    assert_eq!(events[0].event_type, "ping");
    assert_eq!(events[0].action, "");
    assert_eq!(events[0].issue_number, None);

    let response = ctx
        .app()
        .oneshot(Request::builder().uri("/events?limit=1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed[0]["id"], "delivery-1");
    assert_eq!(listed[0]["event"], "ping");
}

#[tokio::test]
async fn redelivery_is_accepted_but_recorded_once() {
    let ctx = TestContext::new("http://127.0.0.1:9");
    let body = json!({"action": "opened", "issue": {"number": 12}}).to_string();
    let signature = verification::sign(SECRET, body.as_bytes()).unwrap();

    for _ in 0..2 {
        let response = ctx
            .app()
            .oneshot(webhook_request(body.as_bytes(), Some(&signature), "issues", Some("delivery-9")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    let events = ctx.state.events().read_events(10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, "opened");
    assert_eq!(events[0].issue_number, Some(12));
}

#[tokio::test]
async fn signed_non_json_payload_is_a_validation_error() {
    let ctx = TestContext::new("http://127.0.0.1:9");
    let body = b"payload=not-json";
    let signature = verification::sign(SECRET, body).unwrap();

    let response = ctx
        .app()
        .oneshot(webhook_request(body, Some(&signature), "ping", Some("delivery-2")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(ctx.state.events().is_empty());
}

#[tokio::test]
async fn negative_event_limit_returns_empty_list() {
    let ctx = TestContext::new("http://127.0.0.1:9");
    ctx.state.events().store_event("d-1", "ping", "", None).unwrap();

    let response = ctx
        .app()
        .oneshot(Request::builder().uri("/events?limit=-5").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn create_issue_requires_title() {
    let ctx = TestContext::new("http://127.0.0.1:9");
    let response = ctx
        .app()
        .oneshot(json_request(Method::POST, "/issues", json!({"title": ""})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await;
    assert!(error["error"].as_str().unwrap().contains("title"));
    assert_eq!(error["details"]["kind"], "validation");
}

#[tokio::test]
async fn update_issue_rejects_unknown_state() {
    let ctx = TestContext::new("http://127.0.0.1:9");
    let response = ctx
        .app()
        .oneshot(json_request(Method::PATCH, "/issues/1", json!({"state": "invalid"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn issue_routes_proxy_to_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/issues/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "number": 3,
            "title": "Broken link",
            "state": "open",
            "body": null,
            "labels": [],
            "html_url": "https://github.com/octo/hello/issues/3",
            "user": {"login": "octocat"},
            "comments": 1,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "closed_at": null
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/issues"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", "<https://api.github.com/x?page=2>; rel=\"next\"")
                .insert_header("etag", "\"abc\"")
                .set_body_json(json!([])),
        )
        .mount(&server)
        .await;

    let ctx = TestContext::new(&server.uri());

    let response = ctx
        .app()
        .oneshot(Request::builder().uri("/issues/3").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let issue = body_json(response).await;
    assert_eq!(issue["number"], 3);
    assert!(issue.get("body").is_none());

    let response = ctx
        .app()
        .oneshot(Request::builder().uri("/issues?state=all&per_page=10").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::LINK].to_str().unwrap().contains("rel=\"next\""));
    assert_eq!(response.headers()[header::ETAG], "\"abc\"");
}

#[tokio::test]
async fn upstream_rate_limit_becomes_429() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/issues/3"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("retry-after", "30"),
        )
        .mount(&server)
        .await;

    let ctx = TestContext::new(&server.uri());
    let response = ctx
        .app()
        .oneshot(Request::builder().uri("/issues/3").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "30");
    let error = body_json(response).await;
    assert!(error["error"].as_str().unwrap().contains("30"));
}

#[tokio::test]
async fn root_reports_ok() {
    let ctx = TestContext::new("http://127.0.0.1:9");
    let response = ctx
        .app()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}
