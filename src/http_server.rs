use crate::error::{GatewayError, Result, StoreError};
use crate::github::GithubClient;
use crate::store::EventStore;
use crate::types::{IssueUpdate, ListQuery, NewComment, NewIssue, WebhookEvent};
use crate::verification;
use axum::{
    body::Bytes,
    extract::{rejection::PathRejection, rejection::QueryRejection, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
const DEFAULT_EVENTS_LIMIT: i64 = 25;
const MAX_EVENTS_LIMIT: i64 = 100;
const MAX_PER_PAGE: u32 = 100;

/// Shared handles for every request.
#[derive(Clone)]
pub struct AppState {
    github: Arc<GithubClient>,
    events: Arc<EventStore>,
    webhook_secret: Arc<[u8]>,
}

impl AppState {
    pub fn new(github: GithubClient, events: EventStore, webhook_secret: impl Into<Vec<u8>>) -> Self {
        let webhook_secret: Vec<u8> = webhook_secret.into();
        Self {
            github: Arc::new(github),
            events: Arc::new(events),
            webhook_secret: Arc::from(webhook_secret),
        }
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/issues", post(create_issue).get(list_issues))
        .route("/issues/{number}", get(get_issue).patch(update_issue))
        .route("/issues/{number}/comments", post(create_comment))
        .route("/webhook", post(handle_webhook))
        .route("/events", get(list_events))
        .layer(middleware::from_fn(request_span))
        .with_state(state)
}

/// Bind `addr` and serve until ctrl-c.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// Run each request inside a span tagged with a fresh request id.
async fn request_span(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "request",
        %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        let mut response = next.run(request).await;
        info!(status = response.status().as_u16(), "request completed");
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

async fn root() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ─── Issues ───────────────────────────────────────────────────────────────────

async fn create_issue(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let issue: NewIssue = parse_body(&body)?;
    require_non_empty("title", &issue.title)?;

    let created = state.github.create_issue(&issue).await?;
    info!(number = created.number, "issue created");
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

#[derive(Debug, Deserialize)]
struct ListParams {
    state: Option<String>,
    labels: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
}

async fn list_issues(
    State(state): State<AppState>,
    params: std::result::Result<Query<ListParams>, QueryRejection>,
) -> Result<Response> {
    let Query(params) = params.map_err(|e| GatewayError::Validation(e.body_text()))?;
    let query = list_query(params)?;

    let page = state.github.list_issues(&query).await?;

    let mut headers = HeaderMap::new();
    for (name, value) in [(header::LINK, &page.link), (header::ETAG, &page.etag)] {
        if let Some(value) = value.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(name, value);
        }
    }
    Ok((StatusCode::OK, headers, Json(page.issues)).into_response())
}

fn list_query(params: ListParams) -> Result<ListQuery> {
    let defaults = ListQuery::default();

    let state = params.state.unwrap_or(defaults.state);
    if !matches!(state.as_str(), "open" | "closed" | "all") {
        return Err(GatewayError::Validation(
            "state must be one of: open, closed, all".to_string(),
        ));
    }

    let page = params.page.unwrap_or(defaults.page);
    if page == 0 {
        return Err(GatewayError::Validation("page must be at least 1".to_string()));
    }

    let per_page = params.per_page.unwrap_or(defaults.per_page);
    if !(1..=MAX_PER_PAGE).contains(&per_page) {
        return Err(GatewayError::Validation(format!(
            "per_page must be between 1 and {MAX_PER_PAGE}"
        )));
    }

    Ok(ListQuery {
        state,
        labels: params.labels.filter(|l| !l.is_empty()),
        page,
        per_page,
    })
}

async fn get_issue(
    State(state): State<AppState>,
    number: std::result::Result<Path<u64>, PathRejection>,
) -> Result<Response> {
    let number = issue_number(number)?;
    let issue = state.github.get_issue(number).await?;
    Ok(Json(issue).into_response())
}

async fn update_issue(
    State(state): State<AppState>,
    number: std::result::Result<Path<u64>, PathRejection>,
    body: Bytes,
) -> Result<Response> {
    let number = issue_number(number)?;
    let update: IssueUpdate = parse_body(&body)?;
    if let Some(title) = &update.title {
        require_non_empty("title", title)?;
    }
    if let Some(issue_state) = &update.state {
        if !matches!(issue_state.as_str(), "open" | "closed") {
            return Err(GatewayError::Validation(
                "state must be one of: open, closed".to_string(),
            ));
        }
    }

    let issue = state.github.update_issue(number, &update).await?;
    info!(number, state = %issue.state, "issue updated");
    Ok(Json(issue).into_response())
}

async fn create_comment(
    State(state): State<AppState>,
    number: std::result::Result<Path<u64>, PathRejection>,
    body: Bytes,
) -> Result<Response> {
    let number = issue_number(number)?;
    let comment: NewComment = parse_body(&body)?;
    require_non_empty("body", &comment.body)?;

    let created = state.github.create_comment(number, &comment.body).await?;
    info!(number, comment_id = created.id, "comment created");
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

// ─── Webhooks ─────────────────────────────────────────────────────────────────

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    // Verify against the raw bytes before anything parses them.
    let signature = header_str(&headers, SIGNATURE_HEADER);
    if let Err(e) = verification::verify(&state.webhook_secret, &body, signature) {
        warn!(reason = %e, "webhook signature rejected");
        return Err(e.into());
    }

    let event_type = header_str(&headers, EVENT_HEADER).unwrap_or("unknown").to_string();
    let delivery_id = match header_str(&headers, DELIVERY_HEADER) {
        Some(id) => id.to_string(),
        None => Uuid::new_v4().to_string(),
    };

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::Validation(format!("invalid JSON payload: {e}")))?;
    let action = payload
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let issue_number = payload
        .get("issue")
        .and_then(|issue| issue.get("number"))
        .and_then(Value::as_u64);

    let accepted = {
        let delivery_id = delivery_id.clone();
        let event_type = event_type.clone();
        let action = action.clone();
        with_store(&state.events, move |store| {
            store.store_event(&delivery_id, &event_type, &action, issue_number)
        })
        .await?
    };
    if !accepted {
        info!(%delivery_id, event = %event_type, %action, "duplicate webhook delivery");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct EventsParams {
    limit: Option<i64>,
}

async fn list_events(
    State(state): State<AppState>,
    params: std::result::Result<Query<EventsParams>, QueryRejection>,
) -> Result<Json<Vec<WebhookEvent>>> {
    let Query(params) = params.map_err(|e| GatewayError::Validation(e.body_text()))?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_EVENTS_LIMIT)
        .clamp(0, MAX_EVENTS_LIMIT);
    // Clamped to 0..=MAX_EVENTS_LIMIT, so the cast cannot truncate.
    let events = with_store(&state.events, move |store| store.read_events(limit as usize)).await?;
    Ok(Json(events))
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Run blocking event store work off the async workers.
async fn with_store<T, F>(store: &Arc<EventStore>, f: F) -> Result<T>
where
    F: FnOnce(&EventStore) -> std::result::Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    let result = tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(StoreError::from)?;
    Ok(result?)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::Validation(format!("invalid request body: {e}")))
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn issue_number(path: std::result::Result<Path<u64>, PathRejection>) -> Result<u64> {
    let Path(number) = path
        .map_err(|_| GatewayError::Validation("issue number must be a positive integer".to_string()))?;
    if number == 0 {
        return Err(GatewayError::Validation(
            "issue number must be a positive integer".to_string(),
        ));
    }
    Ok(number)
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Configuration(_) | GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Auth(_) | GatewayError::Signature(_) => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NotModified => return StatusCode::NOT_MODIFIED.into_response(),
            GatewayError::Upstream(_) | GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
        };

        let message = match &self {
            GatewayError::Store(e) => {
                error!(error = %e, "event store failure");
                "event store unavailable".to_string()
            }
            other => other.to_string(),
        };

        let mut details = json!({ "kind": self.kind() });
        let mut retry_after_header = None;
        if let GatewayError::RateLimited {
            retry_after: Some(secs),
            ..
        } = &self
        {
            details["retry_after"] = json!(secs);
            retry_after_header = HeaderValue::from_str(secs).ok();
        }

        let mut response = (status, Json(json!({ "error": message, "details": details }))).into_response();
        if let Some(value) = retry_after_header {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}
