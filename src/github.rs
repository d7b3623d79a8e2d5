use crate::error::{GatewayError, Result};
use crate::etag_cache::EtagCache;
use crate::rate_limit;
use crate::types::{Comment, Issue, IssuePage, IssueUpdate, ListQuery, NewComment, NewIssue};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, ETAG, IF_NONE_MATCH, LINK};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const MEDIA_TYPE: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("issues-gateway/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub api_url: String,
    pub token: String,
    pub owner: String,
    pub repo: String,
    /// Ceiling on each upstream call, connect through body.
    pub timeout: Duration,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: String::new(),
            owner: String::new(),
            repo: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Which status mappings apply to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Create,
    Lookup,
    List,
}

/// Client for the issues endpoints of one repository.
///
/// Calls are never retried here. Rate-limit exhaustion and every other
/// upstream failure come back as a [`GatewayError`] for the caller to act on.
pub struct GithubClient {
    http: Client,
    config: GithubConfig,
    etags: EtagCache,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            etags: EtagCache::new(),
        })
    }

    pub fn etags(&self) -> &EtagCache {
        &self.etags
    }

    #[instrument(skip_all, fields(title = %issue.title))]
    pub async fn create_issue(&self, issue: &NewIssue) -> Result<Issue> {
        let url = self.repo_url("issues")?;
        let request = self.request(Method::POST, &url)?.json(issue);
        let response = check(self.send(request).await?, Call::Create).await?;
        parse::<GithubIssue>(response).await.map(Issue::from)
    }

    #[instrument(skip_all, fields(state = %query.state, page = query.page, per_page = query.per_page))]
    pub async fn list_issues(&self, query: &ListQuery) -> Result<IssuePage> {
        let url = self.repo_url("issues")?;

        let mut params = vec![
            ("state", query.state.clone()),
            ("page", query.page.to_string()),
            ("per_page", query.per_page.to_string()),
        ];
        if let Some(labels) = query.labels.as_deref().filter(|l| !l.is_empty()) {
            params.push(("labels", labels.to_string()));
        }

        let mut request = self.request(Method::GET, &url)?.query(&params);
        if let Some(etag) = self.etags.get(query) {
            debug!(%etag, "sending conditional request");
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = check(self.send(request).await?, Call::List).await?;
        let link = header_string(response.headers(), LINK.as_str());
        let etag = header_string(response.headers(), ETAG.as_str());
        if let Some(etag) = &etag {
            self.etags.put(query, etag.clone());
        }

        let issues = parse::<Vec<GithubIssue>>(response).await?;
        Ok(IssuePage {
            issues: issues.into_iter().map(Issue::from).collect(),
            link,
            etag,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_issue(&self, number: u64) -> Result<Issue> {
        let url = self.repo_url(&format!("issues/{number}"))?;
        let request = self.request(Method::GET, &url)?;
        let response = check(self.send(request).await?, Call::Lookup).await?;
        parse::<GithubIssue>(response).await.map(Issue::from)
    }

    #[instrument(skip(self, update))]
    pub async fn update_issue(&self, number: u64, update: &IssueUpdate) -> Result<Issue> {
        let url = self.repo_url(&format!("issues/{number}"))?;
        let request = self.request(Method::PATCH, &url)?.json(update);
        let response = check(self.send(request).await?, Call::Lookup).await?;
        parse::<GithubIssue>(response).await.map(Issue::from)
    }

    #[instrument(skip(self, body))]
    pub async fn create_comment(&self, number: u64, body: &str) -> Result<Comment> {
        let url = self.repo_url(&format!("issues/{number}/comments"))?;
        let payload = NewComment {
            body: body.to_string(),
        };
        let request = self.request(Method::POST, &url)?.json(&payload);
        let response = check(self.send(request).await?, Call::Lookup).await?;
        parse::<GithubComment>(response).await.map(Comment::from)
    }

    fn repo_url(&self, path: &str) -> Result<String> {
        let GithubConfig { owner, repo, .. } = &self.config;
        if owner.is_empty() || repo.is_empty() {
            return Err(GatewayError::Configuration(
                "GITHUB_OWNER and GITHUB_REPO must be set".to_string(),
            ));
        }
        let base = self.config.api_url.trim_end_matches('/');
        Ok(format!("{base}/repos/{owner}/{repo}/{path}"))
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        if self.config.token.is_empty() {
            return Err(GatewayError::Auth("missing GITHUB_TOKEN".to_string()));
        }
        Ok(self
            .http
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {}", self.config.token))
            .header(ACCEPT, MEDIA_TYPE)
            .header("X-GitHub-Api-Version", API_VERSION))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(timeout = ?self.config.timeout, "GitHub request timed out");
                GatewayError::Upstream("GitHub request timed out".to_string())
            } else {
                warn!(error = %e, "GitHub request failed");
                GatewayError::Upstream(format!("GitHub request failed: {e}"))
            }
        })?;
        debug!(status = response.status().as_u16(), url = %response.url(), "GitHub responded");
        Ok(response)
    }
}

/// Map a response to an error, rate limiting first, then by status.
async fn check(response: Response, call: Call) -> Result<Response> {
    if let Some(err) = rate_limit::classify(response.headers()) {
        warn!(status = response.status().as_u16(), "GitHub rate limit exhausted");
        return Err(err);
    }

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_MODIFIED && call == Call::List {
        return Err(GatewayError::NotModified);
    }
    if status == StatusCode::NOT_FOUND && call != Call::Create {
        return Err(GatewayError::NotFound("not found".to_string()));
    }

    let body = response
        .text()
        .await
        .map_err(|e| GatewayError::Upstream(format!("failed to read GitHub response: {e}")))?;
    let message = if body.is_empty() {
        format!("GitHub returned {status}")
    } else {
        body
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::Auth(message)),
        _ => Err(GatewayError::Upstream(message)),
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| GatewayError::Upstream(format!("invalid GitHub response: {e}")))
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// ─── Upstream shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GithubLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GithubIssue {
    number: u64,
    title: String,
    state: String,
    body: Option<String>,
    #[serde(default)]
    labels: Vec<GithubLabel>,
    html_url: String,
    user: Option<GithubUser>,
    #[serde(default)]
    comments: u64,
    created_at: String,
    updated_at: String,
    closed_at: Option<String>,
}

impl From<GithubIssue> for Issue {
    fn from(raw: GithubIssue) -> Self {
        Issue {
            number: raw.number,
            title: raw.title,
            state: raw.state,
            body: raw.body,
            labels: raw.labels.into_iter().map(|l| l.name).collect(),
            html_url: raw.html_url,
            user: raw.user.map(|u| u.login),
            comments: raw.comments,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            closed_at: raw.closed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GithubComment {
    id: u64,
    body: Option<String>,
    user: Option<GithubUser>,
    html_url: String,
    created_at: String,
}

impl From<GithubComment> for Comment {
    fn from(raw: GithubComment) -> Self {
        Comment {
            id: raw.id,
            body: raw.body.unwrap_or_default(),
            user: raw.user.map(|u| u.login),
            html_url: raw.html_url,
            created_at: raw.created_at,
        }
    }
}
