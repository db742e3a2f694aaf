//! HTTP dispatch of resolved commands.
//!
//! The runner only depends on [`HttpExecutor`]. Two implementations ship with the
//! crate:
//! - [`ReqwestExecutor`]: sends real requests through a shared `reqwest::Client`.
//! - [`DryRunExecutor`]: validates and logs commands, answering `200` without I/O.

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Client, Method, Url};
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::config::ResultType;
use crate::executor::command::{CommandError, CommandSpec};
use crate::utils::variables::Redactor;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Response summaries are cut after this many characters.
const SUMMARY_LIMIT: usize = 2048;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex must compile"));

/// Failures that prevent a response from being received.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("invalid command: {0}")]
    InvalidCommand(#[from] CommandError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ExecError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExecError::Timeout(err.to_string())
        } else if err.is_builder() {
            ExecError::InvalidRequest(err.to_string())
        } else {
            ExecError::Transport(err.to_string())
        }
    }
}

/// Status and body of a received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx statuses count as success.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Render `HTTP <status>: <body>` for the result list.
    ///
    /// The body is interpreted per `result_type` and masked with `redactor` both
    /// before and after rendering, since decoding may reveal escaped secrets.
    pub fn summary(&self, result_type: ResultType, redactor: &Redactor) -> String {
        let raw = redactor.redact(&self.body);
        let rendered = match result_type {
            ResultType::Json => render_json(&raw),
            ResultType::Html => render_html(&raw),
            ResultType::Plain => raw.trim().to_string(),
        };
        let body = truncate(&redactor.redact(&rendered), SUMMARY_LIMIT);
        if body.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            format!("HTTP {}: {}", self.status, body)
        }
    }
}

fn render_json(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value.to_string(),
        Err(err) => format!("{trimmed} (invalid JSON: {err})"),
    }
}

fn render_html(body: &str) -> String {
    let text = HTML_TAG.replace_all(body, " ");
    let text = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Issues a resolved command and returns the raw response.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(
        &self,
        command: &str,
        result_type: ResultType,
    ) -> Result<HttpResponse, ExecError>;
}

/// Builds [`ReqwestExecutor`]s bound to one host and set of credentials.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    host: Option<String>,
    credentials: Option<(String, String)>,
    timeout: Duration,
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory {
    pub fn new() -> Self {
        Self {
            host: None,
            credentials: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Base URL for commands whose URL is a path.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create an executor with its own connection pool.
    pub fn build(&self) -> Result<ReqwestExecutor, ExecError> {
        let client = Client::builder()
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .build()?;
        Ok(self.build_with_client(client))
    }

    /// Create an executor on an existing client, sharing its pool.
    pub fn build_with_client(&self, client: Client) -> ReqwestExecutor {
        debug!(
            target: "curly::http",
            host = ?self.host,
            authenticated = self.credentials.is_some(),
            "HTTP executor ready"
        );
        ReqwestExecutor {
            client,
            host: self.host.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

/// Production executor backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: Client,
    host: Option<String>,
    credentials: Option<(String, String)>,
}

impl ReqwestExecutor {
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn resolve_url(&self, target: &str) -> Result<Url, ExecError> {
        let full = if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            let host = self.host.as_deref().ok_or_else(|| {
                ExecError::InvalidRequest(format!("relative URL '{target}' but no host configured"))
            })?;
            let host = host.trim_end_matches('/');
            if target.starts_with('/') {
                format!("{host}{target}")
            } else {
                format!("{host}/{target}")
            }
        };
        Url::parse(&full).map_err(|e| ExecError::InvalidRequest(format!("bad URL '{full}': {e}")))
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(
        &self,
        command: &str,
        _result_type: ResultType,
    ) -> Result<HttpResponse, ExecError> {
        let spec = CommandSpec::parse(command)?;
        let url = self.resolve_url(&spec.url)?;
        let method = Method::from_bytes(spec.method().as_bytes())
            .map_err(|e| ExecError::InvalidRequest(format!("bad method: {e}")))?;
        trace!(target: "curly::http", %method, "Sending request");

        let mut request = self.client.request(method.clone(), url);
        for (name, value) in &spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some((user, pass)) = spec.user.as_ref().or(self.credentials.as_ref()) {
            request = request.basic_auth(user, Some(pass));
        }
        if !spec.form.is_empty() {
            request = request.form(&spec.form);
        } else if let Some(data) = spec.data {
            let has_content_type = spec
                .headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                request = request.header(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
            }
            request = request.body(data);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(target: "curly::http", %method, status, bytes = body.len(), "Response received");
        Ok(HttpResponse { status, body })
    }
}

/// Executor that never touches the network.
///
/// Commands are still parsed so malformed ones fail the same way they would for
/// real. Logged commands are masked with the run's redactor.
#[derive(Debug, Clone, Default)]
pub struct DryRunExecutor {
    redactor: Redactor,
}

impl DryRunExecutor {
    pub fn new(redactor: Redactor) -> Self {
        Self { redactor }
    }
}

#[async_trait]
impl HttpExecutor for DryRunExecutor {
    async fn execute(
        &self,
        command: &str,
        result_type: ResultType,
    ) -> Result<HttpResponse, ExecError> {
        let spec = CommandSpec::parse(command)?;
        info!(
            target: "curly::http",
            method = %spec.method(),
            url = %self.redactor.redact(&spec.url),
            ?result_type,
            "DRY-RUN request"
        );
        Ok(HttpResponse::new(200, ""))
    }
}
