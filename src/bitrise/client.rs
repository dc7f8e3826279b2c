use crate::bitrise::model::{AbortResponse, BuildsPage, ErrorBody, TriggerResponse};
use crate::trigger::TriggerRequest;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://api.bitrise.io/v0.1";
pub const DEFAULT_HOOKS_URL: &str = "https://www.bitrise.io";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// The build-trigger hook answers quickly or not at all.
const TRIGGER_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport-level failures: the request never produced a usable answer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildsQuery {
    /// `None` lets the server pick its default page size.
    pub limit: Option<usize>,
    pub next: Option<String>,
}

impl BuildsQuery {
    pub fn first_page(limit: Option<usize>) -> Self {
        Self { limit, next: None }
    }

    pub fn after(cursor: impl Into<String>, limit: Option<usize>) -> Self {
        Self {
            limit,
            next: Some(cursor.into()),
        }
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(next) = &self.next {
            pairs.push(("next", next.clone()));
        }
        pairs
    }
}

#[async_trait]
pub trait BuildsApi: Send + Sync {
    async fn fetch_builds(&self, app_slug: &str, query: &BuildsQuery)
        -> Result<BuildsPage, ApiError>;

    /// A well-formed refusal comes back as `Ok` with `error_msg` set.
    async fn abort_build(
        &self,
        app_slug: &str,
        build_slug: &str,
        reason: &str,
    ) -> Result<AbortResponse, ApiError>;

    async fn trigger_build(
        &self,
        app_slug: &str,
        request: &TriggerRequest,
    ) -> Result<TriggerResponse, ApiError>;
}

#[derive(Debug, Serialize)]
struct AbortBody<'a> {
    abort_reason: &'a str,
    abort_with_success: bool,
    skip_notifications: bool,
}

pub struct BitriseClient {
    api_url: String,
    hooks_url: String,
    token: String,
    http: reqwest::Client,
}

impl BitriseClient {
    pub fn new(
        api_url: impl Into<String>,
        hooks_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("brw/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            hooks_url: hooks_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn builds_url(&self, app_slug: &str) -> String {
        format!("{}/apps/{app_slug}/builds", self.api_url)
    }

    fn abort_url(&self, app_slug: &str, build_slug: &str) -> String {
        format!("{}/apps/{app_slug}/builds/{build_slug}/abort", self.api_url)
    }

    fn trigger_url(&self, app_slug: &str) -> String {
        format!("{}/app/{app_slug}/build/start.json", self.hooks_url)
    }
}

#[async_trait]
impl BuildsApi for BitriseClient {
    async fn fetch_builds(
        &self,
        app_slug: &str,
        query: &BuildsQuery,
    ) -> Result<BuildsPage, ApiError> {
        let start = Instant::now();
        let response = self
            .http
            .get(self.builds_url(app_slug))
            .header(reqwest::header::AUTHORIZATION, &self.token)
            .query(&query.pairs())
            .send()
            .await?;
        let page: BuildsPage = decode(response).await?;
        tracing::debug!(
            app = app_slug,
            count = page.data.len(),
            next = ?page.paging.next,
            elapsed_ms = start.elapsed().as_millis(),
            "fetched builds page"
        );
        Ok(page)
    }

    async fn abort_build(
        &self,
        app_slug: &str,
        build_slug: &str,
        reason: &str,
    ) -> Result<AbortResponse, ApiError> {
        let body = AbortBody {
            abort_reason: reason,
            abort_with_success: false,
            skip_notifications: false,
        };
        let response = self
            .http
            .post(self.abort_url(app_slug, build_slug))
            .header(reqwest::header::AUTHORIZATION, &self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return decode(response).await;
        }

        // Refusals ("build already finished") arrive as 4xx with a JSON message.
        let text = response.text().await?;
        match serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(ErrorBody::into_message)
        {
            Some(error_msg) => Ok(AbortResponse {
                status: None,
                error_msg: Some(error_msg),
            }),
            None => Err(ApiError::Status {
                status: status.as_u16(),
                message: summarize_body(&text),
            }),
        }
    }

    async fn trigger_build(
        &self,
        app_slug: &str,
        request: &TriggerRequest,
    ) -> Result<TriggerResponse, ApiError> {
        let response = self
            .http
            .post(self.trigger_url(app_slug))
            .timeout(TRIGGER_TIMEOUT)
            .json(request)
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(ErrorBody::into_message)
            .unwrap_or_else(|| summarize_body(&text));
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }
    serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
}

const ERROR_BODY_MAX_CHARS: usize = 200;

fn summarize_body(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "empty response".to_string();
    }
    let mut summary: String = trimmed.chars().take(ERROR_BODY_MAX_CHARS).collect();
    if trimmed.chars().count() > ERROR_BODY_MAX_CHARS {
        summary.push('\u{2026}');
    }
    summary
}
