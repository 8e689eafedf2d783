use crate::config::{TwitterConfig, DEFAULT_TWITTER_BASE_URL};
use crate::error::{FollowwatchError, UpstreamError};
use crate::fetcher::Collection;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Fallback wait when a 429 carries no usable reset header
const DEFAULT_RETRY_AFTER_SECS: u64 = 900;

/// A tracked account: the stable id plus the handle used in snapshot keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
}

/// User object as returned by the list-members and following endpoints.
///
/// This is also the unit stored in a snapshot. Fields are declared in
/// alphabetical order so serialized snapshots have sorted keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub username: String,
}

impl UserRecord {
    pub fn account(&self) -> Account {
        Account {
            id: self.id.clone(),
            username: self.username.clone(),
        }
    }
}

/// One page of a paginated user collection
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPage {
    #[serde(default)]
    pub data: Vec<UserRecord>,
    #[serde(default)]
    pub meta: PageMeta,
    #[serde(default)]
    pub errors: Vec<ApiProblem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageMeta {
    pub result_count: Option<u32>,
    pub next_token: Option<String>,
}

/// Partial-error entry the API embeds in otherwise successful responses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiProblem {
    pub title: Option<String>,
    pub detail: Option<String>,
}

impl ApiProblem {
    fn describe(&self) -> String {
        match (&self.title, &self.detail) {
            (Some(title), Some(detail)) => format!("{title}: {detail}"),
            (Some(text), None) | (None, Some(text)) => text.clone(),
            (None, None) => "unspecified error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserLookup {
    data: Option<UserWithMetrics>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
struct UserWithMetrics {
    id: String,
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Deserialize)]
struct PublicMetrics {
    following_count: u64,
}

/// Source of list memberships and following lists
#[allow(async_fn_in_trait)] // Sequential pipeline, no Send bound needed
pub trait FollowSource {
    /// Fetch one page of `collection`, continuing from `pagination_token`
    async fn fetch_page(
        &self,
        collection: &Collection,
        page_size: u32,
        pagination_token: Option<&str>,
    ) -> Result<UserPage, UpstreamError>;

    /// Number of accounts `user_id` currently follows
    async fn following_count(&self, user_id: &str) -> Result<u64, UpstreamError>;
}

/// HTTP client for the X API v2
#[derive(Debug, Clone)]
pub struct TwitterClient {
    config: TwitterConfig,
    base_url: Url,
    http_client: Client,
}

impl TwitterClient {
    /// Create a client for the configured base URL
    pub fn new(config: TwitterConfig) -> Result<Self, FollowwatchError> {
        let raw_base = config.base_url.as_deref().unwrap_or(DEFAULT_TWITTER_BASE_URL);
        // Url::join drops the last path segment unless the base ends in '/'
        let base_url = if raw_base.ends_with('/') {
            Url::parse(raw_base)?
        } else {
            Url::parse(&format!("{raw_base}/"))?
        };

        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(format!("followwatch/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            config,
            base_url,
            http_client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base_url
            .join(path)
            .map_err(|e| UpstreamError::RequestFailed(format!("Invalid endpoint {path}: {e}")))
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, UpstreamError>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!("GET {} {:?}", url, query);

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.config.bearer_token)
            .query(query)
            .send()
            .await
            .map_err(|e| UpstreamError::RequestFailed(format!("Request to {path} failed: {e}")))?;

        Self::handle_response(path, response).await
    }

    /// Map HTTP status codes onto upstream errors and decode the body
    async fn handle_response<T>(path: &str, response: Response) -> Result<T, UpstreamError>
    where
        T: DeserializeOwned,
    {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_secs(response.headers(), Utc::now().timestamp());
            warn!("Rate limited on {}, retry after {} seconds", path, retry_after);
            return Err(UpstreamError::RateLimitExceeded { retry_after });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let error_text = response.text().await.unwrap_or_default();
            return Err(UpstreamError::AuthenticationFailed(format!(
                "HTTP {status} on {path}: {error_text}"
            )));
        }

        if status == StatusCode::NOT_FOUND {
            return Err(UpstreamError::NotFound {
                resource: path.to_string(),
            });
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(UpstreamError::RequestFailed(format!(
                "HTTP {status} on {path}: {error_text}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::RequestFailed(format!("Failed to read {path}: {e}")))?;

        serde_json::from_str(&body).map_err(|e| {
            UpstreamError::InvalidResponse(format!("Failed to parse response from {path}: {e}"))
        })
    }
}

/// Seconds until the rate-limit window resets, from `x-rate-limit-reset`
/// (epoch seconds) or `retry-after` (delta seconds)
fn retry_after_secs(headers: &HeaderMap, now_epoch: i64) -> u64 {
    let header_number = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
    };

    if let Some(reset_at) = header_number("x-rate-limit-reset") {
        return (reset_at - now_epoch).max(0) as u64;
    }

    header_number("retry-after")
        .map(|secs| secs.max(0) as u64)
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

impl FollowSource for TwitterClient {
    async fn fetch_page(
        &self,
        collection: &Collection,
        page_size: u32,
        pagination_token: Option<&str>,
    ) -> Result<UserPage, UpstreamError> {
        let mut query = vec![
            ("max_results", page_size.to_string()),
            ("user.fields", collection.user_fields().to_string()),
        ];
        if let Some(token) = pagination_token {
            query.push(("pagination_token", token.to_string()));
        }

        let path = collection.path();
        let page: UserPage = self.get_json(&path, &query).await?;

        if page.data.is_empty() && !page.errors.is_empty() {
            let problems: Vec<String> = page.errors.iter().map(ApiProblem::describe).collect();
            return Err(UpstreamError::InvalidResponse(format!(
                "{path} returned errors: {}",
                problems.join("; ")
            )));
        }

        debug!(
            "{}: {} records, next_token={:?}",
            collection,
            page.data.len(),
            page.meta.next_token
        );
        Ok(page)
    }

    async fn following_count(&self, user_id: &str) -> Result<u64, UpstreamError> {
        let path = format!("users/{user_id}");
        let lookup: UserLookup = self
            .get_json(&path, &[("user.fields", "public_metrics".to_string())])
            .await?;

        match lookup.data {
            Some(user) => user
                .public_metrics
                .map(|metrics| metrics.following_count)
                .ok_or_else(|| {
                    UpstreamError::InvalidResponse(format!(
                        "User {} has no public_metrics",
                        user.id
                    ))
                }),
            None if !lookup.errors.is_empty() => Err(UpstreamError::NotFound {
                resource: format!(
                    "{path} ({})",
                    lookup
                        .errors
                        .iter()
                        .map(ApiProblem::describe)
                        .collect::<Vec<_>>()
                        .join("; ")
                ),
            }),
            None => Err(UpstreamError::InvalidResponse(format!(
                "{path} returned neither data nor errors"
            ))),
        }
    }
}
