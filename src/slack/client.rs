//! Slack Web API client: form-encoded POSTs, cursor pagination and
//! rate-limit aware retries.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ResponseMetadata, SlackChannel, SlackMessage, SlackUser, SlackUsergroup};
use crate::config::{Config, SLACK_API_URL};
use crate::error::{Error, Result};
use crate::llm::retry::parse_retry_after;
use crate::llm::RetryPolicy;
use crate::metrics;

#[derive(Debug, Clone)]
pub struct SlackClient {
    http: Client,
    token: String,
    pub base_url: String,
    retry: RetryPolicy,
    page_delay: Duration,
    page_size: u32,
}

/// A failed call and whether it is worth repeating.
struct CallFailure {
    error: Error,
    retryable: bool,
    retry_after: Option<Duration>,
}

impl CallFailure {
    fn retry(error: Error, retry_after: Option<Duration>) -> Self {
        Self {
            error,
            retryable: true,
            retry_after,
        }
    }

    fn fatal(error: Error) -> Self {
        Self {
            error,
            retryable: false,
            retry_after: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    messages: Vec<SlackMessage>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct UsersPage {
    #[serde(default)]
    members: Vec<SlackUser>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct UsergroupsResponse {
    #[serde(default)]
    usergroups: Vec<SlackUsergroup>,
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    channel: SlackChannel,
}

impl SlackClient {
    pub fn new<S: Into<String>>(token: S, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("slack_knowledge/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::ConfigError(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            token: token.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
            page_delay: Duration::from_millis(1_200),
            page_size: 200,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let token = config.require_slack_token()?;
        let base_url = if config.slack.api_base.trim().is_empty() {
            SLACK_API_URL
        } else {
            config.slack.api_base.as_str()
        };

        Ok(Self::new(token, base_url)?
            .with_retry(config.retry.clone())
            .with_page_delay(Duration::from_millis(config.slack.page_delay_ms))
            .with_page_size(config.slack.page_size))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        // Slack caps history pages at 1000 and recommends at most 200
        self.page_size = page_size.clamp(1, 1_000);
        self
    }

    /// Fixed throttle between consecutive fetches.
    pub async fn pause(&self) {
        if !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
    }

    /// Call `method`, retrying rate limits and server errors.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> Result<T> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = self.call_once(method, params).await;
            metrics::record_slack_request(method, outcome.is_ok());

            let failure = match outcome {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };
            if !failure.retryable {
                return Err(failure.error);
            }
            if attempt >= max_attempts {
                return Err(Error::RetryExhausted {
                    attempts: attempt,
                    last_error: Box::new(failure.error),
                });
            }

            let delay = self.retry.delay_with_hint(attempt, failure.retry_after);
            warn!(
                method,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Slack call failed: {}",
                failure.error
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> std::result::Result<T, CallFailure> {
        debug!(method, "Slack request");
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .bearer_auth(&self.token)
            .form(params)
            .send()
            .await
            .map_err(|e| {
                CallFailure::retry(
                    Error::ConnectionError(format!("{} request failed: {}", method, e)),
                    None,
                )
            })?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.map_err(|e| {
            CallFailure::retry(
                Error::ConnectionError(format!("Failed to read {} response: {}", method, e)),
                None,
            )
        })?;

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(CallFailure::retry(
                Error::SlackError(format!("{} returned {}", method, status)),
                retry_after,
            ));
        }
        if !status.is_success() {
            return Err(CallFailure::fatal(Error::SlackError(format!(
                "{} returned {}: {}",
                method, status, body
            ))));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| CallFailure::fatal(Error::SerializationError(e.to_string())))?;

        if !value.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            let code = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            return Err(match code {
                "ratelimited" => CallFailure::retry(
                    Error::SlackError(format!("{}: {}", method, code)),
                    retry_after,
                ),
                "channel_not_found" => CallFailure::fatal(Error::ChannelNotFound(
                    param(params, "channel").unwrap_or_default(),
                )),
                _ => CallFailure::fatal(Error::SlackError(format!("{}: {}", method, code))),
            });
        }

        serde_json::from_value(value)
            .map_err(|e| CallFailure::fatal(Error::SerializationError(e.to_string())))
    }

    pub async fn channel_info(&self, channel: &str) -> Result<SlackChannel> {
        let info: ChannelInfo = self
            .call("conversations.info", &[("channel", channel.to_string())])
            .await?;
        Ok(info.channel)
    }

    /// Top-level history newer than `oldest` (exclusive), all pages.
    pub async fn history(&self, channel: &str, oldest: Option<&str>) -> Result<Vec<SlackMessage>> {
        collect_pages(self.page_delay, move |cursor| async move {
            let mut params = vec![
                ("channel", channel.to_string()),
                ("limit", self.page_size.to_string()),
            ];
            if let Some(oldest) = oldest {
                params.push(("oldest", oldest.to_string()));
            }
            if let Some(cursor) = cursor {
                params.push(("cursor", cursor));
            }
            let page: HistoryPage = self.call("conversations.history", &params).await?;
            Ok((page.messages, page.response_metadata.next()))
        })
        .await
    }

    /// Thread root followed by its replies, all pages.
    pub async fn replies(&self, channel: &str, thread_ts: &str) -> Result<Vec<SlackMessage>> {
        collect_pages(self.page_delay, move |cursor| async move {
            let mut params = vec![
                ("channel", channel.to_string()),
                ("ts", thread_ts.to_string()),
                ("limit", self.page_size.to_string()),
            ];
            if let Some(cursor) = cursor {
                params.push(("cursor", cursor));
            }
            let page: HistoryPage = self.call("conversations.replies", &params).await?;
            Ok((page.messages, page.response_metadata.next()))
        })
        .await
    }

    pub async fn users(&self) -> Result<Vec<SlackUser>> {
        collect_pages(self.page_delay, move |cursor| async move {
            let mut params = vec![("limit", self.page_size.to_string())];
            if let Some(cursor) = cursor {
                params.push(("cursor", cursor));
            }
            let page: UsersPage = self.call("users.list", &params).await?;
            Ok((page.members, page.response_metadata.next()))
        })
        .await
    }

    /// Usergroups; empty when the token lacks `usergroups:read`.
    pub async fn usergroups(&self) -> Result<Vec<SlackUsergroup>> {
        match self
            .call::<UsergroupsResponse>("usergroups.list", &[])
            .await
        {
            Ok(response) => Ok(response.usergroups),
            Err(Error::SlackError(message)) if message.ends_with("missing_scope") => {
                warn!("Token cannot read usergroups; group mentions stay unresolved");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }
}

fn param(params: &[(&str, String)], name: &str) -> Option<String> {
    params
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.clone())
}

/// Drain a cursor-paginated listing, sleeping `page_delay` between pages.
pub(crate) async fn collect_pages<T, F, Fut>(page_delay: Duration, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, Option<String>)>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let (page, next) = fetch(cursor.clone()).await?;
        items.extend(page);

        match next {
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                warn!(cursor = %next, "Cursor did not advance; stopping pagination");
                return Ok(items);
            }
            Some(next) => {
                cursor = Some(next);
                if !page_delay.is_zero() {
                    tokio::time::sleep(page_delay).await;
                }
            }
            None => return Ok(items),
        }
    }
}
