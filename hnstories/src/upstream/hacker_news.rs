use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Story, StoryClient, UpstreamError};

/// HTTP client for the Hacker News Firebase API (or anything serving the same paths).
pub struct HackerNewsClient {
    base_url: String,
    client: reqwest::Client,
}

impl HackerNewsClient {
    /// `base_url` is the API root, e.g. `https://hacker-news.firebaseio.com/v0`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_options(
            base_url,
            Duration::from_secs(common::DEFAULT_UPSTREAM_TIMEOUT_SECONDS),
            common::DEFAULT_USER_AGENT,
        )
    }

    pub fn with_options(
        base_url: impl Into<String>,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn new_stories_url(&self) -> String {
        format!("{}/newstories.json", self.base_url)
    }

    fn item_url(&self, id: i64) -> String {
        format!("{}/item/{}.json", self.base_url, id)
    }

    /// Sends a GET, racing it against `cancel`.
    async fn get(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, UpstreamError> {
        if cancel.is_cancelled() {
            return Err(UpstreamError::Cancelled);
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(UpstreamError::Cancelled),
            res = self.client.get(url).send() => res.map_err(|e| UpstreamError::Unavailable {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn decode<T: DeserializeOwned>(
        url: &str,
        response: reqwest::Response,
        cancel: &CancellationToken,
    ) -> Result<T, UpstreamError> {
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
            body = response.bytes() => body.map_err(|e| UpstreamError::Unavailable {
                url: url.to_string(),
                reason: format!("failed to read response body: {}", e),
            })?,
        };

        serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl StoryClient for HackerNewsClient {
    async fn list_current_story_ids(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>, UpstreamError> {
        let url = self.new_stories_url();
        let response = self.get(&url, cancel).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Unavailable {
                url,
                reason: format!("status {}", status),
            });
        }

        Self::decode(&url, response, cancel).await
    }

    async fn fetch_story_detail(
        &self,
        id: i64,
        cancel: &CancellationToken,
    ) -> Result<Option<Story>, UpstreamError> {
        let url = self.item_url(id);
        let response = self.get(&url, cancel).await?;

        let status = response.status();
        if !status.is_success() {
            debug!(id, %status, "story detail not available");
            return Ok(None);
        }

        // The API answers unknown ids with a literal `null`
        Self::decode::<Option<Story>>(&url, response, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_from_trimmed_base() {
        let client = HackerNewsClient::new("http://localhost:8080/v0/").expect("client");
        assert_eq!(client.base_url(), "http://localhost:8080/v0");
        assert_eq!(
            client.new_stories_url(),
            "http://localhost:8080/v0/newstories.json"
        );
        assert_eq!(client.item_url(42), "http://localhost:8080/v0/item/42.json");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_before_request() {
        // Nothing listens on this port; a cancelled token must win before any I/O
        let client = HackerNewsClient::new("http://127.0.0.1:9").expect("client");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .fetch_story_detail(1, &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, UpstreamError::Cancelled));

        let err = client
            .list_current_story_ids(&cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, UpstreamError::Cancelled));
    }

    #[test]
    fn story_without_title_or_url_deserializes() {
        let story: Story = serde_json::from_str(r#"{"id": 7, "deleted": true}"#).expect("parse");
        assert_eq!(story.id, 7);
        assert!(story.title.is_empty());
        assert!(!story.has_link());
    }
}
