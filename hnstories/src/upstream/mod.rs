use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// One upstream item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub id: i64,
    /// Dead or deleted items come back without a title
    #[serde(default)]
    pub title: String,
    /// Absent for text posts (Ask HN, polls, ...)
    #[serde(default)]
    pub url: Option<String>,
}

impl Story {
    /// Only stories pointing somewhere else are published.
    pub fn has_link(&self) -> bool {
        self.url.is_some()
    }
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream unavailable at {url}: {reason}")]
    Unavailable { url: String, reason: String },

    #[error("failed to decode upstream response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("upstream request cancelled")]
    Cancelled,
}

/// Read-only access to the upstream item-tracking API.
#[async_trait::async_trait]
pub trait StoryClient: Send + Sync {
    /// Identifiers of the currently active stories, in upstream ranking order.
    async fn list_current_story_ids(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>, UpstreamError>;

    /// Detail for a single item. `Ok(None)` when the upstream refuses to serve it;
    /// that is an expected outcome, not an error.
    async fn fetch_story_detail(
        &self,
        id: i64,
        cancel: &CancellationToken,
    ) -> Result<Option<Story>, UpstreamError>;
}

pub mod hacker_news;
