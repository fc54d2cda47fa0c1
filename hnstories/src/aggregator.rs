use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::Config;

use crate::cache::{deadline_after, MemoryStoryCache, StoryCache, ALL_STORIES_KEY};
use crate::upstream::hacker_news::HackerNewsClient;
use crate::upstream::{Story, StoryClient, UpstreamError};

/// Tuning knobs for [`StoryAggregator`].
#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Lifetime of the merged cache entry, refreshed on every successful call
    pub cache_ttl: Duration,
    /// Cap on in-flight detail fetches; `None` fans out one task per new id
    pub max_concurrent_fetches: Option<usize>,
    /// When set, ids whose detail came back empty are not re-fetched for this long
    pub negative_cache_ttl: Option<Duration>,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(common::DEFAULT_CACHE_TTL_SECONDS),
            max_concurrent_fetches: None,
            negative_cache_ttl: None,
        }
    }
}

impl AggregatorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_ttl: config.cache_ttl(),
            max_concurrent_fetches: config.max_concurrent_fetches(),
            negative_cache_ttl: config.negative_cache_ttl(),
        }
    }
}

/// Reconciles the upstream's current story ids against the cached merged list,
/// fetching details only for ids it has not seen yet.
pub struct StoryAggregator {
    client: Arc<dyn StoryClient>,
    cache: Arc<dyn StoryCache>,
    options: AggregatorOptions,
    /// id -> time until which the id is skipped
    absent_ids: Mutex<HashMap<i64, Instant>>,
}

impl StoryAggregator {
    pub fn new(
        client: Arc<dyn StoryClient>,
        cache: Arc<dyn StoryCache>,
        options: AggregatorOptions,
    ) -> Self {
        Self {
            client,
            cache,
            options,
            absent_ids: Mutex::new(HashMap::new()),
        }
    }

    /// Production wiring: HTTP client against the configured upstream and an in-memory cache.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = HackerNewsClient::with_options(
            config.upstream_base_url(),
            config.upstream_timeout(),
            &config.user_agent(),
        )?;
        Ok(Self::new(
            Arc::new(client),
            Arc::new(MemoryStoryCache::new()),
            AggregatorOptions::from_config(config),
        ))
    }

    pub fn options(&self) -> &AggregatorOptions {
        &self.options
    }

    /// Size of the unfiltered merged list currently cached (0 when absent or expired).
    pub async fn cached_story_count(&self) -> usize {
        self.cache
            .get(ALL_STORIES_KEY)
            .await
            .map(|stories| stories.len())
            .unwrap_or(0)
    }

    /// Current upstream stories that carry an external link.
    ///
    /// Fails if the id list cannot be fetched or decoded, or if `cancel` fires.
    /// Individual detail failures only shrink the result. The cache is written
    /// exactly once per successful call and never on failure.
    pub async fn get_new_stories(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Story>, UpstreamError> {
        let current_ids = self.client.list_current_story_ids(cancel).await?;
        let cached_stories = self.cache.get(ALL_STORIES_KEY).await.unwrap_or_default();

        let current_set: HashSet<i64> = current_ids.iter().copied().collect();
        let cached_ids: HashSet<i64> = cached_stories.iter().map(|story| story.id).collect();
        let skipped = self.recently_absent().await;

        let mut queued = HashSet::new();
        let new_ids: Vec<i64> = current_ids
            .iter()
            .copied()
            .filter(|id| !cached_ids.contains(id) && !skipped.contains(id))
            .filter(|id| queued.insert(*id))
            .collect();

        let cached_count = cached_stories.len();
        let new_count = new_ids.len();
        let fetched = self.fetch_details(new_ids, cancel).await?;

        let mut merged: Vec<Story> = cached_stories
            .into_iter()
            .filter(|story| current_set.contains(&story.id))
            .collect();
        let fetched_count = fetched.len();
        merged.extend(fetched);

        if cancel.is_cancelled() {
            return Err(UpstreamError::Cancelled);
        }
        self.cache
            .set(ALL_STORIES_KEY, merged.clone(), self.options.cache_ttl)
            .await;

        let merged_count = merged.len();
        let stories: Vec<Story> = merged.into_iter().filter(Story::has_link).collect();

        info!(
            current = current_ids.len(),
            cached = cached_count,
            new = new_count,
            fetched = fetched_count,
            merged = merged_count,
            returned = stories.len(),
            "aggregated new stories"
        );

        Ok(stories)
    }

    /// Fan out one detail fetch per id and wait for all of them.
    /// Results come back in completion order.
    async fn fetch_details(
        &self,
        ids: Vec<i64>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Story>, UpstreamError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let limiter = self
            .options
            .max_concurrent_fetches
            .map(|permits| Arc::new(Semaphore::new(permits.min(Semaphore::MAX_PERMITS))));

        let mut tasks = JoinSet::new();
        for id in ids {
            let client = Arc::clone(&self.client);
            let cancel = cancel.clone();
            let limiter = limiter.clone();
            tasks.spawn(async move {
                let _permit = match limiter {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                (id, client.fetch_story_detail(id, &cancel).await)
            });
        }

        let mut stories = Vec::new();
        let mut absent = Vec::new();
        loop {
            let joined = tokio::select! {
                _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else { break };

            match joined {
                Ok((_, Ok(Some(story)))) => stories.push(story),
                Ok((id, Ok(None))) => {
                    debug!(id, "story detail absent, skipping");
                    absent.push(id);
                }
                Ok((_, Err(UpstreamError::Cancelled))) => return Err(UpstreamError::Cancelled),
                Ok((id, Err(e))) => warn!(id, error = %e, "story detail fetch failed, skipping"),
                Err(e) => warn!(error = %e, "story detail task did not complete"),
            }
        }

        self.remember_absent(&absent).await;
        Ok(stories)
    }

    async fn recently_absent(&self) -> HashSet<i64> {
        if self.options.negative_cache_ttl.is_none() {
            return HashSet::new();
        }
        let now = Instant::now();
        let mut absent = self.absent_ids.lock().await;
        absent.retain(|_, until| now < *until);
        absent.keys().copied().collect()
    }

    async fn remember_absent(&self, ids: &[i64]) {
        let Some(ttl) = self.options.negative_cache_ttl else {
            return;
        };
        if ids.is_empty() {
            return;
        }
        let until = deadline_after(Instant::now(), ttl);
        let mut absent = self.absent_ids.lock().await;
        for id in ids {
            absent.insert(*id, until);
        }
    }
}
