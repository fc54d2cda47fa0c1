use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::upstream::Story;

/// Key under which the merged story list is stored.
pub const ALL_STORIES_KEY: &str = "AllCachedStories";

/// Deadline used when `now + ttl` cannot be represented (roughly 30 years out).
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// `now + ttl`, clamped instead of overflowing for absurdly long lifetimes.
pub(crate) fn deadline_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Storage for merged story lists with per-entry expiry.
///
/// The cache only stores what it is given; deciding when to write belongs to the caller.
#[async_trait::async_trait]
pub trait StoryCache: Send + Sync {
    /// The stored value, or `None` if missing or expired.
    async fn get(&self, key: &str) -> Option<Vec<Story>>;

    /// Replace the value under `key`, expiring `ttl` from now.
    async fn set(&self, key: &str, value: Vec<Story>, ttl: Duration);
}

struct CacheEntry {
    stories: Vec<Story>,
    expires_at: Instant,
}

/// Process-lifetime in-memory cache.
#[derive(Default)]
pub struct MemoryStoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StoryCache for MemoryStoryCache {
    async fn get(&self, key: &str) -> Option<Vec<Story>> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.stories.clone())
    }

    async fn set(&self, key: &str, value: Vec<Story>, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        // expired entries are only dropped here, on write
        entries.retain(|_, entry| now < entry.expires_at);
        entries.insert(
            key.to_string(),
            CacheEntry {
                stories: value,
                expires_at: deadline_after(now, ttl),
            },
        );
    }
}

/// Cache that never holds anything. Every aggregation becomes a full fetch.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStoryCache;

#[async_trait::async_trait]
impl StoryCache for NullStoryCache {
    async fn get(&self, _key: &str) -> Option<Vec<Story>> {
        None
    }

    async fn set(&self, _key: &str, _value: Vec<Story>, _ttl: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(id: i64) -> Story {
        Story {
            id,
            title: format!("Story {}", id),
            url: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = MemoryStoryCache::new();
        assert!(cache.get(ALL_STORIES_KEY).await.is_none());

        cache
            .set(ALL_STORIES_KEY, vec![story(1)], Duration::from_secs(60))
            .await;
        assert_eq!(cache.get(ALL_STORIES_KEY).await, Some(vec![story(1)]));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get(ALL_STORIES_KEY).await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(ALL_STORIES_KEY).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn set_replaces_value_and_restarts_expiry() {
        let cache = MemoryStoryCache::new();
        cache
            .set(ALL_STORIES_KEY, vec![story(1), story(2)], Duration::from_secs(10))
            .await;

        tokio::time::advance(Duration::from_secs(8)).await;
        cache
            .set(ALL_STORIES_KEY, vec![story(3)], Duration::from_secs(10))
            .await;

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(ALL_STORIES_KEY).await, Some(vec![story(3)]));
    }

    #[tokio::test]
    async fn empty_value_is_still_a_hit() {
        let cache = MemoryStoryCache::new();
        cache
            .set(ALL_STORIES_KEY, Vec::new(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get(ALL_STORIES_KEY).await, Some(Vec::new()));
        assert!(cache.get("other").await.is_none());
    }

    #[tokio::test]
    async fn huge_ttl_is_clamped_not_overflowed() {
        let cache = MemoryStoryCache::new();
        cache
            .set(ALL_STORIES_KEY, vec![story(1)], Duration::MAX)
            .await;
        assert_eq!(cache.get(ALL_STORIES_KEY).await, Some(vec![story(1)]));

        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::MAX), now + FAR_FUTURE);
        assert_eq!(
            deadline_after(now, Duration::from_secs(5)),
            now + Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn null_cache_forgets_everything() {
        let cache = NullStoryCache;
        cache
            .set(ALL_STORIES_KEY, vec![story(1)], Duration::from_secs(60))
            .await;
        assert!(cache.get(ALL_STORIES_KEY).await.is_none());
    }
}
