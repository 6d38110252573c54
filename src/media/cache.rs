/// Decoded image cache
///
/// One slot per (photo id, tier). A slot is Absent, Pending, Ready or Failed.
/// All callers asking for the same key while a fetch is in flight share one
/// provider call through a `Shared` future. Results are written back by the
/// future itself, so a fetch nobody waits for any more still lands in the
/// cache when it completes.
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{AssetProvider, DecodedImage, ImageRequest, Tier};
use crate::error::TriageError;

pub type ImageResult = Result<Arc<DecodedImage>, TriageError>;

/// A fetch that any number of callers can await
pub type ImageFuture = Shared<BoxFuture<'static, ImageResult>>;

/// Target sizes per tier, as (width, height) bounding boxes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSizes {
    pub thumbnail: (u32, u32),
    pub full: (u32, u32),
}

impl Default for TierSizes {
    fn default() -> Self {
        Self {
            thumbnail: (200, 200),
            full: (800, 1200),
        }
    }
}

impl TierSizes {
    fn for_tier(&self, tier: Tier) -> (u32, u32) {
        match tier {
            Tier::Thumbnail => self.thumbnail,
            Tier::Full => self.full,
        }
    }
}

/// What the cache currently knows about a key
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Absent,
    Pending,
    Image(Arc<DecodedImage>),
    Failed(TriageError),
}

type CacheKey = (String, Tier);

enum Slot {
    Pending { ticket: u64, fetch: ImageFuture },
    Ready(Arc<DecodedImage>),
    Failed(TriageError),
}

#[derive(Default)]
struct CacheInner {
    slots: HashMap<CacheKey, Slot>,
    /// Completed keys, least recently used first
    completed: VecDeque<CacheKey>,
    next_ticket: u64,
}

#[derive(Clone)]
pub struct ImageCache {
    provider: Arc<dyn AssetProvider>,
    sizes: TierSizes,
    capacity: usize,
    inner: Arc<Mutex<CacheInner>>,
}

impl ImageCache {
    /// `capacity` bounds the number of completed entries; in-flight fetches
    /// are never evicted.
    pub fn new(provider: Arc<dyn AssetProvider>, sizes: TierSizes, capacity: usize) -> Self {
        ImageCache {
            provider,
            sizes,
            capacity: capacity.max(1),
            inner: Arc::new(Mutex::new(CacheInner::default())),
        }
    }

    pub fn get(&self, id: &str, tier: Tier) -> CacheLookup {
        let mut inner = self.lock();
        let key = (id.to_string(), tier);
        let lookup = match inner.slots.get(&key) {
            None => return CacheLookup::Absent,
            Some(Slot::Pending { .. }) => return CacheLookup::Pending,
            Some(Slot::Ready(image)) => CacheLookup::Image(image.clone()),
            Some(Slot::Failed(err)) => CacheLookup::Failed(err.clone()),
        };
        touch(&mut inner.completed, key);
        lookup
    }

    /// Start (or join) a fetch for `id` at `tier`.
    ///
    /// A cached image resolves immediately. A Failed entry is retried, since
    /// calling `request` is an explicit user-driven action. When a Tokio
    /// runtime is running the fetch is driven in the background, so dropping
    /// the returned future abandons it without cancelling it.
    pub fn request(&self, id: &str, tier: Tier) -> ImageFuture {
        let mut inner = self.lock();
        let key = (id.to_string(), tier);

        match inner.slots.get(&key) {
            Some(Slot::Ready(image)) => {
                let image = image.clone();
                touch(&mut inner.completed, key);
                return futures::future::ready(ImageResult::Ok(image)).boxed().shared();
            }
            Some(Slot::Pending { fetch, .. }) => return fetch.clone(),
            Some(Slot::Failed(_)) | None => {}
        }

        inner.completed.retain(|k| k != &key);
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;

        let fetch = self.start_fetch(key.clone(), ticket);
        inner.slots.insert(
            key,
            Slot::Pending {
                ticket,
                fetch: fetch.clone(),
            },
        );
        drop(inner);

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(fetch.clone().map(|_| ()));
        }
        fetch
    }

    /// Warm the cache for a photo the user is about to see.
    pub fn prefetch(&self, id: &str, tier: Tier) {
        let _ = self.request(id, tier);
    }

    /// Reset one key to Absent. Pending fetches are left alone.
    pub fn evict(&self, id: &str, tier: Tier) {
        let mut inner = self.lock();
        let key = (id.to_string(), tier);
        if matches!(inner.slots.get(&key), Some(Slot::Ready(_) | Slot::Failed(_))) {
            inner.slots.remove(&key);
            inner.completed.retain(|k| k != &key);
        }
    }

    /// Forget every tier of the given photos, including fetches in flight.
    /// Used once the photos have been deleted.
    pub fn purge<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        let mut inner = self.lock();
        for id in ids {
            for tier in [Tier::Thumbnail, Tier::Full] {
                let key = (id.to_string(), tier);
                inner.slots.remove(&key);
                inner.completed.retain(|k| k != &key);
            }
        }
    }

    /// Drop completed entries until at most `max` remain, oldest first.
    pub fn trim(&self, max: usize) {
        let mut inner = self.lock();
        evict_over(&mut inner, max);
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn start_fetch(&self, key: CacheKey, ticket: u64) -> ImageFuture {
        let provider = self.provider.clone();
        let inner = self.inner.clone();
        let capacity = self.capacity;
        let request = ImageRequest {
            id: key.0.clone(),
            target_size: self.sizes.for_tier(key.1),
            policy: key.1.policy(),
        };

        async move {
            let result = provider
                .request_image(request)
                .await
                .map(Arc::new)
                .map_err(|e| TriageError::ImageLoadFailed {
                    id: key.0.clone(),
                    tier: key.1,
                    reason: e.to_string(),
                });

            if let Err(err) = &result {
                tracing::warn!("⚠️  {}", err);
            }
            complete(&inner, key, ticket, &result, capacity);
            result
        }
        .boxed()
        .shared()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("sizes", &self.sizes)
            .field("capacity", &self.capacity)
            .field("entries", &self.len())
            .finish()
    }
}

/// Store a finished fetch, unless its slot was purged or replaced meanwhile.
fn complete(
    inner: &Mutex<CacheInner>,
    key: CacheKey,
    ticket: u64,
    result: &ImageResult,
    capacity: usize,
) {
    let mut inner = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let current = matches!(
        inner.slots.get(&key),
        Some(Slot::Pending { ticket: t, .. }) if *t == ticket
    );
    if !current {
        return;
    }

    let slot = match result {
        Ok(image) => Slot::Ready(image.clone()),
        Err(err) => Slot::Failed(err.clone()),
    };
    inner.slots.insert(key.clone(), slot);
    touch(&mut inner.completed, key);
    evict_over(&mut inner, capacity);
}

fn touch(completed: &mut VecDeque<CacheKey>, key: CacheKey) {
    completed.retain(|k| k != &key);
    completed.push_back(key);
}

fn evict_over(inner: &mut CacheInner, max: usize) {
    while inner.completed.len() > max {
        let Some(oldest) = inner.completed.pop_front() else {
            break;
        };
        if matches!(inner.slots.get(&oldest), Some(Slot::Ready(_) | Slot::Failed(_))) {
            inner.slots.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AssetRecord, DeliveryPolicy, MemoryProvider};
    use chrono::Utc;

    fn cache_with(provider: Arc<MemoryProvider>, capacity: usize) -> ImageCache {
        ImageCache::new(provider, TierSizes::default(), capacity)
    }

    async fn settle(cache: &ImageCache, id: &str, tier: Tier) -> CacheLookup {
        for _ in 0..100 {
            match cache.get(id, tier) {
                CacheLookup::Pending => tokio::task::yield_now().await,
                other => return other,
            }
        }
        cache.get(id, tier)
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let provider = Arc::new(MemoryProvider::with_photos(["a"]));
        let cache = cache_with(provider.clone(), 8);

        provider.hold_images();
        let first = cache.request("a", Tier::Thumbnail);
        let second = cache.request("a", Tier::Thumbnail);
        assert!(matches!(cache.get("a", Tier::Thumbnail), CacheLookup::Pending));

        provider.release_images();
        let (first, second) = futures::join!(first, second);
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.image_calls(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_fetch_still_fills_cache() {
        let provider = Arc::new(MemoryProvider::with_photos(["a"]));
        let cache = cache_with(provider.clone(), 8);

        drop(cache.request("a", Tier::Full));

        assert!(matches!(settle(&cache, "a", Tier::Full).await, CacheLookup::Image(_)));
        // A cached image does not go back to the provider
        cache.request("a", Tier::Full).await.unwrap();
        assert_eq!(provider.image_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_sticky_until_requested_again() {
        let provider = Arc::new(MemoryProvider::with_photos(["a"]));
        let cache = cache_with(provider.clone(), 8);
        provider.set_image_failing("a", true);

        let err = cache.request("a", Tier::Thumbnail).await.unwrap_err();
        assert!(matches!(err, TriageError::ImageLoadFailed { tier: Tier::Thumbnail, .. }));
        assert!(matches!(cache.get("a", Tier::Thumbnail), CacheLookup::Failed(_)));
        assert_eq!(provider.image_calls(), 1);

        provider.set_image_failing("a", false);
        cache.request("a", Tier::Thumbnail).await.unwrap();
        assert!(matches!(cache.get("a", Tier::Thumbnail), CacheLookup::Image(_)));
        assert_eq!(provider.image_calls(), 2);
    }

    #[tokio::test]
    async fn test_tiers_are_independent() {
        let provider = Arc::new(MemoryProvider::new(vec![AssetRecord {
            id: "live".into(),
            created_at: Utc::now(),
            width: 3000,
            height: 4000,
            is_live: true,
            location: None,
        }]));
        let cache = cache_with(provider.clone(), 8);

        let full = cache.request("live", Tier::Full).await.unwrap();
        assert!(matches!(cache.get("live", Tier::Thumbnail), CacheLookup::Absent));
        assert_eq!((full.width, full.height), (800, 1200));

        let requests = provider.image_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].policy, DeliveryPolicy::HighQualityNetworkAllowed);
    }

    #[tokio::test]
    async fn test_eviction_resets_to_absent() {
        let provider = Arc::new(MemoryProvider::with_photos(["a", "b", "c"]));
        let cache = cache_with(provider.clone(), 2);

        for id in ["a", "b", "c"] {
            cache.request(id, Tier::Thumbnail).await.unwrap();
        }

        assert!(matches!(cache.get("a", Tier::Thumbnail), CacheLookup::Absent));
        assert!(matches!(cache.get("c", Tier::Thumbnail), CacheLookup::Image(_)));

        cache.trim(0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_evict_forces_a_fresh_fetch() {
        let provider = Arc::new(MemoryProvider::with_photos(["a"]));
        let cache = cache_with(provider.clone(), 8);

        cache.request("a", Tier::Thumbnail).await.unwrap();
        cache.evict("a", Tier::Thumbnail);
        assert!(matches!(cache.get("a", Tier::Thumbnail), CacheLookup::Absent));

        cache.request("a", Tier::Thumbnail).await.unwrap();
        assert_eq!(provider.image_calls(), 2);
    }

    #[tokio::test]
    async fn test_purged_fetch_is_not_stored() {
        let provider = Arc::new(MemoryProvider::with_photos(["a"]));
        let cache = cache_with(provider.clone(), 8);

        provider.hold_images();
        let pending = cache.request("a", Tier::Full);
        cache.purge(["a"]);
        provider.release_images();

        // The caller still gets its image, the cache does not keep it
        pending.await.unwrap();
        assert!(matches!(cache.get("a", Tier::Full), CacheLookup::Absent));
    }
}
