use std::collections::BTreeSet;
use std::sync::Arc;

use super::data::{PhotoItem, TriageState, TriageStats};
use super::store::TriageStore;
use crate::error::TriageError;
use crate::media::{AssetProvider, Authorization};

/// Ordered, metadata-only view of the photo collection, newest first.
///
/// Triage state is not copied onto the items; it is read from the store the
/// catalog was loaded with, so there is a single source of truth. Store
/// entries for photos that are no longer in the collection are ignored.
pub struct AssetCatalog {
    items: Vec<PhotoItem>,
    store: Arc<TriageStore>,
}

impl AssetCatalog {
    /// Fetch the collection from the provider, asking for access first if needed.
    pub async fn load(
        provider: &dyn AssetProvider,
        store: Arc<TriageStore>,
    ) -> Result<Self, TriageError> {
        let items = fetch_items(provider).await?;
        let catalog = AssetCatalog { items, store };

        let stats = catalog.stats();
        tracing::info!(
            "📚 Catalog loaded: {} photos ({})",
            catalog.len(),
            stats
        );
        Ok(catalog)
    }

    /// Re-fetch after the collection may have changed underneath us.
    /// On failure the previous sequence is kept.
    pub async fn refresh(&mut self, provider: &dyn AssetProvider) -> Result<(), TriageError> {
        let items = fetch_items(provider).await?;
        tracing::info!("🔄 Catalog refreshed: {} -> {} photos", self.items.len(), items.len());
        self.items = items;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PhotoItem> {
        self.items.get(index)
    }

    pub fn items(&self) -> &[PhotoItem] {
        &self.items
    }

    pub fn state_at(&self, index: usize) -> TriageState {
        self.items
            .get(index)
            .map(|item| self.store.state(&item.id))
            .unwrap_or_default()
    }

    /// Items paired with their current triage state.
    pub fn entries(&self) -> impl Iterator<Item = (&PhotoItem, TriageState)> + '_ {
        self.items
            .iter()
            .map(move |item| (item, self.store.state(&item.id)))
    }

    pub fn items_in(&self, state: TriageState) -> Vec<&PhotoItem> {
        self.entries()
            .filter(|(_, s)| *s == state)
            .map(|(item, _)| item)
            .collect()
    }

    pub fn marked_ids(&self) -> BTreeSet<String> {
        self.items_in(TriageState::MarkedForDeletion)
            .into_iter()
            .map(|item| item.id.clone())
            .collect()
    }

    /// Counts for photos that are actually in the collection.
    pub fn stats(&self) -> TriageStats {
        self.entries()
            .fold(TriageStats::default(), |mut stats, (_, state)| {
                match state {
                    TriageState::Kept => stats.kept += 1,
                    TriageState::MarkedForDeletion => stats.marked += 1,
                    TriageState::Unprocessed => {}
                }
                stats
            })
    }

    /// Drop deleted photos from the sequence. Returns how many were removed.
    pub fn remove(&mut self, ids: &BTreeSet<String>) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !ids.contains(&item.id));
        before - self.items.len()
    }

    pub fn store(&self) -> &Arc<TriageStore> {
        &self.store
    }
}

impl std::fmt::Debug for AssetCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetCatalog")
            .field("len", &self.items.len())
            .finish()
    }
}

async fn fetch_items(provider: &dyn AssetProvider) -> Result<Vec<PhotoItem>, TriageError> {
    let mut status = provider.authorization();
    if status == Authorization::NotDetermined {
        status = provider.request_authorization().await;
    }
    if !status.is_granted() {
        return Err(TriageError::PermissionDenied { status });
    }

    let mut items: Vec<PhotoItem> = provider
        .fetch_all()
        .await?
        .into_iter()
        .map(PhotoItem::from)
        .collect();
    sort_newest_first(&mut items);
    Ok(items)
}

fn sort_newest_first(items: &mut [PhotoItem]) {
    // Stable, so providers that already sort keep their tie order
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AssetRecord, MemoryProvider};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_load_applies_store_state() {
        let provider = MemoryProvider::with_photos(["a", "b", "c"]);
        let store = Arc::new(TriageStore::in_memory());
        store.mark_kept("a").unwrap();
        store.mark_for_deletion("c").unwrap();
        store.mark_for_deletion("gone").unwrap();

        let catalog = AssetCatalog::load(&provider, store).await.unwrap();

        let states: Vec<TriageState> = catalog.entries().map(|(_, s)| s).collect();
        assert_eq!(
            states,
            vec![
                TriageState::Kept,
                TriageState::Unprocessed,
                TriageState::MarkedForDeletion
            ]
        );
        // "gone" is in the store but not in the collection
        assert_eq!(catalog.stats(), TriageStats { kept: 1, marked: 1 });
        assert_eq!(catalog.marked_ids(), BTreeSet::from(["c".to_string()]));
    }

    #[tokio::test]
    async fn test_load_sorts_newest_first() {
        let now = Utc::now();
        let record = |id: &str, age: i64| AssetRecord {
            id: id.into(),
            created_at: now - Duration::hours(age),
            width: 10,
            height: 10,
            is_live: false,
            location: None,
        };
        let provider = MemoryProvider::new(vec![record("old", 5), record("new", 1), record("mid", 3)]);

        let catalog = AssetCatalog::load(&provider, Arc::new(TriageStore::in_memory()))
            .await
            .unwrap();

        let ids: Vec<&str> = catalog.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn test_denied_access_is_reported() {
        let provider = MemoryProvider::with_photos(["a"]);
        provider.set_authorization(Authorization::Denied);

        let err = AssetCatalog::load(&provider, Arc::new(TriageStore::in_memory()))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TriageError::PermissionDenied {
                status: Authorization::Denied
            }
        );
        assert_eq!(provider.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_external_changes() {
        let provider = MemoryProvider::with_photos(["a", "b"]);
        let store = Arc::new(TriageStore::in_memory());
        let mut catalog = AssetCatalog::load(&provider, store).await.unwrap();

        provider.remove_external("a");
        provider.insert(AssetRecord {
            id: "fresh".into(),
            created_at: Utc::now(),
            width: 10,
            height: 10,
            is_live: false,
            location: None,
        });
        catalog.refresh(&provider).await.unwrap();

        let ids: Vec<&str> = catalog.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh", "b"]);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_items() {
        let provider = MemoryProvider::with_photos(["a", "b"]);
        let mut catalog = AssetCatalog::load(&provider, Arc::new(TriageStore::in_memory()))
            .await
            .unwrap();

        provider.set_authorization(Authorization::Denied);
        assert!(catalog.refresh(&provider).await.is_err());
        assert_eq!(catalog.len(), 2);
    }
}
