use std::collections::BTreeSet;
use std::sync::Arc;

use super::session::TriageSession;
use crate::error::TriageError;
use crate::media::{ensure_authorized, AssetProvider, ImageCache};

/// Result of a successful commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Ids removed from the library; empty when nothing was marked
    pub deleted: BTreeSet<String>,
}

impl DeletionReport {
    pub fn count(&self) -> usize {
        self.deleted.len()
    }

    pub fn is_noop(&self) -> bool {
        self.deleted.is_empty()
    }
}

/// Deletes marked photos through the provider and reconciles the session.
///
/// The provider deletes a batch atomically. Only after it reports success
/// are the catalog, store and image cache touched; on failure nothing
/// changes and the user can simply commit again.
pub struct DeletionCoordinator {
    provider: Arc<dyn AssetProvider>,
    cache: Option<ImageCache>,
}

impl DeletionCoordinator {
    pub fn new(provider: Arc<dyn AssetProvider>) -> Self {
        DeletionCoordinator {
            provider,
            cache: None,
        }
    }

    /// Also drop cached images of deleted photos.
    pub fn with_cache(mut self, cache: ImageCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Delete every photo currently marked for deletion.
    pub async fn commit(
        &self,
        session: &mut TriageSession,
    ) -> Result<DeletionReport, TriageError> {
        let batch = session.catalog().marked_ids();
        self.delete(session, batch).await
    }

    /// Delete only the selected marked photos; the other marked photos go back
    /// to Unprocessed once the deletion succeeded. Unmarked ids are ignored.
    pub async fn commit_selected(
        &self,
        session: &mut TriageSession,
        selected: &BTreeSet<String>,
    ) -> Result<DeletionReport, TriageError> {
        let marked = session.catalog().marked_ids();
        let batch: BTreeSet<String> = marked.intersection(selected).cloned().collect();
        if batch.is_empty() {
            return Ok(DeletionReport::default());
        }

        let report = self.delete(session, batch).await?;
        session.unmark_all();
        Ok(report)
    }

    async fn delete(
        &self,
        session: &mut TriageSession,
        batch: BTreeSet<String>,
    ) -> Result<DeletionReport, TriageError> {
        if batch.is_empty() {
            tracing::debug!("Nothing marked for deletion");
            return Ok(DeletionReport::default());
        }

        ensure_authorized(self.provider.as_ref())?;

        let count = batch.len();
        tracing::info!("🗑️  Deleting {} marked photos", count);

        if let Err(e) = self.provider.delete_batch(&batch).await {
            tracing::error!("❌ Deletion of {} photos failed: {}", count, e);
            return Err(TriageError::DeletionFailed {
                count,
                reason: e.to_string(),
            });
        }

        session.apply_deletion(&batch);
        if let Some(cache) = &self.cache {
            cache.purge(batch.iter().map(String::as_str));
        }

        tracing::info!(
            "✅ Deleted {} photos, {} remain",
            count,
            session.catalog().len()
        );
        Ok(DeletionReport { deleted: batch })
    }
}

impl std::fmt::Debug for DeletionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionCoordinator")
            .field("cache", &self.cache)
            .finish()
    }
}
