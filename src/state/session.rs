use std::collections::BTreeSet;
use std::sync::Arc;

use super::catalog::AssetCatalog;
use super::data::{Decision, PhotoItem, TriageState, TriageStats};
use super::store::{StoreResult, TriageStore};
use crate::error::TriageError;
use crate::media::AssetProvider;

/// The triage state machine.
///
/// Holds a cyclic cursor into the catalog. Every operation that moves the
/// cursor saves `(index, count)` to the store straight away, so at most the
/// latest move is lost on a crash.
///
/// Store failures never interrupt a swipe: the in-memory state still changes
/// and the failure is queued as a warning for `take_warning`.
///
/// A session has one owner. Share it between tasks behind a single mutex.
#[derive(Debug)]
pub struct TriageSession {
    catalog: AssetCatalog,
    store: Arc<TriageStore>,
    index: usize,
}

impl TriageSession {
    /// Resume at the saved position, clamped to the current collection, then
    /// skip ahead to the first photo that still needs a decision.
    pub fn resume(catalog: AssetCatalog) -> Self {
        let store = catalog.store().clone();
        let saved = store.load_position();
        let index = saved.clamp_to(catalog.len());

        tracing::debug!(
            "Resuming at {} (saved {} of {}, now {} photos)",
            index,
            saved.index,
            saved.total,
            catalog.len()
        );

        let mut session = TriageSession {
            catalog,
            store,
            index,
        };
        session.first_unprocessed();
        session
    }

    /// Load the catalog from the provider and resume a session on it.
    pub async fn open(
        provider: &dyn AssetProvider,
        store: Arc<TriageStore>,
    ) -> Result<Self, TriageError> {
        let catalog = AssetCatalog::load(provider, store).await?;
        Ok(Self::resume(catalog))
    }

    pub fn catalog(&self) -> &AssetCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<TriageStore> {
        &self.store
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&PhotoItem> {
        self.catalog.get(self.index)
    }

    /// The photo after `current()`, wrapping around. None with fewer than two photos.
    pub fn next(&self) -> Option<&PhotoItem> {
        let len = self.catalog.len();
        if len < 2 {
            return None;
        }
        self.catalog.get((self.index + 1) % len)
    }

    pub fn current_state(&self) -> TriageState {
        self.catalog.state_at(self.index)
    }

    /// One-based position and total, for an "n / total" indicator.
    pub fn progress(&self) -> (usize, usize) {
        let total = self.catalog.len();
        if total == 0 {
            (0, 0)
        } else {
            (self.index + 1, total)
        }
    }

    pub fn stats(&self) -> TriageStats {
        self.store.stats()
    }

    /// Record a decision for the current photo and move on, wrapping past the end.
    pub fn decide(&mut self, decision: Decision) {
        let Some(id) = self.current().map(|item| item.id.clone()) else {
            return;
        };

        let result = match decision {
            Decision::Kept => self.store.mark_kept(&id),
            Decision::MarkedForDeletion => self.store.mark_for_deletion(&id),
        };
        note(result);
        self.advance();
    }

    /// Clear the current photo's decision. The cursor stays put.
    pub fn undo(&mut self) {
        if let Some(id) = self.current().map(|item| item.id.clone()) {
            note(self.store.unmark(&id));
        }
    }

    pub fn move_next(&mut self) {
        self.advance();
    }

    pub fn move_previous(&mut self) {
        let len = self.catalog.len();
        if len == 0 {
            return;
        }
        self.index = (self.index + len - 1) % len;
        self.save_position();
    }

    /// Move to the first Unprocessed photo, scanning forward from the cursor
    /// and wrapping once. Leaves the cursor alone when everything is decided.
    pub fn first_unprocessed(&mut self) -> usize {
        let len = self.catalog.len();
        let found = (self.index..len)
            .chain(0..self.index.min(len))
            .find(|&i| !self.catalog.state_at(i).is_processed());

        if let Some(index) = found {
            self.index = index;
        }
        self.save_position();
        self.index
    }

    /// Re-fetch the collection, clamp the cursor and skip to unprocessed work.
    pub async fn refresh(&mut self, provider: &dyn AssetProvider) -> Result<(), TriageError> {
        self.catalog.refresh(provider).await?;
        self.clamp();
        self.first_unprocessed();
        Ok(())
    }

    /// Photos marked for deletion, in catalog order.
    pub fn marked_items(&self) -> Vec<&PhotoItem> {
        self.catalog.items_in(TriageState::MarkedForDeletion)
    }

    /// Undo every deletion mark in the collection.
    pub fn unmark_all(&mut self) {
        for id in self.catalog.marked_ids() {
            note(self.store.unmark(&id));
        }
    }

    /// Rescue the given marked photos: they become Kept.
    /// Ids that are not currently marked are ignored.
    pub fn keep_selected(&mut self, ids: &BTreeSet<String>) {
        for id in self.catalog.marked_ids().intersection(ids) {
            note(self.store.mark_kept(id));
        }
    }

    /// Forget which photos were kept, then move to the first one that needs a decision.
    pub fn clear_kept(&mut self) {
        note(self.store.clear_kept());
        self.first_unprocessed();
    }

    /// Drop every deletion mark, across the whole history and not just this
    /// collection.
    pub fn clear_marked(&mut self) {
        note(self.store.clear_marked());
        self.first_unprocessed();
    }

    /// Start over: no decisions, cursor back on the newest photo.
    pub fn clear_history(&mut self) {
        note(self.store.clear_all());
        self.index = 0;
        self.save_position();
    }

    /// The `StoreUnavailable` warning for a new outage, if one started.
    pub fn take_warning(&self) -> Option<TriageError> {
        self.store.take_warning()
    }

    /// Reconcile after the provider deleted `ids`: drop them from the
    /// catalog and the store, clamp the cursor, then find unprocessed work.
    pub(crate) fn apply_deletion(&mut self, ids: &BTreeSet<String>) {
        self.catalog.remove(ids);
        note(self.store.forget(ids.iter().map(String::as_str)));
        self.clamp();
        self.first_unprocessed();
    }

    fn advance(&mut self) {
        let len = self.catalog.len();
        if len == 0 {
            return;
        }
        self.index = (self.index + 1) % len;
        self.save_position();
    }

    fn clamp(&mut self) {
        let len = self.catalog.len();
        self.index = if len == 0 { 0 } else { self.index.min(len - 1) };
    }

    fn save_position(&self) {
        note(self.store.save_position(self.index, self.catalog.len()));
    }
}

/// Store failures are already queued as a warning by the store itself.
fn note(result: StoreResult<()>) {
    if let Err(e) = result {
        tracing::debug!("Triage state kept in memory only: {}", e);
    }
}
