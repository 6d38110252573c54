use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::data::{BrowsePosition, TriageState, TriageStats};
use super::substrate::{MemorySubstrate, Substrate};
use crate::error::{SubstrateError, TriageError};

const KEPT_KEY: &str = "kept_photos";
const MARKED_KEY: &str = "marked_photos";
const INDEX_KEY: &str = "browse_index";
const TOTAL_KEY: &str = "browse_total";

pub type StoreResult<T> = Result<T, TriageError>;

/// The persistent triage store.
///
/// Holds the kept and marked identifier sets plus the last browsing position.
/// Every mutation updates the in-memory view first and then writes through to
/// the substrate while holding the same lock, so readers observe either the
/// state before or after a call, never a mix.
///
/// When the substrate rejects a write the in-memory change is kept and the call
/// returns `StoreUnavailable`. A warning is queued once per outage. The outage
/// ends only once the next successful write has also rewritten both sets and
/// the position from memory, so nothing decided in the meantime is lost.
pub struct TriageStore {
    substrate: Box<dyn Substrate>,
    inner: Mutex<StoreInner>,
    degraded: AtomicBool,
    warning: Mutex<Option<TriageError>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    /// Only Kept and MarkedForDeletion are stored; absence means Unprocessed
    states: HashMap<String, TriageState>,
    position: BrowsePosition,
}

impl TriageStore {
    /// Load the triage sets and browsing position from a substrate.
    pub fn open(substrate: Box<dyn Substrate>) -> Result<Self, SubstrateError> {
        let kept = substrate.get_set(KEPT_KEY)?;
        let marked = substrate.get_set(MARKED_KEY)?;

        let mut states = HashMap::with_capacity(kept.len() + marked.len());
        for id in &marked {
            states.insert(id.clone(), TriageState::MarkedForDeletion);
        }

        // An id in both sets means a crash landed between the two writes of a
        // flip. Resolve towards Kept so nothing gets deleted by accident.
        let mut overlap = Vec::new();
        for id in kept {
            if states.insert(id.clone(), TriageState::Kept).is_some() {
                overlap.push(id);
            }
        }
        for id in &overlap {
            tracing::warn!("Photo {} was both kept and marked, keeping it", id);
            if let Err(e) = substrate.remove_member(MARKED_KEY, id) {
                tracing::warn!("Could not repair marked set: {}", e);
            }
        }

        let index = read_count(substrate.get_int(INDEX_KEY)?);
        let total = read_count(substrate.get_int(TOTAL_KEY)?);

        tracing::info!("Triage store loaded: {} decided photos", states.len());

        Ok(TriageStore {
            substrate,
            inner: Mutex::new(StoreInner {
                states,
                position: BrowsePosition { index, total },
            }),
            degraded: AtomicBool::new(false),
            warning: Mutex::new(None),
        })
    }

    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        // Reading an empty memory substrate cannot fail
        match Self::open(Box::new(MemorySubstrate::new())) {
            Ok(store) => store,
            Err(_) => unreachable!("empty memory substrate failed to load"),
        }
    }

    pub fn mark_kept(&self, id: &str) -> StoreResult<()> {
        self.assign(id, TriageState::Kept)
    }

    pub fn mark_for_deletion(&self, id: &str) -> StoreResult<()> {
        self.assign(id, TriageState::MarkedForDeletion)
    }

    /// Return a photo to Unprocessed.
    pub fn unmark(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let result = match inner.states.remove(id) {
            Some(previous) => self.substrate.remove_member(set_key(previous), id),
            None => Ok(()),
        };
        self.track(&inner, result)
    }

    pub fn state(&self, id: &str) -> TriageState {
        self.lock().states.get(id).copied().unwrap_or_default()
    }

    pub fn is_kept(&self, id: &str) -> bool {
        self.state(id) == TriageState::Kept
    }

    pub fn is_marked_for_deletion(&self, id: &str) -> bool {
        self.state(id) == TriageState::MarkedForDeletion
    }

    /// Drop deleted photos from both sets for good.
    pub fn forget<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> StoreResult<()> {
        let mut inner = self.lock();
        let mut result = Ok(());
        for id in ids {
            if let Some(previous) = inner.states.remove(id) {
                if let Err(e) = self.substrate.remove_member(set_key(previous), id) {
                    result = Err(e);
                }
            }
        }
        self.track(&inner, result)
    }

    /// Empty both sets and the saved position.
    pub fn clear_all(&self) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.states.clear();
        inner.position = BrowsePosition::default();

        let result = [KEPT_KEY, MARKED_KEY, INDEX_KEY, TOTAL_KEY]
            .iter()
            .try_for_each(|key| self.substrate.remove(key));
        self.track(&inner, result)
    }

    pub fn clear_kept(&self) -> StoreResult<()> {
        self.clear_state(TriageState::Kept)
    }

    pub fn clear_marked(&self) -> StoreResult<()> {
        self.clear_state(TriageState::MarkedForDeletion)
    }

    pub fn stats(&self) -> TriageStats {
        let inner = self.lock();
        let kept = inner
            .states
            .values()
            .filter(|s| **s == TriageState::Kept)
            .count();
        TriageStats {
            kept,
            marked: inner.states.len() - kept,
        }
    }

    pub fn kept_ids(&self) -> Vec<String> {
        self.ids_in(TriageState::Kept)
    }

    pub fn marked_ids(&self) -> Vec<String> {
        self.ids_in(TriageState::MarkedForDeletion)
    }

    pub fn save_position(&self, index: usize, total: usize) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.position = BrowsePosition { index, total };

        let result = self
            .substrate
            .put_int(TOTAL_KEY, total as i64)
            .and_then(|_| self.substrate.put_int(INDEX_KEY, index as i64));
        self.track(&inner, result)
    }

    /// The last saved position, with the index clamped into the saved total.
    pub fn load_position(&self) -> BrowsePosition {
        let saved = self.lock().position;
        BrowsePosition {
            index: saved.clamp_to(saved.total),
            total: saved.total,
        }
    }

    /// True while writes are failing and state lives only in memory.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Take the pending `StoreUnavailable` warning, if a new outage started.
    pub fn take_warning(&self) -> Option<TriageError> {
        self.warning.lock().ok().and_then(|mut w| w.take())
    }

    fn assign(&self, id: &str, state: TriageState) -> StoreResult<()> {
        let mut inner = self.lock();
        let previous = inner.states.insert(id.to_string(), state);
        if previous == Some(state) {
            // Nothing to write, but a pending resync may still be owed
            return self.track(&inner, Ok(()));
        }

        // Clear the old membership before adding the new one: a crash in
        // between leaves the photo Unprocessed, never in both sets.
        let result = match previous {
            Some(old) => self.substrate.remove_member(set_key(old), id),
            None => Ok(()),
        }
        .and_then(|_| self.substrate.insert_member(set_key(state), id));

        self.track(&inner, result)
    }

    fn clear_state(&self, state: TriageState) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.states.retain(|_, s| *s != state);
        let result = self.substrate.remove(set_key(state));
        self.track(&inner, result)
    }

    fn ids_in(&self, state: TriageState) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn track(&self, inner: &StoreInner, result: Result<(), SubstrateError>) -> StoreResult<()> {
        match result {
            Ok(()) if self.degraded.load(Ordering::SeqCst) => match self.resync(inner) {
                Ok(()) => {
                    self.degraded.store(false, Ordering::SeqCst);
                    tracing::info!("✅ Triage store writable again, state resynced");
                    Ok(())
                }
                Err(e) => {
                    tracing::debug!("Triage store resync failed: {}", e);
                    Err(TriageError::from(e))
                }
            },
            Ok(()) => Ok(()),
            Err(e) => {
                let err = TriageError::from(e);
                if !self.degraded.swap(true, Ordering::SeqCst) {
                    tracing::warn!("⚠️  {}", err);
                    if let Ok(mut warning) = self.warning.lock() {
                        *warning = Some(err.clone());
                    }
                }
                Err(err)
            }
        }
    }

    /// Overwrite the durable sets and position with the in-memory view.
    ///
    /// The marked set goes first: a crash before the kept set lands can leave
    /// a rescued photo Unprocessed, or in both sets (read back as Kept), but
    /// never marked.
    fn resync(&self, inner: &StoreInner) -> Result<(), SubstrateError> {
        let members = |wanted: TriageState| -> HashSet<String> {
            inner
                .states
                .iter()
                .filter(|(_, s)| **s == wanted)
                .map(|(id, _)| id.clone())
                .collect()
        };
        self.substrate
            .put_set(MARKED_KEY, &members(TriageState::MarkedForDeletion))?;
        self.substrate.put_set(KEPT_KEY, &members(TriageState::Kept))?;
        self.substrate
            .put_int(TOTAL_KEY, inner.position.total as i64)?;
        self.substrate
            .put_int(INDEX_KEY, inner.position.index as i64)
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // A poisoned lock only means another thread panicked mid-call; the
        // map itself is always left consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for TriageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriageStore")
            .field("stats", &self.stats())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

fn set_key(state: TriageState) -> &'static str {
    match state {
        TriageState::MarkedForDeletion => MARKED_KEY,
        _ => KEPT_KEY,
    }
}

fn read_count(value: Option<i64>) -> usize {
    value.and_then(|v| usize::try_from(v).ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::substrate::SqliteSubstrate;
    use std::sync::Arc;
    use std::thread;

    /// Substrate shared with the test so it can inspect and break it
    struct SharedSubstrate(Arc<MemorySubstrate>);

    impl Substrate for SharedSubstrate {
        fn get_set(&self, key: &str) -> Result<HashSet<String>, SubstrateError> {
            self.0.get_set(key)
        }
        fn put_set(&self, key: &str, members: &HashSet<String>) -> Result<(), SubstrateError> {
            self.0.put_set(key, members)
        }
        fn get_int(&self, key: &str) -> Result<Option<i64>, SubstrateError> {
            self.0.get_int(key)
        }
        fn put_int(&self, key: &str, value: i64) -> Result<(), SubstrateError> {
            self.0.put_int(key, value)
        }
        fn remove(&self, key: &str) -> Result<(), SubstrateError> {
            self.0.remove(key)
        }
    }

    fn shared_store() -> (TriageStore, Arc<MemorySubstrate>) {
        let substrate = Arc::new(MemorySubstrate::new());
        let store = TriageStore::open(Box::new(SharedSubstrate(substrate.clone()))).unwrap();
        (store, substrate)
    }

    #[test]
    fn test_marks_are_mutually_exclusive() {
        let (store, substrate) = shared_store();
        let ids = ["a", "b", "c"];

        // Deterministic walk through every kind of mutation
        for step in 0..60usize {
            let id = ids[step % ids.len()];
            match (step / ids.len() + step) % 3 {
                0 => store.mark_kept(id).unwrap(),
                1 => store.mark_for_deletion(id).unwrap(),
                _ => store.unmark(id).unwrap(),
            }

            let kept = substrate.get_set(KEPT_KEY).unwrap();
            let marked = substrate.get_set(MARKED_KEY).unwrap();
            assert!(kept.is_disjoint(&marked), "step {step}: {kept:?} / {marked:?}");
            for id in ids {
                assert!(!(store.is_kept(id) && store.is_marked_for_deletion(id)));
            }
        }
    }

    #[test]
    fn test_flip_moves_between_sets() {
        let (store, substrate) = shared_store();

        store.mark_kept("a").unwrap();
        store.mark_for_deletion("a").unwrap();

        assert!(store.is_marked_for_deletion("a"));
        assert!(!store.is_kept("a"));
        assert!(substrate.get_set(KEPT_KEY).unwrap().is_empty());
        assert!(substrate.get_set(MARKED_KEY).unwrap().contains("a"));
        assert_eq!(store.stats(), TriageStats { kept: 0, marked: 1 });
    }

    #[test]
    fn test_position_round_trip() {
        let store = TriageStore::in_memory();

        store.save_position(7, 10).unwrap();
        assert_eq!(store.load_position(), BrowsePosition { index: 7, total: 10 });

        store.save_position(12, 10).unwrap();
        assert_eq!(store.load_position(), BrowsePosition { index: 9, total: 10 });

        store.save_position(3, 0).unwrap();
        assert_eq!(store.load_position(), BrowsePosition { index: 0, total: 0 });
    }

    #[test]
    fn test_clear_all_is_idempotent() {
        let store = TriageStore::in_memory();
        store.mark_kept("a").unwrap();
        store.mark_for_deletion("b").unwrap();
        store.save_position(1, 2).unwrap();

        store.clear_all().unwrap();
        store.clear_all().unwrap();

        assert_eq!(store.stats(), TriageStats::default());
        assert_eq!(store.load_position(), BrowsePosition::default());
    }

    #[test]
    fn test_clear_one_set() {
        let store = TriageStore::in_memory();
        store.mark_kept("a").unwrap();
        store.mark_for_deletion("b").unwrap();

        store.clear_marked().unwrap();

        assert_eq!(store.kept_ids(), vec!["a".to_string()]);
        assert!(store.marked_ids().is_empty());
    }

    #[test]
    fn test_unavailable_substrate_keeps_memory_state() {
        let (store, substrate) = shared_store();
        substrate.set_failing(true);

        let err = store.mark_for_deletion("a").unwrap_err();
        assert!(matches!(err, TriageError::StoreUnavailable { .. }));
        assert!(store.is_marked_for_deletion("a"));
        assert!(store.is_degraded());

        // Second failure in the same outage returns an error but no new warning
        assert!(store.mark_kept("b").is_err());
        assert!(store.take_warning().is_some());
        assert!(store.take_warning().is_none());

        substrate.set_failing(false);
        store.mark_kept("c").unwrap();
        assert!(!store.is_degraded());
    }

    #[test]
    fn test_decisions_made_during_outage_survive_restart() {
        let (store, substrate) = shared_store();
        store.mark_for_deletion("a").unwrap();

        substrate.set_failing(true);
        assert!(store.mark_kept("a").is_err());
        assert!(store.mark_for_deletion("c").is_err());
        substrate.set_failing(false);

        // Any successful write ends the outage by rewriting everything
        store.mark_kept("b").unwrap();
        assert!(!store.is_degraded());

        let reopened = TriageStore::open(Box::new(SharedSubstrate(substrate.clone()))).unwrap();
        assert!(reopened.is_kept("a"));
        assert!(reopened.is_kept("b"));
        assert!(reopened.is_marked_for_deletion("c"));
        assert!(!substrate.get_set(MARKED_KEY).unwrap().contains("a"));
    }

    #[test]
    fn test_repeating_a_decision_after_outage_repairs_substrate() {
        let (store, substrate) = shared_store();
        store.mark_for_deletion("a").unwrap();

        substrate.set_failing(true);
        assert!(store.mark_kept("a").is_err());
        substrate.set_failing(false);

        // Same state as in memory, so only the resync writes anything
        store.mark_kept("a").unwrap();
        assert!(!store.is_degraded());
        assert_eq!(substrate.get_set(KEPT_KEY).unwrap(), HashSet::from(["a".to_string()]));
        assert!(substrate.get_set(MARKED_KEY).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_flips_never_tear() {
        let (store, substrate) = shared_store();
        let store = Arc::new(store);

        let writers: Vec<_> = (0..4)
            .map(|worker| {
                let store = store.clone();
                thread::spawn(move || {
                    for step in 0..200usize {
                        match (step + worker) % 3 {
                            0 => store.mark_kept("x").unwrap(),
                            1 => store.mark_for_deletion("x").unwrap(),
                            _ => store.unmark("x").unwrap(),
                        }
                    }
                })
            })
            .collect();

        let reader = {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..2000 {
                    // One snapshot under the store lock
                    let stats = store.stats();
                    assert!(stats.kept + stats.marked <= 1, "torn state: {stats:?}");
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();

        let kept = substrate.get_set(KEPT_KEY).unwrap();
        let marked = substrate.get_set(MARKED_KEY).unwrap();
        assert!(kept.is_disjoint(&marked));
        assert_eq!(kept.contains("x"), store.is_kept("x"));
        assert_eq!(marked.contains("x"), store.is_marked_for_deletion("x"));
    }

    #[test]
    fn test_overlap_resolves_to_kept() {
        let substrate = Arc::new(MemorySubstrate::new());
        substrate.insert_member(KEPT_KEY, "a").unwrap();
        substrate.insert_member(MARKED_KEY, "a").unwrap();
        substrate.insert_member(MARKED_KEY, "b").unwrap();

        let store = TriageStore::open(Box::new(SharedSubstrate(substrate.clone()))).unwrap();

        assert!(store.is_kept("a"));
        assert!(store.is_marked_for_deletion("b"));
        assert!(!substrate.get_set(MARKED_KEY).unwrap().contains("a"));
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage.db");

        {
            let store = TriageStore::open(Box::new(SqliteSubstrate::open(&path).unwrap())).unwrap();
            store.mark_kept("a").unwrap();
            store.mark_for_deletion("b").unwrap();
            store.save_position(4, 20).unwrap();
        }

        let store = TriageStore::open(Box::new(SqliteSubstrate::open(&path).unwrap())).unwrap();
        assert!(store.is_kept("a"));
        assert!(store.is_marked_for_deletion("b"));
        assert_eq!(store.load_position(), BrowsePosition { index: 4, total: 20 });
    }

    #[test]
    fn test_forget_removes_from_both_sets() {
        let store = TriageStore::in_memory();
        store.mark_kept("a").unwrap();
        store.mark_for_deletion("b").unwrap();

        store.forget(["a", "b", "missing"]).unwrap();

        assert_eq!(store.stats(), TriageStats::default());
    }
}
