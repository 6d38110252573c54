use std::collections::BTreeSet;
use std::sync::Arc;

use photo_swipe::media::MemoryProvider;
use photo_swipe::{
    Decision, DeletionCoordinator, TriageError, TriageSession, TriageState, TriageStore,
};

async fn session_over(provider: &MemoryProvider) -> (TriageSession, Arc<TriageStore>) {
    let store = Arc::new(TriageStore::in_memory());
    let session = TriageSession::open(provider, store.clone()).await.unwrap();
    (session, store)
}

fn current_id(session: &TriageSession) -> String {
    session.current().map(|item| item.id.clone()).unwrap_or_default()
}

#[tokio::test]
async fn test_keep_then_mark_same_photo_ends_marked_only() {
    let provider = MemoryProvider::with_photos(["a", "b", "c"]);
    let (mut session, store) = session_over(&provider).await;

    session.decide(Decision::Kept);
    session.move_previous();
    session.decide(Decision::MarkedForDeletion);

    assert!(store.is_marked_for_deletion("a"));
    assert!(!store.is_kept("a"));
    assert_eq!(store.stats().kept, 0);
    assert_eq!(store.stats().marked, 1);
}

#[tokio::test]
async fn test_commit_with_nothing_marked_changes_nothing() {
    let provider = Arc::new(MemoryProvider::with_photos(["a", "b", "c"]));
    let (mut session, store) = session_over(&provider).await;
    session.decide(Decision::Kept);

    let before_items = session.catalog().items().to_vec();
    let before_index = session.index();
    let before_kept = store.kept_ids();
    let before_position = store.load_position();

    let coordinator = DeletionCoordinator::new(provider.clone());
    let report = coordinator.commit(&mut session).await.unwrap();

    assert!(report.is_noop());
    assert_eq!(provider.delete_calls(), 0);
    assert_eq!(session.catalog().items(), before_items.as_slice());
    assert_eq!(session.index(), before_index);
    assert_eq!(store.kept_ids(), before_kept);
    assert!(store.marked_ids().is_empty());
    assert_eq!(store.load_position(), before_position);
}

#[tokio::test]
async fn test_five_photo_walkthrough() {
    let provider = Arc::new(MemoryProvider::with_photos(["A", "B", "C", "D", "E"]));
    let (mut session, store) = session_over(&provider).await;
    assert_eq!(session.index(), 0);

    session.decide(Decision::MarkedForDeletion);
    assert_eq!(current_id(&session), "B");

    session.decide(Decision::Kept);
    assert_eq!(current_id(&session), "C");

    // C is Unprocessed, so undo has nothing to clear
    session.undo();
    assert_eq!(session.current_state(), TriageState::Unprocessed);
    assert_eq!(session.index(), 2);

    // C -> D -> E -> A
    for _ in 0..3 {
        session.move_next();
    }
    assert_eq!(current_id(&session), "A");

    let coordinator = DeletionCoordinator::new(provider.clone());
    let report = coordinator.commit(&mut session).await.unwrap();
    assert_eq!(report.deleted, BTreeSet::from(["A".to_string()]));

    let ids: Vec<&str> = session
        .catalog()
        .items()
        .iter()
        .map(|item| item.id.as_str())
        .collect();
    assert_eq!(ids, ["B", "C", "D", "E"]);

    // Clamped onto B, which is already kept, so the cursor moves on to C
    assert_eq!(current_id(&session), "C");
    assert!(store.marked_ids().is_empty());
    assert_eq!(store.kept_ids(), ["B"]);
    assert_eq!(provider.ids(), ["B", "C", "D", "E"]);
}

#[tokio::test]
async fn test_failed_deletion_leaves_everything_marked() {
    let provider = Arc::new(MemoryProvider::with_photos(["a", "b", "c"]));
    let (mut session, store) = session_over(&provider).await;
    session.decide(Decision::MarkedForDeletion);
    session.decide(Decision::MarkedForDeletion);

    provider.set_fail_deletes(true);
    let coordinator = DeletionCoordinator::new(provider.clone());
    let err = coordinator.commit(&mut session).await.unwrap_err();

    assert!(matches!(err, TriageError::DeletionFailed { count: 2, .. }));
    assert_eq!(session.catalog().len(), 3);
    assert_eq!(store.marked_ids(), ["a", "b"]);
    assert_eq!(provider.ids().len(), 3);

    // The same marks can be committed again once the provider recovers
    provider.set_fail_deletes(false);
    let report = coordinator.commit(&mut session).await.unwrap();
    assert_eq!(report.count(), 2);
    assert_eq!(provider.ids(), ["c"]);
    assert!(store.marked_ids().is_empty());
}

#[tokio::test]
async fn test_position_survives_reload_after_external_changes() {
    let provider = MemoryProvider::with_photos(["a", "b", "c", "d"]);
    let store = Arc::new(TriageStore::in_memory());

    {
        let mut session = TriageSession::open(&provider, store.clone()).await.unwrap();
        session.move_next();
        session.move_next();
        session.move_next();
        assert_eq!(session.index(), 3);
    }

    // Another app removed two photos while we were away
    provider.remove_external("c");
    provider.remove_external("d");

    let session = TriageSession::open(&provider, store).await.unwrap();
    assert_eq!(session.catalog().len(), 2);
    assert_eq!(current_id(&session), "b");
}
