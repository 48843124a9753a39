//! Drag gestures driving the coordinator, and the session snapshot

use std::sync::Arc;
use tempfile::TempDir;
use trellix_engine::{
    Applied, DragEvent, DragKind, EngineConfig, EntityStore, GestureInterpreter, MemoryRemote,
    SnapshotConfig, SnapshotStore, SyncCoordinator, UserId,
};

/// Feed events in order, executing whatever the interpreter resolves
fn drag(
    sync: &SyncCoordinator,
    gestures: &mut GestureInterpreter,
    events: &[DragEvent],
) -> Vec<Applied> {
    let mut applied = Vec::new();
    for event in events {
        let instruction = gestures.handle(event, &sync.store());
        if let Some(instruction) = instruction {
            applied.push(sync.execute(instruction).unwrap());
        }
    }
    applied
}

#[tokio::test]
async fn test_drag_card_across_lists_then_back() {
    let remote = MemoryRemote::new();
    let sync = SyncCoordinator::new(
        EntityStore::new(),
        Arc::new(remote.clone()),
        EngineConfig::default().sync,
    );
    let board = sync
        .create_board(UserId::from_string("u1"), "Sprint", "#fff")
        .unwrap();
    let todo = sync.create_list(board.id.clone(), "Todo").unwrap();
    let done = sync.create_list(board.id.clone(), "Done").unwrap();
    let a = sync.create_card(todo.id.clone(), "a").unwrap();
    let b = sync.create_card(todo.id.clone(), "b").unwrap();
    sync.flush().await;

    let before = sync.store().snapshot();
    let calls = remote.calls();

    // Released outside every list after hovering Done
    let mut gestures = GestureInterpreter::new();
    let applied = drag(
        &sync,
        &mut gestures,
        &[
            DragEvent::start(DragKind::Card, a.id.as_str()),
            DragEvent::over(DragKind::Card, a.id.as_str(), DragKind::List, done.id.as_str()),
            DragEvent::end_nowhere(DragKind::Card, a.id.as_str()),
        ],
    );
    assert!(applied.is_empty());
    assert!(!gestures.is_dragging());
    sync.flush().await;
    assert_eq!(sync.store().snapshot(), before);
    assert_eq!(remote.calls(), calls);

    let applied = drag(
        &sync,
        &mut gestures,
        &[
            DragEvent::start(DragKind::Card, a.id.as_str()),
            DragEvent::over(DragKind::Card, a.id.as_str(), DragKind::List, done.id.as_str()),
            DragEvent::end(DragKind::Card, a.id.as_str(), DragKind::List, done.id.as_str()),
        ],
    );
    assert_eq!(applied.len(), 1);
    assert!(!gestures.is_dragging());
    {
        let store = sync.store();
        assert_eq!(store.card(&a.id).unwrap().list_id, done.id);
        assert_eq!(store.card(&b.id).unwrap().order, 0);
    }

    // Drop it above b back in Todo
    drag(
        &sync,
        &mut gestures,
        &[
            DragEvent::start(DragKind::Card, a.id.as_str()),
            DragEvent::end(DragKind::Card, a.id.as_str(), DragKind::Card, b.id.as_str()),
        ],
    );
    let titles: Vec<String> = sync
        .store()
        .cards_in(&todo.id)
        .iter()
        .map(|c| c.title.clone())
        .collect();
    assert_eq!(titles, vec!["a", "b"]);
    assert!(sync.store().cards_in(&done.id).is_empty());

    sync.flush().await;
    assert_eq!(sync.pending(), 0);
}

#[tokio::test]
async fn test_cancelled_drag_changes_nothing() {
    let remote = MemoryRemote::new();
    let sync = SyncCoordinator::new(
        EntityStore::new(),
        Arc::new(remote.clone()),
        EngineConfig::default().sync,
    );
    let board = sync
        .create_board(UserId::from_string("u1"), "B", "bg")
        .unwrap();
    let first = sync.create_list(board.id.clone(), "one").unwrap();
    let second = sync.create_list(board.id.clone(), "two").unwrap();
    sync.flush().await;
    let before = sync.store().snapshot();
    let calls = remote.calls();

    let mut gestures = GestureInterpreter::new();
    let applied = drag(
        &sync,
        &mut gestures,
        &[
            DragEvent::start(DragKind::List, first.id.as_str()),
            DragEvent::over(DragKind::List, first.id.as_str(), DragKind::List, second.id.as_str()),
            DragEvent::cancel(DragKind::List, first.id.as_str()),
        ],
    );
    assert!(applied.is_empty());
    sync.flush().await;
    assert_eq!(sync.store().snapshot(), before);
    assert_eq!(remote.calls(), calls);
}

#[tokio::test]
async fn test_session_survives_snapshot_round_trip() {
    let temp = TempDir::new().unwrap();
    let snapshots = SnapshotStore::new(&SnapshotConfig {
        dir: temp.path().to_path_buf(),
        namespace: "trellix-storage".into(),
    });

    let sync = SyncCoordinator::new(
        snapshots.load().await.unwrap(),
        Arc::new(MemoryRemote::new()),
        EngineConfig::default().sync,
    );
    let board = sync
        .create_board(UserId::from_string("u1"), "Home", "bg")
        .unwrap();
    let list = sync.create_list(board.id.clone(), "Chores").unwrap();
    let card = sync.create_card(list.id.clone(), "Laundry").unwrap();
    sync.add_comment(card.id.clone(), UserId::from_string("u1"), "tomorrow")
        .unwrap();
    sync.flush().await;

    let saved = sync.store().snapshot();
    let session = EntityStore::from_snapshot(saved.clone()).unwrap();
    snapshots.save(&session).await.unwrap();

    let restored = snapshots.load().await.unwrap();
    assert_eq!(restored.snapshot(), saved);
    assert_eq!(restored.card(&card.id).unwrap().comments.len(), 1);
    assert!(temp.path().join("trellix-storage.json").exists());
}
