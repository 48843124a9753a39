//! SyncCoordinator - optimistic local commits with ordered remote dispatch
//!
//! Every mutation is applied to the [`EntityStore`] synchronously, so the UI
//! sees it immediately, then handed to a per-board worker that persists it.
//! Workers process their queue strictly in commit order, which keeps
//! concurrent writes to one container from reaching the remote out of order.
//!
//! When a dispatch fails or times out, the coordinator checks whether a newer
//! local commit has touched the same entities or containers since. If so the
//! result is stale and dropped; otherwise the change is rolled back (always
//! for deletes and moves, for other writes when configured). If the remote
//! had already accepted part of a rolled-back dispatch, compensating requests
//! rebuilt from the before-images are sent to bring it back in line.

use super::mutation::{self, CardEdit, Committed, Mutation};
use super::remote::{DataAccess, RemoteRequest};
use crate::config::SyncConfig;
use crate::error::{BoardError, Result};
use crate::reorder::Instruction;
use crate::store::{Change, EntityStore};
use crate::types::{
    Board, BoardId, BoardPatch, Card, CardId, CardPatch, ChecklistItem, ChecklistItemId, Comment,
    CommentId, EntityKey, Label, LabelId, List, ListId, UserId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, error, info, warn};

/// Outcome of [`SyncCoordinator::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Committed locally and queued for the remote
    Committed { op: &'static str, stamp: u64 },
    /// Nothing changed, nothing was dispatched
    NoOp,
}

impl Applied {
    pub fn stamp(&self) -> Option<u64> {
        match self {
            Self::Committed { stamp, .. } => Some(*stamp),
            Self::NoOp => None,
        }
    }
}

/// What happened to a dispatched commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Persisted {
        op: &'static str,
        stamp: u64,
        subject: EntityKey,
    },
    /// The remote rejected or never answered; local state was restored if
    /// `rolled_back`
    Failed {
        op: &'static str,
        stamp: u64,
        subject: EntityKey,
        error: String,
        rolled_back: bool,
        /// Part of the dispatch may still be applied remotely: an accepted
        /// prefix could not be undone, or the dispatch aborted midway
        diverged: bool,
    },
    /// The remote failed after a newer commit superseded this one, so the
    /// result was dropped without touching local state
    Discarded {
        op: &'static str,
        stamp: u64,
        subject: EntityKey,
    },
}

impl SyncEvent {
    pub fn stamp(&self) -> u64 {
        match self {
            Self::Persisted { stamp, .. }
            | Self::Failed { stamp, .. }
            | Self::Discarded { stamp, .. } => *stamp,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            Self::Persisted { op, .. } | Self::Failed { op, .. } | Self::Discarded { op, .. } => op,
        }
    }
}

struct Dispatch {
    op: &'static str,
    subject: EntityKey,
    change: Change,
    requests: Vec<RemoteRequest>,
    rollback: bool,
}

/// Count of dispatches not yet resolved
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// State shared between the coordinator and its workers
#[derive(Clone)]
struct Worker {
    store: Arc<Mutex<EntityStore>>,
    remote: Arc<dyn DataAccess>,
    timeout: Duration,
    events: broadcast::Sender<SyncEvent>,
    pending: Arc<Pending>,
}

impl Worker {
    async fn run(self, board: BoardId, mut queue: mpsc::UnboundedReceiver<Dispatch>) {
        debug!(board = %board, "sync worker started");
        while let Some(dispatch) = queue.recv().await {
            let op = dispatch.op;
            let stamp = dispatch.change.stamp();
            let subject = dispatch.subject.clone();
            // A panicking dispatch must not take the queue down with it
            if let Err(err) = tokio::spawn(self.clone().dispatch(dispatch)).await {
                error!(
                    board = %board,
                    op,
                    stamp,
                    subject = %subject,
                    error = %err,
                    "dispatch aborted"
                );
                let _ = self.events.send(SyncEvent::Failed {
                    op,
                    stamp,
                    subject,
                    error: err.to_string(),
                    rolled_back: false,
                    diverged: true,
                });
            }
            self.pending.finish();
        }
        debug!(board = %board, "sync worker stopped");
    }

    async fn dispatch(self, dispatch: Dispatch) {
        let Dispatch {
            op,
            subject,
            change,
            requests,
            rollback,
        } = dispatch;
        let stamp = change.stamp();

        let (sent, result) = self.send(op, &requests).await;
        let event = match result {
            Ok(()) => {
                debug!(op, stamp, subject = %subject, "persisted");
                SyncEvent::Persisted { op, stamp, subject }
            }
            Err(err) => {
                let rolled_back = rollback && err.is_persistence_failure();
                let settled = self.settle(op, &subject, &change, &requests[..sent], rolled_back);
                match settled {
                    None => {
                        let stale = BoardError::StaleResponse { op: op.to_string() };
                        warn!(stamp, subject = %subject, error = %err, "{}", stale);
                        SyncEvent::Discarded { op, stamp, subject }
                    }
                    Some(undo) => {
                        let diverged = sent > 0 && !self.compensate(op, stamp, undo).await;
                        error!(
                            op,
                            stamp,
                            subject = %subject,
                            rolled_back,
                            diverged,
                            retryable = err.is_retryable(),
                            "{}",
                            err
                        );
                        SyncEvent::Failed {
                            op,
                            stamp,
                            subject,
                            error: err.to_string(),
                            rolled_back,
                            diverged,
                        }
                    }
                }
            }
        };
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Resolve a failed dispatch against local state. Returns `None` when a
    /// newer commit superseded it, otherwise the requests that undo what the
    /// remote already accepted (empty unless rolled back).
    fn settle(
        &self,
        op: &'static str,
        subject: &EntityKey,
        change: &Change,
        accepted: &[RemoteRequest],
        rolled_back: bool,
    ) -> Option<Vec<RemoteRequest>> {
        let mut store = lock(&self.store);
        if store.is_superseded(change) {
            return None;
        }
        if !rolled_back {
            return Some(Vec::new());
        }
        store.restore(change);
        match mutation::compensation(&store, change, accepted) {
            Ok(undo) => Some(undo),
            Err(err) => {
                error!(op, subject = %subject, error = %err, "could not build compensation");
                Some(Vec::new())
            }
        }
    }

    /// Send the undo requests for a partially accepted dispatch. Returns
    /// whether the remote took all of them.
    async fn compensate(&self, op: &'static str, stamp: u64, undo: Vec<RemoteRequest>) -> bool {
        if undo.is_empty() {
            return false;
        }
        let (sent, result) = self.send(op, &undo).await;
        match result {
            Ok(()) => {
                info!(op, stamp, requests = sent, "compensated partial dispatch");
                true
            }
            Err(err) => {
                error!(
                    op,
                    stamp,
                    sent,
                    unsent = undo.len() - sent,
                    error = %err,
                    "remote left diverged"
                );
                false
            }
        }
    }

    /// Issue `requests` in order under one timeout. Returns how many the
    /// remote accepted along with the outcome.
    async fn send(&self, op: &'static str, requests: &[RemoteRequest]) -> (usize, Result<()>) {
        let started = Instant::now();
        let remote = self.remote.as_ref();
        let mut sent = 0;
        let calls = async {
            for request in requests {
                request.send(remote).await?;
                sent += 1;
            }
            Ok::<(), super::remote::RemoteError>(())
        };
        let outcome = tokio::time::timeout(self.timeout, calls).await;
        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(BoardError::persistence(op, err.to_string())),
            Err(_) => Err(BoardError::Timeout {
                op: op.to_string(),
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            }),
        };
        (sent, result)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Applies mutations locally and persists them in the background.
///
/// Must be used from within a Tokio runtime; workers are spawned lazily,
/// one per board.
pub struct SyncCoordinator {
    worker: Worker,
    config: SyncConfig,
    queues: Mutex<HashMap<BoardId, mpsc::UnboundedSender<Dispatch>>>,
}

impl SyncCoordinator {
    pub fn new(store: EntityStore, remote: Arc<dyn DataAccess>, config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            worker: Worker {
                store: Arc::new(Mutex::new(store)),
                remote,
                timeout: config.timeout(),
                events,
                pending: Arc::new(Pending::default()),
            },
            config,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the store for reading. Do not hold the guard across an await.
    pub fn store(&self) -> MutexGuard<'_, EntityStore> {
        lock(&self.worker.store)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Receive an event for every dispatch outcome from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.worker.events.subscribe()
    }

    /// Number of commits not yet persisted, failed or discarded
    pub fn pending(&self) -> usize {
        self.worker.pending.count.load(Ordering::SeqCst)
    }

    /// Wait until every queued dispatch has resolved
    pub async fn flush(&self) {
        self.worker.pending.wait().await;
    }

    /// Commit `mutation` locally and queue it for the remote.
    ///
    /// Validation and lookup errors are returned before anything changes.
    pub fn apply(&self, mutation: Mutation) -> Result<Applied> {
        let op = mutation.op();
        let mut store = self.store();
        let Some(committed) = mutation::commit(&mut store, mutation)? else {
            debug!(op, "no-op, nothing to dispatch");
            return Ok(Applied::NoOp);
        };

        let Committed {
            op,
            subject,
            board,
            change,
            requests,
            requires_rollback,
        } = committed;
        let stamp = change.stamp();
        info!(op, stamp, subject = %subject, requests = requests.len(), "committed");

        // Enqueue under the store lock so queue order matches stamp order
        self.enqueue(
            board,
            Dispatch {
                op,
                subject,
                change,
                requests,
                rollback: requires_rollback || self.config.rollback_patches,
            },
        );
        drop(store);
        Ok(Applied::Committed { op, stamp })
    }

    fn enqueue(&self, board: BoardId, dispatch: Dispatch) {
        self.worker.pending.start();
        let mut queues = lock(&self.queues);
        let sender = queues
            .entry(board.clone())
            .or_insert_with(|| self.spawn_worker(&board));
        if let Err(mpsc::error::SendError(dispatch)) = sender.send(dispatch) {
            warn!(board = %board, "sync worker gone, restarting");
            let sender = self.spawn_worker(&board);
            if sender.send(dispatch).is_err() {
                error!(board = %board, "could not queue dispatch");
                self.worker.pending.finish();
            }
            queues.insert(board, sender);
        }
    }

    fn spawn_worker(&self, board: &BoardId) -> mpsc::UnboundedSender<Dispatch> {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(self.worker.clone().run(board.clone(), receiver));
        sender
    }

    /// Apply a resolved drag instruction
    pub fn execute(&self, instruction: Instruction) -> Result<Applied> {
        self.apply(Mutation::Reorder { instruction })
    }

    // =========================================================================
    // Boards
    // =========================================================================

    pub fn create_board(
        &self,
        owner: UserId,
        title: impl Into<String>,
        background: impl Into<String>,
    ) -> Result<Board> {
        let board = Board::new(owner, title, background);
        self.apply(Mutation::CreateBoard {
            board: board.clone(),
        })?;
        Ok(board)
    }

    pub fn update_board(&self, id: BoardId, patch: BoardPatch) -> Result<Applied> {
        self.apply(Mutation::UpdateBoard { id, patch })
    }

    /// Delete a board with all of its lists and cards
    pub fn delete_board(&self, id: BoardId) -> Result<Applied> {
        self.apply(Mutation::DeleteBoard { id })
    }

    // =========================================================================
    // Lists
    // =========================================================================

    /// Append a new list to the board
    pub fn create_list(&self, board: BoardId, title: impl Into<String>) -> Result<List> {
        let list = List::new(board, title, 0);
        let id = list.id.clone();
        self.apply(Mutation::CreateList { list })?;
        self.store()
            .list(&id)
            .cloned()
            .ok_or_else(|| BoardError::not_found("list", id.as_str()))
    }

    pub fn rename_list(&self, id: ListId, title: impl Into<String>) -> Result<Applied> {
        self.apply(Mutation::RenameList {
            id,
            title: title.into(),
        })
    }

    pub fn delete_list(&self, id: ListId) -> Result<Applied> {
        self.apply(Mutation::DeleteList { id })
    }

    pub fn reorder_list(&self, id: ListId, to_index: usize) -> Result<Applied> {
        self.execute(Instruction::reorder_list(id, to_index))
    }

    // =========================================================================
    // Cards
    // =========================================================================

    /// Append a new card to the list
    pub fn create_card(&self, list: ListId, title: impl Into<String>) -> Result<Card> {
        let card = Card::new(list, title, 0);
        let id = card.id.clone();
        self.apply(Mutation::CreateCard { card })?;
        self.store()
            .card(&id)
            .cloned()
            .ok_or_else(|| BoardError::not_found("card", id.as_str()))
    }

    pub fn update_card(&self, id: CardId, patch: CardPatch) -> Result<Applied> {
        self.apply(Mutation::UpdateCard { id, patch })
    }

    pub fn delete_card(&self, id: CardId) -> Result<Applied> {
        self.apply(Mutation::DeleteCard { id })
    }

    pub fn move_card(&self, id: CardId, to_list: ListId, to_index: usize) -> Result<Applied> {
        self.execute(Instruction::move_card(id, to_list, to_index))
    }

    fn edit_card(&self, id: CardId, edit: CardEdit) -> Result<Applied> {
        self.apply(Mutation::EditCard { id, edit })
    }

    pub fn add_checklist_item(
        &self,
        card: CardId,
        text: impl Into<String>,
    ) -> Result<ChecklistItemId> {
        let item = ChecklistItem::new(text);
        let id = item.id.clone();
        self.edit_card(card, CardEdit::AddChecklistItem { item })?;
        Ok(id)
    }

    pub fn toggle_checklist_item(&self, card: CardId, item: ChecklistItemId) -> Result<Applied> {
        self.edit_card(card, CardEdit::ToggleChecklistItem { item })
    }

    pub fn delete_checklist_item(&self, card: CardId, item: ChecklistItemId) -> Result<Applied> {
        self.edit_card(card, CardEdit::DeleteChecklistItem { item })
    }

    pub fn add_comment(
        &self,
        card: CardId,
        user: UserId,
        text: impl Into<String>,
    ) -> Result<CommentId> {
        let comment = Comment::new(user, text);
        let id = comment.id.clone();
        self.edit_card(card, CardEdit::AddComment { comment })?;
        Ok(id)
    }

    pub fn delete_comment(&self, card: CardId, comment: CommentId) -> Result<Applied> {
        self.edit_card(card, CardEdit::DeleteComment { comment })
    }

    pub fn add_label(
        &self,
        card: CardId,
        text: impl Into<String>,
        color: impl Into<String>,
    ) -> Result<LabelId> {
        let label = Label::new(text, color);
        let id = label.id.clone();
        self.edit_card(card, CardEdit::AddLabel { label })?;
        Ok(id)
    }

    pub fn remove_label(&self, card: CardId, label: LabelId) -> Result<Applied> {
        self.edit_card(card, CardEdit::RemoveLabel { label })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::remote::{MemoryRemote, RemoteError};
    use crate::types::{ContainerId, EntityKind};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::AtomicBool;

    /// Panics on its first call, then forwards to a `MemoryRemote`
    struct PanicsOnce {
        armed: AtomicBool,
        inner: MemoryRemote,
    }

    impl PanicsOnce {
        fn trip(&self) {
            if self.armed.swap(false, Ordering::SeqCst) {
                panic!("remote client bug");
            }
        }
    }

    #[async_trait]
    impl DataAccess for PanicsOnce {
        async fn create_entity(
            &self,
            kind: EntityKind,
            payload: Value,
        ) -> std::result::Result<String, RemoteError> {
            self.trip();
            self.inner.create_entity(kind, payload).await
        }

        async fn patch_entity(
            &self,
            kind: EntityKind,
            id: &str,
            fields: Value,
        ) -> std::result::Result<(), RemoteError> {
            self.trip();
            self.inner.patch_entity(kind, id, fields).await
        }

        async fn delete_entity(
            &self,
            kind: EntityKind,
            id: &str,
        ) -> std::result::Result<(), RemoteError> {
            self.trip();
            self.inner.delete_entity(kind, id).await
        }

        async fn reorder_batch(
            &self,
            container: &ContainerId,
            ordered_ids: Vec<String>,
        ) -> std::result::Result<(), RemoteError> {
            self.trip();
            self.inner.reorder_batch(container, ordered_ids).await
        }
    }

    fn coordinator(config: SyncConfig) -> (SyncCoordinator, MemoryRemote) {
        let remote = MemoryRemote::new();
        let coordinator = SyncCoordinator::new(EntityStore::new(), Arc::new(remote.clone()), config);
        (coordinator, remote)
    }

    #[tokio::test]
    async fn test_commit_is_visible_before_dispatch() {
        let (sync, remote) = coordinator(SyncConfig::default());
        let board = sync
            .create_board(UserId::from_string("u1"), "Roadmap", "blue")
            .unwrap();

        assert!(sync.store().board(&board.id).is_some());
        sync.flush().await;
        assert_eq!(remote.requests().len(), 1);
        assert_eq!(sync.pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_patch_rolls_back_when_configured() {
        let (sync, remote) = coordinator(SyncConfig::default());
        let board = sync
            .create_board(UserId::from_string("u1"), "B", "bg")
            .unwrap();
        let list = sync.create_list(board.id.clone(), "Todo").unwrap();
        sync.flush().await;

        let mut events = sync.subscribe();
        remote.fail_next(RemoteError::Unavailable("offline".into()));
        sync.rename_list(list.id.clone(), "Doing").unwrap();
        assert_eq!(sync.store().list(&list.id).unwrap().title, "Doing");

        sync.flush().await;
        assert_eq!(sync.store().list(&list.id).unwrap().title, "Todo");
        match events.recv().await.unwrap() {
            SyncEvent::Failed { rolled_back, op, .. } => {
                assert!(rolled_back);
                assert_eq!(op, "rename list");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_patch_kept_when_rollback_disabled() {
        let (sync, remote) = coordinator(SyncConfig::default().with_rollback_patches(false));
        let board = sync
            .create_board(UserId::from_string("u1"), "B", "bg")
            .unwrap();
        sync.flush().await;

        remote.fail_next(RemoteError::Rejected("nope".into()));
        sync.update_board(board.id.clone(), BoardPatch::title("Renamed"))
            .unwrap();
        sync.flush().await;
        assert_eq!(sync.store().board(&board.id).unwrap().title, "Renamed");
    }

    #[tokio::test]
    async fn test_noop_move_dispatches_nothing() {
        let (sync, remote) = coordinator(SyncConfig::default());
        let board = sync
            .create_board(UserId::from_string("u1"), "B", "bg")
            .unwrap();
        let list = sync.create_list(board.id, "L").unwrap();
        let card = sync.create_card(list.id.clone(), "c").unwrap();
        sync.flush().await;
        let before = remote.calls();

        assert_eq!(sync.move_card(card.id, list.id, 0).unwrap(), Applied::NoOp);
        sync.flush().await;
        assert_eq!(remote.calls(), before);
    }

    #[tokio::test]
    async fn test_panicking_dispatch_does_not_stall_queue() {
        let remote = MemoryRemote::new();
        let flaky = PanicsOnce {
            armed: AtomicBool::new(true),
            inner: remote.clone(),
        };
        let sync = SyncCoordinator::new(EntityStore::new(), Arc::new(flaky), SyncConfig::default());
        let mut events = sync.subscribe();

        let board = sync
            .create_board(UserId::from_string("u1"), "B", "bg")
            .unwrap();
        let list = sync.create_list(board.id.clone(), "Todo").unwrap();
        sync.flush().await;
        assert_eq!(sync.pending(), 0);

        match events.recv().await.unwrap() {
            SyncEvent::Failed {
                op,
                rolled_back,
                diverged,
                ..
            } => {
                assert_eq!(op, "create board");
                assert!(!rolled_back);
                assert!(diverged);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(events.recv().await.unwrap(), SyncEvent::Persisted { .. }));
        assert_eq!(
            remote.requests(),
            vec![RemoteRequest::Create {
                kind: EntityKind::List,
                payload: serde_json::to_value(&list).unwrap(),
            }]
        );
    }

    #[tokio::test]
    async fn test_validation_error_leaves_store_untouched() {
        let (sync, _remote) = coordinator(SyncConfig::default());
        let result = sync.rename_list(ListId::from_string("ghost"), "x");
        assert!(matches!(result, Err(BoardError::NotFound { .. })));
        assert_eq!(sync.pending(), 0);
    }
}
