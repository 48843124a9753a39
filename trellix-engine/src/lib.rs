//! Client-side engine for a kanban board editor
//!
//! Boards hold ordered lists, lists hold ordered cards. This crate keeps
//! that hierarchy in memory, computes the rank changes a drag-and-drop
//! produces, applies every write optimistically and persists it through a
//! pluggable remote, rolling back when the remote says no.
//!
//! ## Overview
//!
//! - [`EntityStore`] - the in-memory source of truth, with unique dense ranks per container
//! - [`reorder`] - turns a list reorder or card move into rank updates
//! - [`SyncCoordinator`] - optimistic apply, per-board ordered dispatch, rollback
//! - [`GestureInterpreter`] - folds drag start/over/end/cancel into one instruction
//! - [`SnapshotStore`] - persists the session to `<dir>/<namespace>.json`
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trellix_engine::{
//!     DragEvent, DragKind, EntityStore, GestureInterpreter, MemoryRemote, SyncConfig,
//!     SyncCoordinator, UserId,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sync = SyncCoordinator::new(
//!     EntityStore::new(),
//!     Arc::new(MemoryRemote::new()),
//!     SyncConfig::default(),
//! );
//!
//! let board = sync.create_board(UserId::from_string("u1"), "Roadmap", "#0079bf")?;
//! let todo = sync.create_list(board.id.clone(), "Todo")?;
//! let done = sync.create_list(board.id.clone(), "Done")?;
//! let card = sync.create_card(todo.id.clone(), "Write docs")?;
//!
//! // The UI reports a drag of the card onto the Done list
//! let mut gestures = GestureInterpreter::new();
//! let events = [
//!     DragEvent::start(DragKind::Card, card.id.as_str()),
//!     DragEvent::end(DragKind::Card, card.id.as_str(), DragKind::List, done.id.as_str()),
//! ];
//! for event in &events {
//!     let instruction = gestures.handle(event, &sync.store());
//!     if let Some(instruction) = instruction {
//!         sync.execute(instruction)?;
//!     }
//! }
//!
//! sync.flush().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gesture;
pub mod reorder;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod types;

pub use config::{EngineConfig, SnapshotConfig, SyncConfig};
pub use error::{BoardError, Result};
pub use gesture::{DragEvent, DragKind, DragPhase, DragSession, GestureInterpreter, GestureState};
pub use reorder::{Instruction, RankUpdate, ReorderPlan};
pub use snapshot::SnapshotStore;
pub use store::{Change, EntityStore, StoreSnapshot};
pub use sync::{
    Applied, CardEdit, DataAccess, MemoryRemote, Mutation, RemoteError, RemoteRequest,
    SyncCoordinator, SyncEvent,
};
pub use types::*;
