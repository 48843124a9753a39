//! Sync layer: optimistic commits, ordered persistence and rollback
//!
//! - [`remote`] - the remote store abstraction and an in-memory implementation
//! - [`mutation`] - user-level writes and their remote representation
//! - [`coordinator`] - the [`SyncCoordinator`] that ties them to the store

pub mod coordinator;
pub mod mutation;
pub mod remote;

pub use coordinator::{Applied, SyncCoordinator, SyncEvent};
pub use mutation::{CardEdit, Mutation};
pub use remote::{DataAccess, MemoryRemote, RemoteError, RemoteRequest};
