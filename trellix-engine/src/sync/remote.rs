//! Remote persistence abstraction.
//!
//! The coordinator only talks to the remote store through [`DataAccess`].
//! Every call is fallible and asynchronous; the remote gives no ordering
//! guarantee of its own. [`MemoryRemote`] is an in-process implementation
//! that records requests and can be told to fail or stall.

use crate::types::{ContainerId, EntityKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Remote errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote refused the write.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The remote could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Data access collaborator, e.g. a REST client
#[async_trait]
pub trait DataAccess: Send + Sync {
    /// Create an entity from its full payload, returning the remote id
    async fn create_entity(&self, kind: EntityKind, payload: Value) -> Result<String, RemoteError>;

    /// Merge `fields` into an existing entity
    async fn patch_entity(&self, kind: EntityKind, id: &str, fields: Value)
        -> Result<(), RemoteError>;

    /// Delete an entity; the remote cascades to owned entities
    async fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<(), RemoteError>;

    /// Persist the full child order of a container
    async fn reorder_batch(
        &self,
        container: &ContainerId,
        ordered_ids: Vec<String>,
    ) -> Result<(), RemoteError>;
}

/// One remote call, the minimal diff needed to reproduce a local commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum RemoteRequest {
    Create {
        kind: EntityKind,
        payload: Value,
    },
    Patch {
        kind: EntityKind,
        id: String,
        fields: Value,
    },
    Delete {
        kind: EntityKind,
        id: String,
    },
    Reorder {
        container: ContainerId,
        ordered_ids: Vec<String>,
    },
}

impl RemoteRequest {
    /// Issue this request against `remote`
    pub async fn send(&self, remote: &dyn DataAccess) -> Result<(), RemoteError> {
        match self {
            Self::Create { kind, payload } => {
                remote.create_entity(*kind, payload.clone()).await?;
                Ok(())
            }
            Self::Patch { kind, id, fields } => remote.patch_entity(*kind, id, fields.clone()).await,
            Self::Delete { kind, id } => remote.delete_entity(*kind, id).await,
            Self::Reorder {
                container,
                ordered_ids,
            } => remote.reorder_batch(container, ordered_ids.clone()).await,
        }
    }
}

/// In-memory remote for tests and offline sessions.
///
/// Every successful call is recorded in arrival order. Failures and delays
/// are scripted per call.
#[derive(Debug, Default, Clone)]
pub struct MemoryRemote {
    inner: Arc<Mutex<MemoryRemoteInner>>,
}

#[derive(Debug, Default)]
struct MemoryRemoteInner {
    requests: Vec<RemoteRequest>,
    fail_queue: VecDeque<RemoteError>,
    fail_all: Option<RemoteError>,
    delays: VecDeque<Duration>,
    calls: usize,
}

impl MemoryRemote {
    /// Create a new in-memory remote.
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MemoryRemoteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests that succeeded, in the order they were received.
    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.inner().requests.clone()
    }

    /// Number of calls received, including failed ones.
    pub fn calls(&self) -> usize {
        self.inner().calls
    }

    /// Cause the next call to fail with the given error.
    pub fn fail_next(&self, error: RemoteError) {
        self.inner().fail_queue.push_back(error);
    }

    /// Cause every call to fail until cleared with `None`.
    pub fn fail_all(&self, error: Option<RemoteError>) {
        self.inner().fail_all = error;
    }

    /// Delay the next call by `delay` before it resolves.
    pub fn delay_next(&self, delay: Duration) {
        self.inner().delays.push_back(delay);
    }

    /// Clear all state.
    pub fn reset(&self) {
        *self.inner() = MemoryRemoteInner::default();
    }

    async fn handle(&self, request: RemoteRequest) -> Result<(), RemoteError> {
        let delay = {
            let mut inner = self.inner();
            inner.calls += 1;
            inner.delays.pop_front()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner();
        if let Some(error) = inner.fail_queue.pop_front() {
            return Err(error);
        }
        if let Some(error) = &inner.fail_all {
            return Err(error.clone());
        }
        inner.requests.push(request);
        Ok(())
    }
}

#[async_trait]
impl DataAccess for MemoryRemote {
    async fn create_entity(&self, kind: EntityKind, payload: Value) -> Result<String, RemoteError> {
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RemoteError::Rejected("payload has no id".into()))?;
        self.handle(RemoteRequest::Create { kind, payload }).await?;
        Ok(id)
    }

    async fn patch_entity(
        &self,
        kind: EntityKind,
        id: &str,
        fields: Value,
    ) -> Result<(), RemoteError> {
        self.handle(RemoteRequest::Patch {
            kind,
            id: id.to_string(),
            fields,
        })
        .await
    }

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<(), RemoteError> {
        self.handle(RemoteRequest::Delete {
            kind,
            id: id.to_string(),
        })
        .await
    }

    async fn reorder_batch(
        &self,
        container: &ContainerId,
        ordered_ids: Vec<String>,
    ) -> Result<(), RemoteError> {
        self.handle(RemoteRequest::Reorder {
            container: container.clone(),
            ordered_ids,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ListId;

    #[tokio::test]
    async fn test_records_successful_requests() {
        let remote = MemoryRemote::new();
        remote
            .patch_entity(EntityKind::Card, "c1", serde_json::json!({"order": 0}))
            .await
            .unwrap();
        remote
            .reorder_batch(&ContainerId::List(ListId::from_string("L1")), vec!["c1".into()])
            .await
            .unwrap();

        let requests = remote.requests();
        assert_eq!(requests.len(), 2);
        assert!(matches!(&requests[0], RemoteRequest::Patch { id, .. } if id == "c1"));
    }

    #[tokio::test]
    async fn test_fail_next_only_fails_once() {
        let remote = MemoryRemote::new();
        remote.fail_next(RemoteError::Unavailable("offline".into()));

        let first = remote.delete_entity(EntityKind::List, "L1").await;
        assert_eq!(first, Err(RemoteError::Unavailable("offline".into())));
        remote.delete_entity(EntityKind::List, "L1").await.unwrap();

        assert_eq!(remote.calls(), 2);
        assert_eq!(remote.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_create_requires_id() {
        let remote = MemoryRemote::new();
        let result = remote
            .create_entity(EntityKind::Board, serde_json::json!({"title": "x"}))
            .await;
        assert!(matches!(result, Err(RemoteError::Rejected(_))));

        let id = remote
            .create_entity(EntityKind::Board, serde_json::json!({"id": "B1"}))
            .await
            .unwrap();
        assert_eq!(id, "B1");
    }
}
