//! Per-workspace write locks.
//!
//! Every subtree lives inside one workspace, so keying the lock by workspace
//! serialises all mutations on overlapping subtrees.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use docperm_storage::WorkspaceId;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::EngineError;

type LockMap = DashMap<WorkspaceId, Arc<Mutex<()>>>;

/// Held for the duration of a mutation, including any deferred fan-out.
///
/// Dropping it releases the workspace and forgets the lock entry when nobody
/// else holds or waits on it.
#[derive(Debug)]
pub struct SubtreeGuard {
    guard: Option<OwnedMutexGuard<()>>,
    workspace_id: WorkspaceId,
    locks: Arc<LockMap>,
}

impl Drop for SubtreeGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        forget_idle(&self.locks, &self.workspace_id);
    }
}

/// Remove the entry once the map holds the only reference to the mutex.
fn forget_idle(locks: &LockMap, workspace_id: &WorkspaceId) {
    locks.remove_if(workspace_id, |_, mutex| Arc::strong_count(mutex) == 1);
}

#[derive(Default)]
pub struct SubtreeLocks {
    locks: Arc<LockMap>,
}

impl SubtreeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for the workspace lock; a timeout is a `Conflict`.
    pub async fn acquire(
        &self,
        workspace_id: WorkspaceId,
        timeout: Duration,
    ) -> Result<SubtreeGuard, EngineError> {
        let mutex = self
            .locks
            .entry(workspace_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(SubtreeGuard {
                guard: Some(guard),
                workspace_id,
                locks: self.locks.clone(),
            }),
            Err(_) => {
                forget_idle(&self.locks, &workspace_id);
                warn!(workspace_id = %workspace_id, ?timeout, "Timed out waiting for workspace lock");
                Err(EngineError::Conflict(format!(
                    "workspace {workspace_id} is being modified"
                )))
            }
        }
    }

    /// Whether a mutation currently holds the workspace lock.
    pub fn is_locked(&self, workspace_id: &WorkspaceId) -> bool {
        self.locks
            .get(workspace_id)
            .is_some_and(|m| m.try_lock().is_err())
    }

    /// Workspaces with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_writer_times_out() {
        let locks = SubtreeLocks::new();
        let ws = WorkspaceId::new();

        let guard = locks.acquire(ws, Duration::from_millis(50)).await.unwrap();
        assert!(locks.is_locked(&ws));

        let err = locks
            .acquire(ws, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        drop(guard);
        assert!(!locks.is_locked(&ws));
        locks.acquire(ws, Duration::from_millis(20)).await.unwrap();
    }

    #[tokio::test]
    async fn test_released_entries_are_forgotten() {
        let locks = Arc::new(SubtreeLocks::new());
        let ws = WorkspaceId::new();

        let guard = locks.acquire(ws, Duration::from_millis(50)).await.unwrap();
        assert_eq!(locks.tracked(), 1);

        // A waiter keeps the entry alive after the first holder leaves
        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _second = locks.acquire(ws, Duration::from_secs(5)).await.unwrap();
                locked_tx.send(()).unwrap();
                release_rx.await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);
        locked_rx.await.unwrap();
        assert_eq!(locks.tracked(), 1);
        assert!(locks.is_locked(&ws));

        release_tx.send(()).unwrap();
        waiter.await.unwrap();
        assert_eq!(locks.tracked(), 0);

        let _ = locks.acquire(ws, Duration::from_millis(20)).await.unwrap();
        assert!(locks
            .acquire(WorkspaceId::new(), Duration::from_millis(20))
            .await
            .is_ok());
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_workspaces_do_not_contend() {
        let locks = SubtreeLocks::new();
        let _a = locks
            .acquire(WorkspaceId::new(), Duration::from_millis(20))
            .await
            .unwrap();
        let _b = locks
            .acquire(WorkspaceId::new(), Duration::from_millis(20))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let locks = Arc::new(SubtreeLocks::new());
        let ws = WorkspaceId::new();
        let guard = locks.acquire(ws, Duration::from_millis(50)).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(ws, Duration::from_secs(5)).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);
        assert!(waiter.await.unwrap());
    }
}
