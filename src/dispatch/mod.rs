//! Work-dispatch and executor seams
//!
//! The scheduler never runs browser automation itself; it hands each task to
//! an external queue/worker-pool mechanism through [`WorkDispatch`] and the
//! per-task-type [`Executor`] looked up in an [`ExecutorRegistry`].
//!
//! [`ChannelDispatch`] is the in-process implementation: a bounded tokio
//! channel feeding local workers, used by integration tests and
//! single-process deployments. Distributed deployments plug in their own
//! transport behind the same trait.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::TaskPriority;

/// Opaque handle identifying one submitted work item, used for revocation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DispatchHandle(String);

impl DispatchHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// External queue/worker-pool mechanism that actually runs a task's executor
#[async_trait]
pub trait WorkDispatch: Send + Sync {
    /// Enqueue one task for execution
    async fn submit(
        &self,
        task_id: &str,
        payload: &Value,
        priority: TaskPriority,
    ) -> Result<DispatchHandle>;

    /// Best-effort revocation; returns whether the item is known to have
    /// been stopped before execution
    async fn revoke(&self, handle: &DispatchHandle) -> Result<bool>;
}

/// Performs one publish action; one implementation per task type
///
/// Failures are classified through the error type: `ExecutorRetryable`
/// re-queues the task (up to the retry budget), `ExecutorFatal` fails it
/// permanently.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, payload: &Value) -> Result<Value>;
}

/// task_type -> executor lookup
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, executor: Arc<dyn Executor>) {
        self.executors.insert(task_type.into(), executor);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(task_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }
}

/// One queued work item as seen by a pulling worker
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: String,
    pub payload: Value,
    pub priority: TaskPriority,
    pub handle: DispatchHandle,
}

struct ChannelDispatchInner {
    tx: mpsc::Sender<QueuedTask>,
    revoked: Mutex<HashSet<String>>,
}

/// In-process dispatch over a bounded tokio channel
///
/// Delivery is FIFO; the recorded priority is advisory here and honored by
/// transports that maintain real priority queues. Revocation marks the
/// handle so pulling workers can skip the item - the authoritative cancel
/// signal remains the task record's status.
#[derive(Clone)]
pub struct ChannelDispatch {
    inner: Arc<ChannelDispatchInner>,
}

impl ChannelDispatch {
    /// Create the dispatch plus the receiver end workers pull from
    pub fn new(queue_depth: usize) -> (Self, mpsc::Receiver<QueuedTask>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        let dispatch = Self {
            inner: Arc::new(ChannelDispatchInner {
                tx,
                revoked: Mutex::new(HashSet::new()),
            }),
        };
        (dispatch, rx)
    }

    /// Whether a handle was revoked before a worker consumed it
    pub fn is_revoked(&self, handle: &DispatchHandle) -> bool {
        self.inner
            .revoked
            .lock()
            .unwrap()
            .contains(handle.as_str())
    }
}

#[async_trait]
impl WorkDispatch for ChannelDispatch {
    async fn submit(
        &self,
        task_id: &str,
        payload: &Value,
        priority: TaskPriority,
    ) -> Result<DispatchHandle> {
        let handle = DispatchHandle::new(Uuid::new_v4().to_string());
        let item = QueuedTask {
            task_id: task_id.to_string(),
            payload: payload.clone(),
            priority,
            handle: handle.clone(),
        };
        self.inner
            .tx
            .send(item)
            .await
            .map_err(|_| Error::dispatch("work queue closed"))?;
        Ok(handle)
    }

    async fn revoke(&self, handle: &DispatchHandle) -> Result<bool> {
        self.inner
            .revoked
            .lock()
            .unwrap()
            .insert(handle.as_str().to_string());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(&self, payload: &Value) -> Result<Value> {
            Ok(payload.clone())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ExecutorRegistry::new();
        registry.register("publish", Arc::new(EchoExecutor));

        assert!(registry.get("publish").is_some());
        assert!(registry.get("warmup").is_none());
        assert_eq!(registry.registered_types(), vec!["publish".to_string()]);
    }

    #[tokio::test]
    async fn test_channel_dispatch_delivers() {
        let (dispatch, mut rx) = ChannelDispatch::new(8);
        let handle = dispatch
            .submit("t1", &json!({"p": 1}), TaskPriority::High)
            .await
            .unwrap();

        let item = rx.recv().await.unwrap();
        assert_eq!(item.task_id, "t1");
        assert_eq!(item.priority, TaskPriority::High);
        assert_eq!(item.handle, handle);
    }

    #[tokio::test]
    async fn test_revoke_marks_handle() {
        let (dispatch, _rx) = ChannelDispatch::new(8);
        let handle = dispatch
            .submit("t1", &Value::Null, TaskPriority::Normal)
            .await
            .unwrap();

        assert!(!dispatch.is_revoked(&handle));
        assert!(dispatch.revoke(&handle).await.unwrap());
        assert!(dispatch.is_revoked(&handle));
    }

    #[tokio::test]
    async fn test_submit_after_receiver_dropped_errors() {
        let (dispatch, rx) = ChannelDispatch::new(1);
        drop(rx);
        let err = dispatch
            .submit("t1", &Value::Null, TaskPriority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dispatch(_)));
    }
}
