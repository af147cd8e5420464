//! Durable task lifecycle tracking on top of the shared store
//!
//! Owns the task records and the status/type/batch indices. Every mutation
//! that touches both a record and an index goes through the store's atomic
//! composite write, so the per-status index cardinalities always equal the
//! live task set.
//!
//! Unlike the concurrency controller, this store **fails closed**: losing
//! task records is unacceptable, so store errors propagate to the caller.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{QueueStats, Task, TaskPriority, TaskStatus};
use crate::store::{IndexedWrite, StateStore};

/// Filter for task listings; filtered reads walk one index directly
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFilter {
    Status(TaskStatus),
    Type(String),
    /// Merges all status indices and sorts by creation time - higher
    /// latency, paginate conservatively
    All,
}

/// Partial update applied by `update_state`
///
/// Only set fields are written; a status change atomically moves the task id
/// between status indices together with the record write.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub error: Option<String>,
    pub result: Option<Value>,
    pub dispatch_handle: Option<String>,
    pub increment_retry: bool,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_dispatch_handle(mut self, handle: impl Into<String>) -> Self {
        self.dispatch_handle = Some(handle.into());
        self
    }

    pub fn increment_retry(mut self) -> Self {
        self.increment_retry = true;
        self
    }
}

/// Settings for record retention and key namespacing
#[derive(Debug, Clone)]
pub struct TaskStoreConfig {
    pub key_prefix: String,

    /// Bounded retention for every record and index entry; long-term history
    /// requires an external archival copy before expiry
    pub task_ttl: Duration,
}

impl Default for TaskStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "fanout".to_string(),
            task_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Task record store with status/type/batch indices
pub struct TaskStateStore {
    store: Arc<dyn StateStore>,
    config: TaskStoreConfig,
}

impl TaskStateStore {
    pub fn new(store: Arc<dyn StateStore>, config: TaskStoreConfig) -> Self {
        Self { store, config }
    }

    // =========================================================================
    // Key generation
    // =========================================================================

    fn task_key(&self, id: &str) -> String {
        format!("{}:task:{id}", self.config.key_prefix)
    }

    fn status_index(&self, status: TaskStatus) -> String {
        format!("{}:index:status:{}", self.config.key_prefix, status.as_str())
    }

    fn type_index(&self, task_type: &str) -> String {
        format!("{}:index:type:{task_type}", self.config.key_prefix)
    }

    fn batch_index(&self, batch_id: &str) -> String {
        format!("{}:index:batch:{batch_id}", self.config.key_prefix)
    }

    fn lifetime_key(&self) -> String {
        format!("{}:stats:lifetime", self.config.key_prefix)
    }

    // =========================================================================
    // Lifecycle operations
    // =========================================================================

    /// Create a new pending task
    ///
    /// Fails with `DuplicateTask` on id collision; callers use stable ids so
    /// an at-least-once resubmission of the same work is rejected here
    /// instead of running twice.
    pub async fn create_task(
        &self,
        task_id: &str,
        task_type: &str,
        payload: Value,
        priority: TaskPriority,
        parent_batch_id: Option<String>,
    ) -> Result<Task> {
        let task = Task::new(task_id, task_type, payload, priority, parent_batch_id);
        let raw = serde_json::to_string(&task)?;
        let score = task.created_at.timestamp_millis() as f64;

        let status_idx = self.status_index(TaskStatus::Pending);
        let type_idx = self.type_index(task_type);
        let batch_idx = task.parent_batch_id.as_deref().map(|b| self.batch_index(b));

        let mut add_indexes = vec![status_idx.as_str(), type_idx.as_str()];
        if let Some(batch_idx) = &batch_idx {
            add_indexes.push(batch_idx.as_str());
        }

        let created = self
            .store
            .put_indexed(IndexedWrite {
                record_key: &self.task_key(task_id),
                value: &raw,
                ttl: Some(self.config.task_ttl),
                create_only: true,
                member: task_id,
                score,
                remove_index: None,
                add_indexes,
            })
            .await?;

        if !created {
            return Err(Error::duplicate_task(task_id));
        }

        self.bump_lifetime("created").await;
        metrics::record_task_created();
        tracing::debug!(task_id = %task_id, task_type = %task_type, "Task created");

        Ok(task)
    }

    /// Apply a partial update, moving status indices atomically with the record
    ///
    /// Synthesizes a placeholder when the record is absent so an out-of-order
    /// at-least-once update is kept instead of dropped. Status changes out of
    /// a terminal state are rejected - a completed task never silently
    /// resumes.
    pub async fn update_state(&self, task_id: &str, update: TaskUpdate) -> Result<Task> {
        let mut task = match self.get_task(task_id).await? {
            Some(task) => task,
            None => {
                tracing::warn!(
                    task_id = %task_id,
                    "Update for unknown task, synthesizing placeholder record"
                );
                Task::placeholder(task_id)
            }
        };

        let old_status = task.status;
        let mut status_changed = false;

        if let Some(new_status) = update.status {
            if new_status != old_status {
                if old_status.is_terminal() {
                    return Err(Error::invalid_transition(
                        task_id,
                        old_status.as_str(),
                        new_status.as_str(),
                    ));
                }
                task.status = new_status;
                status_changed = true;

                let now = Utc::now();
                match new_status {
                    TaskStatus::Running => {
                        task.started_at.get_or_insert(now);
                    }
                    TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled => {
                        task.completed_at = Some(now);
                    }
                    TaskStatus::Pending | TaskStatus::Retry => {}
                }
            }
        }

        if update.increment_retry {
            task.retry_count += 1;
        }
        if let Some(error) = update.error {
            task.error = Some(error);
        }
        if let Some(result) = update.result {
            task.result = Some(result);
        }
        if let Some(handle) = update.dispatch_handle {
            task.dispatch_handle = Some(handle);
        }

        let raw = serde_json::to_string(&task)?;
        let score = task.created_at.timestamp_millis() as f64;
        let remove = status_changed.then(|| self.status_index(old_status));
        let add = self.status_index(task.status);

        self.store
            .put_indexed(IndexedWrite {
                record_key: &self.task_key(task_id),
                value: &raw,
                ttl: Some(self.config.task_ttl),
                create_only: false,
                member: task_id,
                score,
                remove_index: remove.as_deref(),
                add_indexes: vec![add.as_str()],
            })
            .await?;

        if status_changed {
            tracing::debug!(
                task_id = %task_id,
                from = %old_status,
                to = %task.status,
                "Task status changed"
            );
            if task.status.is_terminal() {
                self.bump_lifetime(task.status.as_str()).await;
                metrics::record_task_completed(task.status.as_str());
            }
        }

        Ok(task)
    }

    /// Fetch one task record
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        match self.store.get(&self.task_key(task_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// List tasks; filtered reads hit one index directly (O(limit)),
    /// unfiltered reads merge all status indices and sort by creation time
    pub async fn list_tasks(
        &self,
        filter: TaskFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Task>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        match filter {
            TaskFilter::Status(status) => {
                let ids = self
                    .store
                    .zrange(
                        &self.status_index(status),
                        offset as isize,
                        (offset + limit - 1) as isize,
                    )
                    .await?;
                self.fetch_records(&ids).await
            }
            TaskFilter::Type(task_type) => {
                let ids = self
                    .store
                    .zrange(
                        &self.type_index(&task_type),
                        offset as isize,
                        (offset + limit - 1) as isize,
                    )
                    .await?;
                self.fetch_records(&ids).await
            }
            TaskFilter::All => {
                let mut all = Vec::new();
                for status in TaskStatus::all() {
                    let ids = self.store.zrange(&self.status_index(status), 0, -1).await?;
                    all.extend(self.fetch_records(&ids).await?);
                }
                all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                Ok(all.into_iter().skip(offset).take(limit).collect())
            }
        }
    }

    /// All tasks fanned out from one batch
    pub async fn tasks_for_batch(&self, batch_id: &str) -> Result<Vec<Task>> {
        let ids = self.store.zrange(&self.batch_index(batch_id), 0, -1).await?;
        self.fetch_records(&ids).await
    }

    /// Per-status counts from index cardinalities
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        for status in TaskStatus::all() {
            let count = self.store.zcard(&self.status_index(status)).await?;
            stats.set(status, count);
        }
        Ok(stats)
    }

    /// Authoritative flip to `cancelled`; allowed only from pending/running
    ///
    /// The best-effort dispatch revoke lives in the orchestrator - this flip
    /// is immediate and authoritative regardless of whether in-flight work
    /// actually halts.
    pub async fn cancel_task(&self, task_id: &str) -> Result<Task> {
        let task = self
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::not_found(task_id))?;

        if !task.status.is_cancellable() {
            return Err(Error::invalid_transition(
                task_id,
                task.status.as_str(),
                TaskStatus::Cancelled.as_str(),
            ));
        }

        self.update_state(task_id, TaskUpdate::status(TaskStatus::Cancelled))
            .await
    }

    /// Remove a task record and its index entries
    ///
    /// Index entries for records that already expired via TTL are also
    /// swept here; readers tolerate dangling index ids in the meantime.
    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        let task = self
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::not_found(task_id))?;

        self.store.delete(&self.task_key(task_id)).await?;
        self.store
            .zrem(&self.status_index(task.status), task_id)
            .await?;
        self.store
            .zrem(&self.type_index(&task.task_type), task_id)
            .await?;
        if let Some(batch_id) = &task.parent_batch_id {
            self.store.zrem(&self.batch_index(batch_id), task_id).await?;
        }

        tracing::debug!(task_id = %task_id, "Task deleted");
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn fetch_records(&self, ids: &[String]) -> Result<Vec<Task>> {
        let fetches = ids.iter().map(|id| self.get_task(id));
        let records = futures::future::try_join_all(fetches).await?;
        // Records can expire ahead of their index entries; skip those
        Ok(records.into_iter().flatten().collect())
    }

    /// Cumulative counters kept for observability; best-effort only
    async fn bump_lifetime(&self, field: &str) {
        if let Err(e) = self.store.hincr(&self.lifetime_key(), field, 1).await {
            tracing::debug!(error = %e, "Failed to bump lifetime counter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn task_store() -> TaskStateStore {
        TaskStateStore::new(Arc::new(MemoryStore::new()), TaskStoreConfig::default())
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = task_store();
        let created = store
            .create_task("t1", "publish", json!({"k": "v"}), TaskPriority::Normal, None)
            .await
            .unwrap();
        assert_eq!(created.status, TaskStatus::Pending);

        let fetched = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(fetched.task_id, "t1");
        assert_eq!(fetched.payload, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = task_store();
        store
            .create_task("t1", "publish", Value::Null, TaskPriority::Normal, None)
            .await
            .unwrap();
        let err = store
            .create_task("t1", "publish", Value::Null, TaskPriority::Normal, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateTask { .. }));
    }

    #[tokio::test]
    async fn test_status_change_moves_indices() {
        let store = task_store();
        store
            .create_task("t1", "publish", Value::Null, TaskPriority::Normal, None)
            .await
            .unwrap();

        store
            .update_state("t1", TaskUpdate::status(TaskStatus::Running))
            .await
            .unwrap();

        let stats = store.queue_stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.total(), 1);
    }

    #[tokio::test]
    async fn test_terminal_state_never_resumes() {
        let store = task_store();
        store
            .create_task("t1", "publish", Value::Null, TaskPriority::Normal, None)
            .await
            .unwrap();
        store
            .update_state("t1", TaskUpdate::status(TaskStatus::Running))
            .await
            .unwrap();
        store
            .update_state("t1", TaskUpdate::status(TaskStatus::Success))
            .await
            .unwrap();

        let err = store
            .update_state("t1", TaskUpdate::status(TaskStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let task = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_placeholder_synthesis() {
        let store = task_store();
        // Completion report arrives before the create was observed
        let task = store
            .update_state(
                "ghost",
                TaskUpdate::status(TaskStatus::Success).with_result(json!({"url": "x"})),
            )
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.task_type, "unknown");

        let stats = store.queue_stats().await.unwrap();
        assert_eq!(stats.success, 1);
    }

    #[tokio::test]
    async fn test_retry_increments_count() {
        let store = task_store();
        store
            .create_task("t1", "publish", Value::Null, TaskPriority::Normal, None)
            .await
            .unwrap();
        store
            .update_state("t1", TaskUpdate::status(TaskStatus::Running))
            .await
            .unwrap();
        store
            .update_state(
                "t1",
                TaskUpdate::status(TaskStatus::Retry).with_error("flaky upload"),
            )
            .await
            .unwrap();
        let task = store
            .update_state(
                "t1",
                TaskUpdate::status(TaskStatus::Pending).increment_retry(),
            )
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.error.as_deref(), Some("flaky upload"));
    }

    #[tokio::test]
    async fn test_list_by_status_and_type() {
        let store = task_store();
        for i in 0..3 {
            let id = format!("t{i}");
            store
                .create_task(&id, "publish", Value::Null, TaskPriority::Normal, None)
                .await
                .unwrap();
        }
        store
            .create_task("w1", "warmup", Value::Null, TaskPriority::Low, None)
            .await
            .unwrap();
        store
            .update_state("t0", TaskUpdate::status(TaskStatus::Running))
            .await
            .unwrap();

        let pending = store
            .list_tasks(TaskFilter::Status(TaskStatus::Pending), 10, 0)
            .await
            .unwrap();
        assert_eq!(pending.len(), 3);

        let warmups = store
            .list_tasks(TaskFilter::Type("warmup".into()), 10, 0)
            .await
            .unwrap();
        assert_eq!(warmups.len(), 1);
        assert_eq!(warmups[0].task_id, "w1");
    }

    #[tokio::test]
    async fn test_stats_total_matches_unfiltered_list() {
        let store = task_store();
        for i in 0..5 {
            let id = format!("t{i}");
            store
                .create_task(&id, "publish", Value::Null, TaskPriority::Normal, None)
                .await
                .unwrap();
        }
        store
            .update_state("t0", TaskUpdate::status(TaskStatus::Running))
            .await
            .unwrap();
        store
            .update_state("t1", TaskUpdate::status(TaskStatus::Cancelled))
            .await
            .unwrap();

        let stats = store.queue_stats().await.unwrap();
        let all = store.list_tasks(TaskFilter::All, 100, 0).await.unwrap();
        assert_eq!(stats.total(), all.len() as u64);
    }

    #[tokio::test]
    async fn test_cancel_only_from_pending_or_running() {
        let store = task_store();
        store
            .create_task("t1", "publish", Value::Null, TaskPriority::Normal, None)
            .await
            .unwrap();
        let cancelled = store.cancel_task("t1").await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        // Terminal now; cancelling again is rejected
        let err = store.cancel_task("t1").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let err = store.cancel_task("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_task_clears_indices() {
        let store = task_store();
        store
            .create_task(
                "t1",
                "publish",
                Value::Null,
                TaskPriority::Normal,
                Some("b1".into()),
            )
            .await
            .unwrap();
        store.delete_task("t1").await.unwrap();

        assert!(store.get_task("t1").await.unwrap().is_none());
        let stats = store.queue_stats().await.unwrap();
        assert_eq!(stats.total(), 0);
        assert!(store.tasks_for_batch("b1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_index_roundtrip() {
        let store = task_store();
        for i in 0..3 {
            let id = format!("b1-{i}");
            store
                .create_task(
                    &id,
                    "publish",
                    Value::Null,
                    TaskPriority::Normal,
                    Some("b1".into()),
                )
                .await
                .unwrap();
        }
        let tasks = store.tasks_for_batch("b1").await.unwrap();
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.parent_batch_id.as_deref() == Some("b1")));
    }
}
