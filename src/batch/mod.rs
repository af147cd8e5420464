//! Batch orchestration: one publish request fanned out into trackable tasks
//!
//! Turns a user-facing "publish N items to M accounts" request into
//! individually tracked tasks and aggregates their outcomes. A mid-fan-out
//! submission failure does not drop the remaining tasks - the orchestrator
//! continues best-effort and reports the failed subset, so a caller can
//! retarget a retry at just those.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::assignment::{plan_assignments, AssignmentConfig};
use crate::dispatch::WorkDispatch;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{PublishPayload, QueueStats, Task, TargetAccount, TaskPriority};
use crate::tasks::{TaskStateStore, TaskUpdate};
use crate::utils::{with_retry_if, RetryConfig};

/// Outcome of one batch submission
///
/// `batch_id` is always concrete, even under partial submission failure;
/// `failed_to_submit` carries enough detail to retarget a retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub batch_id: String,
    pub task_ids: Vec<String>,
    pub total_count: usize,
    pub submitted_count: usize,
    pub failed_to_submit: Vec<String>,
}

/// Aggregated batch progress plus the raw per-task records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatus {
    pub batch_id: String,
    pub counts: QueueStats,
    pub tasks: Vec<Task>,
}

impl BatchStatus {
    /// A batch is complete when every task reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.counts.pending == 0 && self.counts.running == 0 && self.counts.retry == 0
    }
}

/// Composes the assignment engine, task store and work dispatch
pub struct BatchOrchestrator {
    tasks: Arc<TaskStateStore>,
    dispatch: Arc<dyn WorkDispatch>,

    /// Executor selector stamped on every fanned-out task
    task_type: String,

    /// Backoff for transient dispatch submission failures
    submit_retry: RetryConfig,
}

impl BatchOrchestrator {
    pub fn new(tasks: Arc<TaskStateStore>, dispatch: Arc<dyn WorkDispatch>) -> Self {
        Self {
            tasks,
            dispatch,
            task_type: "publish".to_string(),
            submit_retry: RetryConfig::default(),
        }
    }

    /// Set the task type stamped on fanned-out tasks
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    /// Set the submission retry policy
    pub fn with_submit_retry(mut self, config: RetryConfig) -> Self {
        self.submit_retry = config;
        self
    }

    /// Fan one batch request out into tasks and hand each to work dispatch
    ///
    /// Raises only on malformed input (the assignment engine rejects unknown
    /// strategies); per-task failures are aggregated into the receipt.
    pub async fn submit_batch(
        &self,
        contents: &[String],
        accounts: &[TargetAccount],
        config: &AssignmentConfig,
        priority: TaskPriority,
    ) -> Result<BatchReceipt> {
        let assignments = plan_assignments(contents, accounts, config)?;
        let batch_id = Uuid::new_v4().to_string();

        let mut task_ids = Vec::with_capacity(assignments.len());
        let mut failed_to_submit = Vec::new();

        for (seq, assignment) in assignments.iter().enumerate() {
            let task_id = format!("{batch_id}-{seq:04}");

            let payload = PublishPayload {
                platform: assignment.platform.clone(),
                account_ref: assignment.account_ref.clone(),
                content_ref: assignment.content_ref.clone(),
                overrides: serde_json::json!({
                    "account_index": assignment.account_index,
                    "content_index": assignment.content_index,
                }),
            };
            let payload = payload.to_value()?;

            if let Err(e) = self
                .tasks
                .create_task(
                    &task_id,
                    &self.task_type,
                    payload.clone(),
                    priority,
                    Some(batch_id.clone()),
                )
                .await
            {
                tracing::error!(task_id = %task_id, error = %e, "Failed to create task record");
                failed_to_submit.push(task_id);
                continue;
            }
            task_ids.push(task_id.clone());

            let submitted = with_retry_if(
                &self.submit_retry,
                || self.dispatch.submit(&task_id, &payload, priority),
                Error::is_retryable,
            )
            .await;

            match submitted {
                Ok(handle) => {
                    // Remember the handle so cancel can revoke later
                    if let Err(e) = self
                        .tasks
                        .update_state(
                            &task_id,
                            TaskUpdate::default().with_dispatch_handle(handle.as_str()),
                        )
                        .await
                    {
                        tracing::warn!(task_id = %task_id, error = %e, "Failed to record dispatch handle");
                    }
                }
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "Failed to submit task to dispatch");
                    failed_to_submit.push(task_id);
                }
            }
        }

        let receipt = BatchReceipt {
            batch_id: batch_id.clone(),
            total_count: assignments.len(),
            submitted_count: assignments.len() - failed_to_submit.len(),
            task_ids,
            failed_to_submit,
        };

        metrics::record_batch_submitted(receipt.total_count);
        tracing::info!(
            batch_id = %batch_id,
            total = receipt.total_count,
            submitted = receipt.submitted_count,
            failed = receipt.failed_to_submit.len(),
            strategy = %config.strategy,
            "Batch submitted"
        );

        Ok(receipt)
    }

    /// Aggregate the status of every task sharing a batch id
    pub async fn get_batch_status(&self, batch_id: &str) -> Result<BatchStatus> {
        let tasks = self.tasks.tasks_for_batch(batch_id).await?;

        let mut counts = QueueStats::default();
        for task in &tasks {
            counts.bump(task.status);
        }

        Ok(BatchStatus {
            batch_id: batch_id.to_string(),
            counts,
            tasks,
        })
    }

    /// Cancel one task: best-effort dispatch revoke plus the authoritative
    /// status flip
    ///
    /// The flip is immediate and authoritative regardless of whether the
    /// in-flight work actually halts.
    pub async fn cancel_task(&self, task_id: &str) -> Result<Task> {
        let task = self
            .tasks
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::not_found(task_id))?;

        if let Some(handle) = &task.dispatch_handle {
            let handle = crate::dispatch::DispatchHandle::new(handle.clone());
            match self.dispatch.revoke(&handle).await {
                Ok(stopped) => {
                    tracing::debug!(task_id = %task_id, stopped, "Dispatch revoke attempted");
                }
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Dispatch revoke failed");
                }
            }
        }

        self.tasks.cancel_task(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::DistributionStrategy;
    use crate::dispatch::ChannelDispatch;
    use crate::store::MemoryStore;
    use crate::tasks::TaskStoreConfig;

    fn fixture() -> (BatchOrchestrator, tokio::sync::mpsc::Receiver<crate::dispatch::QueuedTask>) {
        let store = Arc::new(MemoryStore::new());
        let tasks = Arc::new(TaskStateStore::new(store, TaskStoreConfig::default()));
        let (dispatch, rx) = ChannelDispatch::new(64);
        (BatchOrchestrator::new(tasks, Arc::new(dispatch)), rx)
    }

    #[tokio::test]
    async fn test_submit_batch_fans_out() {
        let (orchestrator, mut rx) = fixture();
        let contents = vec!["c1".to_string(), "c2".to_string()];
        let accounts = vec![
            TargetAccount::new("a1", "videohub"),
            TargetAccount::new("a2", "videohub"),
            TargetAccount::new("a3", "videohub"),
        ];
        let config = AssignmentConfig::new(DistributionStrategy::AllPerAccount);

        let receipt = orchestrator
            .submit_batch(&contents, &accounts, &config, TaskPriority::Normal)
            .await
            .unwrap();

        assert_eq!(receipt.total_count, 6);
        assert_eq!(receipt.submitted_count, 6);
        assert!(receipt.failed_to_submit.is_empty());
        assert_eq!(receipt.task_ids.len(), 6);

        // All six items actually reached the queue
        for _ in 0..6 {
            assert!(rx.recv().await.is_some());
        }
    }

    #[tokio::test]
    async fn test_batch_status_aggregates() {
        let (orchestrator, _rx) = fixture();
        let contents = vec!["c1".to_string()];
        let accounts = vec![TargetAccount::new("a1", "p"), TargetAccount::new("a2", "p")];
        let config = AssignmentConfig::new(DistributionStrategy::AllPerAccount);

        let receipt = orchestrator
            .submit_batch(&contents, &accounts, &config, TaskPriority::Normal)
            .await
            .unwrap();

        let status = orchestrator.get_batch_status(&receipt.batch_id).await.unwrap();
        assert_eq!(status.counts.pending, 2);
        assert_eq!(status.tasks.len(), 2);
        assert!(!status.is_complete());
    }

    #[tokio::test]
    async fn test_submission_failure_is_partial_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let tasks = Arc::new(TaskStateStore::new(store, TaskStoreConfig::default()));
        let (dispatch, rx) = ChannelDispatch::new(64);
        drop(rx); // every submit will fail
        let orchestrator = BatchOrchestrator::new(tasks, Arc::new(dispatch))
            .with_submit_retry(RetryConfig::with_delays(0, 1, 1));

        let contents = vec!["c1".to_string()];
        let accounts = vec![TargetAccount::new("a1", "p"), TargetAccount::new("a2", "p")];
        let config = AssignmentConfig::new(DistributionStrategy::AllPerAccount);

        let receipt = orchestrator
            .submit_batch(&contents, &accounts, &config, TaskPriority::Normal)
            .await
            .unwrap();

        // Batch id is concrete and the failed subset is reported
        assert!(!receipt.batch_id.is_empty());
        assert_eq!(receipt.total_count, 2);
        assert_eq!(receipt.submitted_count, 0);
        assert_eq!(receipt.failed_to_submit.len(), 2);

        // Task records still exist for the failed subset
        let status = orchestrator.get_batch_status(&receipt.batch_id).await.unwrap();
        assert_eq!(status.tasks.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_task_revokes_and_flips() {
        let (orchestrator, _rx) = fixture();
        let contents = vec!["c1".to_string()];
        let accounts = vec![TargetAccount::new("a1", "p")];
        let config = AssignmentConfig::new(DistributionStrategy::AllPerAccount);

        let receipt = orchestrator
            .submit_batch(&contents, &accounts, &config, TaskPriority::Normal)
            .await
            .unwrap();

        let task = orchestrator.cancel_task(&receipt.task_ids[0]).await.unwrap();
        assert_eq!(task.status, crate::models::TaskStatus::Cancelled);
    }
}
