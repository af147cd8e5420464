//! Worker-side task processing loop
//!
//! A worker pulls one task at a time from its dispatch queue and runs it
//! synchronously from its own perspective: check it was not cancelled while
//! queued, acquire admission tokens for every scope the task occupies, run
//! the executor, record the outcome, release the tokens. Transient failures
//! re-queue the task with an incremented retry count until the budget is
//! spent, then fail it permanently.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::concurrency::{ConcurrencyController, Scope};
use crate::dispatch::{ExecutorRegistry, QueuedTask, WorkDispatch};
use crate::error::{Error, Result};
use crate::models::{PublishPayload, Task, TaskStatus};
use crate::tasks::{TaskStateStore, TaskUpdate};
use crate::utils::{with_retry_if, RetryConfig};

/// What happened to one processed task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Executor finished and the result was recorded
    Success,
    /// Permanently failed (fatal error, missing executor, or retries spent)
    Failed,
    /// Re-queued for another attempt
    Retried,
    /// Not run at all (cancelled or already terminal)
    Skipped,
}

/// Executes pulled tasks against the admission controller and task store
pub struct PublishWorker {
    tasks: Arc<TaskStateStore>,
    controller: Arc<ConcurrencyController>,
    registry: Arc<ExecutorRegistry>,
    dispatch: Arc<dyn WorkDispatch>,

    /// Retry budget per task before it fails permanently
    max_retries: u32,

    /// Backoff for re-queue submissions
    requeue_retry: RetryConfig,
}

impl PublishWorker {
    pub fn new(
        tasks: Arc<TaskStateStore>,
        controller: Arc<ConcurrencyController>,
        registry: Arc<ExecutorRegistry>,
        dispatch: Arc<dyn WorkDispatch>,
    ) -> Self {
        Self {
            tasks,
            controller,
            registry,
            dispatch,
            max_retries: 3,
            requeue_retry: RetryConfig::default(),
        }
    }

    /// Set the per-task retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Process one pulled task end to end
    pub async fn process(&self, task_id: &str) -> Result<TaskOutcome> {
        let task = self
            .tasks
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::not_found(task_id))?;

        // Cancelled (or otherwise finished) while queued
        if task.status.is_terminal() {
            tracing::debug!(task_id = %task_id, status = %task.status, "Skipping finished task");
            return Ok(TaskOutcome::Skipped);
        }

        let scopes = derive_scopes(&task);

        let mut guard = match self.controller.acquire(&scopes).await {
            Ok(guard) => guard,
            Err(e) if e.is_retryable() => {
                tracing::debug!(task_id = %task_id, error = %e, "Admission denied");
                return self.fail_or_retry(&task, e.to_string()).await;
            }
            Err(e) => return Err(e),
        };

        let task = self
            .tasks
            .update_state(task_id, TaskUpdate::status(TaskStatus::Running))
            .await?;

        let outcome = self.execute(&task).await;
        guard.release().await;
        outcome
    }

    /// Pull from an in-process queue until it closes or shutdown fires
    pub async fn run(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<QueuedTask>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("Publish worker started");
        loop {
            tokio::select! {
                item = queue.recv() => {
                    match item {
                        Some(item) => {
                            if let Err(e) = self.process(&item.task_id).await {
                                tracing::error!(
                                    task_id = %item.task_id,
                                    error = %e,
                                    "Task processing failed"
                                );
                            }
                        }
                        None => {
                            tracing::info!("Work queue closed, worker exiting");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("Publish worker shutting down");
                    break;
                }
            }
        }
    }

    async fn execute(&self, task: &Task) -> Result<TaskOutcome> {
        let Some(executor) = self.registry.get(&task.task_type) else {
            let message = format!("No executor registered for task type '{}'", task.task_type);
            tracing::error!(task_id = %task.task_id, "{message}");
            self.tasks
                .update_state(
                    &task.task_id,
                    TaskUpdate::status(TaskStatus::Failed).with_error(message),
                )
                .await?;
            return Ok(TaskOutcome::Failed);
        };

        match executor.execute(&task.payload).await {
            Ok(result) => {
                self.tasks
                    .update_state(
                        &task.task_id,
                        TaskUpdate::status(TaskStatus::Success).with_result(result),
                    )
                    .await?;
                tracing::info!(task_id = %task.task_id, "Task completed");
                Ok(TaskOutcome::Success)
            }
            Err(Error::ExecutorRetryable(reason)) => self.fail_or_retry(task, reason).await,
            Err(e) => {
                self.tasks
                    .update_state(
                        &task.task_id,
                        TaskUpdate::status(TaskStatus::Failed).with_error(e.to_string()),
                    )
                    .await?;
                tracing::warn!(task_id = %task.task_id, error = %e, "Task failed permanently");
                Ok(TaskOutcome::Failed)
            }
        }
    }

    /// Re-queue with `retry_count + 1`, or fail permanently once the budget
    /// is spent
    async fn fail_or_retry(&self, task: &Task, reason: String) -> Result<TaskOutcome> {
        if task.retry_count >= self.max_retries {
            self.tasks
                .update_state(
                    &task.task_id,
                    TaskUpdate::status(TaskStatus::Failed)
                        .with_error(format!("Retries exhausted ({}): {reason}", task.retry_count)),
                )
                .await?;
            tracing::warn!(
                task_id = %task.task_id,
                retries = task.retry_count,
                "Retry budget spent, task failed"
            );
            return Ok(TaskOutcome::Failed);
        }

        self.tasks
            .update_state(
                &task.task_id,
                TaskUpdate::status(TaskStatus::Retry).with_error(reason.clone()),
            )
            .await?;
        let task = self
            .tasks
            .update_state(
                &task.task_id,
                TaskUpdate::status(TaskStatus::Pending).increment_retry(),
            )
            .await?;

        let resubmitted = with_retry_if(
            &self.requeue_retry,
            || {
                self.dispatch
                    .submit(&task.task_id, &task.payload, task.priority)
            },
            Error::is_retryable,
        )
        .await;

        match resubmitted {
            Ok(handle) => {
                self.tasks
                    .update_state(
                        &task.task_id,
                        TaskUpdate::default().with_dispatch_handle(handle.as_str()),
                    )
                    .await?;
                tracing::info!(
                    task_id = %task.task_id,
                    attempt = task.retry_count,
                    "Task re-queued for retry"
                );
                Ok(TaskOutcome::Retried)
            }
            Err(e) => {
                self.tasks
                    .update_state(
                        &task.task_id,
                        TaskUpdate::status(TaskStatus::Failed)
                            .with_error(format!("Re-queue failed: {e}")),
                    )
                    .await?;
                tracing::error!(task_id = %task.task_id, error = %e, "Re-queue failed");
                Ok(TaskOutcome::Failed)
            }
        }
    }
}

/// Scopes one task execution occupies, derived from its payload
///
/// Tasks with payloads the publish schema can't decode still gate on the
/// global and task-type dimensions.
fn derive_scopes(task: &Task) -> Vec<Scope> {
    let mut scopes = vec![Scope::Global, Scope::TaskType(task.task_type.clone())];
    if let Ok(payload) = PublishPayload::from_value(&task.payload) {
        scopes.push(Scope::Platform(payload.platform));
        scopes.push(Scope::Account(payload.account_ref));
    }
    scopes
}
