// Core data structures for the fanout scheduler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{Error, Result};

/// Lifecycle states of a task
///
/// Transitions: `pending -> running -> {success, failed, retry, cancelled}`,
/// `retry -> pending` (new attempt), `pending/running -> cancelled`.
/// `success`, `failed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Retry,
    Cancelled,
}

impl TaskStatus {
    /// All statuses, in lifecycle order
    pub fn all() -> [Self; 6] {
        [
            Self::Pending,
            Self::Running,
            Self::Success,
            Self::Failed,
            Self::Retry,
            Self::Cancelled,
        ]
    }

    /// Get string representation (matches the serde encoding)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Retry => "retry",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again (except via explicit retry cloning)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// States from which a cancel is allowed
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority level for task dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Low priority - dispatched when the queue drains
    Low = 1,
    /// Normal priority - standard ordering
    Normal = 2,
    /// High priority - jumps ahead of normal work
    High = 3,
    /// Critical priority - always first
    Critical = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl TaskPriority {
    /// Numeric weight used by dispatch queues that order by priority
    pub fn weight(&self) -> i64 {
        *self as i64
    }
}

/// One schedulable unit of work with its own lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable task identifier (caller-supplied for idempotent resubmission)
    pub task_id: String,

    /// Executor selector (e.g. "publish")
    pub task_type: String,

    /// Opaque domain blob: platform / account ref / content ref / overrides
    pub payload: Value,

    /// Dispatch priority
    pub priority: TaskPriority,

    /// Batch this task fans out from, if any
    pub parent_batch_id: Option<String>,

    /// Current lifecycle state
    pub status: TaskStatus,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Last error message, if the task failed or is being retried
    pub error: Option<String>,

    /// Executor result, present on success
    pub result: Option<Value>,

    /// Number of retry attempts consumed so far
    pub retry_count: u32,

    /// Handle returned by work dispatch, used for best-effort revocation
    pub dispatch_handle: Option<String>,
}

impl Task {
    /// Create a new pending task
    pub fn new(
        task_id: impl Into<String>,
        task_type: impl Into<String>,
        payload: Value,
        priority: TaskPriority,
        parent_batch_id: Option<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.into(),
            payload,
            priority,
            parent_batch_id,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            retry_count: 0,
            dispatch_handle: None,
        }
    }

    /// Placeholder record synthesized when an update arrives before the create
    ///
    /// At-least-once delivery means a worker's completion report can race the
    /// creating instance; the placeholder keeps the update instead of dropping it.
    pub fn placeholder(task_id: impl Into<String>) -> Self {
        Self::new(task_id, "unknown", Value::Null, TaskPriority::Normal, None)
    }
}

/// One account targeted by a batch, tagged with its platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAccount {
    pub account_ref: String,
    pub platform: String,
}

impl TargetAccount {
    pub fn new(account_ref: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            account_ref: account_ref.into(),
            platform: platform.into(),
        }
    }
}

/// One (content, account) pairing produced by the assignment engine
///
/// `account_index` / `content_index` are stable for a given input order and
/// support downstream pacing (e.g. spacing execution by index x interval).
/// Partitioned strategies number accounts within their platform partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub content_ref: String,
    pub account_ref: String,
    pub platform: String,
    pub account_index: usize,
    pub content_index: usize,
}

/// Typed view of a publish task payload
///
/// Tasks carry the payload as an opaque JSON value; components that need the
/// scope fields (platform, account) decode through this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishPayload {
    pub platform: String,
    pub account_ref: String,
    pub content_ref: String,

    /// Per-task overrides forwarded verbatim to the executor
    #[serde(default)]
    pub overrides: Value,
}

impl PublishPayload {
    pub fn new(
        platform: impl Into<String>,
        account_ref: impl Into<String>,
        content_ref: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            account_ref: account_ref.into(),
            content_ref: content_ref.into(),
            overrides: Value::Null,
        }
    }

    /// Encode into the opaque task payload representation
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(Error::from)
    }

    /// Decode from an opaque task payload; fails on foreign payload shapes
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(Error::from)
    }
}

/// Per-status task counts derived from index cardinalities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub running: u64,
    pub success: u64,
    pub failed: u64,
    pub retry: u64,
    pub cancelled: u64,
}

impl QueueStats {
    /// Total live tasks across all statuses
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.success + self.failed + self.retry + self.cancelled
    }

    /// Get the count for one status
    pub fn get(&self, status: TaskStatus) -> u64 {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Running => self.running,
            TaskStatus::Success => self.success,
            TaskStatus::Failed => self.failed,
            TaskStatus::Retry => self.retry,
            TaskStatus::Cancelled => self.cancelled,
        }
    }

    /// Set the count for one status
    pub fn set(&mut self, status: TaskStatus, count: u64) {
        match status {
            TaskStatus::Pending => self.pending = count,
            TaskStatus::Running => self.running = count,
            TaskStatus::Success => self.success = count,
            TaskStatus::Failed => self.failed = count,
            TaskStatus::Retry => self.retry = count,
            TaskStatus::Cancelled => self.cancelled = count,
        }
    }

    /// Increment the count for one status
    pub fn bump(&mut self, status: TaskStatus) {
        let current = self.get(status);
        self.set(status, current + 1);
    }
}
