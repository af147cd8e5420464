//! fanout - Distributed publish-task scheduler
//!
//! Distributes independent publish operations - each tied to one platform,
//! one account, one content item - across a fleet of browser-automation
//! workers, while enforcing safety limits (at most one concurrent operation
//! per account, per-platform ceilings, a global cap) and tracking per-task
//! lifecycle durably enough to survive worker crashes and scale
//! horizontally.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`store`] - Shared state store abstraction (Redis / in-memory)
//! - [`concurrency`] - Lease-based admission control per scope
//! - [`tasks`] - Durable task lifecycle tracking with status/type indices
//! - [`assignment`] - Pure content-to-account distribution strategies
//! - [`batch`] - Batch fan-out and aggregation
//! - [`worker`] - Worker-side processing loop
//! - [`dispatch`] - Work-dispatch and executor seams
//! - [`service`] - Composition root
//!
//! # Example
//!
//! ```no_run
//! use fanout::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let (dispatch, queue) = ChannelDispatch::new(config.worker.queue_depth);
//!     let scheduler = Scheduler::connect(&config, Arc::new(dispatch)).await?;
//!
//!     let receipt = scheduler
//!         .orchestrator()
//!         .submit_batch(
//!             &["clip-1".to_string(), "clip-2".to_string()],
//!             &[TargetAccount::new("acct-1", "videohub")],
//!             &AssignmentConfig::new(DistributionStrategy::AllPerAccount),
//!             TaskPriority::Normal,
//!         )
//!         .await?;
//!     println!("batch {} fanned out {} tasks", receipt.batch_id, receipt.total_count);
//!     # let _ = queue;
//!     Ok(())
//! }
//! ```

pub mod assignment;
pub mod batch;
pub mod concurrency;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod models;
pub mod service;
pub mod store;
pub mod tasks;
pub mod utils;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::assignment::{
        plan_assignments, AssignmentConfig, DistributionStrategy, PlatformOverride, SelectionMode,
    };
    pub use crate::batch::{BatchOrchestrator, BatchReceipt, BatchStatus};
    pub use crate::concurrency::{
        AdmissionGuard, ConcurrencyController, ConcurrencyPolicy, Scope, ScopeUsage,
    };
    pub use crate::config::Config;
    pub use crate::dispatch::{
        ChannelDispatch, DispatchHandle, Executor, ExecutorRegistry, WorkDispatch,
    };
    pub use crate::error::{Error, Result};
    pub use crate::models::{
        PublishPayload, QueueStats, TargetAccount, Task, TaskAssignment, TaskPriority, TaskStatus,
    };
    pub use crate::service::Scheduler;
    pub use crate::tasks::{TaskFilter, TaskStateStore, TaskUpdate};
    pub use crate::worker::{PublishWorker, TaskOutcome};
}
