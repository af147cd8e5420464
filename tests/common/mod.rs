//! Shared fixtures for integration tests

use async_trait::async_trait;
use fanout::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Executor that succeeds immediately, counting invocations
pub struct CountingExecutor {
    pub calls: AtomicU32,
}

impl CountingExecutor {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Executor for CountingExecutor {
    async fn execute(&self, payload: &Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let decoded = PublishPayload::from_value(payload)?;
        Ok(json!({
            "published": true,
            "platform": decoded.platform,
            "account": decoded.account_ref,
        }))
    }
}

/// Executor that fails a fixed number of times before succeeding
pub struct FlakyExecutor {
    failures_left: AtomicU32,
}

impl FlakyExecutor {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
        }
    }
}

#[async_trait]
impl Executor for FlakyExecutor {
    async fn execute(&self, _payload: &Value) -> Result<Value> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::ExecutorRetryable("transient upload failure".into()));
        }
        Ok(json!({"published": true}))
    }
}

/// Full in-memory scheduler wired to a worker-side queue
pub struct Harness {
    pub scheduler: Scheduler,
    pub worker: Arc<PublishWorker>,
    pub queue: mpsc::Receiver<fanout::dispatch::QueuedTask>,
}

impl Harness {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        init_tracing();
        let config = Config::default();
        let (dispatch, queue) = ChannelDispatch::new(config.worker.queue_depth);
        let scheduler = Scheduler::in_memory(&config, Arc::new(dispatch.clone()));

        let mut registry = ExecutorRegistry::new();
        registry.register("publish", executor);

        let worker = Arc::new(PublishWorker::new(
            scheduler.tasks(),
            scheduler.controller(),
            Arc::new(registry),
            Arc::new(dispatch.clone()),
        ));

        Self {
            scheduler,
            worker,
            queue,
        }
    }

    /// Drain the queue until empty, processing each item once
    pub async fn drain(&mut self) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(item) = self.queue.try_recv() {
            outcomes.push(self.worker.process(&item.task_id).await.unwrap());
        }
        outcomes
    }
}

/// Route scheduler logs through the test harness; `RUST_LOG` filters apply
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn contents(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("clip-{i}")).collect()
}

pub fn accounts(n: usize, platform: &str) -> Vec<TargetAccount> {
    (0..n)
        .map(|i| TargetAccount::new(format!("{platform}-acct-{i}"), platform))
        .collect()
}
