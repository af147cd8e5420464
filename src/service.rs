//! Composition root wiring the scheduler services together
//!
//! Builds the injected service graph - store client, admission controller,
//! task store, orchestrator - as explicit objects owned by the process. No
//! ambient global state: every component receives its collaborators through
//! the constructor.

use std::sync::Arc;

use crate::batch::BatchOrchestrator;
use crate::concurrency::{ConcurrencyController, ConcurrencyPolicy, Scope, ScopeUsage};
use crate::config::Config;
use crate::dispatch::WorkDispatch;
use crate::error::Result;
use crate::store::{MemoryStore, RedisStore, StateStore};
use crate::tasks::TaskStateStore;

/// One scheduler instance: stateless handlers over the shared store,
/// safely callable concurrently from any number of callers
pub struct Scheduler {
    store: Arc<dyn StateStore>,
    controller: Arc<ConcurrencyController>,
    tasks: Arc<TaskStateStore>,
    orchestrator: Arc<BatchOrchestrator>,
}

impl Scheduler {
    /// Connect to Redis and build the full service graph
    pub async fn connect(config: &Config, dispatch: Arc<dyn WorkDispatch>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| crate::error::Error::config(e.to_string()))?;
        let store: Arc<dyn StateStore> = Arc::new(RedisStore::connect(&config.redis()).await?);
        Ok(Self::with_store(config, store, dispatch))
    }

    /// Build against the in-memory store (tests, single-process runs)
    pub fn in_memory(config: &Config, dispatch: Arc<dyn WorkDispatch>) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()), dispatch)
    }

    /// Build against any state store implementation
    pub fn with_store(
        config: &Config,
        store: Arc<dyn StateStore>,
        dispatch: Arc<dyn WorkDispatch>,
    ) -> Self {
        let controller = Arc::new(
            ConcurrencyController::new(store.clone(), config.controller())
                .with_default_policy(config.default_policy()),
        );
        let tasks = Arc::new(TaskStateStore::new(store.clone(), config.task_store()));
        let orchestrator = Arc::new(BatchOrchestrator::new(tasks.clone(), dispatch));

        Self {
            store,
            controller,
            tasks,
            orchestrator,
        }
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        self.store.clone()
    }

    pub fn controller(&self) -> Arc<ConcurrencyController> {
        self.controller.clone()
    }

    pub fn tasks(&self) -> Arc<TaskStateStore> {
        self.tasks.clone()
    }

    pub fn orchestrator(&self) -> Arc<BatchOrchestrator> {
        self.orchestrator.clone()
    }

    /// Live admission usage per scope, for observability
    pub async fn get_usage(&self, scopes: &[Scope]) -> Result<Vec<ScopeUsage>> {
        self.controller.get_usage(scopes).await
    }

    /// Replace the active concurrency policy
    pub async fn update_policy(&self, policy: &ConcurrencyPolicy) -> Result<()> {
        self.controller.update_policy(policy).await
    }
}
