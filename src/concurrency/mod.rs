//! Lease-based admission control across orthogonal concurrency scopes
//!
//! Gates entry to a unit of work along zero or more independent dimensions
//! (global / platform / account / task type) using advisory tokens in the
//! shared store - no coordination between workers beyond the store itself.
//! Tokens live in per-scope sorted sets scored by lease expiry; expired
//! tokens are evicted lazily on the next acquisition attempt, so a crashed
//! holder can never starve a scope for longer than its lease.
//!
//! The active [`ConcurrencyPolicy`] is fetched fresh from the store on every
//! acquisition, so `update_policy` takes effect immediately for new
//! acquisitions while existing tokens keep the policy in force when they
//! were issued.
//!
//! If the store is unreachable, acquisition **fails open** (grants access)
//! rather than fails closed - an availability-over-safety trade-off for this
//! domain, logged at warning level for operator visibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics;
use crate::store::StateStore;

// ============================================================================
// Scopes
// ============================================================================

/// Dimension of concurrency limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Global,
    Platform,
    Account,
    TaskType,
}

impl ScopeKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Platform => "platform",
            Self::Account => "account",
            Self::TaskType => "task_type",
        }
    }
}

/// One concrete concurrency scope a task execution occupies
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Fleet-wide cap
    Global,
    /// Per-platform ceiling
    Platform(String),
    /// Per-account limit (the strictest dimension in this domain)
    Account(String),
    /// Per-task-type ceiling
    TaskType(String),
}

impl Scope {
    pub fn kind(&self) -> ScopeKind {
        match self {
            Self::Global => ScopeKind::Global,
            Self::Platform(_) => ScopeKind::Platform,
            Self::Account(_) => ScopeKind::Account,
            Self::TaskType(_) => ScopeKind::TaskType,
        }
    }

    /// Stable identifier used in store keys and error messages
    pub fn id(&self) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::Platform(p) => format!("platform:{p}"),
            Self::Account(a) => format!("account:{a}"),
            Self::TaskType(t) => format!("type:{t}"),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Limits applied per scope; 0 means "unlimited for that scope"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyPolicy {
    /// Fleet-wide cap on in-flight operations
    pub global_max: u64,

    /// Per-platform ceilings; platforms absent from the map are unlimited
    #[serde(default)]
    pub platform_max: HashMap<String, u64>,

    /// Cap applied to every account scope
    pub account_max: u64,

    /// Per-task-type ceilings; types absent from the map are unlimited
    #[serde(default)]
    pub task_type_max: HashMap<String, u64>,

    /// When false, every acquisition grants an empty guard
    pub enabled: bool,

    /// Token lease duration in seconds; bounds how long a crashed holder
    /// can occupy a slot
    pub token_timeout_secs: u64,
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self {
            global_max: 0,
            platform_max: HashMap::new(),
            account_max: 1,
            task_type_max: HashMap::new(),
            enabled: true,
            token_timeout_secs: 300,
        }
    }
}

impl ConcurrencyPolicy {
    /// Resolve the cap for one scope under this policy
    pub fn max_for(&self, scope: &Scope) -> u64 {
        match scope {
            Scope::Global => self.global_max,
            Scope::Platform(p) => self.platform_max.get(p).copied().unwrap_or(0),
            Scope::Account(_) => self.account_max,
            Scope::TaskType(t) => self.task_type_max.get(t).copied().unwrap_or(0),
        }
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_secs)
    }
}

// ============================================================================
// Controller configuration
// ============================================================================

/// Wait budgets and polling cadence for contended acquisitions
///
/// Stricter scopes get longer budgets than coarse ones: an account slot is
/// worth waiting for, a saturated global cap usually is not.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Store key prefix for token sets and the policy record
    pub key_prefix: String,

    /// Delay between acquisition attempts while a scope is full
    pub poll_interval: Duration,

    pub global_wait: Duration,
    pub platform_wait: Duration,
    pub task_type_wait: Duration,
    pub account_wait: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            key_prefix: "fanout".to_string(),
            poll_interval: Duration::from_millis(250),
            global_wait: Duration::from_secs(5),
            platform_wait: Duration::from_secs(15),
            task_type_wait: Duration::from_secs(10),
            account_wait: Duration::from_secs(30),
        }
    }
}

impl ControllerConfig {
    pub fn wait_budget(&self, kind: ScopeKind) -> Duration {
        match kind {
            ScopeKind::Global => self.global_wait,
            ScopeKind::Platform => self.platform_wait,
            ScopeKind::TaskType => self.task_type_wait,
            ScopeKind::Account => self.account_wait,
        }
    }
}

// ============================================================================
// Tokens and guards
// ============================================================================

/// Time-bounded advisory reservation proving capacity was granted in a scope
#[derive(Debug, Clone)]
pub struct AdmissionToken {
    pub scope_key: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// All tokens held by one in-flight task execution
///
/// Release is idempotent and safe after natural lease expiry. A guard that is
/// never released stops gating work once its leases lapse.
pub struct AdmissionGuard {
    store: Arc<dyn StateStore>,
    tokens: Vec<AdmissionToken>,
}

impl std::fmt::Debug for AdmissionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGuard")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl AdmissionGuard {
    fn new(store: Arc<dyn StateStore>, tokens: Vec<AdmissionToken>) -> Self {
        Self { store, tokens }
    }

    /// Number of tokens currently held
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Release all held tokens; store errors are logged and swallowed since
    /// the leases expire on their own
    pub async fn release(&mut self) {
        for token in self.tokens.drain(..) {
            if let Err(e) = self.store.zrem(&token.scope_key, &token.token_id).await {
                tracing::warn!(
                    scope = %token.scope_key,
                    error = %e,
                    "Failed to release admission token; lease will expire"
                );
            }
        }
    }
}

/// Live count vs configured max for one scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeUsage {
    pub scope: String,
    pub live: u64,
    pub max: u64,
}

// ============================================================================
// Controller
// ============================================================================

/// Issues and retires scoped admission tokens on top of the shared store
pub struct ConcurrencyController {
    store: Arc<dyn StateStore>,
    config: ControllerConfig,
    default_policy: ConcurrencyPolicy,
}

impl ConcurrencyController {
    pub fn new(store: Arc<dyn StateStore>, config: ControllerConfig) -> Self {
        Self {
            store,
            config,
            default_policy: ConcurrencyPolicy::default(),
        }
    }

    /// Set the policy used when the store holds none
    pub fn with_default_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    fn policy_key(&self) -> String {
        format!("{}:concurrency:policy", self.config.key_prefix)
    }

    fn scope_key(&self, scope: &Scope) -> String {
        format!("{}:tokens:{}", self.config.key_prefix, scope.id())
    }

    /// Fetch the active policy; falls back to the default on store outage
    /// (fail-open) or when no policy record exists yet
    pub async fn policy(&self) -> ConcurrencyPolicy {
        match self.store.get(&self.policy_key()).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(policy) => policy,
                Err(e) => {
                    tracing::warn!(error = %e, "Stored concurrency policy is corrupt, using default");
                    self.default_policy.clone()
                }
            },
            Ok(None) => self.default_policy.clone(),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "State store unreachable while reading policy, failing open with default"
                );
                self.default_policy.clone()
            }
        }
    }

    /// Persist a new policy; effective immediately for new acquisitions
    pub async fn update_policy(&self, policy: &ConcurrencyPolicy) -> Result<()> {
        let raw = serde_json::to_string(policy)?;
        self.store.set(&self.policy_key(), &raw, None).await?;
        tracing::info!(
            global_max = policy.global_max,
            account_max = policy.account_max,
            enabled = policy.enabled,
            "Concurrency policy updated"
        );
        Ok(())
    }

    /// Acquire one admission token per scope, all-or-nothing
    ///
    /// Full scopes are poll-retried within the scope kind's wait budget.
    /// When any budget is exhausted, every token already taken in this
    /// attempt is released and the whole call fails with a retryable
    /// `CapacityExceeded`.
    pub async fn acquire(&self, scopes: &[Scope]) -> Result<AdmissionGuard> {
        let policy = self.policy().await;
        if !policy.enabled {
            tracing::debug!("Concurrency control disabled, granting without tokens");
            return Ok(AdmissionGuard::new(self.store.clone(), Vec::new()));
        }

        let lease = policy.token_timeout();
        let mut held: Vec<AdmissionToken> = Vec::with_capacity(scopes.len());

        for scope in scopes {
            let max = policy.max_for(scope);
            let budget = self.config.wait_budget(scope.kind());
            let key = self.scope_key(scope);
            let token_id = Uuid::new_v4().to_string();
            let started = Instant::now();

            loop {
                let now = Utc::now();
                let now_ms = now.timestamp_millis() as f64;
                let expires_at =
                    now + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::zero());
                let expires_ms = expires_at.timestamp_millis() as f64;

                match self
                    .store
                    .zadd_capped(&key, &token_id, expires_ms, max, now_ms)
                    .await
                {
                    Ok(true) => {
                        metrics::record_admission(scope.kind().as_str(), true);
                        held.push(AdmissionToken {
                            scope_key: key,
                            token_id,
                            expires_at,
                        });
                        break;
                    }
                    Ok(false) => {
                        if started.elapsed() >= budget {
                            metrics::record_admission(scope.kind().as_str(), false);
                            tracing::debug!(
                                scope = %scope,
                                waited_ms = started.elapsed().as_millis() as u64,
                                "Admission wait budget exhausted"
                            );
                            let mut guard = AdmissionGuard::new(self.store.clone(), held);
                            guard.release().await;
                            return Err(Error::capacity_exceeded(
                                scope.id(),
                                budget.as_millis() as u64,
                            ));
                        }
                        tokio::time::sleep(self.config.poll_interval).await;
                    }
                    Err(e) => {
                        // Fail open: never block publishing on infra hiccups
                        tracing::warn!(
                            scope = %scope,
                            error = %e,
                            "State store unreachable during acquisition, failing open"
                        );
                        break;
                    }
                }
            }
        }

        Ok(AdmissionGuard::new(self.store.clone(), held))
    }

    /// Release all tokens held by a guard (idempotent)
    pub async fn release(&self, guard: &mut AdmissionGuard) {
        guard.release().await;
    }

    /// Live count vs max per scope, for observability
    pub async fn get_usage(&self, scopes: &[Scope]) -> Result<Vec<ScopeUsage>> {
        let policy = self.policy().await;
        let now_ms = Utc::now().timestamp_millis() as f64;
        let mut usage = Vec::with_capacity(scopes.len());

        for scope in scopes {
            let key = self.scope_key(scope);
            self.store.zremrangebyscore(&key, now_ms).await?;
            let live = self.store.zcard(&key).await?;
            usage.push(ScopeUsage {
                scope: scope.id(),
                live,
                max: policy.max_for(scope),
            });
        }

        Ok(usage)
    }
}
