//! Content-to-account assignment strategies
//!
//! Pure computation: `(content ids, accounts-with-platform-tag, config)`
//! in, an ordered list of [`TaskAssignment`] tuples out. No side effects and
//! no store access, so every strategy is unit-testable without
//! infrastructure.
//!
//! Strategy strings that don't name a known strategy are rejected outright
//! at parse time; a silent fallback would change which accounts publish what
//! without anyone noticing.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::{TargetAccount, TaskAssignment};

// ============================================================================
// Strategy selection
// ============================================================================

/// Policy deciding which (content, account) pairs become tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStrategy {
    /// Cross product: every account x every content item
    AllPerAccount,
    /// Each account gets exactly one item, chosen by the selection mode
    OnePerAccount,
    /// Partition accounts by platform, cross product per partition
    CrossPlatformAll,
    /// Partition accounts by platform, strategy chosen per platform
    PerPlatformCustom,
}

impl DistributionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllPerAccount => "all_per_account",
            Self::OnePerAccount => "one_per_account",
            Self::CrossPlatformAll => "cross_platform_all",
            Self::PerPlatformCustom => "per_platform_custom",
        }
    }
}

impl fmt::Display for DistributionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DistributionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all_per_account" => Ok(Self::AllPerAccount),
            "one_per_account" => Ok(Self::OnePerAccount),
            "cross_platform_all" => Ok(Self::CrossPlatformAll),
            "per_platform_custom" => Ok(Self::PerPlatformCustom),
            other => Err(Error::config(format!(
                "Unknown distribution strategy '{other}'. Valid options: all_per_account, \
                 one_per_account, cross_platform_all, per_platform_custom"
            ))),
        }
    }
}

/// How `one_per_account` picks each account's item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Unbiased draw without replacement
    Random,
    /// Account i gets content[i mod N]; every account is served, items may
    /// repeat when accounts outnumber contents
    RoundRobin,
    /// Positional 1:1 pairing; the remainder on the longer side is dropped
    Sequential,
}

impl Default for SelectionMode {
    fn default() -> Self {
        Self::Sequential
    }
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::RoundRobin => "round_robin",
            Self::Sequential => "sequential",
        }
    }
}

impl FromStr for SelectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(Self::Random),
            "round_robin" => Ok(Self::RoundRobin),
            "sequential" => Ok(Self::Sequential),
            other => Err(Error::config(format!(
                "Unknown selection mode '{other}'. Valid options: random, round_robin, sequential"
            ))),
        }
    }
}

/// Per-platform strategy override for `per_platform_custom`
///
/// Only `all_per_account` and `one_per_account` are valid inside a
/// partition - the partitioning strategies don't nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformOverride {
    pub strategy: DistributionStrategy,
    #[serde(default)]
    pub mode: Option<SelectionMode>,
}

/// Immutable input value describing one batch's distribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentConfig {
    pub strategy: DistributionStrategy,

    /// Selection mode for `one_per_account`
    #[serde(default)]
    pub mode: SelectionMode,

    /// Platform overrides for `per_platform_custom`; unspecified platforms
    /// default to `all_per_account`
    #[serde(default)]
    pub platform_overrides: HashMap<String, PlatformOverride>,

    /// Seed for the random draw; a given seed reproduces the same pairing
    #[serde(default)]
    pub seed: Option<u64>,
}

impl AssignmentConfig {
    pub fn new(strategy: DistributionStrategy) -> Self {
        Self {
            strategy,
            mode: SelectionMode::default(),
            platform_overrides: HashMap::new(),
            seed: None,
        }
    }

    pub fn with_mode(mut self, mode: SelectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_override(mut self, platform: impl Into<String>, over: PlatformOverride) -> Self {
        self.platform_overrides.insert(platform.into(), over);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject override combinations the partitioned strategies can't honor
    fn validate(&self) -> Result<()> {
        for (platform, over) in &self.platform_overrides {
            match over.strategy {
                DistributionStrategy::AllPerAccount | DistributionStrategy::OnePerAccount => {}
                other => {
                    return Err(Error::config(format!(
                        "Platform override for '{platform}' uses '{other}', which does not \
                         apply within a platform partition"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Compute the ordered assignment list for one batch
///
/// Empty content or account sets yield an empty result. Output order and the
/// `account_index`/`content_index` fields are stable for a given input
/// order; partitioned strategies number accounts within their platform
/// partition to support per-platform pacing.
pub fn plan_assignments(
    contents: &[String],
    accounts: &[TargetAccount],
    config: &AssignmentConfig,
) -> Result<Vec<TaskAssignment>> {
    config.validate()?;

    if contents.is_empty() || accounts.is_empty() {
        return Ok(Vec::new());
    }

    let mut rng = match config.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let assignments = match config.strategy {
        DistributionStrategy::AllPerAccount => {
            let indexed: Vec<(usize, &TargetAccount)> = accounts.iter().enumerate().collect();
            cross_product(contents, &indexed)
        }
        DistributionStrategy::OnePerAccount => {
            let indexed: Vec<(usize, &TargetAccount)> = accounts.iter().enumerate().collect();
            one_per_account(contents, &indexed, config.mode, &mut rng)
        }
        DistributionStrategy::CrossPlatformAll => partition_by_platform(accounts)
            .into_iter()
            .flat_map(|(_, partition)| cross_product(contents, &partition))
            .collect(),
        DistributionStrategy::PerPlatformCustom => {
            let mut out = Vec::new();
            for (platform, partition) in partition_by_platform(accounts) {
                let over = config.platform_overrides.get(&platform);
                let strategy = over
                    .map(|o| o.strategy)
                    .unwrap_or(DistributionStrategy::AllPerAccount);
                let mode = over.and_then(|o| o.mode).unwrap_or(config.mode);

                match strategy {
                    DistributionStrategy::AllPerAccount => {
                        out.extend(cross_product(contents, &partition));
                    }
                    DistributionStrategy::OnePerAccount => {
                        out.extend(one_per_account(contents, &partition, mode, &mut rng));
                    }
                    // validate() already rejected anything else
                    _ => unreachable!(),
                }
            }
            out
        }
    };

    tracing::debug!(
        strategy = %config.strategy,
        contents = contents.len(),
        accounts = accounts.len(),
        assignments = assignments.len(),
        "Assignment plan computed"
    );

    Ok(assignments)
}

/// Group accounts by platform, preserving first-seen platform order and the
/// input order within each partition; accounts are numbered per partition
fn partition_by_platform(
    accounts: &[TargetAccount],
) -> Vec<(String, Vec<(usize, &TargetAccount)>)> {
    let mut partitions: Vec<(String, Vec<(usize, &TargetAccount)>)> = Vec::new();
    for account in accounts {
        match partitions.iter_mut().find(|(p, _)| *p == account.platform) {
            Some((_, members)) => {
                let index = members.len();
                members.push((index, account));
            }
            None => partitions.push((account.platform.clone(), vec![(0, account)])),
        }
    }
    partitions
}

fn assignment(content_index: usize, content: &str, account_index: usize, account: &TargetAccount) -> TaskAssignment {
    TaskAssignment {
        content_ref: content.to_string(),
        account_ref: account.account_ref.clone(),
        platform: account.platform.clone(),
        account_index,
        content_index,
    }
}

/// Every account x every content item
fn cross_product(contents: &[String], accounts: &[(usize, &TargetAccount)]) -> Vec<TaskAssignment> {
    let mut out = Vec::with_capacity(contents.len() * accounts.len());
    for (account_index, account) in accounts {
        for (content_index, content) in contents.iter().enumerate() {
            out.push(assignment(content_index, content, *account_index, account));
        }
    }
    out
}

/// One item per account, chosen by mode
fn one_per_account(
    contents: &[String],
    accounts: &[(usize, &TargetAccount)],
    mode: SelectionMode,
    rng: &mut ChaCha8Rng,
) -> Vec<TaskAssignment> {
    match mode {
        SelectionMode::Sequential => accounts
            .iter()
            .zip(contents.iter().enumerate())
            .map(|((account_index, account), (content_index, content))| {
                assignment(content_index, content, *account_index, account)
            })
            .collect(),
        SelectionMode::RoundRobin => accounts
            .iter()
            .enumerate()
            .map(|(i, (account_index, account))| {
                let content_index = i % contents.len();
                assignment(content_index, &contents[content_index], *account_index, account)
            })
            .collect(),
        SelectionMode::Random => {
            let mut draw: Vec<usize> = (0..contents.len()).collect();
            draw.shuffle(rng);
            accounts
                .iter()
                .zip(draw)
                .map(|((account_index, account), content_index)| {
                    assignment(content_index, &contents[content_index], *account_index, account)
                })
                .collect()
        }
    }
}
