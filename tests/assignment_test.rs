//! Assignment engine properties
//!
//! The engine is a pure function, so these tests run without any
//! infrastructure: exact coverage counts per strategy, pairing uniqueness,
//! and determinism of the seeded random draw.

use fanout::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;

fn contents(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("clip-{i}")).collect()
}

fn accounts(n: usize, platform: &str) -> Vec<TargetAccount> {
    (0..n)
        .map(|i| TargetAccount::new(format!("{platform}-acct-{i}"), platform))
        .collect()
}

// ============================================================================
// all_per_account
// ============================================================================

#[test]
fn all_per_account_covers_every_pair_exactly_once() {
    let contents = contents(4);
    let accounts = accounts(3, "videohub");
    let config = AssignmentConfig::new(DistributionStrategy::AllPerAccount);

    let plan = plan_assignments(&contents, &accounts, &config).unwrap();
    assert_eq!(plan.len(), 12);

    let pairs: HashSet<(&str, &str)> = plan
        .iter()
        .map(|a| (a.content_ref.as_str(), a.account_ref.as_str()))
        .collect();
    assert_eq!(pairs.len(), 12);
}

proptest! {
    #[test]
    fn all_per_account_size_law(n_contents in 1usize..12, n_accounts in 1usize..12) {
        let contents = contents(n_contents);
        let accounts = accounts(n_accounts, "p");
        let config = AssignmentConfig::new(DistributionStrategy::AllPerAccount);

        let plan = plan_assignments(&contents, &accounts, &config).unwrap();
        prop_assert_eq!(plan.len(), n_contents * n_accounts);

        let pairs: HashSet<(&str, &str)> = plan
            .iter()
            .map(|a| (a.content_ref.as_str(), a.account_ref.as_str()))
            .collect();
        prop_assert_eq!(pairs.len(), plan.len());
    }

    #[test]
    fn one_per_account_never_repeats_accounts(
        n_contents in 1usize..12,
        n_accounts in 1usize..12,
        seed in any::<u64>(),
    ) {
        let contents = contents(n_contents);
        let accounts = accounts(n_accounts, "p");

        for mode in [SelectionMode::Random, SelectionMode::Sequential] {
            let config = AssignmentConfig::new(DistributionStrategy::OnePerAccount)
                .with_mode(mode)
                .with_seed(seed);
            let plan = plan_assignments(&contents, &accounts, &config).unwrap();

            prop_assert_eq!(plan.len(), n_contents.min(n_accounts));
            let served: HashSet<&str> = plan.iter().map(|a| a.account_ref.as_str()).collect();
            prop_assert_eq!(served.len(), plan.len());
        }
    }
}

// ============================================================================
// one_per_account sub-modes
// ============================================================================

#[test]
fn sequential_pairs_positionally() {
    let config = AssignmentConfig::new(DistributionStrategy::OnePerAccount)
        .with_mode(SelectionMode::Sequential);

    let plan = plan_assignments(&contents(1), &accounts(2, "p"), &config).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].account_ref, "p-acct-0");
    assert_eq!(plan[0].content_ref, "clip-0");
}

#[test]
fn round_robin_serves_every_account_regardless_of_sizes() {
    let config = AssignmentConfig::new(DistributionStrategy::OnePerAccount)
        .with_mode(SelectionMode::RoundRobin);

    for (n_contents, n_accounts) in [(1, 6), (4, 3), (5, 5)] {
        let plan = plan_assignments(&contents(n_contents), &accounts(n_accounts, "p"), &config)
            .unwrap();
        assert_eq!(plan.len(), n_accounts);

        let served: HashSet<&str> = plan.iter().map(|a| a.account_ref.as_str()).collect();
        assert_eq!(served.len(), n_accounts);

        for assignment in &plan {
            assert!(assignment.content_index < n_contents);
        }
    }
}

#[test]
fn random_same_seed_same_plan() {
    let config = AssignmentConfig::new(DistributionStrategy::OnePerAccount)
        .with_mode(SelectionMode::Random)
        .with_seed(1234);

    let a = plan_assignments(&contents(10), &accounts(7, "p"), &config).unwrap();
    let b = plan_assignments(&contents(10), &accounts(7, "p"), &config).unwrap();
    assert_eq!(a, b);
}

// ============================================================================
// Partitioned strategies
// ============================================================================

#[test]
fn cross_platform_all_covers_each_platform() {
    let mut all_accounts = accounts(2, "videohub");
    all_accounts.extend(accounts(3, "shortform"));
    let config = AssignmentConfig::new(DistributionStrategy::CrossPlatformAll);

    let plan = plan_assignments(&contents(2), &all_accounts, &config).unwrap();
    assert_eq!(plan.len(), 10);

    let videohub = plan.iter().filter(|a| a.platform == "videohub").count();
    let shortform = plan.iter().filter(|a| a.platform == "shortform").count();
    assert_eq!(videohub, 4);
    assert_eq!(shortform, 6);
}

#[test]
fn per_platform_custom_defaults_unlisted_platforms_to_cross_product() {
    let mut all_accounts = accounts(2, "videohub");
    all_accounts.extend(accounts(2, "shortform"));

    let config = AssignmentConfig::new(DistributionStrategy::PerPlatformCustom).with_override(
        "shortform",
        PlatformOverride {
            strategy: DistributionStrategy::OnePerAccount,
            mode: Some(SelectionMode::Sequential),
        },
    );

    let plan = plan_assignments(&contents(3), &all_accounts, &config).unwrap();

    // videohub unlisted -> all_per_account (2x3); shortform -> one each
    assert_eq!(plan.iter().filter(|a| a.platform == "videohub").count(), 6);
    assert_eq!(plan.iter().filter(|a| a.platform == "shortform").count(), 2);
}

// ============================================================================
// Input validation
// ============================================================================

#[test]
fn empty_inputs_yield_empty_plans() {
    let config = AssignmentConfig::new(DistributionStrategy::AllPerAccount);
    assert!(plan_assignments(&[], &accounts(2, "p"), &config)
        .unwrap()
        .is_empty());
    assert!(plan_assignments(&contents(2), &[], &config)
        .unwrap()
        .is_empty());
}

#[test]
fn unknown_strategy_strings_are_rejected() {
    assert!("fanout_everywhere".parse::<DistributionStrategy>().is_err());
    assert!("lottery".parse::<SelectionMode>().is_err());
    assert!("all_per_account".parse::<DistributionStrategy>().is_ok());
}
