//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the scheduler.

pub mod retry;

pub use retry::{with_retry, with_retry_if, RetryConfig};
