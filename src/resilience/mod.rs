//! Resilience helpers.
//!
//! Only the mirror store's own client operations are retried. Deferred
//! replication tasks are deliberately not: a failed mirror write is logged
//! and dropped, and reconciliation is the repair path.

pub mod retry;

pub use retry::{retry, RetryConfig};
