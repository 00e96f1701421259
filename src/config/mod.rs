//! Configuration for the consumer core
//!
//! Loading configuration from files or the environment is the embedding
//! application's concern; this module only defines the settings the core
//! consults at runtime and their defaults.

use serde::{Deserialize, Serialize};

use crate::consumer::Offset;

/// Default isolation level for list-offsets requests
pub const DEFAULT_ISOLATION_LEVEL: IsolationLevel = IsolationLevel::ReadUncommitted;

/// Isolation level stamped into every list-offsets request.
///
/// `ReadCommitted` makes end-of-partition resolution stop at the last stable
/// offset rather than the high watermark, hiding records from aborted
/// transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// See all records regardless of transaction state
    #[default]
    ReadUncommitted,
    /// See only records from committed transactions
    ReadCommitted,
}

impl IsolationLevel {
    /// The wire encoding of the isolation level
    pub fn as_i8(&self) -> i8 {
        match self {
            IsolationLevel::ReadUncommitted => 0,
            IsolationLevel::ReadCommitted => 1,
        }
    }
}

/// Settings consulted by the consumer core.
///
/// # Subscriptions
///
/// `topics` and `topic_regex` only matter for direct (non-group) consumers:
/// every metadata refresh is matched against them and newly discovered
/// partitions are assigned at `start_offset`. Group consumers receive their
/// assignments from the group rebalance layer instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Isolation level for list-offsets requests
    #[serde(default)]
    pub isolation_level: IsolationLevel,

    /// Topics a direct consumer subscribes to by exact name
    #[serde(default)]
    pub topics: Vec<String>,

    /// Optional regex a direct consumer matches topic names against,
    /// in addition to `topics`
    #[serde(default)]
    pub topic_regex: Option<String>,

    /// Where a direct consumer begins on a newly discovered partition
    #[serde(skip, default = "Offset::new")]
    pub start_offset: Offset,
}
