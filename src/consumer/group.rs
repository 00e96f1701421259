//! The narrow contract between the consumer core and group rebalancing

use std::collections::HashMap;
use std::sync::Arc;

use crate::fetch::Fetches;
use crate::metadata::TopicMeta;

/// What the consumer core needs from the group-rebalance layer.
///
/// The core treats the group protocol as a black box: it hands over each
/// metadata snapshot, reports fetched-but-uncommitted progress, and asks the
/// group to leave on shutdown. The group layer drives actual partition
/// assignment back into the core through the assignment engine.
///
/// Implementations must not call back into the consumer's assignment or
/// poll surfaces from within these methods; they are invoked under the
/// consumer's state lock.
pub trait GroupHandler: Send + Sync {
    /// Inspect a metadata snapshot for subscription changes. Any resulting
    /// assignment change is the handler's to initiate.
    fn find_new_assignments(&self, topics: &HashMap<String, Arc<TopicMeta>>);

    /// Leave the group; called when the consumer is unset or shut down.
    fn leave(&self) {}

    /// Record progress the user is about to observe, before the fetches are
    /// returned from poll. Committing anything older than this after a
    /// rebalance would redeliver records the user already processed.
    fn update_uncommitted(&self, fetches: &Fetches) {
        let _ = fetches;
    }
}
