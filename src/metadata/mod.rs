//! Read-only view of cluster metadata and per-partition cursors
//!
//! The consumer core never refreshes metadata itself; it reads snapshots
//! through [`MetadataView`] and asks the owning subsystem to refresh via the
//! trigger hooks. The metadata subsystem is the sole writer and calls back
//! into the consumer (`Consumer::on_metadata_update`) after every refresh.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Identity of a broker as reported by cluster metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMeta {
    /// Broker node id; seed brokers use deeply negative synthetic ids
    pub node_id: i32,
    /// Advertised host
    pub host: String,
    /// Advertised port
    pub port: i32,
    /// Rack, if the broker reports one
    pub rack: Option<String>,
}

/// Per-partition state from the latest metadata refresh
#[derive(Debug, Clone)]
pub struct PartitionMeta {
    /// Partition index
    pub partition: i32,
    /// Node id of the partition leader
    pub leader: i32,
    /// Leader epoch at the time of the refresh
    pub leader_epoch: i32,
    /// The fetch cursor owned by this partition
    pub cursor: Arc<Cursor>,
}

/// Per-topic state: partitions ordered by partition index
#[derive(Debug, Clone, Default)]
pub struct TopicMeta {
    /// Partition states, indexed by partition number
    pub partitions: Vec<PartitionMeta>,
}

impl TopicMeta {
    /// Look up a partition by index, if the metadata has loaded it
    pub fn partition(&self, partition: i32) -> Option<&PartitionMeta> {
        if partition < 0 {
            return None;
        }
        self.partitions
            .get(partition as usize)
            .filter(|p| p.partition == partition)
    }
}

/// The cluster-metadata seam the consumer core reads through.
///
/// Implementations are expected to call `Consumer::on_metadata_update` after
/// each refresh completes; the trigger methods only *request* a refresh.
pub trait MetadataView: Send + Sync {
    /// Snapshot the current topic map
    fn load_topics(&self) -> HashMap<String, Arc<TopicMeta>>;

    /// Request a refresh at the subsystem's own pace
    fn trigger_update(&self);

    /// Request a refresh as soon as possible
    fn trigger_update_now(&self);
}

/// A concrete fetch position: the next offset to fetch and the last epoch
/// consumed at, used for truncation detection on subsequent fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorOffset {
    /// Next offset to fetch
    pub offset: i64,
    /// Epoch of the last consumed record, or -1 if unknown
    pub last_consumed_epoch: i32,
}

impl Default for CursorOffset {
    fn default() -> Self {
        CursorOffset {
            offset: -1,
            last_consumed_epoch: -1,
        }
    }
}

#[derive(Debug, Default)]
struct CursorState {
    at: CursorOffset,
    usable: bool,
}

/// The mutable per-partition fetch position.
///
/// Cursors are owned by topic-partition metadata and shared with the
/// consumer core, which moves them through offset resolution and marks them
/// usable; fetch loops only fetch from usable cursors.
#[derive(Debug)]
pub struct Cursor {
    topic: String,
    partition: i32,
    state: Mutex<CursorState>,
}

impl Cursor {
    /// Create a cursor for a topic partition, ineligible for fetching and
    /// with no position.
    pub fn new(topic: impl Into<String>, partition: i32) -> Arc<Cursor> {
        Arc::new(Cursor {
            topic: topic.into(),
            partition,
            state: Mutex::new(CursorState {
                at: CursorOffset::default(),
                usable: false,
            }),
        })
    }

    /// The topic this cursor fetches
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The partition this cursor fetches
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Overwrite the next-fetch position
    pub fn set_offset(&self, at: CursorOffset) {
        self.state.lock().at = at;
    }

    /// Mark the cursor eligible for fetching
    pub fn allow_usable(&self) {
        self.state.lock().usable = true;
    }

    /// Mark the cursor ineligible and drop its position
    pub fn unset(&self) {
        let mut state = self.state.lock();
        state.usable = false;
        state.at = CursorOffset::default();
    }

    /// Whether fetch loops may fetch from this cursor
    pub fn is_usable(&self) -> bool {
        self.state.lock().usable
    }

    /// The current position
    pub fn position(&self) -> CursorOffset {
        self.state.lock().at
    }
}
