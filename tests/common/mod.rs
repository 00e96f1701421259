//! Shared fixtures for windlass integration tests
//!
//! In your test file, add:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```
//!
//! Provides:
//! - `MockBroker`: a scripted `BrokerClient` that records every request
//! - `TestMetadata`: a `MetadataView` over hand-built topics that can relay
//!   refresh triggers back into the consumer, like the real metadata
//!   subsystem does
//! - `NoopGroup` / `RecordingGroup`: group handlers for drain tests
//! - assignment and response builders, plus a polling `wait_until`

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use kafka_protocol::messages::list_offsets_response::{
    ListOffsetsPartitionResponse, ListOffsetsTopicResponse,
};
use kafka_protocol::messages::offset_for_leader_epoch_response::{
    EpochEndOffset, OffsetForLeaderTopicResult,
};
use kafka_protocol::messages::{
    ListOffsetsRequest, ListOffsetsResponse, OffsetForLeaderEpochRequest,
    OffsetForLeaderEpochResponse, TopicName,
};
use kafka_protocol::protocol::StrBytes;
use parking_lot::Mutex;

use windlass::{
    seed_node_id, Assignments, Broker, BrokerClient, BrokerMap, BrokerMeta, Consumer,
    ConsumerConfig, Cursor, Fetches, GroupHandler, MetadataView, Offset, PartitionMeta, Result,
    TopicMeta, WindlassError,
};

// ============================================================================
// Mock broker transport
// ============================================================================

/// A `BrokerClient` that replays scripted responses in order and records
/// every request it sees. An unscripted request fails with a transport
/// error, which the consumer core treats as retriable.
pub struct MockBroker {
    pub list_requests: Mutex<Vec<ListOffsetsRequest>>,
    pub epoch_requests: Mutex<Vec<OffsetForLeaderEpochRequest>>,
    list_responses: Mutex<VecDeque<Result<ListOffsetsResponse>>>,
    epoch_responses: Mutex<VecDeque<Result<OffsetForLeaderEpochResponse>>>,
}

impl MockBroker {
    pub fn new() -> Arc<MockBroker> {
        Arc::new(MockBroker {
            list_requests: Mutex::new(Vec::new()),
            epoch_requests: Mutex::new(Vec::new()),
            list_responses: Mutex::new(VecDeque::new()),
            epoch_responses: Mutex::new(VecDeque::new()),
        })
    }

    pub fn push_list_response(&self, resp: ListOffsetsResponse) {
        self.list_responses.lock().push_back(Ok(resp));
    }

    pub fn push_epoch_response(&self, resp: OffsetForLeaderEpochResponse) {
        self.epoch_responses.lock().push_back(Ok(resp));
    }

    /// Script a transport-level failure for the next ListOffsets request
    pub fn push_list_error(&self, err: WindlassError) {
        self.list_responses.lock().push_back(Err(err));
    }

    /// Script a transport-level failure for the next OffsetForLeaderEpoch
    /// request
    pub fn push_epoch_error(&self, err: WindlassError) {
        self.epoch_responses.lock().push_back(Err(err));
    }

    pub fn list_request_count(&self) -> usize {
        self.list_requests.lock().len()
    }

    pub fn epoch_request_count(&self) -> usize {
        self.epoch_requests.lock().len()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn list_offsets(&self, req: ListOffsetsRequest) -> Result<ListOffsetsResponse> {
        self.list_requests.lock().push(req);
        self.list_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(WindlassError::Transport("no scripted response".into())))
    }

    async fn offset_for_leader_epoch(
        &self,
        req: OffsetForLeaderEpochRequest,
    ) -> Result<OffsetForLeaderEpochResponse> {
        self.epoch_requests.lock().push(req);
        self.epoch_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(WindlassError::Transport("no scripted response".into())))
    }
}

/// A broker handle around a mock transport
pub fn broker(node_id: i32, client: Arc<MockBroker>) -> Arc<Broker> {
    Broker::new(
        BrokerMeta {
            node_id,
            host: "localhost".into(),
            port: 9092,
            rack: None,
        },
        client,
    )
}

/// A broker map holding a seed broker plus the given brokers
pub fn broker_map(seed_client: Arc<MockBroker>, brokers: &[Arc<Broker>]) -> Arc<BrokerMap> {
    let map = BrokerMap::new();
    map.insert(broker(seed_node_id(0), seed_client));
    for b in brokers {
        map.insert(Arc::clone(b));
    }
    map
}

// ============================================================================
// Metadata fixture
// ============================================================================

/// A `MetadataView` over hand-built topic state. When bound to a consumer
/// (and `auto_notify` is left on), every refresh trigger is relayed as an
/// `on_metadata_update`, mimicking the real metadata subsystem's callback.
pub struct TestMetadata {
    topics: Mutex<HashMap<String, Arc<TopicMeta>>>,
    consumer: Mutex<Option<Weak<Consumer>>>,
    auto_notify: AtomicBool,
    pub lazy_triggers: AtomicUsize,
    pub now_triggers: AtomicUsize,
}

impl TestMetadata {
    pub fn new() -> Arc<TestMetadata> {
        Arc::new(TestMetadata {
            topics: Mutex::new(HashMap::new()),
            consumer: Mutex::new(None),
            auto_notify: AtomicBool::new(true),
            lazy_triggers: AtomicUsize::new(0),
            now_triggers: AtomicUsize::new(0),
        })
    }

    /// Stop relaying triggers; tests drive `notify` by hand instead.
    pub fn set_auto_notify(&self, on: bool) {
        self.auto_notify.store(on, Ordering::SeqCst);
    }

    /// Install a topic with one `(leader, leader_epoch)` entry per
    /// partition, returning the cursors for assertions.
    pub fn add_topic(&self, name: &str, partitions: &[(i32, i32)]) -> Vec<Arc<Cursor>> {
        let cursors: Vec<_> = (0..partitions.len())
            .map(|p| Cursor::new(name, p as i32))
            .collect();
        let meta = TopicMeta {
            partitions: partitions
                .iter()
                .enumerate()
                .map(|(p, &(leader, leader_epoch))| PartitionMeta {
                    partition: p as i32,
                    leader,
                    leader_epoch,
                    cursor: Arc::clone(&cursors[p]),
                })
                .collect(),
        };
        self.topics.lock().insert(name.to_string(), Arc::new(meta));
        cursors
    }

    pub fn bind(&self, consumer: &Arc<Consumer>) {
        *self.consumer.lock() = Some(Arc::downgrade(consumer));
    }

    /// Simulate a completed metadata refresh reaching the consumer
    pub fn notify(&self) {
        let consumer = self.consumer.lock().as_ref().and_then(Weak::upgrade);
        if let Some(consumer) = consumer {
            tokio::spawn(async move { consumer.on_metadata_update().await });
        }
    }

    fn kick(&self) {
        if self.auto_notify.load(Ordering::SeqCst) {
            self.notify();
        }
    }
}

impl MetadataView for TestMetadata {
    fn load_topics(&self) -> HashMap<String, Arc<TopicMeta>> {
        self.topics.lock().clone()
    }

    fn trigger_update(&self) {
        self.lazy_triggers.fetch_add(1, Ordering::SeqCst);
        self.kick();
    }

    fn trigger_update_now(&self) {
        self.now_triggers.fetch_add(1, Ordering::SeqCst);
        self.kick();
    }
}

// ============================================================================
// Group handlers
// ============================================================================

/// A group handler that does nothing; used when a test only needs the
/// consumer to have a kind.
pub struct NoopGroup;

impl GroupHandler for NoopGroup {
    fn find_new_assignments(&self, _topics: &HashMap<String, Arc<TopicMeta>>) {}
}

/// Records every `update_uncommitted` call (as the number of fetches in the
/// batch) and every `leave`.
#[derive(Default)]
pub struct RecordingGroup {
    pub uncommitted_calls: Mutex<Vec<usize>>,
    pub left: AtomicBool,
}

impl GroupHandler for RecordingGroup {
    fn find_new_assignments(&self, _topics: &HashMap<String, Arc<TopicMeta>>) {}

    fn leave(&self) {
        self.left.store(true, Ordering::SeqCst);
    }

    fn update_uncommitted(&self, fetches: &Fetches) {
        self.uncommitted_calls.lock().push(fetches.len());
    }
}

// ============================================================================
// Builders and helpers
// ============================================================================

/// A consumer bound to the fixture metadata, consuming as a no-op group
pub async fn new_consumer(metadata: &Arc<TestMetadata>, brokers: Arc<BrokerMap>) -> Arc<Consumer> {
    let consumer = Consumer::new(
        ConsumerConfig::default(),
        Arc::clone(metadata) as Arc<dyn MetadataView>,
        brokers,
    );
    metadata.bind(&consumer);
    consumer
        .init_group(Arc::new(NoopGroup))
        .await
        .expect("init_group on a fresh consumer");
    consumer
}

/// A single-partition assignment map
pub fn assignment(topic: &str, partition: i32, offset: Offset) -> Assignments {
    let mut assignments = Assignments::new();
    assignments
        .entry(topic.to_string())
        .or_default()
        .insert(partition, offset);
    assignments
}

fn topic_name(name: &str) -> TopicName {
    TopicName::from(StrBytes::from_string(name.to_string()))
}

/// A ListOffsets response from `(topic, partition, error_code, offset,
/// leader_epoch)` entries
pub fn list_response(parts: &[(&str, i32, i16, i64, i32)]) -> ListOffsetsResponse {
    let mut by_topic: HashMap<&str, Vec<ListOffsetsPartitionResponse>> = HashMap::new();
    for &(topic, partition, error_code, offset, leader_epoch) in parts {
        by_topic.entry(topic).or_default().push(
            ListOffsetsPartitionResponse::default()
                .with_partition_index(partition)
                .with_error_code(error_code)
                .with_timestamp(-1)
                .with_offset(offset)
                .with_leader_epoch(leader_epoch),
        );
    }
    ListOffsetsResponse::default().with_topics(
        by_topic
            .into_iter()
            .map(|(topic, partitions)| {
                ListOffsetsTopicResponse::default()
                    .with_name(topic_name(topic))
                    .with_partitions(partitions)
            })
            .collect(),
    )
}

/// A v0-style ListOffsets response: no modern offset, only the old-style
/// offsets array
pub fn list_response_old_style(topic: &str, partition: i32, old: &[i64]) -> ListOffsetsResponse {
    ListOffsetsResponse::default().with_topics(vec![ListOffsetsTopicResponse::default()
        .with_name(topic_name(topic))
        .with_partitions(vec![ListOffsetsPartitionResponse::default()
            .with_partition_index(partition)
            .with_error_code(0)
            .with_offset(0)
            .with_leader_epoch(-1)
            .with_old_style_offsets(old.to_vec())])])
}

/// An OffsetForLeaderEpoch response from `(topic, partition, error_code,
/// leader_epoch, end_offset)` entries
pub fn epoch_response(parts: &[(&str, i32, i16, i32, i64)]) -> OffsetForLeaderEpochResponse {
    let mut by_topic: HashMap<&str, Vec<EpochEndOffset>> = HashMap::new();
    for &(topic, partition, error_code, leader_epoch, end_offset) in parts {
        by_topic.entry(topic).or_default().push(
            EpochEndOffset::default()
                .with_partition(partition)
                .with_error_code(error_code)
                .with_leader_epoch(leader_epoch)
                .with_end_offset(end_offset),
        );
    }
    OffsetForLeaderEpochResponse::default().with_topics(
        by_topic
            .into_iter()
            .map(|(topic, partitions)| {
                OffsetForLeaderTopicResult::default()
                    .with_topic(topic_name(topic))
                    .with_partitions(partitions)
            })
            .collect(),
    )
}

/// Poll `predicate` until it holds, panicking after two seconds
pub async fn wait_until(what: &str, predicate: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !predicate() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
