//! Fetch data model and the source surface the drain consumes
//!
//! Record decoding, decompression and the per-source fetch loop live outside
//! the consumer core; the core only moves completed [`Fetch`]es out of
//! [`Source`] buffers and into the user's poll call, and injects synthetic
//! error fetches so fatal per-partition conditions are observable even when
//! no records are involved.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::WindlassError;

/// A single record as handed to the user
#[derive(Debug, Clone, Default)]
pub struct Record {
    /// The record's offset within its partition
    pub offset: i64,
    /// Broker-assigned or producer-assigned timestamp, in milliseconds
    pub timestamp: i64,
    /// Record key, if present
    pub key: Option<Bytes>,
    /// Record value
    pub value: Bytes,
    /// Leader epoch of the batch this record came from, or -1
    pub leader_epoch: i32,
}

/// Records and/or an error for one partition inside a fetch
#[derive(Debug, Clone, Default)]
pub struct FetchPartition {
    /// Partition index
    pub partition: i32,
    /// Fatal or informational per-partition error, if any
    pub error: Option<WindlassError>,
    /// The partition's high watermark at fetch time
    pub high_watermark: i64,
    /// Records returned in broker order
    pub records: Vec<Record>,
}

/// All partitions fetched for one topic
#[derive(Debug, Clone, Default)]
pub struct FetchTopic {
    /// Topic name
    pub topic: String,
    /// Per-partition results
    pub partitions: Vec<FetchPartition>,
}

/// One completed fetch from one source
#[derive(Debug, Clone, Default)]
pub struct Fetch {
    /// Per-topic results
    pub topics: Vec<FetchTopic>,
}

impl Fetch {
    /// A synthetic fetch carrying only a partition error. Used to surface
    /// fatal conditions (data loss, authorization failures) through
    /// `poll_fetches` when no records are involved.
    pub fn error_fetch(topic: impl Into<String>, partition: i32, error: WindlassError) -> Fetch {
        Fetch {
            topics: vec![FetchTopic {
                topic: topic.into(),
                partitions: vec![FetchPartition {
                    partition,
                    error: Some(error),
                    ..FetchPartition::default()
                }],
            }],
        }
    }

    /// Whether the fetch carries neither records nor errors
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

/// A batch of fetches returned from one poll
#[derive(Debug, Clone, Default)]
pub struct Fetches(Vec<Fetch>);

impl Fetches {
    pub(crate) fn push(&mut self, fetch: Fetch) {
        if !fetch.is_empty() {
            self.0.push(fetch);
        }
    }

    /// Whether the poll produced anything at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of fetches in the batch
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The underlying fetches
    pub fn fetches(&self) -> &[Fetch] {
        &self.0
    }

    /// Iterate every record in the batch, in per-partition broker order
    pub fn records(&self) -> impl Iterator<Item = (&str, i32, &Record)> + '_ {
        self.0
            .iter()
            .flat_map(|f| f.topics.iter())
            .flat_map(|t| {
                t.partitions
                    .iter()
                    .map(move |p| (t.topic.as_str(), p))
            })
            .flat_map(|(topic, p)| p.records.iter().map(move |r| (topic, p.partition, r)))
    }

    /// Iterate every per-partition error in the batch.
    ///
    /// Always check these: a partition with a fatal error and no records is
    /// reported through an injected error fetch, and that is the only place
    /// the user will ever see it.
    pub fn errors(&self) -> impl Iterator<Item = (&str, i32, &WindlassError)> + '_ {
        self.0
            .iter()
            .flat_map(|f| f.topics.iter())
            .flat_map(|t| {
                t.partitions
                    .iter()
                    .map(move |p| (t.topic.as_str(), p))
            })
            .filter_map(|(topic, p)| p.error.as_ref().map(move |e| (topic, p.partition, e)))
    }
}

/// Broker fetch-session state (KIP-227) as tracked by a fetch loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceSession {
    /// Session id assigned by the broker, 0 when none
    pub id: i32,
    /// Session epoch, 0 when starting fresh
    pub epoch: i32,
}

/// One fetch source: the per-broker buffer the external fetch loop fills and
/// the consumer core drains.
///
/// The fetch loop itself is outside the core. It reads the current consumer
/// session on every iteration, buffers at most one completed fetch here, and
/// parks on [`Source::wait_resume`] when told there is nothing to do.
pub struct Source {
    node_id: i32,
    buffered: Mutex<Option<Fetch>>,
    session: Mutex<SourceSession>,
    resume: Notify,
}

impl Source {
    /// A source for the given broker
    pub fn new(node_id: i32) -> Arc<Source> {
        Arc::new(Source {
            node_id,
            buffered: Mutex::new(None),
            session: Mutex::new(SourceSession::default()),
            resume: Notify::new(),
        })
    }

    /// The broker this source fetches from
    pub fn node_id(&self) -> i32 {
        self.node_id
    }

    /// Store a completed fetch. Called by the fetch loop; the loop must not
    /// fetch again until the buffer is taken or discarded.
    pub fn buffer(&self, fetch: Fetch) {
        *self.buffered.lock() = Some(fetch);
    }

    /// Take the buffered fetch, leaving the buffer empty
    pub fn take_buffered(&self) -> Fetch {
        self.buffered.lock().take().unwrap_or_default()
    }

    /// Drop the buffered fetch without handing it to anyone
    pub fn discard_buffered(&self) {
        *self.buffered.lock() = None;
    }

    /// Whether a completed fetch is waiting in the buffer
    pub fn has_buffered(&self) -> bool {
        self.buffered.lock().is_some()
    }

    /// Poke the fetch loop to re-check whether it can fetch
    pub fn maybe_consume(&self) {
        self.resume.notify_one();
    }

    /// Park until [`Source::maybe_consume`] is called
    pub async fn wait_resume(&self) {
        self.resume.notified().await;
    }

    /// Record broker fetch-session state from a fetch response
    pub fn update_session(&self, session: SourceSession) {
        *self.session.lock() = session;
    }

    /// Forget all broker fetch-session state; the next fetch starts a fresh
    /// session. Called when the consumer session is stopped.
    pub fn reset_session(&self) {
        *self.session.lock() = SourceSession::default();
    }

    /// The current broker fetch-session state
    pub fn session(&self) -> SourceSession {
        *self.session.lock()
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("node_id", &self.node_id)
            .field("buffered", &self.has_buffered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KafkaErrorCode;

    #[test]
    fn test_error_fetch_shape() {
        let fetch = Fetch::error_fetch(
            "events",
            3,
            WindlassError::Broker(KafkaErrorCode::TopicAuthorizationFailed),
        );
        assert_eq!(fetch.topics.len(), 1);
        assert_eq!(fetch.topics[0].topic, "events");
        assert_eq!(fetch.topics[0].partitions[0].partition, 3);
        assert!(fetch.topics[0].partitions[0].error.is_some());
        assert!(fetch.topics[0].partitions[0].records.is_empty());
    }

    #[test]
    fn test_fetches_skips_empty() {
        let mut fetches = Fetches::default();
        fetches.push(Fetch::default());
        assert!(fetches.is_empty());

        fetches.push(Fetch::error_fetch("t", 0, WindlassError::BrokerDead));
        assert_eq!(fetches.len(), 1);
        let errors: Vec<_> = fetches.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "t");
    }

    #[test]
    fn test_source_buffer_lifecycle() {
        let source = Source::new(1);
        assert!(!source.has_buffered());

        source.buffer(Fetch::error_fetch("t", 0, WindlassError::BrokerDead));
        assert!(source.has_buffered());

        let taken = source.take_buffered();
        assert!(!taken.is_empty());
        assert!(!source.has_buffered());

        // Taking again yields an empty fetch rather than panicking.
        assert!(source.take_buffered().is_empty());
    }

    #[test]
    fn test_source_session_reset() {
        let source = Source::new(1);
        source.update_session(SourceSession { id: 77, epoch: 3 });
        assert_eq!(source.session().id, 77);

        source.reset_session();
        assert_eq!(source.session(), SourceSession::default());
    }
}
