//! # Windlass
//!
//! Windlass is the consumer core of a client for Kafka-compatible brokers.
//! It owns the hard part of consuming from a distributed, partitioned,
//! replicated commit log: translating user-level partition assignments into
//! a live set of per-partition cursors, resolving requested positions
//! (start/end/exact/epoch-qualified) into concrete offsets against the
//! right brokers, and merging records buffered by many fetch sources into
//! one blocking poll call, all while assignments, broker leadership, and
//! group membership shift underneath it.
//!
//! ## What lives here
//!
//! - [`consumer`]: sessions, the assignment engine, offset resolution, and
//!   the fetch drain
//! - [`broker`]: broker handles and the typed transport seam RPCs go
//!   through
//! - [`metadata`]: the read-only cluster-metadata view and per-partition
//!   cursors
//! - [`fetch`]: the fetch data model and the source buffers the drain
//!   consumes
//! - [`config`], [`error`]: configuration and error types
//!
//! ## What deliberately does not
//!
//! The real connection layer (multiplexing, SASL, version negotiation),
//! metadata refresh, the group rebalance protocol, and record decoding are
//! collaborators behind narrow traits ([`BrokerClient`], [`MetadataView`],
//! [`GroupHandler`]); windlass orchestrates them and nothing more.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use windlass::{AssignMode, Assignments, Consumer, ConsumerConfig, Offset};
//! # async fn example(metadata: Arc<dyn windlass::MetadataView>, brokers: Arc<windlass::BrokerMap>) {
//!
//! let consumer = Consumer::new(ConsumerConfig::default(), metadata, brokers);
//!
//! // Consume partition 0 of "events" from 100 records before the end:
//! let mut assignments = Assignments::new();
//! assignments
//!     .entry("events".to_string())
//!     .or_default()
//!     .insert(0, Offset::new().at_end().relative(-100));
//! consumer.assign_partitions(&assignments, AssignMode::Additive).await;
//!
//! let ctx = CancellationToken::new();
//! let fetches = consumer.poll_fetches(&ctx).await;
//! for (topic, partition, record) in fetches.records() {
//!     println!("{topic}[{partition}] @{}: {:?}", record.offset, record.value);
//! }
//! // Fatal partition errors arrive as injected error fetches; always look.
//! for (topic, partition, error) in fetches.errors() {
//!     eprintln!("{topic}[{partition}]: {error}");
//! }
//! # }
//! ```

// Deny .unwrap() in production code; a consumer core has no business
// panicking on a broker's bad day. Test code is exempt.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![warn(clippy::expect_used)]

pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod fetch;
pub mod metadata;

pub use broker::{seed_node_id, Broker, BrokerClient, BrokerMap};
pub use config::{ConsumerConfig, IsolationLevel};
pub use consumer::{AssignMode, Assignments, Consumer, GroupHandler, Offset};
pub use error::{KafkaErrorCode, Result, WindlassError};
pub use fetch::{Fetch, FetchPartition, FetchTopic, Fetches, Record, Source, SourceSession};
pub use metadata::{BrokerMeta, Cursor, CursorOffset, MetadataView, PartitionMeta, TopicMeta};
