//! Broker handles and the transport seam the consumer core issues RPCs through
//!
//! The real connection layer (request multiplexing, SASL, version
//! negotiation) lives behind [`BrokerClient`]; the core only needs the two
//! request types of the offset-resolution pipeline. Errors coming out of the
//! transport are opaque and classified through
//! [`WindlassError::is_retriable`](crate::error::WindlassError::is_retriable).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kafka_protocol::messages::{
    ListOffsetsRequest, ListOffsetsResponse, OffsetForLeaderEpochRequest,
    OffsetForLeaderEpochResponse,
};
use parking_lot::{RwLock, RwLockReadGuard};

use crate::error::Result;
use crate::metadata::BrokerMeta;

/// Broker ids are all non-negative, and -1 signifies an unknown controller.
/// Seed brokers therefore start at `i32::MIN` so a client broker map can
/// never confuse a seed entry with a real node.
pub fn seed_node_id(seed: i32) -> i32 {
    i32::MIN + seed
}

/// Typed request/response transport to a single broker.
///
/// `list_offsets` and `offset_for_leader_epoch` send the request and await
/// the correlated response. Implementations own connection management,
/// correlation and throttling; cancellation is driven by the caller dropping
/// the future.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Issue a ListOffsets request and await its response
    async fn list_offsets(&self, req: ListOffsetsRequest) -> Result<ListOffsetsResponse>;

    /// Issue an OffsetForLeaderEpoch request and await its response
    async fn offset_for_leader_epoch(
        &self,
        req: OffsetForLeaderEpochRequest,
    ) -> Result<OffsetForLeaderEpochResponse>;
}

/// A broker the core can send requests to: metadata identity plus transport.
pub struct Broker {
    meta: BrokerMeta,
    client: Arc<dyn BrokerClient>,
}

impl Broker {
    /// Bind broker metadata to a transport
    pub fn new(meta: BrokerMeta, client: Arc<dyn BrokerClient>) -> Arc<Broker> {
        Arc::new(Broker { meta, client })
    }

    /// The broker's node id
    pub fn node_id(&self) -> i32 {
        self.meta.node_id
    }

    /// The broker's metadata identity
    pub fn meta(&self) -> &BrokerMeta {
        &self.meta
    }

    /// Issue a ListOffsets request through the transport
    pub async fn list_offsets(&self, req: ListOffsetsRequest) -> Result<ListOffsetsResponse> {
        self.client.list_offsets(req).await
    }

    /// Issue an OffsetForLeaderEpoch request through the transport
    pub async fn offset_for_leader_epoch(
        &self,
        req: OffsetForLeaderEpochRequest,
    ) -> Result<OffsetForLeaderEpochResponse> {
        self.client.offset_for_leader_epoch(req).await
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker").field("meta", &self.meta).finish()
    }
}

/// The set of known brokers, keyed by node id.
///
/// The metadata subsystem inserts and removes entries as cluster membership
/// changes; the consumer core takes a read guard while grouping offset loads
/// so the leader lookup and the send target agree.
#[derive(Default)]
pub struct BrokerMap {
    inner: RwLock<HashMap<i32, Arc<Broker>>>,
}

impl BrokerMap {
    /// An empty broker map
    pub fn new() -> Arc<BrokerMap> {
        Arc::new(BrokerMap::default())
    }

    /// Insert or replace a broker
    pub fn insert(&self, broker: Arc<Broker>) {
        self.inner.write().insert(broker.node_id(), broker);
    }

    /// Remove a broker by node id
    pub fn remove(&self, node_id: i32) {
        self.inner.write().remove(&node_id);
    }

    /// Look up a broker by node id
    pub fn get(&self, node_id: i32) -> Option<Arc<Broker>> {
        self.inner.read().get(&node_id).cloned()
    }

    /// The first seed broker, used as the fallback target for partitions
    /// whose leader is not yet known
    pub fn seed(&self) -> Option<Arc<Broker>> {
        self.get(seed_node_id(0))
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, HashMap<i32, Arc<Broker>>> {
        self.inner.read()
    }
}
