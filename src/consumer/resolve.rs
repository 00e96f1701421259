//! Offset resolution: turning requested positions into concrete offsets
//!
//! One resolution cycle runs per session at a time. Callers coalesce their
//! load sets into the cycle's waiting set; the cycle waits for a metadata
//! update, groups the loads by the broker that should answer them, issues
//! ListOffsets and OffsetForLeaderEpoch requests in parallel, and applies
//! the results to cursors. Retriable failures re-enter the pipeline on the
//! next metadata update.

use std::collections::HashMap;
use std::sync::Arc;

use kafka_protocol::messages::list_offsets_request::{ListOffsetsPartition, ListOffsetsTopic};
use kafka_protocol::messages::offset_for_leader_epoch_request::{
    OffsetForLeaderPartition, OffsetForLeaderTopic,
};
use kafka_protocol::messages::{
    BrokerId, ListOffsetsRequest, OffsetForLeaderEpochRequest, TopicName,
};
use kafka_protocol::protocol::StrBytes;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::loads::{LoadKind, LoadSet, OffsetLoad, OffsetLoadMap};
use super::session::ConsumerSession;
use super::Consumer;
use crate::broker::{seed_node_id, Broker};
use crate::config::IsolationLevel;
use crate::error::{KafkaErrorCode, WindlassError};
use crate::metadata::{Cursor, CursorOffset};

/// The result of ListOffsets or OffsetForLeaderEpoch for one partition
pub(crate) struct LoadedOffset {
    pub(crate) topic: String,
    pub(crate) partition: i32,
    // Unset when the load errored before a cursor could be found.
    pub(crate) cursor: Option<Arc<Cursor>>,
    pub(crate) offset: i64,
    pub(crate) leader_epoch: i32,
    // A data-loss error here still carries a usable (truncated-safe) offset.
    pub(crate) err: Option<WindlassError>,
    // The original request, re-enqueued verbatim on retriable errors.
    pub(crate) request: OffsetLoad,
}

/// Results of one RPC against one broker
pub(crate) struct LoadedOffsets {
    pub(crate) kind: LoadKind,
    pub(crate) loaded: Vec<LoadedOffset>,
}

impl LoadedOffsets {
    fn new(kind: LoadKind) -> LoadedOffsets {
        LoadedOffsets {
            kind,
            loaded: Vec::new(),
        }
    }

    fn add(&mut self, loaded: LoadedOffset) {
        self.loaded.push(loaded);
    }

    fn add_all(&mut self, loaded: Vec<LoadedOffset>) {
        self.loaded.extend(loaded);
    }
}

impl Consumer {
    /// The resolution worker. Exactly one cycle owns a session's waiting
    /// set; concurrent invocations merge into it and return.
    pub(crate) async fn list_or_epoch(
        self: &Arc<Self>,
        session: &Arc<ConsumerSession>,
        waiting: LoadSet,
        immediate: bool,
    ) {
        let mut wakeup_rx = {
            let mut loads = session.loads.lock();
            if !loads.waiting.is_empty() {
                loads.waiting.merge_from(waiting);
                return;
            }
            loads.waiting = waiting;
            let (tx, rx) = mpsc::channel(1);
            loads.wakeup = Some(tx);
            rx
        };

        // The wakeup slot exists before the update can land, so the refresh
        // that answers this trigger cannot be missed.
        if immediate {
            self.metadata.trigger_update_now();
        } else {
            self.metadata.trigger_update();
        }

        tokio::select! {
            _ = session.cancel_token().cancelled() => return,
            _ = wakeup_rx.recv() => {}
        }

        let loading = {
            let mut loads = session.loads.lock();
            let waiting = std::mem::take(&mut loads.waiting);
            loads.loading.merge_from(waiting.clone());
            loads.wakeup = None;
            waiting
        };

        let broker_loads = self.map_loads_to_brokers(loading);
        // Each broker can receive up to two requests.
        let (tx, mut results) = mpsc::channel::<LoadedOffsets>((2 * broker_loads.len()).max(1));

        let mut issued = 0;
        for (broker, load) in broker_loads {
            debug!(
                broker = broker.node_id(),
                lists = load.list.values().map(HashMap::len).sum::<usize>(),
                epochs = load.epoch.values().map(HashMap::len).sum::<usize>(),
                "issuing offset loads"
            );
            if !load.list.is_empty() {
                issued += 1;
                let consumer = Arc::clone(self);
                let broker = Arc::clone(&broker);
                let load_map = load.list;
                let tx = tx.clone();
                let cancel = session.cancel_token().clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        loaded = consumer.list_offsets_for_broker(&broker, load_map) => {
                            let _ = tx.send(loaded).await;
                        }
                    }
                });
            }
            if !load.epoch.is_empty() {
                issued += 1;
                let consumer = Arc::clone(self);
                let broker = Arc::clone(&broker);
                let load_map = load.epoch;
                let tx = tx.clone();
                let cancel = session.cancel_token().clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        loaded = consumer.load_epochs_for_broker(&broker, load_map) => {
                            let _ = tx.send(loaded).await;
                        }
                    }
                });
            }
        }
        drop(tx);

        let mut received = 0;
        while received < issued {
            tokio::select! {
                // A cancelled session leaves `loading` where it is; the
                // session stop re-homes it into the next era's waiting set.
                _ = session.cancel_token().cancelled() => return,
                loaded = results.recv() => {
                    let Some(loaded) = loaded else { break };
                    received += 1;
                    self.handle_load_results(session, loaded);
                }
            }
        }
    }

    /// Split loads into per-broker sets, targeting each partition's leader
    /// (or requested follower) and stamping the latest leader epoch from
    /// metadata. Partitions without a known broker fall back to a seed.
    fn map_loads_to_brokers(&self, loads: LoadSet) -> Vec<(Arc<Broker>, LoadSet)> {
        let topics = self.metadata.load_topics();
        let brokers = self.brokers.read();
        let seed = brokers.get(&seed_node_id(0)).cloned();

        let mut grouped: HashMap<i32, (Arc<Broker>, LoadSet)> = HashMap::new();
        for (kind, map) in [(LoadKind::List, loads.list), (LoadKind::Epoch, loads.epoch)] {
            for (topic, partitions) in map {
                let topic_meta = topics.get(&topic);
                for (partition, mut load) in partitions {
                    let mut broker = seed.clone();
                    if let Some(partition_meta) =
                        topic_meta.and_then(|t| t.partition(partition))
                    {
                        // Listing against a follower is legal when the
                        // cursor fetches from that follower.
                        let node = if load.replica != -1 {
                            load.replica
                        } else {
                            partition_meta.leader
                        };
                        if let Some(known) = brokers.get(&node) {
                            broker = Some(Arc::clone(known));
                        }
                        load.offset.current_epoch = partition_meta.leader_epoch;
                    }
                    let Some(broker) = broker else {
                        warn!(topic = %topic, partition, "no broker available for offset load");
                        continue;
                    };
                    let node_id = broker.node_id();
                    grouped
                        .entry(node_id)
                        .or_insert_with(|| (broker, LoadSet::default()))
                        .1
                        .add_load(&topic, partition, kind, load);
                }
            }
        }
        grouped.into_values().collect()
    }

    /// Apply one broker's results: move cursors and make them usable,
    /// surface data loss, queue retriable failures for the next cycle.
    fn handle_load_results(
        self: &Arc<Self>,
        session: &Arc<ConsumerSession>,
        loaded: LoadedOffsets,
    ) {
        let mut reloads = LoadSet::default();
        for load in &loaded.loaded {
            match &load.err {
                None => self.apply_loaded(load),
                Some(err @ WindlassError::DataLoss { .. }) => {
                    warn!(
                        topic = %load.topic,
                        partition = load.partition,
                        error = %err,
                        "data loss detected while resolving offset"
                    );
                    // The user sees the loss once; the cursor still resumes
                    // from the truncated-safe offset.
                    self.add_fake_fetch(&load.topic, load.partition, err.clone());
                    self.apply_loaded(load);
                }
                Some(err) if err.is_retriable() => {
                    trace!(
                        topic = %load.topic,
                        partition = load.partition,
                        error = %err,
                        "retriable offset load error"
                    );
                    reloads.add_load(&load.topic, load.partition, loaded.kind, load.request);
                }
                Some(err) => {
                    self.add_fake_fetch(&load.topic, load.partition, err.clone());
                }
            }
        }

        {
            let mut loads = session.loads.lock();
            for load in &loaded.loaded {
                loads.loading.remove_load(&load.topic, load.partition);
            }
        }

        self.load_with_session(session, reloads, false);
    }

    fn apply_loaded(&self, load: &LoadedOffset) {
        let Some(cursor) = &load.cursor else {
            warn!(
                topic = %load.topic,
                partition = load.partition,
                "resolved an offset for a partition with no cursor"
            );
            return;
        };
        trace!(
            topic = %load.topic,
            partition = load.partition,
            offset = load.offset,
            leader_epoch = load.leader_epoch,
            "offset resolved"
        );
        cursor.set_offset(CursorOffset {
            offset: load.offset,
            last_consumed_epoch: load.leader_epoch,
        });
        cursor.allow_usable();
        self.use_cursor(Arc::clone(cursor));
    }

    async fn list_offsets_for_broker(
        &self,
        broker: &Broker,
        mut load: OffsetLoadMap,
    ) -> LoadedOffsets {
        let mut loaded = LoadedOffsets::new(LoadKind::List);

        let req = build_list_request(&load, self.cfg.isolation_level);
        let resp = match broker.list_offsets(req).await {
            Ok(resp) => resp,
            Err(err) => {
                loaded.add_all(errs_to_loaded(&load, err));
                return loaded;
            }
        };

        let topics = self.metadata.load_topics();
        for resp_topic in &resp.topics {
            let topic = resp_topic.name.as_str();
            let Some(load_parts) = load.get_mut(topic) else {
                continue; // replied with something we did not ask for
            };
            for resp_partition in &resp_topic.partitions {
                let partition = resp_partition.partition_index;
                let Some(&load_part) = load_parts.get(&partition) else {
                    continue;
                };

                if let Some(err) = WindlassError::from_code(resp_partition.error_code) {
                    load_parts.remove(&partition);
                    loaded.add(LoadedOffset {
                        topic: topic.to_string(),
                        partition,
                        cursor: None,
                        offset: -1,
                        leader_epoch: -1,
                        err: Some(err),
                        request: load_part,
                    });
                    continue;
                }

                // A partition metadata has not seen stays in the load map
                // and is reported unknown below.
                let Some(cursor) = topics
                    .get(topic)
                    .and_then(|t| t.partition(partition))
                    .map(|p| Arc::clone(&p.cursor))
                else {
                    continue;
                };
                load_parts.remove(&partition);

                let mut offset = if resp_partition.offset != 0 {
                    resp_partition.offset
                } else if let Some(&old) = resp_partition.old_style_offsets.first() {
                    // v0 fallback
                    old
                } else {
                    resp_partition.offset
                };
                offset += load_part.offset.relative;
                if load_part.offset.at >= 0 {
                    // Exact requests obey the user even past the end; the
                    // RPC only forced broker-side partition loading.
                    offset = load_part.offset.at + load_part.offset.relative;
                }
                offset = offset.max(0);

                loaded.add(LoadedOffset {
                    topic: topic.to_string(),
                    partition,
                    cursor: Some(cursor),
                    offset,
                    leader_epoch: resp_partition.leader_epoch,
                    err: None,
                    request: load_part,
                });
            }
        }

        prune_empty_topics(&mut load);
        loaded.add_all(errs_to_loaded(
            &load,
            WindlassError::Broker(KafkaErrorCode::UnknownTopicOrPartition),
        ));
        loaded
    }

    async fn load_epochs_for_broker(
        &self,
        broker: &Broker,
        mut load: OffsetLoadMap,
    ) -> LoadedOffsets {
        let mut loaded = LoadedOffsets::new(LoadKind::Epoch);

        let req = build_epoch_request(&load);
        let resp = match broker.offset_for_leader_epoch(req).await {
            Ok(resp) => resp,
            Err(err) => {
                loaded.add_all(errs_to_loaded(&load, err));
                return loaded;
            }
        };

        let topics = self.metadata.load_topics();
        for resp_topic in &resp.topics {
            let topic = resp_topic.topic.as_str();
            let Some(load_parts) = load.get_mut(topic) else {
                continue; // replied with something we did not ask for
            };
            for end in &resp_topic.partitions {
                let partition = end.partition;
                let Some(&load_part) = load_parts.get(&partition) else {
                    continue;
                };

                if let Some(err) = WindlassError::from_code(end.error_code) {
                    load_parts.remove(&partition);
                    loaded.add(LoadedOffset {
                        topic: topic.to_string(),
                        partition,
                        cursor: None,
                        offset: -1,
                        leader_epoch: -1,
                        err: Some(err),
                        request: load_part,
                    });
                    continue;
                }

                let Some(cursor) = topics
                    .get(topic)
                    .and_then(|t| t.partition(partition))
                    .map(|p| Arc::clone(&p.cursor))
                else {
                    continue;
                };
                load_parts.remove(&partition);

                // The broker's end offset for the requested epoch below the
                // requested offset means the log was truncated; resume from
                // the end offset and say so.
                let mut offset = load_part.offset.at;
                let mut err = None;
                if end.end_offset < offset {
                    err = Some(WindlassError::DataLoss {
                        topic: topic.to_string(),
                        partition,
                        requested: load_part.offset.at,
                        end_offset: end.end_offset,
                    });
                    offset = end.end_offset;
                }

                loaded.add(LoadedOffset {
                    topic: topic.to_string(),
                    partition,
                    cursor: Some(cursor),
                    offset,
                    leader_epoch: end.leader_epoch,
                    err,
                    request: load_part,
                });
            }
        }

        prune_empty_topics(&mut load);
        loaded.add_all(errs_to_loaded(
            &load,
            WindlassError::Broker(KafkaErrorCode::UnknownTopicOrPartition),
        ));
        loaded
    }
}

fn build_list_request(load: &OffsetLoadMap, isolation: IsolationLevel) -> ListOffsetsRequest {
    let mut topics = Vec::with_capacity(load.len());
    for (topic, partitions) in load {
        let mut parts = Vec::with_capacity(partitions.len());
        for (&partition, load) in partitions {
            // Exact requests still list, with the end sentinel, purely to
            // force broker-side partition loading; the response offset is
            // discarded in favor of the exact position.
            let timestamp = if load.offset.at >= 0 { -1 } else { load.offset.at };
            trace!(partition, timestamp, "list offsets partition");
            parts.push(
                ListOffsetsPartition::default()
                    .with_partition_index(partition)
                    .with_current_leader_epoch(load.offset.current_epoch)
                    .with_timestamp(timestamp)
                    .with_max_num_offsets(1),
            );
        }
        topics.push(
            ListOffsetsTopic::default()
                .with_name(TopicName::from(StrBytes::from_string(topic.clone())))
                .with_partitions(parts),
        );
    }
    ListOffsetsRequest::default()
        .with_replica_id(BrokerId(-1))
        .with_isolation_level(isolation.as_i8())
        .with_topics(topics)
}

fn build_epoch_request(load: &OffsetLoadMap) -> OffsetForLeaderEpochRequest {
    let mut topics = Vec::with_capacity(load.len());
    for (topic, partitions) in load {
        let mut parts = Vec::with_capacity(partitions.len());
        for (&partition, load) in partitions {
            parts.push(
                OffsetForLeaderPartition::default()
                    .with_partition(partition)
                    .with_current_leader_epoch(load.offset.current_epoch)
                    .with_leader_epoch(load.offset.epoch),
            );
        }
        topics.push(
            OffsetForLeaderTopic::default()
                .with_topic(TopicName::from(StrBytes::from_string(topic.clone())))
                .with_partitions(parts),
        );
    }
    OffsetForLeaderEpochRequest::default()
        .with_replica_id(BrokerId(-1))
        .with_topics(topics)
}

/// Fan one failure out to every partition in the batch
fn errs_to_loaded(load: &OffsetLoadMap, err: WindlassError) -> Vec<LoadedOffset> {
    let mut out = Vec::new();
    for (topic, partitions) in load {
        for (&partition, &request) in partitions {
            out.push(LoadedOffset {
                topic: topic.clone(),
                partition,
                cursor: None,
                offset: -1,
                leader_epoch: -1,
                err: Some(err.clone()),
                request,
            });
        }
    }
    out
}

fn prune_empty_topics(load: &mut OffsetLoadMap) {
    load.retain(|_, partitions| !partitions.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::Offset;

    fn load_map(entries: &[(&str, i32, Offset)]) -> OffsetLoadMap {
        let mut map = OffsetLoadMap::new();
        for (topic, partition, offset) in entries {
            map.entry(topic.to_string()).or_default().insert(
                *partition,
                OffsetLoad {
                    replica: -1,
                    offset: *offset,
                },
            );
        }
        map
    }

    #[test]
    fn test_list_request_shape() {
        let map = load_map(&[("t", 0, Offset::new().at_start())]);
        let req = build_list_request(&map, IsolationLevel::ReadCommitted);

        assert_eq!(req.replica_id, BrokerId(-1));
        assert_eq!(req.isolation_level, 1);
        assert_eq!(req.topics.len(), 1);
        let part = &req.topics[0].partitions[0];
        assert_eq!(part.partition_index, 0);
        assert_eq!(part.timestamp, -2);
        assert_eq!(part.max_num_offsets, 1);
    }

    #[test]
    fn test_list_request_exact_uses_end_sentinel() {
        let map = load_map(&[("t", 0, Offset::new().at(500))]);
        let req = build_list_request(&map, IsolationLevel::ReadUncommitted);
        assert_eq!(req.topics[0].partitions[0].timestamp, -1);
    }

    #[test]
    fn test_epoch_request_carries_both_epochs() {
        let mut offset = Offset::new().at(1000).with_epoch(4);
        offset.current_epoch = 9;
        let map = load_map(&[("t", 2, offset)]);
        let req = build_epoch_request(&map);

        assert_eq!(req.replica_id, BrokerId(-1));
        let part = &req.topics[0].partitions[0];
        assert_eq!(part.partition, 2);
        assert_eq!(part.current_leader_epoch, 9);
        assert_eq!(part.leader_epoch, 4);
    }

    #[test]
    fn test_errs_to_loaded_covers_every_partition() {
        let map = load_map(&[
            ("t", 0, Offset::new()),
            ("t", 1, Offset::new()),
            ("u", 0, Offset::new()),
        ]);
        let loaded = errs_to_loaded(&map, WindlassError::BrokerDead);
        assert_eq!(loaded.len(), 3);
        assert!(loaded.iter().all(|l| l.err == Some(WindlassError::BrokerDead)));
    }
}
