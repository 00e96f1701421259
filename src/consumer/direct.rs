//! Direct (non-group) consumption: assignments derived from metadata

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use super::offset::Offset;
use super::Assignments;
use crate::config::ConsumerConfig;
use crate::error::{Result, WindlassError};
use crate::metadata::TopicMeta;

/// Derives assignments for a direct consumer by matching each metadata
/// refresh against the configured topic list and regex. Partitions already
/// handed out are remembered so every call returns only what is new.
#[derive(Debug)]
pub(crate) struct DirectConsumer {
    topics: HashSet<String>,
    re: Option<Regex>,
    start: Offset,
    using: HashMap<String, HashSet<i32>>,
}

impl DirectConsumer {
    pub(crate) fn new(cfg: &ConsumerConfig) -> Result<DirectConsumer> {
        let re = cfg
            .topic_regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| WindlassError::Config(format!("invalid topic regex: {e}")))?;
        Ok(DirectConsumer {
            topics: cfg.topics.iter().cloned().collect(),
            re,
            start: cfg.start_offset,
            using: HashMap::new(),
        })
    }

    fn matches(&self, topic: &str) -> bool {
        self.topics.contains(topic) || self.re.as_ref().is_some_and(|re| re.is_match(topic))
    }

    /// Partitions newly visible in `topics` that the subscription matches,
    /// each at the configured start offset.
    pub(crate) fn find_new_assignments(
        &mut self,
        topics: &HashMap<String, Arc<TopicMeta>>,
    ) -> Assignments {
        let mut new: Assignments = HashMap::new();
        for (topic, meta) in topics {
            if !self.matches(topic) {
                continue;
            }
            let used = self.using.entry(topic.clone()).or_default();
            for partition_meta in &meta.partitions {
                if used.insert(partition_meta.partition) {
                    new.entry(topic.clone())
                        .or_default()
                        .insert(partition_meta.partition, self.start);
                }
            }
        }
        if !new.is_empty() {
            debug!(topics = new.len(), "direct consumer found new assignments");
        }
        new
    }
}
