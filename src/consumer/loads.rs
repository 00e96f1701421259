//! Pending offset-resolution work, split by the RPC that resolves it

use std::collections::HashMap;

use super::offset::Offset;

/// An offset to load plus the replica to load it against. A replica of `-1`
/// targets the partition leader; anything else targets a specific follower
/// (set when a cursor had a preferred replica).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OffsetLoad {
    pub(crate) replica: i32,
    pub(crate) offset: Offset,
}

pub(crate) type OffsetLoadMap = HashMap<String, HashMap<i32, OffsetLoad>>;

/// Which RPC resolves a pending load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadKind {
    /// ListOffsets: timestamp sentinel (or exact position) to offset
    List,
    /// OffsetForLeaderEpoch: epoch to end offset, with truncation detection
    Epoch,
}

/// Pending list and epoch loads, keyed by (topic, partition).
///
/// A given partition appears in at most one of the two sub-maps; `add_load`
/// enforces this by removing any prior entry first. Empty per-topic maps are
/// pruned so iteration stays cheap.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoadSet {
    pub(crate) list: OffsetLoadMap,
    pub(crate) epoch: OffsetLoadMap,
}

impl LoadSet {
    /// Queue an offset to be loaded, ensuring it exists only under the final
    /// load kind.
    pub(crate) fn add_load(&mut self, topic: &str, partition: i32, kind: LoadKind, load: OffsetLoad) {
        self.remove_load(topic, partition);
        let dst = match kind {
            LoadKind::List => &mut self.list,
            LoadKind::Epoch => &mut self.epoch,
        };
        dst.entry(topic.to_string())
            .or_default()
            .insert(partition, load);
    }

    /// Remove a pending load from both sub-maps
    pub(crate) fn remove_load(&mut self, topic: &str, partition: i32) {
        for map in [&mut self.list, &mut self.epoch] {
            if let Some(partitions) = map.get_mut(topic) {
                partitions.remove(&partition);
                if partitions.is_empty() {
                    map.remove(topic);
                }
            }
        }
    }

    /// Merge `src` into the caller, preserving each entry's load kind.
    /// Used to coalesce loads while a metadata update is in flight and to
    /// re-home in-flight loads when a session stops.
    pub(crate) fn merge_from(&mut self, src: LoadSet) {
        for (kind, map) in [(LoadKind::List, src.list), (LoadKind::Epoch, src.epoch)] {
            for (topic, partitions) in map {
                for (partition, load) in partitions {
                    self.add_load(&topic, partition, kind, load);
                }
            }
        }
    }

    /// Retain only the entries `keep` returns true for
    pub(crate) fn filter(&mut self, keep: impl Fn(&str, i32) -> bool) {
        for map in [&mut self.list, &mut self.epoch] {
            map.retain(|topic, partitions| {
                partitions.retain(|&partition, _| keep(topic, partition));
                !partitions.is_empty()
            });
        }
    }

    /// Visit every pending load
    pub(crate) fn each(&self, mut f: impl FnMut(&str, i32, LoadKind, &OffsetLoad)) {
        for (kind, map) in [(LoadKind::List, &self.list), (LoadKind::Epoch, &self.epoch)] {
            for (topic, partitions) in map {
                for (partition, load) in partitions {
                    f(topic, *partition, kind, load);
                }
            }
        }
    }

    /// The load kind a partition is pending under, if any
    #[cfg(test)]
    pub(crate) fn kind_of(&self, topic: &str, partition: i32) -> Option<LoadKind> {
        if self.list.get(topic).is_some_and(|p| p.contains_key(&partition)) {
            return Some(LoadKind::List);
        }
        if self.epoch.get(topic).is_some_and(|p| p.contains_key(&partition)) {
            return Some(LoadKind::Epoch);
        }
        None
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.list.is_empty() && self.epoch.is_empty()
    }

    /// Total pending partitions across both kinds
    pub(crate) fn partition_count(&self) -> usize {
        self.list.values().map(HashMap::len).sum::<usize>()
            + self.epoch.values().map(HashMap::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(at: i64) -> OffsetLoad {
        OffsetLoad {
            replica: -1,
            offset: Offset::new().at(at),
        }
    }

    #[test]
    fn test_add_load_is_disjoint_across_kinds() {
        let mut set = LoadSet::default();
        set.add_load("t", 0, LoadKind::List, load(1));
        set.add_load("t", 0, LoadKind::Epoch, load(2));

        assert_eq!(set.kind_of("t", 0), Some(LoadKind::Epoch));
        assert_eq!(set.partition_count(), 1);
        assert!(set.list.is_empty(), "list entry must be replaced");
    }

    #[test]
    fn test_remove_load_prunes_empty_topics() {
        let mut set = LoadSet::default();
        set.add_load("t", 0, LoadKind::List, load(1));
        set.add_load("t", 1, LoadKind::List, load(1));

        set.remove_load("t", 0);
        assert_eq!(set.partition_count(), 1);

        set.remove_load("t", 1);
        assert!(set.is_empty());
        assert!(!set.list.contains_key("t"));
    }

    #[test]
    fn test_merge_preserves_kind() {
        let mut dst = LoadSet::default();
        dst.add_load("a", 0, LoadKind::List, load(1));

        let mut src = LoadSet::default();
        src.add_load("a", 0, LoadKind::Epoch, load(2));
        src.add_load("b", 3, LoadKind::List, load(3));

        dst.merge_from(src);
        assert_eq!(dst.kind_of("a", 0), Some(LoadKind::Epoch));
        assert_eq!(dst.kind_of("b", 3), Some(LoadKind::List));
        assert_eq!(dst.partition_count(), 2);
    }

    #[test]
    fn test_filter_retains_matching() {
        let mut set = LoadSet::default();
        set.add_load("t", 0, LoadKind::List, load(1));
        set.add_load("t", 1, LoadKind::Epoch, load(1));
        set.add_load("u", 0, LoadKind::List, load(1));

        set.filter(|topic, partition| topic == "t" && partition == 1);
        assert_eq!(set.partition_count(), 1);
        assert_eq!(set.kind_of("t", 1), Some(LoadKind::Epoch));
        assert!(set.list.is_empty());
    }

    #[test]
    fn test_each_visits_everything() {
        let mut set = LoadSet::default();
        set.add_load("t", 0, LoadKind::List, load(1));
        set.add_load("u", 5, LoadKind::Epoch, load(2));

        let mut seen = Vec::new();
        set.each(|topic, partition, kind, _| {
            seen.push((topic.to_string(), partition, kind == LoadKind::List))
        });
        seen.sort();
        assert_eq!(
            seen,
            vec![("t".to_string(), 0, true), ("u".to_string(), 5, false)]
        );
    }
}
