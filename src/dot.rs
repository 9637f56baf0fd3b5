use std::collections::BTreeMap;

use log::warn;

/// Parent pointers reconstructed at traversal time.
///
/// XTAF records carry no `.`/`..` slots, so resolving `..` depends entirely
/// on this table. It is seeded with the root's self-mapping (cluster 1 to
/// itself) and grows whenever a live subdirectory entry is decoded. A
/// well-formed image has no directory cycles, so a plain map suffices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DotTable {
    cluster_bytes: u64,
    partition_size: u64,
    entries: BTreeMap<u32, u32>,
}

impl DotTable {
    pub fn new(cluster_bytes: u64, partition_size: u64) -> Self {
        DotTable { cluster_bytes, partition_size, entries: BTreeMap::new() }
    }

    /// Record `this` as a child of `parent`. With `check` set an existing
    /// mapping wins. Clusters lying past the partition are dropped, so a
    /// corrupted chain cannot plant pointers outside the image.
    pub fn insert(&mut self, this: u32, parent: u32, check: bool) {
        if check && self.entries.contains_key(&this) {
            return;
        }
        if self.cluster_bytes * this as u64 >= self.partition_size {
            warn!("skipped parent pointer for out-of-bounds cluster {this}");
            return;
        }
        self.entries.insert(this, parent);
    }

    pub fn lookup(&self, this: u32) -> Option<u32> {
        self.entries.get(&this).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.entries.iter().map(|(&this, &parent)| (this, parent))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
