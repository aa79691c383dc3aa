//! Splitting a tablet into two halves at its median row key.
//!
//! The parent's live data is flushed, every SSTable is read back and merged
//! by key, and the distinct keys are partitioned around the median. Each row
//! is replayed into the receiving child as an ordinary mutation, so both
//! children end up with full commit-log recovery state of their own. The
//! parent is left serving; decommissioning it is the coordinator's job.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::compaction::merge_row;
use crate::config::TabletConfig;
use crate::error::Result;
use crate::model::{Row, RowMutation};
use crate::sstable;
use crate::Error;

use super::Tablet;

impl Tablet {
    /// Splits this tablet into `(left, right)` children at the median row
    /// key, provided its size estimate is at least `threshold_bytes` and it
    /// holds at least two distinct row keys.
    ///
    /// The children own `[start_key, split_key)` and `[split_key, end_key)`
    /// in fresh sibling directories of the parent's.
    pub fn split(&self, threshold_bytes: u64) -> Result<(Tablet, Tablet)> {
        let mut inner = self.inner.write()?;

        let size = inner.size_bytes();
        if size < threshold_bytes {
            return Err(Error::BelowThreshold {
                size,
                threshold: threshold_bytes,
            });
        }

        // Materialize everything on disk so the SSTables are the one source
        // of truth for the partition.
        self.flush_locked(&mut inner)?;

        let mut merged: BTreeMap<String, Row> = BTreeMap::new();
        for sst in &inner.sstables {
            for row in sstable::read_rows(&sst.path)? {
                match merged.entry(row.key.clone()) {
                    Entry::Vacant(entry) => {
                        entry.insert(row);
                    }
                    Entry::Occupied(mut entry) => merge_row(entry.get_mut(), row),
                }
            }
        }
        if merged.len() < 2 {
            return Err(Error::NotEnoughRows);
        }

        let keys: Vec<&String> = merged.keys().collect();
        let split_key = keys[keys.len() / 2].clone();

        let (left_dir, right_dir) = child_dirs(&self.config.dir);
        for dir in [&left_dir, &right_dir] {
            if dir.exists() {
                return Err(Error::Io(format!(
                    "split target directory already exists: {}",
                    dir.display()
                )));
            }
        }

        let left = Tablet::open_with_config(
            TabletConfig::new(left_dir)
                .range(self.config.start_key.clone(), split_key.clone())
                .wal_sync(self.config.wal_sync),
        )?;
        let right = Tablet::open_with_config(
            TabletConfig::new(right_dir)
                .range(split_key.clone(), self.config.end_key.clone())
                .wal_sync(self.config.wal_sync),
        )?;

        // Route each row through the child's normal write path so its commit
        // log captures the data for recovery.
        for (key, row) in &merged {
            let mutation = row_to_mutation(row);
            if key < &split_key {
                left.mutate(&mutation)?;
            } else {
                right.mutate(&mutation)?;
            }
        }

        tracing::info!(
            split_key = %split_key,
            rows = merged.len(),
            left = %left.dir().display(),
            right = %right.dir().display(),
            "split tablet"
        );
        Ok((left, right))
    }
}

/// Sibling directories for the two children of a splitting tablet.
fn child_dirs(dir: &Path) -> (PathBuf, PathBuf) {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tablet".to_string());
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    (
        parent.join(format!("{name}-left")),
        parent.join(format!("{name}-right")),
    )
}

/// Rebuilds a mutation equivalent to the row's current state: one set per
/// stored version, columns in key order, versions in stored order.
fn row_to_mutation(row: &Row) -> RowMutation {
    let mut mutation = RowMutation::new(row.key.clone());
    for column in row.columns.values() {
        for version in &column.versions {
            mutation = mutation.set(
                column.family.clone(),
                column.qualifier.clone(),
                version.timestamp,
                version.value.clone(),
            );
        }
    }
    mutation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    fn set(key: &str, timestamp: i64, value: &[u8]) -> RowMutation {
        RowMutation::new(key).set("cf", "q1", timestamp, value.to_vec())
    }

    #[test]
    fn test_split_at_median_key() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tablet = Tablet::open("", "", temp_dir.path().join("t1")).expect("open failed");

        for i in 0..10i64 {
            tablet
                .mutate(&set(&format!("k{i:02}"), i + 1, b"v"))
                .expect("mutate failed");
        }

        let (left, right) = tablet.split(1).expect("split failed");
        assert_eq!(left.start_key(), "");
        assert_eq!(left.end_key(), "k05");
        assert_eq!(right.start_key(), "k05");
        assert_eq!(right.end_key(), "");

        // Each child serves exactly its half.
        let version = left
            .read("k02", "cf", "q1")
            .expect("read failed")
            .expect("cell missing");
        assert_eq!(version.value, b"v");
        assert!(matches!(
            right.read("k02", "cf", "q1"),
            Err(Error::OutOfRange { .. })
        ));

        let version = right
            .read("k07", "cf", "q1")
            .expect("read failed")
            .expect("cell missing");
        assert_eq!(version.value, b"v");
        assert!(matches!(
            left.read("k07", "cf", "q1"),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_split_partitions_key_space() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tablet = Tablet::open("a", "z", temp_dir.path().join("t1")).expect("open failed");

        for key in ["b", "d", "f", "h"] {
            tablet.mutate(&set(key, 1, b"v")).expect("mutate failed");
        }

        let (left, right) = tablet.split(1).expect("split failed");
        for key in ["a", "b", "cc", "f", "h", "y"] {
            assert_ne!(
                left.in_range(key),
                right.in_range(key),
                "key {key:?} not owned by exactly one child"
            );
        }
    }

    #[test]
    fn test_split_preserves_visibility() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tablet = Tablet::open("", "", temp_dir.path().join("t1")).expect("open failed");

        // Spread data across an SSTable and the memtable, with one key
        // updated in both.
        for i in 0..6i64 {
            tablet
                .mutate(&set(&format!("k{i:02}"), 100, b"v1"))
                .expect("mutate failed");
        }
        tablet.flush().expect("flush failed");
        tablet.mutate(&set("k03", 200, b"v2")).expect("mutate failed");

        let (left, right) = tablet.split(1).expect("split failed");
        for i in 0..6 {
            let key = format!("k{i:02}");
            let child = if left.in_range(&key) { &left } else { &right };
            let version = child
                .read(&key, "cf", "q1")
                .expect("read failed")
                .expect("cell missing");
            if key == "k03" {
                assert_eq!(version.timestamp, 200);
                assert_eq!(version.value, b"v2");
            } else {
                assert_eq!(version.timestamp, 100);
                assert_eq!(version.value, b"v1");
            }
        }
    }

    #[test]
    fn test_split_children_recover_from_their_wals() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tablet = Tablet::open("", "", temp_dir.path().join("t1")).expect("open failed");

        for i in 0..4i64 {
            tablet
                .mutate(&set(&format!("k{i:02}"), i + 1, b"v"))
                .expect("mutate failed");
        }

        let (left, right) = tablet.split(1).expect("split failed");
        let (left_dir, right_dir) = (left.dir().to_path_buf(), right.dir().to_path_buf());
        left.close().expect("close failed");
        right.close().expect("close failed");

        // Children never flushed; their commit logs must carry the data.
        let left = Tablet::open_dir(&left_dir).expect("reopen failed");
        let right = Tablet::open_dir(&right_dir).expect("reopen failed");
        assert!(left.read("k00", "cf", "q1").unwrap().is_some());
        assert!(right.read("k03", "cf", "q1").unwrap().is_some());
    }

    #[test]
    fn test_split_below_threshold() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tablet = Tablet::open("", "", temp_dir.path().join("t1")).expect("open failed");

        tablet.mutate(&set("k1", 1, b"v")).expect("mutate failed");
        let result = tablet.split(1 << 30);
        assert!(matches!(result, Err(Error::BelowThreshold { .. })));
    }

    #[test]
    fn test_split_not_enough_rows() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tablet = Tablet::open("", "", temp_dir.path().join("t1")).expect("open failed");

        // Two mutations, one distinct key.
        tablet.mutate(&set("k1", 1, b"v1")).expect("mutate failed");
        tablet.mutate(&set("k1", 2, b"v2")).expect("mutate failed");

        let result = tablet.split(1);
        assert!(matches!(result, Err(Error::NotEnoughRows)));
    }

    #[test]
    fn test_parent_keeps_serving_after_split() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tablet = Tablet::open("", "", temp_dir.path().join("t1")).expect("open failed");

        for i in 0..4i64 {
            tablet
                .mutate(&set(&format!("k{i:02}"), i + 1, b"v"))
                .expect("mutate failed");
        }

        let _children = tablet.split(1).expect("split failed");
        assert!(tablet.read("k00", "cf", "q1").unwrap().is_some());
    }

    #[test]
    fn test_row_to_mutation_round_trip() {
        let mut row = Row::new("k");
        row.apply(
            &RowMutation::new("k")
                .set("cf", "a", 100, b"va".to_vec())
                .set("cf", "a", 200, b"vb".to_vec())
                .set("cf", "b", 50, b"vc".to_vec()),
        )
        .expect("apply failed");

        let mut rebuilt = Row::new("k");
        rebuilt
            .apply(&row_to_mutation(&row))
            .expect("apply failed");
        assert_eq!(rebuilt, row);
    }
}
