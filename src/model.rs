//! The row/column/version data model.
//!
//! A row maps `"family:qualifier"` column keys to columns, and each column
//! holds a version sequence sorted by timestamp descending (latest first).
//! All updates flow through [`RowMutation`], an ordered batch of set/delete
//! operations applied atomically to one row.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::Error;

/// A single version of a cell's value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellVersion {
    /// Nanosecond timestamp. Never zero once stored; a zero timestamp on
    /// insert is replaced with the current wall clock.
    pub timestamp: i64,
    pub value: Vec<u8>,
}

/// A column within a row, holding every stored version of its cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub family: String,
    pub qualifier: String,
    /// Sorted by timestamp descending, latest first.
    pub versions: Vec<CellVersion>,
}

impl Column {
    pub fn new(family: impl Into<String>, qualifier: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            qualifier: qualifier.into(),
            versions: Vec::new(),
        }
    }

    /// Inserts a new version, keeping the sequence sorted by timestamp
    /// descending. A new version with a timestamp equal to existing ones is
    /// placed after them. A zero timestamp is stamped with the current wall
    /// clock in nanoseconds.
    pub fn insert(&mut self, timestamp: i64, value: Vec<u8>) {
        let timestamp = if timestamp == 0 {
            now_nanos()
        } else {
            timestamp
        };
        let idx = self
            .versions
            .partition_point(|v| v.timestamp >= timestamp);
        self.versions.insert(idx, CellVersion { timestamp, value });
    }

    /// The most recent version, if any.
    pub fn latest(&self) -> Option<&CellVersion> {
        self.versions.first()
    }
}

/// Current wall clock in nanoseconds since the Unix epoch.
pub(crate) fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as i64)
}

/// A single operation within a [`RowMutation`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationOp {
    /// Insert a cell version. A zero timestamp means "stamp at insert time".
    Set {
        family: String,
        qualifier: String,
        timestamp: i64,
        value: Vec<u8>,
    },
    /// Remove the column entirely, all versions included.
    Delete { family: String, qualifier: String },
}

/// An ordered batch of operations applied atomically to one row.
///
/// Mutations are persisted verbatim in the commit log, so the whole batch is
/// either durable or absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMutation {
    pub row_key: String,
    pub ops: Vec<MutationOp>,
}

impl RowMutation {
    pub fn new(row_key: impl Into<String>) -> Self {
        Self {
            row_key: row_key.into(),
            ops: Vec::new(),
        }
    }

    /// Appends a set operation.
    pub fn set(
        mut self,
        family: impl Into<String>,
        qualifier: impl Into<String>,
        timestamp: i64,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.ops.push(MutationOp::Set {
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp,
            value: value.into(),
        });
        self
    }

    /// Appends a full-column delete operation.
    pub fn delete(mut self, family: impl Into<String>, qualifier: impl Into<String>) -> Self {
        self.ops.push(MutationOp::Delete {
            family: family.into(),
            qualifier: qualifier.into(),
        });
        self
    }
}

/// All data stored under a single row key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub key: String,
    /// Keyed by `"family:qualifier"`.
    pub columns: BTreeMap<String, Column>,
}

impl Row {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Applies a mutation batch to this row, executing each operation in
    /// order. Fails with `KeyMismatch` before touching anything if the
    /// mutation addresses a different row.
    pub fn apply(&mut self, mutation: &RowMutation) -> Result<()> {
        if mutation.row_key != self.key {
            return Err(Error::KeyMismatch {
                row: self.key.clone(),
                mutation: mutation.row_key.clone(),
            });
        }

        for op in &mutation.ops {
            match op {
                MutationOp::Set {
                    family,
                    qualifier,
                    timestamp,
                    value,
                } => {
                    let column = self
                        .columns
                        .entry(column_key(family, qualifier))
                        .or_insert_with(|| Column::new(family.clone(), qualifier.clone()));
                    column.insert(*timestamp, value.clone());
                }
                MutationOp::Delete { family, qualifier } => {
                    self.columns.remove(&column_key(family, qualifier));
                }
            }
        }
        Ok(())
    }

    /// The latest version stored for `(family, qualifier)`, if any.
    pub fn get(&self, family: &str, qualifier: &str) -> Option<&CellVersion> {
        self.column(family, qualifier).and_then(|c| c.latest())
    }

    pub fn column(&self, family: &str, qualifier: &str) -> Option<&Column> {
        self.columns.get(&column_key(family, qualifier))
    }
}

fn column_key(family: &str, qualifier: &str) -> String {
    format!("{family}:{qualifier}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_sorted_descending() {
        let mut column = Column::new("cf", "q1");
        column.insert(100, b"v1".to_vec());
        column.insert(200, b"v2".to_vec());
        column.insert(150, b"v1.5".to_vec());

        let timestamps: Vec<i64> = column.versions.iter().map(|v| v.timestamp).collect();
        assert_eq!(timestamps, vec![200, 150, 100]);
        assert_eq!(column.latest().unwrap().value, b"v2");
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        let mut column = Column::new("cf", "q1");
        column.insert(100, b"first".to_vec());
        column.insert(100, b"second".to_vec());

        // The newer insert lands after existing versions of equal timestamp.
        assert_eq!(column.versions[0].value, b"first");
        assert_eq!(column.versions[1].value, b"second");
        assert_eq!(column.latest().unwrap().value, b"first");
    }

    #[test]
    fn test_zero_timestamp_is_stamped() {
        let mut column = Column::new("cf", "q1");
        column.insert(0, b"v".to_vec());

        let version = column.latest().expect("version missing");
        assert!(version.timestamp > 0, "zero timestamp was not stamped");
    }

    #[test]
    fn test_apply_executes_ops_in_order() {
        let mutation = RowMutation::new("k2")
            .set("cf", "a", 10, b"x".to_vec())
            .set("cf", "b", 10, b"y".to_vec())
            .delete("cf", "a");

        let mut row = Row::new("k2");
        row.apply(&mutation).expect("apply failed");

        assert!(row.get("cf", "a").is_none());
        let b = row.get("cf", "b").expect("cf:b missing");
        assert_eq!(b.timestamp, 10);
        assert_eq!(b.value, b"y");
    }

    #[test]
    fn test_apply_key_mismatch() {
        let mutation = RowMutation::new("other").set("cf", "q", 1, b"v".to_vec());
        let mut row = Row::new("k1");

        let result = row.apply(&mutation);
        assert!(matches!(result, Err(Error::KeyMismatch { .. })));
        assert!(row.columns.is_empty(), "row was modified on mismatch");
    }

    #[test]
    fn test_delete_removes_all_versions() {
        let mut row = Row::new("k1");
        row.apply(
            &RowMutation::new("k1")
                .set("cf", "q", 1, b"v1".to_vec())
                .set("cf", "q", 2, b"v2".to_vec()),
        )
        .expect("apply failed");

        row.apply(&RowMutation::new("k1").delete("cf", "q"))
            .expect("apply failed");
        assert!(row.column("cf", "q").is_none());
    }
}
