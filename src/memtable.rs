//! The sorted in-memory buffer absorbing all writes before flush.
//!
//! Rows are kept in a concurrent skip list keyed by row key, which gives
//! ordered traversal for flush and lock-free point lookups for reads. Each
//! row carries its own readers/writer lock: a mutation batch holds it
//! exclusive for its whole duration, so no reader ever observes a partially
//! applied batch. Structural serialization against flush comes from the
//! tablet's own lock, under which every memtable mutator runs.
//!
//! The size estimate counts key, family, qualifier, and value bytes plus a
//! fixed per-operation overhead for the timestamp. It only ever grows until
//! a successful flush resets it.

use crossbeam_skiplist::SkipMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::model::{MutationOp, Row, RowMutation};
use crate::sstable::{self, SstMeta};

/// Per-operation size overhead accounting for the stored timestamp.
const OP_OVERHEAD: usize = 8;

/// In-memory sorted table of rows.
#[derive(Debug)]
pub struct MemTable {
    rows: SkipMap<String, Arc<RwLock<Row>>>,
    size: AtomicUsize,
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            rows: SkipMap::new(),
            size: AtomicUsize::new(0),
        }
    }

    /// Applies a mutation batch to the addressed row, creating the row on
    /// first write.
    pub fn apply(&self, mutation: &RowMutation) -> Result<()> {
        let row = match self.rows.get(&mutation.row_key) {
            Some(entry) => entry.value().clone(),
            None => {
                self.size
                    .fetch_add(mutation.row_key.len(), Ordering::SeqCst);
                self.rows
                    .get_or_insert(
                        mutation.row_key.clone(),
                        Arc::new(RwLock::new(Row::new(mutation.row_key.clone()))),
                    )
                    .value()
                    .clone()
            }
        };

        // Exclusive for the whole batch; readers see all of it or none.
        let mut row = row.write()?;
        row.apply(mutation)?;
        self.size
            .fetch_add(estimate_mutation_size(mutation), Ordering::SeqCst);
        Ok(())
    }

    /// Point lookup. The returned row is internally synchronized; lock it
    /// shared and clone out what you need.
    pub fn get(&self, key: &str) -> Option<Arc<RwLock<Row>>> {
        self.rows.get(key).map(|entry| entry.value().clone())
    }

    /// In-key-order traversal. The visitor returns `false` to stop early.
    pub fn ascend<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&Row) -> bool,
    {
        for entry in self.rows.iter() {
            let row = entry.value().read()?;
            if !visitor(&row) {
                break;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Approximate buffered bytes. Monotonic non-decreasing until flush.
    pub fn size_bytes(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Writes all rows in key order to a new SSTable at `path`, then clears
    /// the buffer. On failure the buffer is left unchanged and the partial
    /// file is discarded by the writer.
    pub fn flush(&self, path: &Path, id: u64) -> Result<SstMeta> {
        let mut writer = sstable::Writer::create(path, id)?;
        for entry in self.rows.iter() {
            let row = entry.value().read()?;
            writer.add_row(&row)?;
        }
        let meta = writer.finish()?;

        while self.rows.pop_front().is_some() {}
        self.size.store(0, Ordering::SeqCst);
        Ok(meta)
    }
}

fn estimate_mutation_size(mutation: &RowMutation) -> usize {
    mutation
        .ops
        .iter()
        .map(|op| match op {
            MutationOp::Set {
                family,
                qualifier,
                value,
                ..
            } => family.len() + qualifier.len() + value.len() + OP_OVERHEAD,
            MutationOp::Delete { family, qualifier } => {
                family.len() + qualifier.len() + OP_OVERHEAD
            }
        })
        .sum()
}
