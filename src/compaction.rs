//! Merging several SSTables into one.
//!
//! Inputs are read oldest first; rows with the same key are merged column by
//! column, and version sequences are combined with a stable
//! timestamp-descending merge, so the latest version of every cell is
//! preserved. Nothing is deduplicated or garbage collected here; retention
//! policy is a hook for later.

use itertools::Itertools;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::mem;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::Row;
use crate::sstable::{self, SstMeta};

/// Merges the rows of `input_paths` (ordered oldest to newest) into a single
/// table published at `output_path`. Callers install the returned metadata
/// and delete the inputs once the output is durable.
pub fn compact(input_paths: &[PathBuf], output_path: &Path, id: u64) -> Result<SstMeta> {
    let mut merged: BTreeMap<String, Row> = BTreeMap::new();
    for path in input_paths {
        for row in sstable::read_rows(path)? {
            match merged.entry(row.key.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(row);
                }
                Entry::Occupied(mut entry) => merge_row(entry.get_mut(), row),
            }
        }
    }

    let mut writer = sstable::Writer::create(output_path, id)?;
    for row in merged.values() {
        writer.add_row(row)?;
    }
    let meta = writer.finish()?;

    tracing::info!(
        inputs = input_paths.len(),
        output = id,
        rows = merged.len(),
        "compacted sstables"
    );
    Ok(meta)
}

/// Merges `source` into `dest` column by column. Version sequences are
/// combined with a stable timestamp-descending merge; on equal timestamps
/// the destination's (older) versions keep their position.
pub(crate) fn merge_row(dest: &mut Row, source: Row) {
    for (column_key, column) in source.columns {
        match dest.columns.entry(column_key) {
            Entry::Vacant(entry) => {
                entry.insert(column);
            }
            Entry::Occupied(mut entry) => {
                let dest_column = entry.get_mut();
                let existing = mem::take(&mut dest_column.versions);
                dest_column.versions = existing
                    .into_iter()
                    .merge_by(column.versions, |a, b| a.timestamp >= b.timestamp)
                    .collect();
            }
        }
    }
}
