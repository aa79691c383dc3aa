//! Immutable on-disk tables of rows sorted by key.
//!
//! An SSTable is a sequence of framed [`Row`] records in ascending key
//! order, produced only by a memtable flush or a compaction. Reads are full
//! scans that materialize every row; block indexes and bloom filters are the
//! natural extension point here.
//!
//! # Publication protocol
//!
//! A table is written to `<name>.sst.tmp`, fsynced, and renamed to
//! `<name>.sst` only after a successful close. A crash mid-write therefore
//! leaves a `.tmp` orphan that directory reconciliation removes at the next
//! open, and a `.sst` file is always complete.
//!
//! File names carry a monotonically increasing id (`00000042.sst`), so
//! lexicographic filename order equals age order.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::encoding;
use crate::error::Result;
use crate::model::Row;
use crate::Error;

/// File extension for published SSTables.
pub const SST_EXT: &str = "sst";

/// File extension for tables still being written.
pub const TMP_EXT: &str = "sst.tmp";

/// Metadata for one published SSTable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstMeta {
    /// Monotonic file id; higher ids are newer.
    pub id: u64,
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
}

/// Path of the SSTable with the given id inside `dir`.
pub fn table_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id:08}.{SST_EXT}"))
}

/// Parses the file id out of an SSTable path.
pub fn parse_table_id(path: &Path) -> Result<u64> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse::<u64>().ok())
        .ok_or_else(|| Error::InvalidData(format!("invalid sstable file name: {path:?}")))
}

/// Streams rows into a new SSTable.
///
/// Rows must be added in ascending key order; the writer only records what
/// it is given. Dropping an unfinished writer removes the temporary file.
pub struct Writer {
    file: BufWriter<File>,
    path: PathBuf,
    tmp_path: PathBuf,
    id: u64,
    rows: u64,
    finished: bool,
}

impl Writer {
    /// Starts a new table that will be published at `path`.
    pub fn create(path: &Path, id: u64) -> Result<Self> {
        let tmp_path = path.with_extension(TMP_EXT);
        let file = BufWriter::new(File::create(&tmp_path)?);
        Ok(Self {
            file,
            path: path.to_path_buf(),
            tmp_path,
            id,
            rows: 0,
            finished: false,
        })
    }

    pub fn add_row(&mut self, row: &Row) -> Result<()> {
        encoding::write_record(&mut self.file, row)?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes, fsyncs, and renames the table to its final name. The table
    /// is durable and visible to directory scans once this returns.
    pub fn finish(mut self) -> Result<SstMeta> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        fs::rename(&self.tmp_path, &self.path)?;
        self.finished = true;

        let size = fs::metadata(&self.path)?.len();
        tracing::debug!(id = self.id, rows = self.rows, size, "wrote sstable");
        Ok(SstMeta {
            id: self.id,
            path: self.path.clone(),
            size,
        })
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Reads every row from an SSTable, in stored (key-ascending) order.
pub fn read_rows(path: &Path) -> Result<Vec<Row>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut rows = Vec::new();
    loop {
        match encoding::read_record(&mut reader) {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => break,
            Err(Error::InvalidData(msg)) => {
                return Err(Error::CorruptSstable(format!("{}: {msg}", path.display())))
            }
            Err(e) => return Err(e),
        }
    }
    Ok(rows)
}
