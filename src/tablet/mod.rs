//! The tablet coordinator.
//!
//! A tablet owns a contiguous half-open row-key range `[start_key, end_key)`
//! and binds the storage pieces together: writes are journaled in the commit
//! log before they touch the memtable, reads merge the memtable with every
//! SSTable, and flush/compaction/split reshape the on-disk state.
//!
//! # Directory layout
//!
//! ```text
//! <dir>/tablet.meta    owned key range, written at first initialization
//! <dir>/tablet.lock    advisory lock held while the tablet is open
//! <dir>/tablet.wal     append-only commit log
//! <dir>/<id:08>.sst    zero or more SSTables, higher id = newer
//! ```
//!
//! # Locking
//!
//! One readers/writer lock guards the mutable state (memtable, SSTable list,
//! commit log): `mutate`, `flush`, `compact`, and `split` hold it exclusive,
//! `read` holds it shared. Rows and the commit log carry their own finer
//! locks underneath.

mod split;

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::compaction;
use crate::config::TabletConfig;
use crate::encoding;
use crate::error::Result;
use crate::flock::DirLock;
use crate::memtable::MemTable;
use crate::model::{CellVersion, RowMutation};
use crate::sstable::{self, SstMeta, SST_EXT};
use crate::wal::{CommitLog, WAL_FILE};
use crate::Error;

/// Name of the tablet metadata file within a tablet directory.
pub const META_FILE: &str = "tablet.meta";

const LOCK_FILE: &str = "tablet.lock";

/// Persisted per-tablet metadata, enough to rediscover a tablet from a
/// directory scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletMeta {
    pub start_key: String,
    pub end_key: String,
}

/// A tablet: all data for row keys in `[start_key, end_key)`.
pub struct Tablet {
    config: TabletConfig,
    inner: RwLock<TabletInner>,
    next_sst_id: AtomicU64,
    _lock: DirLock,
}

struct TabletInner {
    memtable: MemTable,
    /// Oldest to newest; immutable files, list guarded by the tablet lock.
    sstables: Vec<SstMeta>,
    wal: CommitLog,
}

impl Tablet {
    /// Opens or creates the tablet for `[start_key, end_key)` at `dir`.
    pub fn open(
        start_key: impl Into<String>,
        end_key: impl Into<String>,
        dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        Self::open_with_config(TabletConfig::new(dir).range(start_key, end_key))
    }

    /// Opens an existing tablet directory, taking the key range from its
    /// metadata file. This is the bootstrap path for a server rediscovering
    /// tablets by directory scan.
    pub fn open_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let meta = read_meta(&dir.join(META_FILE))?;
        Self::open_with_config(TabletConfig::new(dir).range(meta.start_key, meta.end_key))
    }

    pub fn open_with_config(config: TabletConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let lock = DirLock::acquire(config.dir.join(LOCK_FILE))?;

        // The metadata file pins the range the directory was created for.
        let meta_path = config.dir.join(META_FILE);
        if meta_path.exists() {
            let meta = read_meta(&meta_path)?;
            if meta.start_key != config.start_key || meta.end_key != config.end_key {
                return Err(Error::InvalidData(format!(
                    "tablet at {} owns [{:?}, {:?}), not [{:?}, {:?})",
                    config.dir.display(),
                    meta.start_key,
                    meta.end_key,
                    config.start_key,
                    config.end_key
                )));
            }
        } else {
            write_meta(
                &meta_path,
                &TabletMeta {
                    start_key: config.start_key.clone(),
                    end_key: config.end_key.clone(),
                },
            )?;
        }

        let sstables = reconcile_dir(&config.dir)?;
        let next_sst_id = sstables.last().map_or(0, |meta| meta.id + 1);

        // Replay the commit log into a fresh memtable. Any malformed record
        // aborts the open; partial recovery is not offered.
        let wal = CommitLog::open(config.dir.join(WAL_FILE), config.wal_sync)?;
        let memtable = MemTable::new();
        let mut replayed = 0u64;
        for record in wal.replay()? {
            memtable.apply(&record?)?;
            replayed += 1;
        }

        tracing::info!(
            dir = %config.dir.display(),
            start_key = %config.start_key,
            end_key = %config.end_key,
            sstables = sstables.len(),
            mutations_replayed = replayed,
            "opened tablet"
        );

        Ok(Self {
            config,
            inner: RwLock::new(TabletInner {
                memtable,
                sstables,
                wal,
            }),
            next_sst_id: AtomicU64::new(next_sst_id),
            _lock: lock,
        })
    }

    pub fn start_key(&self) -> &str {
        &self.config.start_key
    }

    pub fn end_key(&self) -> &str {
        &self.config.end_key
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Whether `key` belongs to this tablet's range.
    pub fn in_range(&self, key: &str) -> bool {
        key >= self.config.start_key.as_str()
            && (self.config.end_key.is_empty() || key < self.config.end_key.as_str())
    }

    fn out_of_range(&self, key: &str) -> Error {
        Error::OutOfRange {
            key: key.to_string(),
            start: self.config.start_key.clone(),
            end: self.config.end_key.clone(),
        }
    }

    /// Applies a mutation batch: range check, then commit log append (with
    /// fsync), then memtable. A failed append leaves the memtable untouched,
    /// so nothing is ever visible without being durable.
    pub fn mutate(&self, mutation: &RowMutation) -> Result<()> {
        let inner = self.inner.write()?;
        if !self.in_range(&mutation.row_key) {
            return Err(self.out_of_range(&mutation.row_key));
        }
        inner.wal.append(mutation)?;
        inner.memtable.apply(mutation)?;
        Ok(())
    }

    /// Returns the latest version of `(family, qualifier)` under `key`, or
    /// `None` if the cell does not exist.
    ///
    /// Candidates are collected from every SSTable (oldest to newest) and the
    /// memtable; on equal timestamps the memtable wins over any file and a
    /// newer file wins over an older one.
    pub fn read(&self, key: &str, family: &str, qualifier: &str) -> Result<Option<CellVersion>> {
        let inner = self.inner.read()?;
        if !self.in_range(key) {
            return Err(self.out_of_range(key));
        }

        let mut best: Option<CellVersion> = None;
        for sst in &inner.sstables {
            let rows = sstable::read_rows(&sst.path)?;
            if let Some(row) = rows.iter().find(|row| row.key == key) {
                if let Some(version) = row.get(family, qualifier) {
                    take_if_newer(&mut best, version);
                }
            }
        }
        if let Some(row) = inner.memtable.get(key) {
            let row = row.read()?;
            if let Some(version) = row.get(family, qualifier) {
                take_if_newer(&mut best, version);
            }
        }
        Ok(best)
    }

    /// Flushes the memtable into a new SSTable. A no-op on an empty
    /// memtable. The commit log is not truncated; replaying it over the
    /// flushed state is redundant but safe.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write()?;
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut TabletInner) -> Result<()> {
        if inner.memtable.is_empty() {
            return Ok(());
        }
        let id = self.next_sst_id.fetch_add(1, Ordering::SeqCst);
        let path = sstable::table_path(&self.config.dir, id);
        let rows = inner.memtable.len();
        let meta = inner.memtable.flush(&path, id)?;
        tracing::info!(id, rows, size = meta.size, "flushed memtable");
        inner.sstables.push(meta);
        Ok(())
    }

    /// Compacts all current SSTables into one, then deletes the inputs. A
    /// no-op with fewer than two tables.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.write()?;
        if inner.sstables.len() < 2 {
            return Ok(());
        }

        let input_paths: Vec<PathBuf> = inner.sstables.iter().map(|s| s.path.clone()).collect();
        let id = self.next_sst_id.fetch_add(1, Ordering::SeqCst);
        let output_path = sstable::table_path(&self.config.dir, id);
        let meta = compaction::compact(&input_paths, &output_path, id)?;

        // The output is durable; the inputs are now garbage.
        inner.sstables = vec![meta];
        for path in input_paths {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to delete compacted sstable");
            }
        }
        Ok(())
    }

    /// Total estimated bytes held by this tablet: buffered memtable bytes
    /// plus the size of every SSTable.
    pub fn size_bytes(&self) -> Result<u64> {
        let inner = self.inner.read()?;
        Ok(inner.size_bytes())
    }

    /// Syncs and closes the commit log. SSTables stay on disk; the directory
    /// lock is released.
    pub fn close(self) -> Result<()> {
        let Tablet { inner, _lock, .. } = self;
        let inner = inner.into_inner()?;
        inner.wal.close()
    }
}

impl TabletInner {
    fn size_bytes(&self) -> u64 {
        self.memtable.size_bytes() as u64 + self.sstables.iter().map(|s| s.size).sum::<u64>()
    }
}

fn take_if_newer(best: &mut Option<CellVersion>, candidate: &CellVersion) {
    match best {
        Some(current) if candidate.timestamp < current.timestamp => {}
        _ => *best = Some(candidate.clone()),
    }
}

/// Removes abandoned `.tmp` files and registers published SSTables in id
/// (age) order.
fn reconcile_dir(dir: &Path) -> Result<Vec<SstMeta>> {
    let mut sstables = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("tmp") => {
                tracing::warn!(path = %path.display(), "removing orphan temp file");
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove orphan");
                }
            }
            Some(SST_EXT) => {
                let id = sstable::parse_table_id(&path)?;
                let size = fs::metadata(&path)?.len();
                sstables.push(SstMeta { id, path, size });
            }
            _ => {}
        }
    }
    sstables.sort_by_key(|meta| meta.id);
    Ok(sstables)
}

fn read_meta(path: &Path) -> Result<TabletMeta> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    match encoding::read_record(&mut reader)? {
        Some(meta) => Ok(meta),
        None => Err(Error::InvalidData(format!(
            "empty tablet metadata file: {}",
            path.display()
        ))),
    }
}

fn write_meta(path: &Path, meta: &TabletMeta) -> Result<()> {
    let mut file = File::create(path)?;
    encoding::write_record(&mut file, meta)?;
    file.sync_all()?;
    Ok(())
}
