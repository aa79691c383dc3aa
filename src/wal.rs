//! The commit log: an append-only, fsync-on-write journal of row mutations.
//!
//! Every mutation is written to the log and synced before it becomes visible
//! in the memtable, so a successful [`CommitLog::append`] means the mutation
//! survives a crash. On restart the log is replayed from offset zero to
//! rebuild the memtable.
//!
//! Records use the shared frame from [`crate::encoding`], one encoded
//! [`RowMutation`] per record, in commit order.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::encoding;
use crate::error::Result;
use crate::model::RowMutation;
use crate::Error;

/// Name of the commit log file within a tablet directory.
pub const WAL_FILE: &str = "tablet.wal";

/// Append-only mutation journal for one tablet.
pub struct CommitLog {
    file: Mutex<File>,
    path: PathBuf,
    sync: bool,
}

impl std::fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLog")
            .field("path", &self.path)
            .field("sync", &self.sync)
            .finish()
    }
}

impl CommitLog {
    /// Opens the log at `path`, creating it if absent. With `sync` set,
    /// every append is fsynced before returning.
    pub fn open(path: impl Into<PathBuf>, sync: bool) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
            sync,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one mutation record and syncs it to disk. When this returns
    /// the mutation is durable and may be exposed to readers.
    pub fn append(&self, mutation: &RowMutation) -> Result<()> {
        // Encode outside the lock; a failed encode leaves the log untouched.
        let mut record = Vec::new();
        encoding::write_record(&mut record, mutation)?;

        let mut file = self.file.lock()?;
        file.write_all(&record)?;
        if self.sync {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Returns an iterator over all records from the start of the log.
    pub fn replay(&self) -> Result<ReplayIterator> {
        ReplayIterator::open(&self.path)
    }

    /// Syncs any pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.lock()?.sync_all()?;
        Ok(())
    }

    /// Syncs and releases the log file.
    pub fn close(self) -> Result<()> {
        self.sync()
    }
}

/// Sequential reader over the commit log, decoding mutations in commit
/// order until clean EOF. Any malformed record is `Error::CorruptLog`.
pub struct ReplayIterator {
    reader: BufReader<File>,
}

impl ReplayIterator {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }
}

impl Iterator for ReplayIterator {
    type Item = Result<RowMutation>;

    fn next(&mut self) -> Option<Self::Item> {
        match encoding::read_record(&mut self.reader) {
            Ok(Some(mutation)) => Some(Ok(mutation)),
            Ok(None) => None,
            Err(Error::InvalidData(msg)) => Some(Err(Error::CorruptLog(msg))),
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    fn create_temp_log(temp_dir: &TempDir) -> CommitLog {
        CommitLog::open(temp_dir.path().join(WAL_FILE), true).expect("Failed to open commit log")
    }

    #[test]
    fn test_append_and_replay() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let log = create_temp_log(&temp_dir);

        let first = RowMutation::new("k1").set("cf", "q1", 100, b"v1".to_vec());
        let second = RowMutation::new("k2")
            .set("cf", "q1", 200, b"v2".to_vec())
            .delete("cf", "q2");

        log.append(&first).expect("Failed to append");
        log.append(&second).expect("Failed to append");

        let replayed: Vec<_> = log
            .replay()
            .expect("Failed to create replay iterator")
            .collect::<Result<Vec<_>>>()
            .expect("Replay failed");

        assert_eq!(replayed, vec![first, second]);
    }

    #[test]
    fn test_empty_replay() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let log = create_temp_log(&temp_dir);

        let replay = log.replay().expect("Failed to create replay iterator");
        assert_eq!(replay.count(), 0);
    }

    #[test]
    fn test_replay_survives_reopen() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join(WAL_FILE);

        let mutation = RowMutation::new("k1").set("cf", "q", 50, b"v".to_vec());
        {
            let log = CommitLog::open(&path, true).expect("Failed to open commit log");
            log.append(&mutation).expect("Failed to append");
            log.close().expect("Failed to close");
        }

        let log = CommitLog::open(&path, true).expect("Failed to reopen commit log");
        let replayed: Vec<_> = log
            .replay()
            .expect("Failed to create replay iterator")
            .collect::<Result<Vec<_>>>()
            .expect("Replay failed");
        assert_eq!(replayed, vec![mutation]);
    }

    #[test]
    fn test_corrupted_log_detected() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let log = create_temp_log(&temp_dir);

        log.append(&RowMutation::new("k1").set("cf", "q", 1, b"v1".to_vec()))
            .expect("Failed to append");
        log.append(&RowMutation::new("k2").set("cf", "q", 2, b"v2".to_vec()))
            .expect("Failed to append");

        // Tack a torn record onto the end of the file.
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(log.path())
                .expect("Failed to open log file");
            file.write_all(b"garbage").expect("Failed to write garbage");
            file.sync_all().expect("Failed to sync");
        }

        let mut saw_corruption = false;
        for record in log.replay().expect("Failed to create replay iterator") {
            match record {
                Ok(_) => {}
                Err(Error::CorruptLog(_)) => {
                    saw_corruption = true;
                    break;
                }
                Err(e) => panic!("Unexpected error during replay: {e:?}"),
            }
        }
        assert!(saw_corruption, "Corruption not detected during replay");
    }

    #[test]
    fn test_concurrent_appends() {
        use std::sync::Arc;
        use std::thread;

        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let log = Arc::new(create_temp_log(&temp_dir));

        let mut handles = Vec::new();
        for writer in 0..4 {
            let log = log.clone();
            handles.push(thread::spawn(move || {
                for i in 0..25i64 {
                    let mutation = RowMutation::new(format!("w{writer}-k{i:02}")).set(
                        "cf",
                        "q",
                        i + 1,
                        b"v".to_vec(),
                    );
                    log.append(&mutation).expect("Failed to append");
                }
            }));
        }
        for handle in handles {
            handle.join().expect("Writer thread panicked");
        }

        let replayed = log
            .replay()
            .expect("Failed to create replay iterator")
            .collect::<Result<Vec<_>>>()
            .expect("Replay failed");
        assert_eq!(replayed.len(), 100);
    }
}
