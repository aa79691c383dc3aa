use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Advisory lock on a tablet directory's lock file.
///
/// A tablet directory is owned by exactly one live tablet; the lock makes a
/// second concurrent open fail fast instead of corrupting shared files. The
/// OS releases the lock when the file handle is dropped, so a crashed process
/// never leaves a stale lock behind.
pub struct DirLock {
    _file: File,
    path: PathBuf,
}

impl DirLock {
    /// Creates the lock file if needed and acquires an exclusive lock on it.
    /// The file records the owning process id.
    pub fn acquire<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Self::try_lock(&file)?;

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        if unsafe { flock(fd, LOCK_EX | LOCK_NB) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        // No advisory locking on this platform; exclusive ownership is then
        // the caller's responsibility.
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
