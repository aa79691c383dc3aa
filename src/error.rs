use std::fmt::Display;

/// Tablet engine errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The row key falls outside the tablet's `[start_key, end_key)` range.
    /// The caller should re-route the request to the owning tablet.
    OutOfRange {
        key: String,
        start: String,
        end: String,
    },
    /// A mutation was applied to a row whose key does not match the
    /// mutation's row key.
    KeyMismatch { row: String, mutation: String },
    /// An IO error from the underlying file system.
    Io(String),
    /// A malformed record was found while replaying the commit log.
    CorruptLog(String),
    /// A malformed record was found while reading an SSTable.
    CorruptSstable(String),
    /// A split was requested but the tablet is smaller than the threshold.
    BelowThreshold { size: u64, threshold: u64 },
    /// A split was requested but the tablet holds fewer than two distinct
    /// row keys.
    NotEnoughRows,
    /// Invalid data outside of log/table records: bad file names, metadata
    /// mismatches, encode failures.
    InvalidData(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::OutOfRange { key, start, end } => {
                write!(f, "key {key:?} out of range [{start:?}, {end:?})")
            }
            Error::KeyMismatch { row, mutation } => {
                write!(f, "mutation row key {mutation:?} does not match row {row:?}")
            }
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::CorruptLog(msg) => write!(f, "corrupt commit log: {msg}"),
            Error::CorruptSstable(msg) => write!(f, "corrupt sstable: {msg}"),
            Error::BelowThreshold { size, threshold } => {
                write!(f, "tablet size {size} is below split threshold {threshold}")
            }
            Error::NotEnoughRows => write!(f, "not enough rows to split"),
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
        }
    }
}

/// A tabletdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}
