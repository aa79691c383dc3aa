//! Framed record codec shared by the commit log, SSTables, and the tablet
//! metadata file.
//!
//! Every record uses the same self-delimiting frame:
//!
//! ```text
//! +-----------+------------------+-----------+
//! |len: u32   | payload (bincode)|crc32: u32 |
//! +-----------+------------------+-----------+
//! |  4 bytes  |     var len      | 4 bytes   |
//! +-----------+------------------+-----------+
//! ```
//!
//! - Multi-byte integers are big-endian.
//! - The CRC-32/ISCSI checksum covers the payload only.
//! - A stream ends cleanly when EOF falls exactly on a frame boundary;
//!   anything else is reported as corruption.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

use crate::error::Result;
use crate::Error;

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Encodes `value` and writes one framed record to `writer`.
pub fn write_record<T: Serialize, W: Write>(writer: &mut W, value: &T) -> Result<()> {
    let payload = bincode::serialize(value)?;
    writer.write_u32::<BigEndian>(payload.len() as u32)?;
    writer.write_all(&payload)?;
    writer.write_u32::<BigEndian>(CRC32.checksum(&payload))?;
    Ok(())
}

/// Reads one framed record from `reader`.
///
/// Returns `Ok(None)` on clean EOF at a frame boundary. A truncated frame,
/// checksum mismatch, or undecodable payload is `Error::InvalidData`; callers
/// translate that into the corruption error for their file kind.
pub fn read_record<T: DeserializeOwned, R: Read>(reader: &mut R) -> Result<Option<T>> {
    let len = match reader.read_u32::<BigEndian>() {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|e| frame_error(e, "payload"))?;

    let stored_crc = match reader.read_u32::<BigEndian>() {
        Ok(crc) => crc,
        Err(e) => return Err(frame_error(e, "checksum")),
    };

    if CRC32.checksum(&payload) != stored_crc {
        return Err(Error::InvalidData("checksum mismatch".to_string()));
    }

    let value = bincode::deserialize(&payload)
        .map_err(|e| Error::InvalidData(format!("undecodable payload: {e}")))?;
    Ok(Some(value))
}

fn frame_error(e: std::io::Error, part: &str) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::InvalidData(format!("record truncated in {part}"))
    } else {
        Error::Io(e.to_string())
    }
}
