//! Versioned, self-describing on-disk blobs.
//!
//! Every persisted file of the engine shares one envelope: a magic number,
//! a format version, a type tag, the last-flush id, the bincode payload, and
//! a trailing CRC32 over everything before it. Files are replaced atomically
//! (write to a temporary sibling, then rename).

use crate::error::{IndexError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

const BLOB_MAGIC: u32 = 0x4556_4442; // "EVDB"
const BLOB_VERSION: u32 = 1;

/// The leading envelope of every persisted file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobHeader {
    magic: u32,
    version: u32,
    pub tag: String,
    pub last_flush: u64,
}

fn invalid(path: &Path, detail: impl Into<String>) -> IndexError {
    IndexError::InvalidFormat {
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

/// Atomically write a blob to `path`.
pub fn save<T: Serialize>(path: &Path, tag: &str, last_flush: u64, payload: &T) -> Result<()> {
    let header = BlobHeader {
        magic: BLOB_MAGIC,
        version: BLOB_VERSION,
        tag: tag.to_string(),
        last_flush,
    };
    let mut buf = Vec::new();
    bincode::serialize_into(&mut buf, &header)?;
    bincode::serialize_into(&mut buf, payload)?;
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());

    let dir = path.parent().ok_or_else(|| {
        IndexError::Unspecified(format!("blob path has no parent: {}", path.display()))
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&buf)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| IndexError::Io(e.error))?;
    Ok(())
}

/// Read a blob from `path`, verifying magic, version, and checksum.
///
/// The caller is responsible for checking `header.tag` against the tag it
/// expects for this file.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<(BlobHeader, T)> {
    if !path.exists() {
        return Err(IndexError::NoSuchFile(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    if bytes.len() < 4 {
        return Err(invalid(path, "truncated blob"));
    }
    let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let stored_crc = u32::from_le_bytes(crc_bytes.try_into().expect("four checksum bytes"));
    if crc32fast::hash(body) != stored_crc {
        return Err(invalid(path, "checksum mismatch"));
    }
    let mut cursor = std::io::Cursor::new(body);
    let header: BlobHeader = bincode::deserialize_from(&mut cursor)?;
    if header.magic != BLOB_MAGIC {
        return Err(invalid(path, "bad magic"));
    }
    if header.version != BLOB_VERSION {
        return Err(invalid(
            path,
            format!("unknown format version {}", header.version),
        ));
    }
    let payload = bincode::deserialize_from(&mut cursor)?;
    Ok((header, payload))
}

/// Read a blob and require an exact type tag.
pub fn load_tagged<T: DeserializeOwned>(path: &Path, expected_tag: &str) -> Result<(u64, T)> {
    let (header, payload) = load(path)?;
    if header.tag != expected_tag {
        return Err(invalid(
            path,
            format!("type tag {:?}, expected {:?}", header.tag, expected_tag),
        ));
    }
    Ok((header.last_flush, payload))
}
