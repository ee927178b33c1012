//! Fixed-size on-disk object header and its byte codec.

use crate::error::{Error, Result};

/// Maximum length, in bytes, of a stored object name.
pub const MAX_NAME_LEN: usize = 32;

/// On-disk size of a serialized [`ObjectHeader`]: 32 (name) + 8
/// (`next_offset`) + 8 (`live_size`) + 8 (`alloc_size`) + 4 (`version`) + 8
/// (`timestamp`).
pub const HEADER_SIZE: u64 = 32 + 8 + 8 + 8 + 4 + 8;

/// The fixed-size record prefixing every payload region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Null-padded name, truncated to [`MAX_NAME_LEN`] bytes.
    pub name: [u8; MAX_NAME_LEN],
    /// Dual-use chain pointer: MVCC predecessor offset, or free-list link.
    /// Zero means "no predecessor" / "end of free-list".
    pub next_offset: u64,
    /// Bytes currently written into the payload.
    pub live_size: u64,
    /// Bytes reserved for the payload region.
    pub alloc_size: u64,
    /// -1 before the object has ever been written; incremented on every
    /// relocating write.
    pub version: i32,
    /// Milliseconds since the Unix epoch, updated on every write.
    pub timestamp: u64,
}

impl ObjectHeader {
    /// Builds a fresh, never-written header for `name` with the given
    /// `alloc_size`.
    #[must_use]
    pub fn new(name: &[u8], alloc_size: u64) -> Self {
        Self {
            name: pack_name(name),
            next_offset: 0,
            live_size: 0,
            alloc_size,
            version: -1,
            timestamp: now_millis(),
        }
    }

    /// The name with trailing NUL padding stripped.
    #[must_use]
    pub fn name_str(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        &self.name[..end]
    }

    /// Serializes this header into its fixed 68-byte little-endian layout.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        let mut off = 0usize;
        buf[off..off + MAX_NAME_LEN].copy_from_slice(&self.name);
        off += MAX_NAME_LEN;
        buf[off..off + 8].copy_from_slice(&self.next_offset.to_le_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.live_size.to_le_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.alloc_size.to_le_bytes());
        off += 8;
        buf[off..off + 4].copy_from_slice(&self.version.to_le_bytes());
        off += 4;
        buf[off..off + 8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    /// Deserializes a header from a byte slice of exactly [`HEADER_SIZE`]
    /// bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryCorrupt`] if `bytes` is the wrong length.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_SIZE as usize {
            return Err(Error::DirectoryCorrupt(format!(
                "header record is {} bytes, expected {HEADER_SIZE}",
                bytes.len()
            )));
        }
        let mut off = 0usize;
        let mut name = [0u8; MAX_NAME_LEN];
        name.copy_from_slice(&bytes[off..off + MAX_NAME_LEN]);
        off += MAX_NAME_LEN;
        let next_offset = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
        off += 8;
        let live_size = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
        off += 8;
        let alloc_size = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
        off += 8;
        let version = i32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        off += 4;
        let timestamp = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());

        Ok(Self {
            name,
            next_offset,
            live_size,
            alloc_size,
            version,
            timestamp,
        })
    }
}

/// Truncates `name` to [`MAX_NAME_LEN`] bytes and null-pads the rest.
///
/// Per the directory's `NameTooLong` policy this is silent: callers that
/// care should compare their name against [`MAX_NAME_LEN`] themselves and
/// log at the call site (see [`crate::storage::directory::ObjectDirectory::select`]).
#[must_use]
pub fn pack_name(name: &[u8]) -> [u8; MAX_NAME_LEN] {
    let mut packed = [0u8; MAX_NAME_LEN];
    let len = name.len().min(MAX_NAME_LEN);
    packed[..len].copy_from_slice(&name[..len]);
    packed
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
