//! In-memory object directory: the name → `FileId` → offset/header tables,
//! plus the directory prefix's on-disk codec.
//!
//! Per-object reader/writer admission counters live here too (see
//! `storage::concurrency`), since the spec gates both under a single
//! directory mutex — see `DESIGN.md` for why this implementation merges
//! the "directory mutex" and "allocator mutex" the spec describes
//! separately into the one [`parking_lot::Mutex`] guarding [`Inner`].

use super::header::ObjectHeader;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

/// Dense, non-negative identifier for a named object within one store.
pub type FileId = u32;

/// Fixed prefix of the persisted directory: `num_files` + `next_file_id` +
/// `free_list_head_offset` + `next_raw_spot`.
pub(crate) const PREFIX_SIZE: u64 = 4 + 4 + 8 + 8;

/// Number of condvar shards used to wake per-object waiters. Dense
/// per-object condvars would be wasteful at `max_files ~ 10^6`; hashing
/// into a fixed shard table preserves the admission semantics (P3/P4)
/// while keeping memory bounded.
pub const CONDVAR_SHARDS: usize = 256;

/// Per-object reader/writer admission counters.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LockCounters {
    pub reader_count: u32,
    pub writer_count: u32,
}

/// The full in-memory directory state, guarded by a single mutex.
pub(crate) struct Inner {
    pub num_files: u32,
    pub next_file_id: u32,
    pub free_list_head_offset: u64,
    pub next_raw_spot: u64,
    /// `by_id[id]` is the absolute offset (past the mmap header) of that
    /// object's *current* header record.
    pub by_id: Vec<u64>,
    pub headers: Vec<ObjectHeader>,
    pub by_name: FxHashMap<Vec<u8>, FileId>,
    pub locks: Vec<LockCounters>,
}

/// Name → `FileId` → offset/header directory, and the per-object admission
/// table.
pub struct ObjectDirectory {
    pub(crate) inner: Mutex<Inner>,
    pub(crate) condvars: Vec<Condvar>,
    max_files: u32,
    max_name_len: usize,
}

impl ObjectDirectory {
    /// Size, in bytes, of the directory region reserved at the front of the
    /// backing file for up to `max_files` entries.
    #[must_use]
    pub fn reserved_size(max_files: u32) -> u64 {
        PREFIX_SIZE + u64::from(max_files) * 8
    }

    /// Builds a fresh, empty directory for a brand-new store.
    #[must_use]
    pub fn new_empty(max_files: u32, max_name_len: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                num_files: 0,
                next_file_id: 0,
                free_list_head_offset: 0,
                next_raw_spot: Self::reserved_size(max_files),
                by_id: Vec::new(),
                headers: Vec::new(),
                by_name: FxHashMap::default(),
                locks: Vec::new(),
            }),
            condvars: (0..CONDVAR_SHARDS).map(|_| Condvar::new()).collect(),
            max_files,
            max_name_len,
        }
    }

    /// Serializes the directory prefix (not the per-object headers, which
    /// are already persisted in place by every write).
    #[must_use]
    pub fn encode_prefix(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        let mut buf = Vec::with_capacity(PREFIX_SIZE as usize + inner.by_id.len() * 8);
        buf.extend_from_slice(&inner.num_files.to_le_bytes());
        buf.extend_from_slice(&inner.next_file_id.to_le_bytes());
        buf.extend_from_slice(&inner.free_list_head_offset.to_le_bytes());
        buf.extend_from_slice(&inner.next_raw_spot.to_le_bytes());
        for i in 0..inner.num_files as usize {
            buf.extend_from_slice(&inner.by_id[i].to_le_bytes());
        }
        buf
    }

    /// Rebuilds a directory from a persisted prefix plus every object
    /// header it points at.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryCorrupt`] if a header fails to decode, a
    /// name does not round-trip, or the predecessor/free-list chain cycles.
    pub fn load(
        prefix: &[u8],
        max_files: u32,
        max_name_len: usize,
        read_header_at: impl Fn(u64) -> Result<ObjectHeader>,
    ) -> Result<Self> {
        if prefix.len() < PREFIX_SIZE as usize {
            return Err(Error::DirectoryCorrupt("prefix truncated".into()));
        }
        let mut off = 0usize;
        let num_files = u32::from_le_bytes(prefix[off..off + 4].try_into().unwrap());
        off += 4;
        let next_file_id = u32::from_le_bytes(prefix[off..off + 4].try_into().unwrap());
        off += 4;
        let free_list_head_offset = u64::from_le_bytes(prefix[off..off + 8].try_into().unwrap());
        off += 8;
        let next_raw_spot = u64::from_le_bytes(prefix[off..off + 8].try_into().unwrap());
        off += 8;

        let mut by_id = Vec::with_capacity(num_files as usize);
        for _ in 0..num_files {
            if off + 8 > prefix.len() {
                return Err(Error::DirectoryCorrupt("truncated offset table".into()));
            }
            by_id.push(u64::from_le_bytes(prefix[off..off + 8].try_into().unwrap()));
            off += 8;
        }

        let mut headers = Vec::with_capacity(num_files as usize);
        let mut by_name = FxHashMap::default();
        for (id, &offset) in by_id.iter().enumerate() {
            let header = read_header_at(offset)?;
            let name = header.name_str().to_vec();
            if by_name.insert(name, id as FileId).is_some() {
                return Err(Error::DirectoryCorrupt(
                    "duplicate name in directory".into(),
                ));
            }
            headers.push(header);
        }

        detect_self_loops(&by_id, &headers)?;

        let locks = vec![LockCounters::default(); num_files as usize];

        Ok(Self {
            inner: Mutex::new(Inner {
                num_files,
                next_file_id,
                free_list_head_offset,
                next_raw_spot,
                by_id,
                headers,
                by_name,
                locks,
            }),
            condvars: (0..CONDVAR_SHARDS).map(|_| Condvar::new()).collect(),
            max_files,
            max_name_len,
        })
    }

    /// Truncates `name` to the configured maximum length (silent policy;
    /// callers should log at the truncation site).
    #[must_use]
    pub fn normalize_name<'a>(&self, name: &'a [u8]) -> &'a [u8] {
        &name[..name.len().min(self.max_name_len)]
    }

    /// The maximum number of files this directory will admit.
    #[must_use]
    pub fn max_files(&self) -> u32 {
        self.max_files
    }

    /// True if a live object is registered under `name`.
    #[must_use]
    pub fn exists(&self, name: &[u8]) -> bool {
        let name = self.normalize_name(name);
        self.inner.lock().by_name.contains_key(name)
    }

    /// Returns the `FileId` for `name` if it is already registered.
    #[must_use]
    pub fn lookup(&self, name: &[u8]) -> Option<FileId> {
        let name = self.normalize_name(name);
        self.inner.lock().by_name.get(name).copied()
    }

    /// Returns a clone of the cached header for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFileId`] if `id` is not a live id.
    pub fn get_header(&self, id: FileId) -> Result<ObjectHeader> {
        let inner = self.inner.lock();
        inner
            .headers
            .get(id as usize)
            .cloned()
            .ok_or(Error::UnknownFileId(id))
    }

    /// Returns the current header offset for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFileId`] if `id` is not a live id.
    pub fn get_offset(&self, id: FileId) -> Result<u64> {
        let inner = self.inner.lock();
        inner.by_id.get(id as usize).copied().ok_or(Error::UnknownFileId(id))
    }

    /// Replaces the cached header for `id`, e.g. after a write updates
    /// `live_size` in place without relocating.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFileId`] if `id` is not a live id.
    pub fn set_header(&self, id: FileId, header: ObjectHeader) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot = inner.headers.get_mut(id as usize).ok_or(Error::UnknownFileId(id))?;
        *slot = header;
        Ok(())
    }

    /// Number of currently live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().num_files as usize
    }

    /// True if no objects are currently live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rejects the one cycle shape cheap to catch while loading: a header whose
/// `next_offset` points at its own record. A free-list head that loops back
/// on itself is instead caught lazily, the first time `storage::alloc::pop_free_slot`
/// reads it.
fn detect_self_loops(by_id: &[u64], headers: &[ObjectHeader]) -> Result<()> {
    for (offset, header) in by_id.iter().zip(headers) {
        if header.next_offset != 0 && header.next_offset == *offset {
            return Err(Error::DirectoryCorrupt(format!(
                "header at offset {offset} points to itself"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod directory_tests {
    use super::*;

    #[test]
    fn new_empty_reserves_directory_region() {
        let dir = ObjectDirectory::new_empty(1024, 32);
        let expected = ObjectDirectory::reserved_size(1024);
        assert_eq!(dir.inner.lock().next_raw_spot, expected);
        assert_eq!(dir.len(), 0);
    }

    #[test]
    fn encode_prefix_round_trips_through_load() {
        let dir = ObjectDirectory::new_empty(16, 32);
        {
            let mut inner = dir.inner.lock();
            inner.num_files = 0;
            inner.next_file_id = 0;
        }
        let prefix = dir.encode_prefix();
        let reloaded = ObjectDirectory::load(&prefix, 16, 32, |_off| {
            unreachable!("no headers to read for an empty directory")
        })
        .unwrap();
        assert_eq!(reloaded.len(), 0);
    }

    #[test]
    fn normalize_name_truncates() {
        let dir = ObjectDirectory::new_empty(16, 4);
        assert_eq!(dir.normalize_name(b"abcdef"), b"abcd");
    }
}
