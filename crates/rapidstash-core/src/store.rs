//! The `Store` facade: the single entry point tying the mmap substrate, the
//! object directory, the allocator, and per-object admission together.

use crate::config::StoreConfig;
use crate::error::Result;
use crate::stats::{StatKind, Stats};
use crate::storage::concurrency::LockKind;
use crate::storage::directory::{self, FileId, ObjectDirectory};
use crate::storage::header::{HEADER_SIZE, ObjectHeader};
use crate::storage::io::{Reader, Writer};
use crate::storage::mmap::{MmapSubstrate, HEADER_SIZE as MMAP_HEADER_SIZE};
use crate::storage::alloc;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// An open RapidStash store.
///
/// Cloning is cheap ([`Store`] is internally `Arc`-backed) and clones share
/// the same backing file and directory.
#[derive(Clone)]
pub struct Store {
    ms: Arc<MmapSubstrate>,
    dir: Arc<ObjectDirectory>,
    config: Arc<StoreConfig>,
    mvcc_enabled: Arc<AtomicBool>,
    stats: Arc<Stats>,
}

impl Store {
    /// Opens (creating if necessary) a store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be opened/mapped, fails
    /// its sanity/version check, or its persisted directory is corrupt.
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let ms = MmapSubstrate::open(
            path,
            config.initial_map_size,
            config.growth_factor,
            config.max_map_size,
        )?;

        let dir = if ms.is_new() {
            info!(path = %path.display(), "initializing new store");
            let dir = ObjectDirectory::new_empty(config.max_files, config.max_name_len as usize);
            ms.raw_write(0, &dir.encode_prefix())?;
            dir
        } else {
            info!(path = %path.display(), "loading existing store");
            load_directory(&ms, config.max_files, config.max_name_len as usize)?
        };

        let mvcc_enabled = Arc::new(AtomicBool::new(config.mvcc_enabled));
        Ok(Self {
            ms: Arc::new(ms),
            dir: Arc::new(dir),
            config: Arc::new(config),
            mvcc_enabled,
            stats: Arc::new(Stats::default()),
        })
    }

    /// Persists the directory prefix and backing-file header, then flushes.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors encountered while flushing.
    pub fn close(&self) -> Result<()> {
        self.persist_prefix()?;
        self.ms.shutdown()
    }

    fn persist_prefix(&self) -> Result<()> {
        self.ms.raw_write(0, &self.dir.encode_prefix())
    }

    /// Resolves `name` to its `FileId`, creating a new object if it does not
    /// already exist.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TooManyFiles`] if the directory is full.
    pub fn select(&self, name: &[u8]) -> Result<FileId> {
        let existed = self.dir.exists(name);
        let id = alloc::select_or_create(&self.dir, &self.ms, name, self.config.min_alloc)?;
        if !existed {
            self.persist_prefix()?;
        }
        Ok(id)
    }

    /// True if `name` is currently registered.
    #[must_use]
    pub fn exists(&self, name: &[u8]) -> bool {
        self.dir.exists(name)
    }

    /// Returns a snapshot of `id`'s current header.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownFileId`] if `id` is not live.
    pub fn get_header(&self, id: FileId) -> Result<ObjectHeader> {
        self.dir.get_header(id)
    }

    /// Blocks until `kind` admission is granted on `id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownFileId`] if `id` is not live.
    pub fn lock(&self, id: FileId, kind: LockKind) -> Result<()> {
        self.dir.lock(id, kind, self.is_mvcc_enabled())
    }

    /// Releases a previously acquired `kind` admission on `id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownFileId`] if `id` is not live.
    pub fn unlock(&self, id: FileId, kind: LockKind) -> Result<()> {
        self.dir.unlock(id, kind)
    }

    /// Opens an unsynchronized writer over `id`. Most callers want
    /// [`Self::get_safe_writer`] instead, which also manages admission.
    #[must_use]
    pub fn get_writer(&self, id: FileId) -> Writer {
        Writer::new(
            Arc::clone(&self.dir),
            Arc::clone(&self.ms),
            id,
            self.is_mvcc_enabled(),
        )
    }

    /// Opens an unsynchronized reader over `id`. Most callers want
    /// [`Self::get_safe_reader`] instead, which also manages admission.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownFileId`] if `id` is not live.
    pub fn get_reader(&self, id: FileId) -> Result<Reader> {
        Reader::new(&self.dir, Arc::clone(&self.ms), id)
    }

    /// Acquires exclusive admission on `id` and returns a scoped writer that
    /// releases it automatically when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownFileId`] if `id` is not live.
    pub fn get_safe_writer(&self, id: FileId) -> Result<SafeWriter<'_>> {
        self.dir.lock(id, LockKind::Exclusive, self.is_mvcc_enabled())?;
        Ok(SafeWriter {
            store: self,
            id,
            writer: self.get_writer(id),
        })
    }

    /// Acquires shared admission on `id` and returns a scoped reader that
    /// releases it automatically when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownFileId`] if `id` is not live.
    pub fn get_safe_reader(&self, id: FileId) -> Result<SafeReader<'_>> {
        self.dir.lock(id, LockKind::Shared, self.is_mvcc_enabled())?;
        let reader = match self.get_reader(id) {
            Ok(r) => r,
            Err(e) => {
                let _ = self.dir.unlock(id, LockKind::Shared);
                return Err(e);
            }
        };
        Ok(SafeReader {
            store: self,
            id,
            reader,
        })
    }

    /// Removes `id` from the directory.
    ///
    /// Returns whether the freed region merged into a neighboring live
    /// object.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownFileId`] if `id` is not live.
    pub fn unlink(&self, id: FileId) -> Result<bool> {
        let merged = alloc::unlink(&self.dir, &self.ms, id)?;
        self.persist_prefix()?;
        Ok(merged)
    }

    /// Flips MVCC mode and returns the new setting.
    pub fn toggle_mvcc(&self) -> bool {
        let new_value = !self.mvcc_enabled.load(Ordering::Relaxed);
        self.mvcc_enabled.store(new_value, Ordering::Relaxed);
        new_value
    }

    /// Whether MVCC mode is currently enabled.
    #[must_use]
    pub fn is_mvcc_enabled(&self) -> bool {
        self.mvcc_enabled.load(Ordering::Relaxed)
    }

    /// Number of completed operations of `kind` since the last
    /// [`Self::reset_stats`].
    #[must_use]
    pub fn count(&self, kind: StatKind) -> u64 {
        self.stats.count(kind)
    }

    /// Bytes per second for `kind` since the last [`Self::reset_stats`].
    #[must_use]
    pub fn throughput(&self, kind: StatKind) -> f64 {
        self.stats.throughput(kind)
    }

    /// Zeroes all accumulated throughput counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Number of currently live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dir.len()
    }

    /// True if the store has no live objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dir.is_empty()
    }
}

fn load_directory(ms: &MmapSubstrate, max_files: u32, max_name_len: usize) -> Result<ObjectDirectory> {
    let fixed = ms.raw_read(0, directory::PREFIX_SIZE, MMAP_HEADER_SIZE)?;
    let num_files = u32::from_le_bytes(fixed[0..4].try_into().unwrap());
    let total = directory::PREFIX_SIZE + u64::from(num_files) * 8;
    let prefix = ms.raw_read(0, total, MMAP_HEADER_SIZE)?;
    ObjectDirectory::load(&prefix, max_files, max_name_len, |offset| {
        let bytes = ms.raw_read(offset, HEADER_SIZE, MMAP_HEADER_SIZE)?;
        ObjectHeader::decode(&bytes)
    })
}

/// A [`Writer`] holding exclusive admission on its object, released on drop.
pub struct SafeWriter<'s> {
    store: &'s Store,
    id: FileId,
    writer: Writer,
}

impl SafeWriter<'_> {
    /// Current cursor position.
    #[must_use]
    pub fn tell(&self) -> u64 {
        self.writer.tell()
    }

    /// Moves the cursor to `position`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SeekOutOfBounds`] if out of range.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.writer.seek(position)
    }

    /// Writes `buf` at the current cursor position and records throughput
    /// stats if enabled.
    ///
    /// # Errors
    ///
    /// Propagates allocation and I/O errors.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        let start = Instant::now();
        self.writer.write(buf)?;
        if self.store.config.timing_enabled {
            self.store.stats.record_write(buf.len() as u64, start.elapsed());
        }
        Ok(())
    }
}

impl Drop for SafeWriter<'_> {
    fn drop(&mut self) {
        let _ = self.store.dir.unlock(self.id, LockKind::Exclusive);
    }
}

/// A [`Reader`] holding shared admission on its object, released on drop.
pub struct SafeReader<'s> {
    store: &'s Store,
    id: FileId,
    reader: Reader,
}

impl SafeReader<'_> {
    /// Current cursor position.
    #[must_use]
    pub fn tell(&self) -> u64 {
        self.reader.tell()
    }

    /// Moves the cursor to `position`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SeekOutOfBounds`] if out of range.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.reader.seek(position)
    }

    /// Reads up to `len` bytes and records throughput stats if enabled.
    ///
    /// # Errors
    ///
    /// Propagates substrate I/O errors.
    pub fn read(&mut self, len: u64) -> Result<Vec<u8>> {
        let start = Instant::now();
        let bytes = self.reader.read(len)?;
        if self.store.config.timing_enabled {
            self.store.stats.record_read(bytes.len() as u64, start.elapsed());
        }
        Ok(bytes)
    }

    /// Reads exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ReadOutOfBounds`] if fewer remain.
    pub fn read_exact(&mut self, len: u64) -> Result<Vec<u8>> {
        let start = Instant::now();
        let bytes = self.reader.read_exact(len)?;
        if self.store.config.timing_enabled {
            self.store.stats.record_read(bytes.len() as u64, start.elapsed());
        }
        Ok(bytes)
    }

    /// Reads a little-endian `u64` and advances the cursor by 8 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ReadOutOfBounds`] if fewer than 8 bytes remain.
    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_exact(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }
}

impl Drop for SafeReader<'_> {
    fn drop(&mut self) {
        let _ = self.store.dir.unlock(self.id, LockKind::Shared);
    }
}

#[cfg(test)]
mod store_tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(tmp: &tempfile::TempDir) -> Store {
        let cfg = StoreConfig {
            max_files: 64,
            max_name_len: 32,
            ..StoreConfig::default()
        };
        Store::open(tmp.path().join("s.rsdb"), cfg).unwrap()
    }

    #[test]
    fn select_is_idempotent_and_persists_across_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("s.rsdb");
        let cfg = StoreConfig::default();
        {
            let store = Store::open(&path, cfg.clone()).unwrap();
            let id = store.select(b"alpha").unwrap();
            {
                let mut w = store.get_safe_writer(id).unwrap();
                w.write(b"payload").unwrap();
            }
            store.close().unwrap();
        }
        let reopened = Store::open(&path, cfg).unwrap();
        assert!(reopened.exists(b"alpha"));
        let id = reopened.select(b"alpha").unwrap();
        let mut r = reopened.get_safe_reader(id).unwrap();
        assert_eq!(r.read(7).unwrap(), b"payload");
    }

    #[test]
    fn unlink_removes_and_stats_track_writes() {
        let tmp = tempdir().unwrap();
        let store = open_store(&tmp);
        let id = store.select(b"temp").unwrap();
        {
            let mut w = store.get_safe_writer(id).unwrap();
            w.write(b"data").unwrap();
        }
        assert_eq!(store.count(StatKind::Writes), 1);
        assert!(store.unlink(id).unwrap() || !store.exists(b"temp"));
        assert!(!store.exists(b"temp"));
    }

    #[test]
    fn toggle_mvcc_flips_mode() {
        let tmp = tempdir().unwrap();
        let store = open_store(&tmp);
        assert!(!store.is_mvcc_enabled());
        assert!(store.toggle_mvcc());
        assert!(store.is_mvcc_enabled());
    }
}
