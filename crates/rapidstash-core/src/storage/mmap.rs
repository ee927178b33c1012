//! Memory-mapped backing file substrate.
//!
//! Presents the backing file as a contiguous, growable byte region past a
//! small fixed header. Exactly one growth can be in flight at a time;
//! readers and writers that are not growing synchronize only against that
//! growth, not against each other — callers (the allocator/directory) are
//! responsible for ensuring concurrent writers never target overlapping
//! byte ranges.

use crate::error::{Error, Result};
use memmap2::MmapMut;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::{debug, warn};

/// Magic literal written at the start of every backing file.
const MAGIC: &[u8] = b"\x00\x00\rRapidStash\r\xAD";
/// Current on-disk format version.
const FORMAT_VERSION: u16 = 1;
/// Alignment (in bytes) new map sizes are rounded up to.
const GROW_ALIGN: u64 = 16;

/// Size of the persistent mmap header: magic + format version + recorded size.
pub const HEADER_SIZE: u64 = MAGIC.len() as u64 + 2 + 8;

/// The growable, memory-mapped backing file.
pub struct MmapSubstrate {
    file: File,
    mmap: RwLock<MmapMut>,
    max_map_size: u64,
    growth_factor: f64,
    /// True if the backing file did not exist before this `open()` call.
    is_new: bool,
}

impl MmapSubstrate {
    /// Opens (creating if necessary) the backing file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OpenFailed`] if the file cannot be created/opened or
    /// mapped, [`Error::SanityCheckFailed`] if an existing file's magic does
    /// not match, or [`Error::VersionMismatch`] if its recorded format
    /// version is not one this build understands.
    pub fn open<P: AsRef<Path>>(
        path: P,
        initial_map_size: u64,
        growth_factor: f64,
        max_map_size: u64,
    ) -> Result<Self> {
        let path = path.as_ref();
        let existed = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::OpenFailed(e.to_string()))?;

        let is_new = !existed;
        if is_new {
            debug!(path = %path.display(), "creating new backing file");
            let size = initial_map_size.max(HEADER_SIZE).next_multiple_of(GROW_ALIGN);
            file.set_len(size)
                .map_err(|e| Error::OpenFailed(e.to_string()))?;
        } else {
            debug!(path = %path.display(), "opening existing backing file");
        }

        // SAFETY: `file` is open for read/write and has a non-zero length
        // (just set above for a new file, or pre-existing on disk otherwise).
        let mut mmap =
            unsafe { MmapMut::map_mut(&file) }.map_err(|e| Error::OpenFailed(e.to_string()))?;

        if is_new {
            write_header(&mut mmap, mmap.len() as u64);
        } else {
            sanity_check(&mmap)?;
            let recorded = read_recorded_size(&mmap);
            let actual = file
                .metadata()
                .map_err(|e| Error::OpenFailed(e.to_string()))?
                .len();
            if recorded != actual {
                warn!(
                    recorded,
                    actual, "recorded map size does not match on-disk file size"
                );
            }
        }

        Ok(Self {
            file,
            mmap: RwLock::new(mmap),
            max_map_size,
            growth_factor,
            is_new,
        })
    }

    /// True if the backing file was created (as opposed to opened) by this
    /// call to [`Self::open`].
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Current size of the mapped region, including the header.
    #[must_use]
    pub fn map_size(&self) -> u64 {
        self.mmap.read().len() as u64
    }

    /// Writes `buf` at `logical_pos` (measured from just past the mmap
    /// header), growing the backing file first if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackingGrowFailed`] if a required grow fails.
    pub fn raw_write(&self, logical_pos: u64, buf: &[u8]) -> Result<()> {
        let start = HEADER_SIZE + logical_pos;
        let end = start + buf.len() as u64;

        if end > self.map_size() {
            self.grow(end)?;
        }

        // SAFETY: `end <= map_size()` is guaranteed by the grow above (grow
        // only returns once the map covers `end`), and callers never issue
        // two concurrent writes to overlapping `[start, end)` ranges (the
        // allocator/directory mutex upstream enforces that). Holding the
        // read lock here pins the mapping against a concurrent remap.
        let mmap = self.mmap.read();
        unsafe {
            let dst = mmap.as_ptr().add(start as usize).cast_mut();
            std::ptr::copy_nonoverlapping(buf.as_ptr(), dst, buf.len());
        }
        Ok(())
    }

    /// Reads `len` bytes starting at `logical_pos` (measured from `base`,
    /// default [`HEADER_SIZE`]), returning a freshly allocated buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOutOfBounds`] if the read would extend past the
    /// current map size.
    pub fn raw_read(&self, logical_pos: u64, len: u64, base: u64) -> Result<Vec<u8>> {
        let start = base + logical_pos;
        let end = start + len;

        let mmap = self.mmap.read();
        if end > mmap.len() as u64 {
            return Err(Error::ReadOutOfBounds {
                position: logical_pos,
                len,
                live_size: mmap.len() as u64,
            });
        }
        Ok(mmap[start as usize..end as usize].to_vec())
    }

    /// Grows the backing file so that `required_end` is mappable.
    fn grow(&self, required_end: u64) -> Result<()> {
        let mut mmap = self.mmap.write();
        let current = mmap.len() as u64;
        if required_end <= current {
            // Another thread already grew past what we need.
            return Ok(());
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let grown = ((required_end as f64) * self.growth_factor).ceil() as u64;
        let new_size = grown.next_multiple_of(GROW_ALIGN).min(self.max_map_size);

        if new_size < required_end {
            return Err(Error::BackingGrowFailed {
                required_end,
                source: std::io::Error::new(
                    std::io::ErrorKind::OutOfMemory,
                    "required size exceeds configured max_map_size",
                ),
            });
        }

        debug!(from = current, to = new_size, "growing backing file");

        mmap.flush()
            .map_err(|e| Error::BackingGrowFailed { required_end, source: e })?;
        self.file
            .set_len(new_size)
            .map_err(|e| Error::BackingGrowFailed { required_end, source: e })?;

        // SAFETY: `file` was just resized to `new_size` via `set_len` above.
        *mmap = unsafe { MmapMut::map_mut(&self.file) }
            .map_err(|e| Error::BackingGrowFailed { required_end, source: e })?;

        write_header(&mut mmap, new_size);
        Ok(())
    }

    /// Rewrites the mmap header so its recorded size matches the current
    /// map size, flushes, and drops the mapping.
    pub fn shutdown(&self) -> Result<()> {
        let mut mmap = self.mmap.write();
        let size = mmap.len() as u64;
        write_header(&mut mmap, size);
        mmap.flush().map_err(Error::Io)?;
        Ok(())
    }
}

fn write_header(mmap: &mut MmapMut, map_size: u64) {
    let mut buf = [0u8; HEADER_SIZE as usize];
    buf[..MAGIC.len()].copy_from_slice(MAGIC);
    let mut off = MAGIC.len();
    buf[off..off + 2].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    off += 2;
    buf[off..off + 8].copy_from_slice(&map_size.to_le_bytes());
    mmap[..HEADER_SIZE as usize].copy_from_slice(&buf);
}

fn sanity_check(mmap: &MmapMut) -> Result<()> {
    if mmap.len() < HEADER_SIZE as usize || &mmap[..MAGIC.len()] != MAGIC {
        return Err(Error::SanityCheckFailed);
    }
    let mut off = MAGIC.len();
    let version = u16::from_le_bytes([mmap[off], mmap[off + 1]]);
    if version != FORMAT_VERSION {
        return Err(Error::VersionMismatch {
            found: version,
            expected: FORMAT_VERSION,
        });
    }
    off += 2;
    let _ = off;
    Ok(())
}

fn read_recorded_size(mmap: &MmapMut) -> u64 {
    let off = MAGIC.len() + 2;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&mmap[off..off + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod mmap_tests {
    use super::*;
    use tempfile::tempdir;

    fn backing_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join("store.rsdb")
    }

    #[test]
    fn new_file_is_flagged_new_and_sane() {
        let dir = tempdir().unwrap();
        let ms = MmapSubstrate::open(backing_path(&dir), 4096, 1.25, u32::MAX as u64).unwrap();
        assert!(ms.is_new());
        assert!(ms.map_size() >= HEADER_SIZE);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let ms = MmapSubstrate::open(backing_path(&dir), 4096, 1.25, u32::MAX as u64).unwrap();
        ms.raw_write(0, b"hello world").unwrap();
        let back = ms.raw_read(0, 11, HEADER_SIZE).unwrap();
        assert_eq!(&back, b"hello world");
    }

    #[test]
    fn write_beyond_map_size_grows_and_is_readable() {
        let dir = tempdir().unwrap();
        let ms = MmapSubstrate::open(backing_path(&dir), 4096, 1.25, u32::MAX as u64).unwrap();
        let required_end = HEADER_SIZE + 10 * 1024 * 1024;
        let payload = vec![0xABu8; 1024];
        ms.raw_write(10 * 1024 * 1024, &payload).unwrap();
        assert!(ms.map_size() >= required_end);
        let back = ms.raw_read(10 * 1024 * 1024, 1024, HEADER_SIZE).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn read_out_of_bounds_errors() {
        let dir = tempdir().unwrap();
        let ms = MmapSubstrate::open(backing_path(&dir), 4096, 1.25, u32::MAX as u64).unwrap();
        let err = ms.raw_read(ms.map_size(), 16, HEADER_SIZE).unwrap_err();
        assert!(matches!(err, Error::ReadOutOfBounds { .. }));
    }

    #[test]
    fn reopen_preserves_sanity_and_data() {
        let dir = tempdir().unwrap();
        let path = backing_path(&dir);
        {
            let ms = MmapSubstrate::open(&path, 4096, 1.25, u32::MAX as u64).unwrap();
            ms.raw_write(0, b"persisted").unwrap();
            ms.shutdown().unwrap();
        }
        let ms = MmapSubstrate::open(&path, 4096, 1.25, u32::MAX as u64).unwrap();
        assert!(!ms.is_new());
        let back = ms.raw_read(0, 9, HEADER_SIZE).unwrap();
        assert_eq!(&back, b"persisted");
    }

    #[test]
    fn corrupted_magic_fails_sanity_check() {
        let dir = tempdir().unwrap();
        let path = backing_path(&dir);
        {
            let ms = MmapSubstrate::open(&path, 4096, 1.25, u32::MAX as u64).unwrap();
            ms.shutdown().unwrap();
        }
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut f = OpenOptions::new().write(true).open(&path).unwrap();
            f.seek(SeekFrom::Start(0)).unwrap();
            f.write_all(&[0xFFu8; 4]).unwrap();
        }
        let err = MmapSubstrate::open(&path, 4096, 1.25, u32::MAX as u64).unwrap_err();
        assert!(matches!(err, Error::SanityCheckFailed));
    }
}
