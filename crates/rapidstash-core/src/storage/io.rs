//! Typed, positioned readers and writers over a single object.

use super::alloc;
use super::directory::{FileId, ObjectDirectory};
use super::header::{ObjectHeader, HEADER_SIZE};
use super::mmap::{MmapSubstrate, HEADER_SIZE as MMAP_HEADER_SIZE};
use crate::error::{Error, Result};
use std::sync::Arc;

/// A cursor over one object's payload, growing the object's allocation as
/// needed on writes that extend past its current capacity.
pub struct Writer {
    dir: Arc<ObjectDirectory>,
    ms: Arc<MmapSubstrate>,
    id: FileId,
    position: u64,
    mvcc: bool,
}

/// A cursor over one object's payload. In MVCC mode a `Reader` opened while
/// a write is in flight is pinned to the header snapshot it resolved at
/// construction time, so later relocations are invisible to it.
pub struct Reader {
    ms: Arc<MmapSubstrate>,
    id: FileId,
    position: u64,
    pinned_header: ObjectHeader,
    pinned_offset: u64,
}

impl Writer {
    pub(crate) fn new(dir: Arc<ObjectDirectory>, ms: Arc<MmapSubstrate>, id: FileId, mvcc: bool) -> Self {
        Self {
            dir,
            ms,
            id,
            position: 0,
            mvcc,
        }
    }

    /// Current cursor position.
    #[must_use]
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Moves the cursor to `position`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SeekOutOfBounds`] if `position` exceeds the object's
    /// current live size.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        let header = self.dir.get_header(self.id)?;
        if position > header.live_size {
            return Err(Error::SeekOutOfBounds {
                position: position as i64,
                live_size: header.live_size,
            });
        }
        self.position = position;
        Ok(())
    }

    /// Writes `buf` at the current cursor position, relocating the object
    /// first if it would not otherwise fit, and advances the cursor.
    ///
    /// # Errors
    ///
    /// Propagates allocation and I/O errors.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        let header = self.dir.get_header(self.id)?;
        let required_extent = self.position + buf.len() as u64;

        let (offset, mut header) = if self.mvcc || required_extent > header.alloc_size {
            let preserve = self.position.min(header.live_size);
            alloc::relocate(&self.dir, &self.ms, self.id, required_extent, preserve)?
        } else {
            (self.dir.get_offset(self.id)?, header)
        };

        self.ms
            .raw_write(offset + HEADER_SIZE + self.position, buf)?;
        self.position += buf.len() as u64;
        header.live_size = header.live_size.max(self.position);
        write_header_at(&self.ms, offset, &header)?;
        self.dir.set_header(self.id, header)?;
        Ok(())
    }
}

impl Reader {
    pub(crate) fn new(dir: &ObjectDirectory, ms: Arc<MmapSubstrate>, id: FileId) -> Result<Self> {
        let pinned_header = dir.get_header(id)?;
        let pinned_offset = dir.get_offset(id)?;
        Ok(Self {
            ms,
            id,
            position: 0,
            pinned_header,
            pinned_offset,
        })
    }

    /// Current cursor position.
    #[must_use]
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// The object id this reader was opened against.
    #[must_use]
    pub fn file_id(&self) -> FileId {
        self.id
    }

    /// Moves the cursor to `position`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SeekOutOfBounds`] if `position` exceeds the pinned
    /// snapshot's live size.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.pinned_header.live_size {
            return Err(Error::SeekOutOfBounds {
                position: position as i64,
                live_size: self.pinned_header.live_size,
            });
        }
        self.position = position;
        Ok(())
    }

    /// Reads up to `len` bytes starting at the current cursor, clamped to
    /// the pinned snapshot's live size, and advances the cursor by however
    /// many bytes were actually read.
    ///
    /// Unlike [`Self::read_exact`], a request that runs past the live size
    /// is not an error: it returns however many bytes remain (possibly
    /// zero) rather than propagating [`Error::ReadOutOfBounds`].
    ///
    /// # Errors
    ///
    /// Propagates substrate I/O errors.
    pub fn read(&mut self, len: u64) -> Result<Vec<u8>> {
        let remaining = self.pinned_header.live_size.saturating_sub(self.position);
        let clamped = len.min(remaining);
        if clamped == 0 {
            return Ok(Vec::new());
        }
        let bytes = self.ms.raw_read(
            self.pinned_offset + HEADER_SIZE + self.position,
            clamped,
            MMAP_HEADER_SIZE,
        )?;
        self.position += clamped;
        Ok(bytes)
    }

    /// Reads exactly `len` bytes, failing if the pinned snapshot does not
    /// have that many bytes remaining.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOutOfBounds`] if fewer than `len` bytes remain.
    pub fn read_exact(&mut self, len: u64) -> Result<Vec<u8>> {
        let remaining = self.pinned_header.live_size.saturating_sub(self.position);
        if len > remaining {
            return Err(Error::ReadOutOfBounds {
                position: self.position,
                len,
                live_size: self.pinned_header.live_size,
            });
        }
        self.read(len)
    }

    /// Reads a little-endian `u64` and advances the cursor by 8 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOutOfBounds`] if fewer than 8 bytes remain.
    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_exact(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// The version this reader is pinned to.
    #[must_use]
    pub fn pinned_version(&self) -> i32 {
        self.pinned_header.version
    }
}

fn write_header_at(ms: &MmapSubstrate, offset: u64, header: &ObjectHeader) -> Result<()> {
    ms.raw_write(offset, &header.encode())
}

#[cfg(test)]
mod io_tests {
    use super::*;
    use crate::storage::alloc::select_or_create;
    use tempfile::tempdir;

    fn fresh() -> (tempfile::TempDir, Arc<ObjectDirectory>, Arc<MmapSubstrate>, FileId) {
        let tmp = tempdir().unwrap();
        let dir = Arc::new(ObjectDirectory::new_empty(64, 32));
        let ms = Arc::new(
            MmapSubstrate::open(tmp.path().join("s.rsdb"), 4096, 1.25, u32::MAX as u64).unwrap(),
        );
        let id = select_or_create(&dir, &ms, b"obj", 64).unwrap();
        (tmp, dir, ms, id)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_tmp, dir, ms, id) = fresh();
        let mut w = Writer::new(Arc::clone(&dir), Arc::clone(&ms), id, false);
        w.write(b"hello").unwrap();

        let mut r = Reader::new(&dir, Arc::clone(&ms), id).unwrap();
        let back = r.read(5).unwrap();
        assert_eq!(&back, b"hello");
    }

    #[test]
    fn read_past_live_size_returns_short_buffer_not_error() {
        let (_tmp, dir, ms, id) = fresh();
        let mut w = Writer::new(Arc::clone(&dir), Arc::clone(&ms), id, false);
        w.write(b"ab").unwrap();

        let mut r = Reader::new(&dir, Arc::clone(&ms), id).unwrap();
        let back = r.read(100).unwrap();
        assert_eq!(&back, b"ab");
    }

    #[test]
    fn write_past_alloc_size_relocates_and_preserves_prefix() {
        let (_tmp, dir, ms, id) = fresh();
        let mut w = Writer::new(Arc::clone(&dir), Arc::clone(&ms), id, false);
        w.write(b"0123456789").unwrap();
        let big = vec![b'x'; 200];
        w.seek(10).unwrap();
        w.write(&big).unwrap();

        let mut r = Reader::new(&dir, Arc::clone(&ms), id).unwrap();
        let prefix = r.read(10).unwrap();
        assert_eq!(&prefix, b"0123456789");
    }

    #[test]
    fn mvcc_reader_is_pinned_to_snapshot_taken_at_open() {
        let (_tmp, dir, ms, id) = fresh();
        let mut w = Writer::new(Arc::clone(&dir), Arc::clone(&ms), id, true);
        w.write(b"v1").unwrap();

        let mut r = Reader::new(&dir, Arc::clone(&ms), id).unwrap();
        w.write(b"v2-longer").unwrap();

        let back = r.read(2).unwrap();
        assert_eq!(&back, b"v1");
    }
}
