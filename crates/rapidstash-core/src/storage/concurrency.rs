//! Per-object reader/writer admission gating.
//!
//! Non-MVCC mode admits either any number of concurrent readers or exactly
//! one writer with no readers (classic single-writer/multi-reader). MVCC
//! mode relaxes this: a writer may proceed alongside existing readers
//! because every write relocates, leaving in-flight readers pinned to the
//! predecessor version they already resolved.

use super::directory::{FileId, ObjectDirectory, CONDVAR_SHARDS};
use crate::error::{Error, Result};
use std::time::Duration;

/// Which kind of admission a caller is requesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// Non-exclusive: any number may hold this concurrently (subject to
    /// writer exclusion in non-MVCC mode).
    Shared,
    /// Exclusive in non-MVCC mode; merely serialized against other writers
    /// in MVCC mode.
    Exclusive,
}

/// How long a blocked acquisition waits before re-checking for spurious
/// wakeup or shutdown before retrying, bounding worst-case wakeup latency.
const WAIT_QUANTUM: Duration = Duration::from_millis(50);

fn shard_for(id: FileId) -> usize {
    (id as usize) % CONDVAR_SHARDS
}

/// True if admitting `kind` on an object currently holding `readers`/
/// `writers` would violate the mode's exclusion rule.
fn blocks(mvcc: bool, kind: LockKind, readers: u32, writers: u32) -> bool {
    match (mvcc, kind) {
        (false, LockKind::Shared) => writers > 0,
        (false, LockKind::Exclusive) => readers > 0 || writers > 0,
        (true, LockKind::Shared) => false,
        (true, LockKind::Exclusive) => writers > 0,
    }
}

impl ObjectDirectory {
    /// Blocks until `kind` can be admitted on `id`, then records the
    /// admission and returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFileId`] if `id` is not a live id.
    pub fn lock(&self, id: FileId, kind: LockKind, mvcc: bool) -> Result<()> {
        let shard = shard_for(id);
        let mut inner = self.inner.lock();
        loop {
            let counters = inner
                .locks
                .get(id as usize)
                .copied()
                .ok_or(Error::UnknownFileId(id))?;
            if !blocks(mvcc, kind, counters.reader_count, counters.writer_count) {
                let counters = &mut inner.locks[id as usize];
                match kind {
                    LockKind::Shared => counters.reader_count += 1,
                    LockKind::Exclusive => counters.writer_count += 1,
                }
                return Ok(());
            }
            self.condvars[shard].wait_for(&mut inner, WAIT_QUANTUM);
        }
    }

    /// Releases a previously acquired `kind` admission on `id` and wakes any
    /// waiters on its condvar shard.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFileId`] if `id` is not a live id.
    pub fn unlock(&self, id: FileId, kind: LockKind) -> Result<()> {
        let shard = shard_for(id);
        {
            let mut inner = self.inner.lock();
            let counters = inner
                .locks
                .get_mut(id as usize)
                .ok_or(Error::UnknownFileId(id))?;
            match kind {
                LockKind::Shared => counters.reader_count = counters.reader_count.saturating_sub(1),
                LockKind::Exclusive => {
                    counters.writer_count = counters.writer_count.saturating_sub(1);
                }
            }
        }
        self.condvars[shard].notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod concurrency_tests {
    use super::*;
    use crate::storage::alloc::select_or_create;
    use crate::storage::mmap::MmapSubstrate;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn fresh_store() -> (tempfile::TempDir, Arc<ObjectDirectory>, Arc<MmapSubstrate>, FileId) {
        let dir = tempdir().unwrap();
        let od = Arc::new(ObjectDirectory::new_empty(64, 32));
        let ms = Arc::new(
            MmapSubstrate::open(dir.path().join("s.rsdb"), 4096, 1.25, u32::MAX as u64).unwrap(),
        );
        let id = select_or_create(&od, &ms, b"obj", 64).unwrap();
        (dir, od, ms, id)
    }

    #[test]
    fn non_mvcc_writer_excludes_readers() {
        let (_dir, od, _ms, id) = fresh_store();
        od.lock(id, LockKind::Exclusive, false).unwrap();
        let counters = od.inner.lock().locks[id as usize];
        assert_eq!(counters.writer_count, 1);
        od.unlock(id, LockKind::Exclusive).unwrap();
        od.lock(id, LockKind::Shared, false).unwrap();
        od.unlock(id, LockKind::Shared).unwrap();
    }

    #[test]
    fn mvcc_writer_does_not_block_existing_readers() {
        let (_dir, od, _ms, id) = fresh_store();
        od.lock(id, LockKind::Shared, true).unwrap();
        od.lock(id, LockKind::Exclusive, true).unwrap();
        let counters = od.inner.lock().locks[id as usize];
        assert_eq!(counters.reader_count, 1);
        assert_eq!(counters.writer_count, 1);
        od.unlock(id, LockKind::Shared).unwrap();
        od.unlock(id, LockKind::Exclusive).unwrap();
    }

    #[test]
    fn concurrent_readers_and_writer_are_mutually_exclusive_non_mvcc() {
        let (_dir, od, _ms, id) = fresh_store();
        let concurrent_peak = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let od = Arc::clone(&od);
            let peak = Arc::clone(&concurrent_peak);
            handles.push(std::thread::spawn(move || {
                od.lock(id, LockKind::Exclusive, false).unwrap();
                let cur = od.inner.lock().locks[id as usize].writer_count;
                peak.fetch_max(u32::from(cur), Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(2));
                od.unlock(id, LockKind::Exclusive).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(concurrent_peak.load(Ordering::SeqCst), 1);
    }
}
