//! Payload allocator: bump allocation, header free-list reuse, relocation,
//! and unlink-with-merge.

use super::directory::{FileId, ObjectDirectory};
use super::header::{ObjectHeader, HEADER_SIZE};
use super::mmap::{MmapSubstrate, HEADER_SIZE as MMAP_HEADER_SIZE};
use crate::error::{Error, Result};
use tracing::debug;

fn read_header_at(ms: &MmapSubstrate, offset: u64) -> Result<ObjectHeader> {
    let bytes = ms.raw_read(offset, HEADER_SIZE, MMAP_HEADER_SIZE)?;
    ObjectHeader::decode(&bytes)
}

fn write_header_at(ms: &MmapSubstrate, offset: u64, header: &ObjectHeader) -> Result<()> {
    ms.raw_write(offset, &header.encode())
}

/// Pops the head of the free list if it is large enough to satisfy
/// `min_alloc`, dequeuing it by splicing `free_list_head_offset` to the
/// popped node's own free-list link. A head too small to satisfy the
/// request is left in place (reused on some future `unlink` neighbor
/// check instead) rather than discarded.
fn pop_free_slot(
    dir: &ObjectDirectory,
    ms: &MmapSubstrate,
    min_alloc: u64,
) -> Result<Option<(u64, ObjectHeader)>> {
    let head = dir.inner.lock().free_list_head_offset;
    if head == 0 {
        return Ok(None);
    }
    let header = read_header_at(ms, head)?;
    if header.next_offset == head {
        return Err(Error::DirectoryCorrupt(format!(
            "free-list head at offset {head} points to itself"
        )));
    }
    if header.alloc_size < min_alloc {
        return Ok(None);
    }
    let mut inner = dir.inner.lock();
    if inner.free_list_head_offset == head {
        inner.free_list_head_offset = header.next_offset;
    } else {
        // Another thread already popped and replaced the head between our
        // read and this lock; give up this round and bump-allocate instead.
        return Ok(None);
    }
    Ok(Some((head, header)))
}

/// Creates a new object named `name`, or returns its existing `FileId`.
///
/// # Errors
///
/// Returns [`Error::TooManyFiles`] if the directory is at capacity.
pub fn select_or_create(
    dir: &ObjectDirectory,
    ms: &MmapSubstrate,
    name: &[u8],
    min_alloc: u64,
) -> Result<FileId> {
    let name = dir.normalize_name(name);
    if let Some(id) = dir.lookup(name) {
        return Ok(id);
    }

    {
        let inner = dir.inner.lock();
        if inner.next_file_id >= dir.max_files() {
            return Err(Error::TooManyFiles(dir.max_files()));
        }
    }

    // Try to reuse a free-list slot large enough to hold min_alloc before
    // bump-allocating a fresh region. The slot's full reserved alloc_size
    // is kept (never shrunk to min_alloc) since that's the extent actually
    // reserved for it on disk.
    if let Some((offset, old)) = pop_free_slot(dir, ms, min_alloc)? {
        let header = ObjectHeader::new(name, old.alloc_size);
        write_header_at(ms, offset, &header)?;

        let mut inner = dir.inner.lock();
        let id = inner.next_file_id;
        inner.next_file_id += 1;
        inner.num_files += 1;
        inner.by_id.push(offset);
        inner.headers.push(header);
        inner.by_name.insert(name.to_vec(), id);
        inner.locks.push(super::directory::LockCounters::default());
        debug!(id, offset, "reused free-list slot for new object");
        return Ok(id);
    }

    bump_allocate(dir, ms, name, min_alloc)
}

fn bump_allocate(
    dir: &ObjectDirectory,
    ms: &MmapSubstrate,
    name: &[u8],
    alloc_size: u64,
) -> Result<FileId> {
    let mut inner = dir.inner.lock();
    let offset = inner.next_raw_spot;
    inner.next_raw_spot += HEADER_SIZE + alloc_size;

    let header = ObjectHeader::new(name, alloc_size);
    let id = inner.next_file_id;
    inner.next_file_id += 1;
    inner.num_files += 1;
    inner.by_id.push(offset);
    inner.headers.push(header.clone());
    inner.by_name.insert(name.to_vec(), id);
    inner.locks.push(super::directory::LockCounters::default());
    drop(inner);

    write_header_at(ms, offset, &header)?;
    debug!(id, offset, alloc_size, "bump-allocated new object");
    Ok(id)
}

/// Relocates `id`'s payload to a fresh region sized
/// `max(required_extent, old_alloc)`, preserving the first `preserve_bytes`
/// bytes of the old payload, linking the new header's `next_offset` to the
/// old header's offset, and bumping `version`.
///
/// # Errors
///
/// Propagates I/O and bounds errors from the substrate.
pub fn relocate(
    dir: &ObjectDirectory,
    ms: &MmapSubstrate,
    id: FileId,
    required_extent: u64,
    preserve_bytes: u64,
) -> Result<(u64, ObjectHeader)> {
    let (old_offset, old_header) = {
        let inner = dir.inner.lock();
        let offset = *inner.by_id.get(id as usize).ok_or(Error::UnknownFileId(id))?;
        let header = inner.headers[id as usize].clone();
        (offset, header)
    };

    let new_alloc = required_extent.max(old_header.alloc_size);
    let new_offset = {
        let mut inner = dir.inner.lock();
        let spot = inner.next_raw_spot;
        inner.next_raw_spot += HEADER_SIZE + new_alloc;
        spot
    };

    if preserve_bytes > 0 {
        let chunk = ms.raw_read(old_offset + HEADER_SIZE, preserve_bytes, MMAP_HEADER_SIZE)?;
        ms.raw_write(new_offset + HEADER_SIZE, &chunk)?;
    }

    let new_header = ObjectHeader {
        name: old_header.name,
        next_offset: old_offset,
        live_size: old_header.live_size,
        alloc_size: new_alloc,
        version: old_header.version + 1,
        timestamp: super::header::now_millis(),
    };
    write_header_at(ms, new_offset, &new_header)?;

    {
        let mut inner = dir.inner.lock();
        inner.by_id[id as usize] = new_offset;
        inner.headers[id as usize] = new_header.clone();
    }

    debug!(
        id,
        old_offset,
        new_offset,
        version = new_header.version,
        "relocated object"
    );
    Ok((new_offset, new_header))
}

/// Removes `name`/`id` from the directory, swapping the last live id into
/// the vacated slot and attempting to merge the freed region into an
/// immediately-following live neighbor.
///
/// Returns whether a merge occurred.
///
/// # Errors
///
/// Propagates I/O errors encountered while reading/writing headers.
pub fn unlink(dir: &ObjectDirectory, ms: &MmapSubstrate, id: FileId) -> Result<bool> {
    let (victim_offset, victim_header, last_id) = {
        let inner = dir.inner.lock();
        let victim_offset = *inner.by_id.get(id as usize).ok_or(Error::UnknownFileId(id))?;
        let victim_header = inner.headers[id as usize].clone();
        let last_id = inner.num_files - 1;
        (victim_offset, victim_header, last_id)
    };

    // Neighbor-merge: the record immediately following the victim's payload
    // region is a live object iff its name round-trips back to its own
    // offset through `by_name`. The spec notes (see DESIGN.md) this misses
    // orphaned neighbors — that is a known, accepted limitation.
    let neighbor_header_offset = victim_offset + HEADER_SIZE + victim_header.alloc_size;
    let merged = try_merge_neighbor(dir, ms, neighbor_header_offset, victim_header.alloc_size)?;

    if !merged {
        push_free_slot(dir, ms, victim_offset, victim_header.alloc_size)?;
    }

    {
        let mut inner = dir.inner.lock();
        let name = victim_header.name_str().to_vec();
        inner.by_name.remove(&name);

        if id != last_id {
            let last_offset = inner.by_id[last_id as usize];
            let last_header = inner.headers[last_id as usize].clone();
            inner.by_id[id as usize] = last_offset;
            inner.headers[id as usize] = last_header.clone();
            inner.locks[id as usize] = inner.locks[last_id as usize];
            *inner
                .by_name
                .get_mut(last_header.name_str())
                .expect("swapped name must still be registered") = id;
        }

        inner.by_id.truncate(last_id as usize);
        inner.headers.truncate(last_id as usize);
        inner.locks.truncate(last_id as usize);
        inner.num_files -= 1;
        inner.next_file_id -= 1;
    }

    debug!(id, merged, "unlinked object");
    Ok(merged)
}

/// Pushes `offset` onto the free list, reusing its `next_offset` field as
/// the free-list link rather than an MVCC predecessor pointer.
fn push_free_slot(dir: &ObjectDirectory, ms: &MmapSubstrate, offset: u64, alloc_size: u64) -> Result<()> {
    let old_head = {
        let mut inner = dir.inner.lock();
        let old_head = inner.free_list_head_offset;
        inner.free_list_head_offset = offset;
        old_head
    };
    let free_header = ObjectHeader {
        name: [0u8; super::header::MAX_NAME_LEN],
        next_offset: old_head,
        live_size: 0,
        alloc_size,
        version: -1,
        timestamp: 0,
    };
    write_header_at(ms, offset, &free_header)
}

fn try_merge_neighbor(
    dir: &ObjectDirectory,
    ms: &MmapSubstrate,
    neighbor_offset: u64,
    victim_region_size: u64,
) -> Result<bool> {
    let inner = dir.inner.lock();
    let Some(neighbor_id) = inner.by_id.iter().position(|&o| o == neighbor_offset) else {
        return Ok(false);
    };
    let neighbor_id = neighbor_id as FileId;
    let neighbor_header = inner.headers[neighbor_id as usize].clone();
    drop(inner);

    // Absorb the freed region: copy the neighbor's live payload forward to
    // the victim's old offset, extend its alloc_size by the victim's whole
    // slot (header + payload), and repoint the directory at the new
    // (earlier) location.
    let new_alloc = neighbor_header.alloc_size + HEADER_SIZE + victim_region_size;
    let victim_offset = neighbor_offset - victim_region_size - HEADER_SIZE;

    if neighbor_header.live_size > 0 {
        let live =
            ms.raw_read(neighbor_offset + HEADER_SIZE, neighbor_header.live_size, MMAP_HEADER_SIZE)?;
        ms.raw_write(victim_offset + HEADER_SIZE, &live)?;
    }

    let new_header = ObjectHeader {
        alloc_size: new_alloc,
        ..neighbor_header
    };
    write_header_at(ms, victim_offset, &new_header)?;

    let mut inner = dir.inner.lock();
    inner.by_id[neighbor_id as usize] = victim_offset;
    inner.headers[neighbor_id as usize] = new_header;
    Ok(true)
}

#[cfg(test)]
mod alloc_tests {
    use super::*;
    use tempfile::tempdir;

    fn fresh(dir: &tempfile::TempDir) -> (ObjectDirectory, MmapSubstrate) {
        let od = ObjectDirectory::new_empty(64, 32);
        let ms = MmapSubstrate::open(dir.path().join("s.rsdb"), 4096, 1.25, u32::MAX as u64).unwrap();
        (od, ms)
    }

    #[test]
    fn select_or_create_is_idempotent() {
        let tmp = tempdir().unwrap();
        let (od, ms) = fresh(&tmp);
        let id1 = select_or_create(&od, &ms, b"alpha", 128).unwrap();
        let id2 = select_or_create(&od, &ms, b"alpha", 128).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(od.len(), 1);
    }

    #[test]
    fn relocate_links_predecessor_and_bumps_version() {
        let tmp = tempdir().unwrap();
        let (od, ms) = fresh(&tmp);
        let id = select_or_create(&od, &ms, b"f", 16).unwrap();
        let old_offset = od.get_offset(id).unwrap();
        let (new_offset, header) = relocate(&od, &ms, id, 4096, 0).unwrap();
        assert_ne!(new_offset, old_offset);
        assert_eq!(header.next_offset, old_offset);
        assert_eq!(header.version, 0);
    }

    #[test]
    fn unlink_swaps_last_id_into_vacated_slot() {
        let tmp = tempdir().unwrap();
        let (od, ms) = fresh(&tmp);
        let first = select_or_create(&od, &ms, b"first", 128).unwrap();
        let _second = select_or_create(&od, &ms, b"second", 32).unwrap();
        assert_eq!(od.len(), 2);
        unlink(&od, &ms, first).unwrap();
        assert_eq!(od.len(), 1);
        assert!(od.exists(b"second"));
        assert!(!od.exists(b"first"));
    }
}
