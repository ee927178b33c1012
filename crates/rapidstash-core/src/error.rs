//! Error types for `rapidstash-core`.

use thiserror::Error;

/// Errors produced by the storage engine.
#[derive(Error, Debug)]
pub enum Error {
    /// The backing file could not be created, opened, or mapped.
    #[error("failed to open backing file: {0}")]
    OpenFailed(String),

    /// The mmap header's magic bytes did not match the expected literal.
    #[error("sanity check failed: backing file is not a RapidStash file")]
    SanityCheckFailed,

    /// The mmap header's format version did not match the current build.
    #[error("version mismatch: file is format version {found}, expected {expected}")]
    VersionMismatch {
        /// Version recorded in the file.
        found: u16,
        /// Version this build understands.
        expected: u16,
    },

    /// A payload region could not be allocated.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// A `seek` resolved to a position outside `[0, live_size]`.
    #[error("seek out of bounds: position {position} exceeds live size {live_size}")]
    SeekOutOfBounds {
        /// Position that was requested.
        position: i64,
        /// Current live size of the object.
        live_size: u64,
    },

    /// A `read` extended past the readable bound of the resolved version.
    #[error("read out of bounds: position {position} + len {len} exceeds live size {live_size}")]
    ReadOutOfBounds {
        /// Position the read started at.
        position: u64,
        /// Number of bytes requested.
        len: u64,
        /// Live size of the version being read.
        live_size: u64,
    },

    /// The on-disk directory failed to round-trip (corrupt header, cyclic
    /// free-list/predecessor chain, or inconsistent name index).
    #[error("directory corrupt: {0}")]
    DirectoryCorrupt(String),

    /// `next_file_id` reached the configured maximum.
    #[error("too many files: limit of {0} file ids reached")]
    TooManyFiles(u32),

    /// The backing file could not be grown to the required size.
    #[error("failed to grow backing file to {required_end} bytes: {source}")]
    BackingGrowFailed {
        /// Offset the grow needed to cover.
        required_end: u64,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An unnamed object was requested by an unknown `FileId`.
    #[error("no such file id: {0}")]
    UnknownFileId(u32),

    /// Wraps any other I/O failure (file creation, `set_len`, etc).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for storage-engine operations.
pub type Result<T> = std::result::Result<T, Error>;
