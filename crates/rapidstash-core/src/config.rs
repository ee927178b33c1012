//! Store-level configuration.

/// Options controlling a [`crate::Store`]'s behavior.
///
/// Mirrors the configuration surface described for RapidStash: growth
/// policy, MVCC mode, instrumentation, and directory sizing limits.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Enable MVCC: every write relocates, and concurrent readers may
    /// observe a predecessor version while a writer holds the object.
    pub mvcc_enabled: bool,
    /// Whether to accumulate timing statistics for reads/writes.
    pub timing_enabled: bool,
    /// Initial size of a freshly-created backing file, in bytes.
    pub initial_map_size: u64,
    /// Multiplicative growth factor applied when the map must grow.
    pub growth_factor: f64,
    /// Hard ceiling on backing file size, in bytes.
    pub max_map_size: u64,
    /// Maximum number of distinct named objects the directory can hold.
    pub max_files: u32,
    /// Maximum length, in bytes, of an object name (longer names truncate).
    pub max_name_len: u32,
    /// Minimum payload region size granted to a brand-new object.
    pub min_alloc: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mvcc_enabled: false,
            timing_enabled: true,
            initial_map_size: 4 * 1024,
            growth_factor: 1.25,
            max_map_size: u32::MAX as u64,
            max_files: 1_000_000,
            max_name_len: 32,
            min_alloc: 128,
        }
    }
}
