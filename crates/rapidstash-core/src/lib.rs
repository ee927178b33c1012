//! `rapidstash-core`: an embedded, memory-mapped, key-addressed object
//! store with optional MVCC.
//!
//! A [`Store`] maps named objects onto regions of a single growable backing
//! file. Each object carries a small fixed header (name, predecessor
//! pointer, live/alloc size, version, timestamp) immediately before its
//! payload. In the default mode, writes update in place when they fit and
//! relocate (bump-allocating a fresh region and copy-forwarding) when they
//! don't; with MVCC enabled every write relocates, so a reader opened
//! before a concurrent write completes keeps seeing the version it
//! resolved at open time.
//!
//! ```no_run
//! use rapidstash_core::{Store, StoreConfig};
//!
//! # fn main() -> rapidstash_core::Result<()> {
//! let store = Store::open("example.rsdb", StoreConfig::default())?;
//! let id = store.select(b"greeting")?;
//! {
//!     let mut w = store.get_safe_writer(id)?;
//!     w.write(b"hello, rapidstash")?;
//! }
//! let mut r = store.get_safe_reader(id)?;
//! let bytes = r.read(17)?;
//! assert_eq!(&bytes, b"hello, rapidstash");
//! store.close()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod stats;
mod store;
pub mod storage;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use stats::StatKind;
pub use storage::concurrency::LockKind;
pub use storage::directory::FileId;
pub use storage::header::ObjectHeader;
pub use storage::io::{Reader, Writer};
pub use store::{SafeReader, SafeWriter, Store};
