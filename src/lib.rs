//! vellum: an embedded, single-file key-value storage engine.
//!
//! Durable, transactional reads and writes with snapshot isolation. The
//! on-disk representation is a set of fixed-size pages organized as a
//! copy-on-write B+ tree; atomic commits alternate between two meta
//! pages, so there is always a valid state to recover from. One writer
//! and any number of readers run concurrently, each reader observing a
//! point-in-time snapshot.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Database API                  │
//! │   (open, begin_read, begin_write, stats)    │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │            Transaction Layer                │
//! │ (ReadTxn: snapshot, WriteTxn: CoW + commit) │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │              B+ Tree Layer                  │
//! │   (get, put, delete, cursor-stack range)    │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │               Page Layer                    │
//! │  (codecs, checksums, freelist, page cache)  │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │            Storage Backend                  │
//! │      (FileBackend / InMemoryBackend)        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use vellum::Database;
//!
//! let db = Database::open_in_memory()?;
//!
//! let mut txn = db.begin_write()?;
//! txn.put(b"key", b"value")?;
//! txn.commit()?;
//!
//! let txn = db.begin_read()?;
//! let value = txn.get(b"key")?;
//! # Ok::<(), vellum::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
// B+ tree operations use wide return types for split propagation.
#![allow(clippy::type_complexity)]

pub mod backend;
pub mod btree;
pub mod db;
pub mod error;
pub mod freelist;
pub mod integrity;
pub mod page;
pub mod transaction;

// Re-export the commonly used types.
pub use backend::{FileBackend, InMemoryBackend, StorageBackend, DEFAULT_PAGE_SIZE};
pub use btree::cursor::{Bound, Range, RangeScan};
pub use db::{Database, DatabaseConfig, DatabaseStats, ReadTransaction, WriteTransaction};
pub use error::{Error, PageId, PageKind, Result, TxnId};
pub use integrity::IntegrityReport;
pub use page::{Page, PAGE_HEADER_SIZE};
pub use transaction::CommittedState;

/// On-disk format version.
pub const VERSION: u32 = page::meta::FORMAT_VERSION;
