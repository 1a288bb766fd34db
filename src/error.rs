//! Error types for the vellum storage engine.

use std::io;

use snafu::Snafu;

/// Page identifier type.
///
/// Page 0 holds the file header and doubles as the null sentinel in
/// internal fields (the header page is never referenced as a payload
/// page). Pages 1 and 2 are the meta slots; data pages start at 3.
pub type PageId = u64;

/// Transaction identifier: a monotonically increasing 64-bit counter.
/// Every commit increments it.
pub type TxnId = u64;

/// Result type alias for vellum operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during vellum operations.
#[derive(Debug, Snafu)]
pub enum Error {
    /// I/O error from the underlying storage backend.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Database file is corrupted or has an invalid format.
    #[snafu(display("Corrupted database: {reason}"))]
    Corrupted {
        /// Description of what was corrupted.
        reason: String,
    },

    /// Page checksum verification failed.
    #[snafu(display("Page {page_id} checksum mismatch"))]
    ChecksumMismatch {
        /// The page whose checksum failed.
        page_id: PageId,
    },

    /// Invalid magic number in a page header or the file header.
    #[snafu(display("Invalid database magic number"))]
    InvalidMagic,

    /// Unsupported database format version.
    #[snafu(display("Unsupported format version: {version}"))]
    UnsupportedVersion {
        /// The unsupported version number.
        version: u32,
    },

    /// Page kind mismatch (expected a different kind of page).
    #[snafu(display("Page kind mismatch: expected {expected:?}, found {found:?}"))]
    PageKindMismatch {
        /// The expected page kind.
        expected: PageKind,
        /// The actual page kind found.
        found: PageKind,
    },

    /// Page has never been written (read past the committed high-water mark).
    #[snafu(display("Page {page_id} not found"))]
    PageNotFound {
        /// The missing page ID.
        page_id: PageId,
    },

    /// Key exceeds the per-page key size bound.
    #[snafu(display("Key too large: {size} bytes (max {max})"))]
    KeyTooLarge {
        /// Actual size of the key in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// Key + value cannot fit within a single leaf page.
    #[snafu(display("Value too large: cell of {size} bytes (max {max})"))]
    ValueTooLarge {
        /// Serialized cell size in bytes.
        size: usize,
        /// Maximum cell size a leaf can hold.
        max: usize,
    },

    /// Keys must be non-empty byte strings.
    #[snafu(display("Key must not be empty"))]
    EmptyKey,

    /// Mutation attempted on a read-only database.
    #[snafu(display("Database is read-only"))]
    ReadOnly,

    /// Operation on a write transaction after a failed page-level operation.
    #[snafu(display("Transaction aborted"))]
    TransactionAborted,

    /// Reserved for optimistic concurrency control; not raised under the
    /// single-writer model.
    #[snafu(display("Transaction conflict"))]
    TxnConflict,

    /// Savepoint release or rollback without an active savepoint.
    #[snafu(display("No active savepoint"))]
    NoActiveSavepoint,

    /// Internal lock was poisoned (another thread panicked while holding it).
    #[snafu(display("Internal lock poisoned"))]
    Poisoned,
}

// Automatic conversion from io::Error for ergonomic ? usage.
impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

/// Page kinds stored in the common page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    /// File header page (page 0, written once at creation).
    Header = 1,
    /// Meta page (pages 1 and 2, the dual commit slots).
    Meta = 2,
    /// B+ tree leaf node.
    Leaf = 3,
    /// B+ tree branch (internal) node.
    Branch = 4,
    /// Freelist chain page.
    Freelist = 5,
}

impl TryFrom<u8> for PageKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Header),
            2 => Ok(Self::Meta),
            3 => Ok(Self::Leaf),
            4 => Ok(Self::Branch),
            5 => Ok(Self::Freelist),
            _ => Err(Error::Corrupted { reason: format!("Invalid page kind: {}", value) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        let display = format!("{err}");
        assert!(display.starts_with("I/O error:"), "got: {display}");
    }

    #[test]
    fn test_error_display_checksum_mismatch() {
        let err = Error::ChecksumMismatch { page_id: 42 };
        assert_eq!(format!("{err}"), "Page 42 checksum mismatch");
    }

    #[test]
    fn test_error_display_kind_mismatch() {
        let err = Error::PageKindMismatch { expected: PageKind::Leaf, found: PageKind::Branch };
        let display = format!("{err}");
        assert!(display.contains("Leaf"), "got: {display}");
        assert!(display.contains("Branch"), "got: {display}");
    }

    #[test]
    fn test_error_display_value_too_large() {
        let err = Error::ValueTooLarge { size: 5008, max: 4054 };
        assert_eq!(format!("{err}"), "Value too large: cell of 5008 bytes (max 4054)");
    }

    #[test]
    fn test_page_kind_round_trip() {
        for kind in
            [PageKind::Header, PageKind::Meta, PageKind::Leaf, PageKind::Branch, PageKind::Freelist]
        {
            assert_eq!(PageKind::try_from(kind as u8).unwrap(), kind);
        }
        assert!(PageKind::try_from(0).is_err());
        assert!(PageKind::try_from(6).is_err());
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error as StdError;

        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(err.source().is_some(), "Error::Io should have a source");
    }
}
