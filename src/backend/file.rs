//! File-based storage backend using position-based I/O (`pread`/`pwrite`).
//!
//! On Unix, reads are completely lock-free via [`std::os::unix::fs::FileExt`]:
//! `read_exact_at()` takes `&self` and never touches the file cursor,
//! allowing concurrent reads from multiple threads with zero
//! synchronization. Writes are serialized via a lightweight
//! [`parking_lot::Mutex`] guard (a unit `()` sentinel, not wrapping the
//! `File`) to prevent concurrent file extensions and torn writes. The
//! single-writer model guarantees at most one transaction commits at a
//! time, so write serialization is not a bottleneck.

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;
use std::{
    fs::{File, OpenOptions},
    path::Path,
};

use parking_lot::Mutex;

use super::StorageBackend;
use crate::{
    error::{Error, PageId, Result},
    page::{meta::FileHeader, PAGE_HEADER_SIZE},
};

/// File-based storage backend.
pub struct FileBackend {
    /// The underlying file handle.
    ///
    /// On Unix, `read_exact_at()` takes `&self` — no lock needed for reads.
    file: File,
    /// Serializes writes and file extension operations.
    write_lock: Mutex<()>,
    /// Page size in bytes.
    page_size: usize,
}

impl FileBackend {
    /// Opens an existing database file, learning the page size from the
    /// file header page at offset 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened or read.
    /// Returns [`Error::InvalidMagic`] if the file is not a vellum database.
    /// Returns [`Error::Corrupted`] if the header prefix is malformed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;

        // The header page starts at offset 0; its first 64 bytes are enough
        // to learn the page size. Full checksum validation happens once the
        // database layer re-reads the complete page.
        let mut prefix = [0u8; PAGE_HEADER_SIZE + FileHeader::PAYLOAD_SIZE];
        read_exact_at_offset(&file, &mut prefix, 0)?;
        let page_size = FileHeader::page_size_from_prefix(&prefix)?;

        Ok(Self { file, write_lock: Mutex::new(()), page_size })
    }

    /// Creates a new, empty database file. The caller is responsible for
    /// writing the header, root, and meta pages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created.
    /// Returns [`Error::Corrupted`] if `page_size` is invalid.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        crate::page::meta::validate_page_size(page_size)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        Ok(Self { file, write_lock: Mutex::new(()), page_size })
    }
}

impl StorageBackend for FileBackend {
    fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        let offset = self.page_offset(page_id);

        // Check file size without a lock — metadata() takes &self.
        let file_len = self.file.metadata()?.len();
        if offset + self.page_size as u64 > file_len {
            // Page is beyond current file size; return zeros.
            return Ok(vec![0u8; self.page_size]);
        }

        let mut buf = vec![0u8; self.page_size];
        read_exact_at_offset(&self.file, &mut buf, offset)?;
        Ok(buf)
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size {
            return Err(Error::Corrupted {
                reason: format!(
                    "Invalid page data size: {} (expected {})",
                    data.len(),
                    self.page_size
                ),
            });
        }

        let offset = self.page_offset(page_id);

        let _guard = self.write_lock.lock();

        // Extend file if needed.
        let file_len = self.file.metadata()?.len();
        let required_len = offset + self.page_size as u64;
        if file_len < required_len {
            self.file.set_len(required_len)?;
        }

        write_all_at_offset(&self.file, data, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        // sync_data() takes &self — no lock needed.
        self.file.sync_data()?;
        Ok(())
    }

    fn file_size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

// ---------------------------------------------------------------------------
// Platform-specific position-based I/O helpers
// ---------------------------------------------------------------------------

/// Reads exactly `buf.len()` bytes from `file` at the given byte `offset`.
///
/// On Unix, this uses `pread(2)` via [`FileExt::read_exact_at`] — no lock,
/// no cursor mutation.
#[cfg(unix)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    file.read_exact_at(buf, offset)?;
    Ok(())
}

/// Windows fallback: `seek_read` updates the file cursor, so this is NOT
/// lock-free. Callers that need concurrent reads on Windows must provide
/// external synchronization.
#[cfg(windows)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "unexpected end of file during seek_read",
            )
            .into());
        }
        pos += n;
    }
    Ok(())
}

/// Writes all of `data` to `file` at the given byte `offset`.
#[cfg(unix)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    file.write_all_at(data, offset)?;
    Ok(())
}

/// Windows fallback for positional writes.
#[cfg(windows)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        let n = file.seek_write(&data[pos..], offset + pos as u64)?;
        pos += n;
    }
    Ok(())
}
