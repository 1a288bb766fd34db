//! In-memory storage backend for testing.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{StorageBackend, DEFAULT_PAGE_SIZE};
use crate::error::{Error, PageId, Result};

/// In-memory storage backend.
///
/// All data is stored in memory and lost when the backend is dropped.
/// Useful for unit tests and benchmarking.
pub struct InMemoryBackend {
    /// Pages indexed by page ID.
    pages: RwLock<HashMap<PageId, Vec<u8>>>,
    /// Page size in bytes.
    page_size: usize,
    /// Simulated file size.
    file_size: RwLock<u64>,
}

impl InMemoryBackend {
    /// Creates a new in-memory backend with the default page size.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Creates a new in-memory backend with the given page size.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two in 512..=65536.
    pub fn with_page_size(page_size: usize) -> Self {
        assert!(
            page_size.is_power_of_two() && page_size >= 512 && page_size <= 65536,
            "Invalid page size: {}",
            page_size
        );

        Self {
            pages: RwLock::new(HashMap::new()),
            page_size,
            file_size: RwLock::new(0),
        }
    }

    /// Returns the number of pages currently stored.
    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        let pages = self.pages.read();
        match pages.get(&page_id) {
            Some(data) => Ok(data.clone()),
            None => Ok(vec![0u8; self.page_size]),
        }
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

        self.pages.write().insert(page_id, data.to_vec());

        let required_size = self.page_offset(page_id) + self.page_size as u64;
        let mut file_size = self.file_size.write();
        if *file_size < required_size {
            *file_size = required_size;
        }

        Ok(())
    }

    fn sync(&self) -> Result<()> {
        // No-op for in-memory backend.
        Ok(())
    }

    fn file_size(&self) -> Result<u64> {
        Ok(*self.file_size.read())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_basic() {
        let backend = InMemoryBackend::new();

        let mut data = vec![0u8; DEFAULT_PAGE_SIZE];
        data[0] = 0x42;
        backend.write_page(0, &data).unwrap();

        let read_data = backend.read_page(0).unwrap();
        assert_eq!(read_data[0], 0x42);

        // Unwritten pages read as zeros.
        let empty = backend.read_page(999).unwrap();
        assert!(empty.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_in_memory_file_size() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.file_size().unwrap(), 0);

        backend.write_page(0, &vec![0u8; DEFAULT_PAGE_SIZE]).unwrap();
        assert_eq!(backend.file_size().unwrap(), DEFAULT_PAGE_SIZE as u64);

        backend.write_page(10, &vec![0u8; DEFAULT_PAGE_SIZE]).unwrap();
        assert_eq!(backend.file_size().unwrap(), (11 * DEFAULT_PAGE_SIZE) as u64);
    }
}
