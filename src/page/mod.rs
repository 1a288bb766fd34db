//! Page layout and the common page header.
//!
//! Every page in the file starts with a 32-byte common header:
//!
//! ```text
//! Offset  Size   Field
//! ------  ----   -----
//! 0       4      Magic ("VELM")
//! 4       1      Page kind (PageKind enum)
//! 5       3      Reserved (zero)
//! 8       8      Page ID
//! 16      8      Transaction ID that produced this page
//! 24      4      Payload length
//! 28      4      Checksum (XXH3-64 truncated to 32 bits)
//! ```
//!
//! The checksum covers the entire page with the checksum field zeroed.
//! Bytes past the payload are zeroed before checksum computation, so
//! corruption of padding is detected as well.

mod cache;
pub mod meta;

pub use cache::{CacheStats, PageCache};

use byteorder::{ByteOrder, LittleEndian};
use xxhash_rust::xxh3::Xxh3;

use crate::error::{Error, PageId, PageKind, Result, TxnId};

/// Common page header size in bytes.
pub const PAGE_HEADER_SIZE: usize = 32;

/// Magic bytes at the start of every page.
pub const PAGE_MAGIC: [u8; 4] = *b"VELM";

/// File header page ID. Also the null sentinel: the header page is never
/// referenced as a payload page, so internal fields use 0 for "none".
pub const HEADER_PAGE_ID: PageId = 0;

/// Meta slot A page ID.
pub const META_PAGE_A: PageId = 1;

/// Meta slot B page ID.
pub const META_PAGE_B: PageId = 2;

/// First page ID available for data (leaf, branch, freelist) pages.
pub const FIRST_DATA_PAGE_ID: PageId = 3;

/// Decoded common page header.
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    /// Page kind.
    pub kind: PageKind,
    /// Page ID as recorded on disk.
    pub page_id: PageId,
    /// Transaction that produced this page version.
    pub txn_id: TxnId,
    /// Number of payload bytes following the header.
    pub payload_len: u32,
    /// Stored checksum.
    pub checksum: u32,
}

impl PageHeader {
    /// Deserializes the common header from the start of a page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the buffer is too short,
    /// [`Error::InvalidMagic`] if the magic bytes do not match, or an
    /// error for an unknown page kind byte.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < PAGE_HEADER_SIZE {
            return Err(Error::Corrupted { reason: "Page header too short".to_string() });
        }
        if buf[0..4] != PAGE_MAGIC {
            return Err(Error::InvalidMagic);
        }

        Ok(Self {
            kind: PageKind::try_from(buf[4])?,
            page_id: LittleEndian::read_u64(&buf[8..16]),
            txn_id: LittleEndian::read_u64(&buf[16..24]),
            payload_len: LittleEndian::read_u32(&buf[24..28]),
            checksum: LittleEndian::read_u32(&buf[28..32]),
        })
    }
}

/// A fixed-size page: the common header plus payload and zero padding.
#[derive(Clone)]
pub struct Page {
    /// Page ID (position in file: `id * page_size`).
    pub id: PageId,
    /// Raw page bytes including the common header.
    pub data: Vec<u8>,
}

impl Page {
    /// Creates a new empty page of the given kind with a zero-length payload.
    pub fn new(id: PageId, page_size: usize, kind: PageKind, txn_id: TxnId) -> Self {
        let mut data = vec![0u8; page_size];
        data[0..4].copy_from_slice(&PAGE_MAGIC);
        data[4] = kind as u8;
        LittleEndian::write_u64(&mut data[8..16], id);
        LittleEndian::write_u64(&mut data[16..24], txn_id);
        Self { id, data }
    }

    /// Wraps raw bytes read from storage.
    pub fn from_bytes(id: PageId, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    /// Decodes the common header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header bytes are malformed.
    pub fn header(&self) -> Result<PageHeader> {
        PageHeader::from_bytes(&self.data)
    }

    /// Returns the page kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the header bytes are malformed.
    pub fn kind(&self) -> Result<PageKind> {
        Ok(self.header()?.kind)
    }

    /// Verifies the recorded page kind, failing with
    /// [`Error::PageKindMismatch`] otherwise.
    pub fn expect_kind(&self, expected: PageKind) -> Result<()> {
        let found = self.kind()?;
        if found != expected {
            return Err(Error::PageKindMismatch { expected, found });
        }
        Ok(())
    }

    /// Returns the payload bytes (after the header, up to `payload_len`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the recorded payload length exceeds
    /// the page capacity.
    pub fn payload(&self) -> Result<&[u8]> {
        let len = self.header()?.payload_len as usize;
        if PAGE_HEADER_SIZE + len > self.data.len() {
            return Err(Error::Corrupted {
                reason: format!("Payload length {} exceeds page size", len),
            });
        }
        Ok(&self.data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + len])
    }

    /// Replaces the payload, updating `payload_len` and zeroing the tail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the payload does not fit.
    pub fn put_payload(&mut self, payload: &[u8]) -> Result<()> {
        let capacity = self.data.len() - PAGE_HEADER_SIZE;
        if payload.len() > capacity {
            return Err(Error::Corrupted {
                reason: format!("Payload of {} bytes exceeds capacity {}", payload.len(), capacity),
            });
        }
        self.data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + payload.len()].copy_from_slice(payload);
        for byte in &mut self.data[PAGE_HEADER_SIZE + payload.len()..] {
            *byte = 0;
        }
        LittleEndian::write_u32(&mut self.data[24..28], payload.len() as u32);
        Ok(())
    }

    /// Computes the checksum over the whole page (checksum field zeroed)
    /// and stores it in the header.
    pub fn update_checksum(&mut self) {
        let checksum = self.compute_checksum();
        LittleEndian::write_u32(&mut self.data[28..32], checksum);
    }

    /// Verifies the stored checksum against the page contents.
    pub fn verify_checksum(&self) -> bool {
        let stored = LittleEndian::read_u32(&self.data[28..32]);
        stored == self.compute_checksum()
    }

    fn compute_checksum(&self) -> u32 {
        // Hash the page with the checksum field treated as zero. XXH3-64
        // truncated to 32 bits matches the 4-byte field in the header.
        let mut hasher = Xxh3::new();
        hasher.update(&self.data[..28]);
        hasher.update(&[0u8; 4]);
        hasher.update(&self.data[PAGE_HEADER_SIZE..]);
        hasher.digest() as u32
    }

    /// Returns the page size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("size", &self.data.len())
            .field("header", &self.header())
            .finish()
    }
}

/// Usable payload capacity of a page.
pub fn usable_page_size(page_size: usize) -> usize {
    page_size - PAGE_HEADER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SIZE: usize = 4096;

    #[test]
    fn test_header_round_trip() {
        let mut page = Page::new(7, PAGE_SIZE, PageKind::Leaf, 12345);
        page.put_payload(b"hello").unwrap();
        page.update_checksum();

        let header = page.header().unwrap();
        assert_eq!(header.kind, PageKind::Leaf);
        assert_eq!(header.page_id, 7);
        assert_eq!(header.txn_id, 12345);
        assert_eq!(header.payload_len, 5);
        assert_eq!(page.payload().unwrap(), b"hello");
    }

    #[test]
    fn test_checksum_detects_payload_corruption() {
        let mut page = Page::new(3, PAGE_SIZE, PageKind::Leaf, 1);
        page.put_payload(&[0x42; 100]).unwrap();
        page.update_checksum();
        assert!(page.verify_checksum());

        page.data[PAGE_HEADER_SIZE + 50] ^= 0xFF;
        assert!(!page.verify_checksum());
    }

    #[test]
    fn test_checksum_detects_padding_corruption() {
        let mut page = Page::new(3, PAGE_SIZE, PageKind::Leaf, 1);
        page.put_payload(&[0x42; 100]).unwrap();
        page.update_checksum();

        // Flip a byte well past the payload: still detected because the
        // checksum covers the whole page.
        page.data[PAGE_SIZE - 10] ^= 0x01;
        assert!(!page.verify_checksum());
    }

    #[test]
    fn test_checksum_detects_header_corruption() {
        let mut page = Page::new(3, PAGE_SIZE, PageKind::Leaf, 1);
        page.put_payload(&[0x42; 100]).unwrap();
        page.update_checksum();

        // Corrupt the recorded txn id.
        page.data[16] ^= 0xFF;
        assert!(!page.verify_checksum());
    }

    #[test]
    fn test_put_payload_zeroes_tail() {
        let mut page = Page::new(3, PAGE_SIZE, PageKind::Leaf, 1);
        page.put_payload(&[0xAA; 200]).unwrap();
        page.put_payload(&[0xBB; 50]).unwrap();

        assert_eq!(page.payload().unwrap().len(), 50);
        assert!(page.data[PAGE_HEADER_SIZE + 50..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let mut page = Page::new(3, PAGE_SIZE, PageKind::Leaf, 1);
        page.data[0] = b'X';
        assert!(matches!(page.header(), Err(Error::InvalidMagic)));
    }

    #[test]
    fn test_expect_kind() {
        let page = Page::new(3, PAGE_SIZE, PageKind::Leaf, 1);
        assert!(page.expect_kind(PageKind::Leaf).is_ok());
        assert!(matches!(
            page.expect_kind(PageKind::Branch),
            Err(Error::PageKindMismatch { .. })
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut page = Page::new(3, PAGE_SIZE, PageKind::Leaf, 1);
        let too_big = vec![0u8; PAGE_SIZE];
        assert!(page.put_payload(&too_big).is_err());
    }
}
