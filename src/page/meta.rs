//! File header and meta page codecs.
//!
//! The file header (page 0) is static after creation: magic, format
//! version, page size, and the byte offsets of the two meta slots. The
//! meta pages (pages 1 and 2) alternate as commit slots: each holds the
//! transaction id, the B+ tree root, the freelist root, and the high-water
//! mark that together define one committed database state. The active meta
//! is the slot with the higher transaction id whose checksum validates.

use byteorder::{ByteOrder, LittleEndian};

use super::{Page, PAGE_HEADER_SIZE, PAGE_MAGIC};
use crate::error::{Error, PageId, PageKind, Result, TxnId};

/// Magic string identifying a vellum database file.
pub const FILE_MAGIC: &[u8; 8] = b"VELLUMDB";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Minimum allowed page size.
pub const MIN_PAGE_SIZE: usize = 512;

/// Maximum allowed page size.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Decoded file header page payload (32 bytes).
///
/// Layout: `magic:8 | version:4 | page_size:4 | meta_offset_a:8 |
/// meta_offset_b:8`. Written once when the database is created and never
/// rewritten.
#[derive(Debug, Clone)]
pub struct FileHeader {
    /// Format version.
    pub version: u32,
    /// Page size in bytes (power of two, 512..=65536).
    pub page_size: u32,
    /// Byte offset of meta slot A.
    pub meta_offset_a: u64,
    /// Byte offset of meta slot B.
    pub meta_offset_b: u64,
}

impl FileHeader {
    /// Payload size on disk.
    pub const PAYLOAD_SIZE: usize = 32;

    /// Creates a header for a new database with the given page size.
    pub fn new(page_size: usize) -> Self {
        Self {
            version: FORMAT_VERSION,
            page_size: page_size as u32,
            meta_offset_a: super::META_PAGE_A * page_size as u64,
            meta_offset_b: super::META_PAGE_B * page_size as u64,
        }
    }

    /// Serializes the header into a page payload.
    pub fn to_payload(&self) -> [u8; Self::PAYLOAD_SIZE] {
        let mut buf = [0u8; Self::PAYLOAD_SIZE];
        buf[0..8].copy_from_slice(FILE_MAGIC);
        LittleEndian::write_u32(&mut buf[8..12], self.version);
        LittleEndian::write_u32(&mut buf[12..16], self.page_size);
        LittleEndian::write_u64(&mut buf[16..24], self.meta_offset_a);
        LittleEndian::write_u64(&mut buf[24..32], self.meta_offset_b);
        buf
    }

    /// Deserializes the header from a page payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMagic`] for a foreign file,
    /// [`Error::UnsupportedVersion`] for a future format version, or
    /// [`Error::Corrupted`] for a malformed page size.
    pub fn from_payload(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::PAYLOAD_SIZE {
            return Err(Error::Corrupted { reason: "File header too short".to_string() });
        }
        if &buf[0..8] != FILE_MAGIC {
            return Err(Error::InvalidMagic);
        }

        let version = LittleEndian::read_u32(&buf[8..12]);
        if version > FORMAT_VERSION {
            return Err(Error::UnsupportedVersion { version });
        }

        let page_size = LittleEndian::read_u32(&buf[12..16]) as usize;
        validate_page_size(page_size)?;

        Ok(Self {
            version,
            page_size: page_size as u32,
            meta_offset_a: LittleEndian::read_u64(&buf[16..24]),
            meta_offset_b: LittleEndian::read_u64(&buf[24..32]),
        })
    }

    /// Extracts the page size from the first bytes of a database file,
    /// before the full page can be read. The prefix must cover the common
    /// page header plus the file header payload (64 bytes); every valid
    /// page size is at least [`MIN_PAGE_SIZE`], so this is always present.
    ///
    /// Checksum verification happens later, once the full page is read.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is not a vellum file header.
    pub fn page_size_from_prefix(prefix: &[u8]) -> Result<usize> {
        if prefix.len() < PAGE_HEADER_SIZE + Self::PAYLOAD_SIZE {
            return Err(Error::Corrupted { reason: "File too short for header".to_string() });
        }
        if prefix[0..4] != PAGE_MAGIC {
            return Err(Error::InvalidMagic);
        }
        if prefix[4] != PageKind::Header as u8 {
            return Err(Error::Corrupted { reason: "Page 0 is not a header page".to_string() });
        }

        let header = Self::from_payload(&prefix[PAGE_HEADER_SIZE..])?;
        Ok(header.page_size as usize)
    }

    /// Writes the header into a page (page 0) and checksums it.
    pub fn encode_into(&self, page: &mut Page) -> Result<()> {
        page.put_payload(&self.to_payload())?;
        page.update_checksum();
        Ok(())
    }
}

/// Validates a page size: power of two within 512..=65536.
pub fn validate_page_size(page_size: usize) -> Result<()> {
    if !page_size.is_power_of_two() || page_size < MIN_PAGE_SIZE || page_size > MAX_PAGE_SIZE {
        return Err(Error::Corrupted { reason: format!("Invalid page size: {page_size}") });
    }
    Ok(())
}

/// Decoded meta page payload (32 bytes).
///
/// Layout: `txn_id:8 | root:8 | freelist_root:8 | page_count:8`. Protected
/// by the common page checksum, which is what makes a torn meta write
/// detectable on recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    /// Transaction id of the commit this meta describes.
    pub txn_id: TxnId,
    /// Root page of the B+ tree.
    pub root: PageId,
    /// Head of the freelist chain (0 = empty freelist).
    pub freelist_root: PageId,
    /// High-water mark: the smallest page id never yet allocated.
    pub page_count: u64,
}

impl Meta {
    /// Payload size on disk.
    pub const PAYLOAD_SIZE: usize = 32;

    /// Serializes the meta into a page payload.
    pub fn to_payload(&self) -> [u8; Self::PAYLOAD_SIZE] {
        let mut buf = [0u8; Self::PAYLOAD_SIZE];
        LittleEndian::write_u64(&mut buf[0..8], self.txn_id);
        LittleEndian::write_u64(&mut buf[8..16], self.root);
        LittleEndian::write_u64(&mut buf[16..24], self.freelist_root);
        LittleEndian::write_u64(&mut buf[24..32], self.page_count);
        buf
    }

    /// Deserializes a meta from a page, verifying kind and checksum.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChecksumMismatch`] for a torn or corrupted slot,
    /// [`Error::PageKindMismatch`] for a non-meta page.
    pub fn from_page(page: &Page) -> Result<Self> {
        page.expect_kind(PageKind::Meta)?;
        if !page.verify_checksum() {
            return Err(Error::ChecksumMismatch { page_id: page.id });
        }

        let payload = page.payload()?;
        if payload.len() < Self::PAYLOAD_SIZE {
            return Err(Error::Corrupted { reason: "Meta payload too short".to_string() });
        }

        Ok(Self {
            txn_id: LittleEndian::read_u64(&payload[0..8]),
            root: LittleEndian::read_u64(&payload[8..16]),
            freelist_root: LittleEndian::read_u64(&payload[16..24]),
            page_count: LittleEndian::read_u64(&payload[24..32]),
        })
    }

    /// Writes the meta into a page (slot A or B) and checksums it.
    pub fn encode_into(&self, page: &mut Page) -> Result<()> {
        page.put_payload(&self.to_payload())?;
        page.update_checksum();
        Ok(())
    }
}
