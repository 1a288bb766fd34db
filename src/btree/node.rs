//! Leaf and branch node codecs.
//!
//! Nodes are decoded into owned structures, modified, and re-encoded into
//! freshly allocated pages; the copy-on-write discipline means a node is
//! rewritten in full on every mutation, so there is no in-place slotted
//! layout to maintain.
//!
//! Leaf payload: `cell_count:2 | right_sibling:8 | cells…`, each cell
//! `key_len:4 | val_len:4 | key | val`, keys strictly increasing.
//!
//! Branch payload: `key_count:2 | child[0]:8 | (key_len:4 | key | child:8)…`.
//! For n keys there are n+1 children; keys[i] separates children[i] and
//! children[i+1], and a lookup key equal to a separator routes right.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    error::{Error, PageId, PageKind, Result},
    page::Page,
};

/// Fixed leaf payload overhead: cell count (2) + right sibling (8).
pub const LEAF_HEADER_SIZE: usize = 10;

/// Per-cell leaf overhead: key length (4) + value length (4).
pub const LEAF_CELL_OVERHEAD: usize = 8;

/// Fixed branch payload overhead: key count (2) + first child (8).
pub const BRANCH_HEADER_SIZE: usize = 10;

/// Per-separator branch overhead: key length (4) + child pointer (8).
pub const BRANCH_CELL_OVERHEAD: usize = 12;

/// Serialized size of one leaf cell.
pub fn leaf_cell_size(key: &[u8], value: &[u8]) -> usize {
    LEAF_CELL_OVERHEAD + key.len() + value.len()
}

/// Serialized size of one branch cell (separator key + child pointer).
pub fn branch_cell_size(key: &[u8]) -> usize {
    BRANCH_CELL_OVERHEAD + key.len()
}

/// Result of a binary search within a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// Exact match at this cell index.
    Found(usize),
    /// Not present; this is the insertion index.
    NotFound(usize),
}

/// Decoded leaf node.
#[derive(Debug, Clone, Default)]
pub struct LeafNode {
    /// Right sibling hint, written during splits. Stale after CoW
    /// mutations of the neighbor; nothing reads it for correctness.
    pub right_sibling: PageId,
    /// Cells in strictly increasing key order.
    pub cells: Vec<(Vec<u8>, Vec<u8>)>,
}

impl LeafNode {
    /// Decodes a leaf from a page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageKindMismatch`] for a non-leaf page and
    /// [`Error::Corrupted`] for a truncated payload.
    pub fn decode(page: &Page) -> Result<Self> {
        page.expect_kind(PageKind::Leaf)?;
        let payload = page.payload()?;
        if payload.len() < LEAF_HEADER_SIZE {
            return Err(Error::Corrupted { reason: "Leaf payload too short".to_string() });
        }

        let cell_count = LittleEndian::read_u16(&payload[0..2]) as usize;
        let right_sibling = LittleEndian::read_u64(&payload[2..10]);

        let mut cells = Vec::with_capacity(cell_count);
        let mut offset = LEAF_HEADER_SIZE;
        for _ in 0..cell_count {
            if offset + LEAF_CELL_OVERHEAD > payload.len() {
                return Err(Error::Corrupted { reason: "Truncated leaf cell".to_string() });
            }
            let key_len = LittleEndian::read_u32(&payload[offset..offset + 4]) as usize;
            let val_len = LittleEndian::read_u32(&payload[offset + 4..offset + 8]) as usize;
            offset += LEAF_CELL_OVERHEAD;

            if offset + key_len + val_len > payload.len() {
                return Err(Error::Corrupted { reason: "Truncated leaf cell data".to_string() });
            }
            let key = payload[offset..offset + key_len].to_vec();
            offset += key_len;
            let value = payload[offset..offset + val_len].to_vec();
            offset += val_len;
            cells.push((key, value));
        }

        Ok(Self { right_sibling, cells })
    }

    /// Encodes the leaf into a page and checksums it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the cells do not fit; callers
    /// check capacity before encoding.
    pub fn encode_into(&self, page: &mut Page) -> Result<()> {
        let mut payload = Vec::with_capacity(self.payload_size());
        let mut count_buf = [0u8; 2];
        LittleEndian::write_u16(&mut count_buf, self.cells.len() as u16);
        payload.extend_from_slice(&count_buf);
        let mut sib_buf = [0u8; 8];
        LittleEndian::write_u64(&mut sib_buf, self.right_sibling);
        payload.extend_from_slice(&sib_buf);

        let mut len_buf = [0u8; 4];
        for (key, value) in &self.cells {
            LittleEndian::write_u32(&mut len_buf, key.len() as u32);
            payload.extend_from_slice(&len_buf);
            LittleEndian::write_u32(&mut len_buf, value.len() as u32);
            payload.extend_from_slice(&len_buf);
            payload.extend_from_slice(key);
            payload.extend_from_slice(value);
        }

        page.put_payload(&payload)?;
        page.update_checksum();
        Ok(())
    }

    /// Serialized payload size of this node.
    pub fn payload_size(&self) -> usize {
        LEAF_HEADER_SIZE
            + self.cells.iter().map(|(k, v)| leaf_cell_size(k, v)).sum::<usize>()
    }

    /// Binary search for a key.
    pub fn search(&self, key: &[u8]) -> SearchResult {
        match self.cells.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
            Ok(idx) => SearchResult::Found(idx),
            Err(idx) => SearchResult::NotFound(idx),
        }
    }
}

/// Decoded branch node.
#[derive(Debug, Clone)]
pub struct BranchNode {
    /// Separator keys, strictly increasing.
    pub keys: Vec<Vec<u8>>,
    /// Child page ids; always `keys.len() + 1` entries.
    pub children: Vec<PageId>,
}

impl BranchNode {
    /// Decodes a branch from a page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageKindMismatch`] for a non-branch page and
    /// [`Error::Corrupted`] for a truncated payload.
    pub fn decode(page: &Page) -> Result<Self> {
        page.expect_kind(PageKind::Branch)?;
        let payload = page.payload()?;
        if payload.len() < BRANCH_HEADER_SIZE {
            return Err(Error::Corrupted { reason: "Branch payload too short".to_string() });
        }

        let key_count = LittleEndian::read_u16(&payload[0..2]) as usize;
        let mut children = Vec::with_capacity(key_count + 1);
        children.push(LittleEndian::read_u64(&payload[2..10]));

        let mut keys = Vec::with_capacity(key_count);
        let mut offset = BRANCH_HEADER_SIZE;
        for _ in 0..key_count {
            if offset + 4 > payload.len() {
                return Err(Error::Corrupted { reason: "Truncated branch cell".to_string() });
            }
            let key_len = LittleEndian::read_u32(&payload[offset..offset + 4]) as usize;
            offset += 4;

            if offset + key_len + 8 > payload.len() {
                return Err(Error::Corrupted { reason: "Truncated branch cell data".to_string() });
            }
            keys.push(payload[offset..offset + key_len].to_vec());
            offset += key_len;
            children.push(LittleEndian::read_u64(&payload[offset..offset + 8]));
            offset += 8;
        }

        Ok(Self { keys, children })
    }

    /// Encodes the branch into a page and checksums it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the node does not fit or the
    /// key/child invariant is violated.
    pub fn encode_into(&self, page: &mut Page) -> Result<()> {
        if self.children.len() != self.keys.len() + 1 {
            return Err(Error::Corrupted {
                reason: format!(
                    "Branch invariant violated: {} children for {} keys",
                    self.children.len(),
                    self.keys.len()
                ),
            });
        }

        let mut payload = Vec::with_capacity(self.payload_size());
        let mut count_buf = [0u8; 2];
        LittleEndian::write_u16(&mut count_buf, self.keys.len() as u16);
        payload.extend_from_slice(&count_buf);
        let mut id_buf = [0u8; 8];
        LittleEndian::write_u64(&mut id_buf, self.children[0]);
        payload.extend_from_slice(&id_buf);

        let mut len_buf = [0u8; 4];
        for (key, child) in self.keys.iter().zip(&self.children[1..]) {
            LittleEndian::write_u32(&mut len_buf, key.len() as u32);
            payload.extend_from_slice(&len_buf);
            payload.extend_from_slice(key);
            LittleEndian::write_u64(&mut id_buf, *child);
            payload.extend_from_slice(&id_buf);
        }

        page.put_payload(&payload)?;
        page.update_checksum();
        Ok(())
    }

    /// Serialized payload size of this node.
    pub fn payload_size(&self) -> usize {
        BRANCH_HEADER_SIZE + self.keys.iter().map(|k| branch_cell_size(k)).sum::<usize>()
    }

    /// Returns the index of the child subtree a key belongs to.
    ///
    /// Keys in subtree `children[i]` satisfy `keys[i-1] <= k < keys[i]`:
    /// a lookup key equal to a separator routes to the right child.
    pub fn child_index_for(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|sep| match sep.as_slice().cmp(key) {
            Ordering::Less | Ordering::Equal => true,
            Ordering::Greater => false,
        })
    }
}
