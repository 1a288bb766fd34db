//! Freelist: deferred page reclamation tagged by transaction id.
//!
//! Every page freed by a committed transaction is recorded as a
//! `(txn_id, page_id)` pair in a chain of freelist pages anchored at the
//! meta's `freelist_root`. A reader that began at snapshot `T_r` can
//! reference any page freed at `T_f <= T_r`, so a writer may only reuse a
//! page when `T_f < T_oldest`, the minimum snapshot among live readers
//! (or the active meta's txn id when no readers are live).
//!
//! The writer materializes the chain at transaction start into a
//! [`FreelistView`]: records below the threshold become the available
//! pool, the rest stay pending. At commit the view is flattened back into
//! `(txn_id, page_id)` records: leftover available records keep their
//! original tags, pages freed by this transaction and the old chain pages
//! are tagged with the committing txn id, then written as a fresh chain.
//! The chain itself obeys copy-on-write: new chain pages always come from
//! the high-water mark, which keeps the record count independent of chain
//! allocation, and the replaced chain pages are queued for reclamation
//! like any other page.
//!
//! Chain page payload: `next:8 | count:4 | (txn_id:8 | page_id:8)...`.

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    error::{Error, PageId, PageKind, Result, TxnId},
    page::{usable_page_size, Page},
};

/// Fixed freelist payload overhead: next pointer (8) + record count (4).
pub const FREELIST_HEADER_SIZE: usize = 12;

/// Serialized size of one freelist record.
pub const FREELIST_RECORD_SIZE: usize = 16;

/// One decoded freelist chain page.
#[derive(Debug, Clone, Default)]
pub struct FreelistNode {
    /// Next chain page (0 = end of chain).
    pub next: PageId,
    /// `(txn_id, page_id)` records carried by this page.
    pub entries: Vec<(TxnId, PageId)>,
}

impl FreelistNode {
    /// Maximum records per chain page for a page size.
    pub fn max_entries(page_size: usize) -> usize {
        (usable_page_size(page_size) - FREELIST_HEADER_SIZE) / FREELIST_RECORD_SIZE
    }

    /// Decodes a chain page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageKindMismatch`] for a non-freelist page and
    /// [`Error::Corrupted`] for a truncated payload.
    pub fn decode(page: &Page) -> Result<Self> {
        page.expect_kind(PageKind::Freelist)?;
        let payload = page.payload()?;
        if payload.len() < FREELIST_HEADER_SIZE {
            return Err(Error::Corrupted { reason: "Freelist payload too short".to_string() });
        }

        let next = LittleEndian::read_u64(&payload[0..8]);
        let count = LittleEndian::read_u32(&payload[8..12]) as usize;
        if FREELIST_HEADER_SIZE + count * FREELIST_RECORD_SIZE > payload.len() {
            return Err(Error::Corrupted { reason: "Truncated freelist records".to_string() });
        }

        let mut entries = Vec::with_capacity(count);
        let mut offset = FREELIST_HEADER_SIZE;
        for _ in 0..count {
            let txn_id = LittleEndian::read_u64(&payload[offset..offset + 8]);
            let page_id = LittleEndian::read_u64(&payload[offset + 8..offset + 16]);
            entries.push((txn_id, page_id));
            offset += FREELIST_RECORD_SIZE;
        }

        Ok(Self { next, entries })
    }

    /// Encodes the chain page and checksums it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the records do not fit.
    pub fn encode_into(&self, page: &mut Page) -> Result<()> {
        let mut payload =
            Vec::with_capacity(FREELIST_HEADER_SIZE + self.entries.len() * FREELIST_RECORD_SIZE);
        let mut buf8 = [0u8; 8];
        LittleEndian::write_u64(&mut buf8, self.next);
        payload.extend_from_slice(&buf8);
        let mut buf4 = [0u8; 4];
        LittleEndian::write_u32(&mut buf4, self.entries.len() as u32);
        payload.extend_from_slice(&buf4);

        for (txn_id, page_id) in &self.entries {
            LittleEndian::write_u64(&mut buf8, *txn_id);
            payload.extend_from_slice(&buf8);
            LittleEndian::write_u64(&mut buf8, *page_id);
            payload.extend_from_slice(&buf8);
        }

        page.put_payload(&payload)?;
        page.update_checksum();
        Ok(())
    }
}

/// The writer's partitioned view of the freelist for one transaction.
///
/// Cloneable so savepoints can snapshot and restore it.
#[derive(Debug, Clone, Default)]
pub struct FreelistView {
    /// Records whose freeing txn is older than every live reader; their
    /// pages may be handed out for reuse. Original tags are kept for
    /// records that survive to commit.
    available: Vec<(TxnId, PageId)>,
    /// Records still potentially visible to a live reader.
    pending: Vec<(TxnId, PageId)>,
    /// Pages freed by this transaction (tagged at commit).
    freed: Vec<PageId>,
    /// The chain pages the records were loaded from; replaced at commit
    /// and reclaimed like any other freed page.
    old_chain: Vec<PageId>,
}

impl FreelistView {
    /// Partitions loaded records around the oldest-live-reader threshold.
    pub fn new(
        records: Vec<(TxnId, PageId)>,
        old_chain: Vec<PageId>,
        oldest_reader: TxnId,
    ) -> Self {
        let mut available = Vec::new();
        let mut pending = Vec::new();
        for record in records {
            if record.0 < oldest_reader {
                available.push(record);
            } else {
                pending.push(record);
            }
        }
        Self { available, pending, freed: Vec::new(), old_chain }
    }

    /// Hands out a reusable page id, if any.
    pub fn allocate(&mut self) -> Option<PageId> {
        self.available.pop().map(|(_, page_id)| page_id)
    }

    /// Queues a committed page for deferred reclamation.
    pub fn free(&mut self, page_id: PageId) {
        self.freed.push(page_id);
    }

    /// Returns a page allocated by this very transaction: it was never
    /// visible to anyone, so it is immediately reusable. Tag 0 sorts it
    /// below any real transaction if it survives to commit.
    pub fn reclaim(&mut self, page_id: PageId) {
        self.available.push((0, page_id));
    }

    /// Number of records that would be persisted right now.
    pub fn record_count(&self) -> usize {
        self.available.len() + self.pending.len() + self.freed.len() + self.old_chain.len()
    }

    /// Flattens the view into the records the committing transaction
    /// persists. Pages freed here and the replaced chain pages are tagged
    /// `txn_id`; everything else keeps its original tag.
    pub fn into_records(self, txn_id: TxnId) -> Vec<(TxnId, PageId)> {
        let mut records = self.available;
        records.extend(self.pending);
        records.extend(self.freed.into_iter().map(|page_id| (txn_id, page_id)));
        records.extend(self.old_chain.into_iter().map(|page_id| (txn_id, page_id)));
        records
    }
}
