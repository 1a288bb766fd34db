//! Database facade and transaction management.
//!
//! Single-writer, multi-reader discipline over the copy-on-write tree:
//!
//! - Read transactions capture the committed state atomically (no locks
//!   held afterwards) and register their snapshot txn id so writers can
//!   tell which freed pages are still referenced.
//! - Write transactions hold the writer mutex for their whole lifetime,
//!   buffer every new page privately, and publish all-or-nothing at
//!   commit by writing the inactive meta slot.
//!
//! # Commit protocol
//!
//! 1. Write all new tree pages and the rebuilt freelist chain.
//! 2. Data sync: everything durable but unreachable.
//! 3. Write the new meta (root, freelist root, txn id + 1, high-water
//!    mark) into the inactive slot.
//! 4. Meta sync: the commit point. A torn meta write fails its checksum
//!    on recovery and the previous slot is used instead.
//! 5. Swap the in-memory committed state; new readers see the commit.
//!
//! A failed step leaves the previous meta intact, so the database remains
//! usable after any transactional failure.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::Arc,
};

use arc_swap::ArcSwap;

use crate::{
    backend::{FileBackend, InMemoryBackend, StorageBackend, DEFAULT_PAGE_SIZE},
    btree::{
        cursor::{Range, RangeScan},
        BTree, PageProvider,
    },
    error::{Error, PageId, PageKind, Result, TxnId},
    freelist::{FreelistNode, FreelistView},
    page::{
        meta::{validate_page_size, FileHeader, Meta},
        Page, PageCache, FIRST_DATA_PAGE_ID, HEADER_PAGE_ID, META_PAGE_A, META_PAGE_B,
    },
    transaction::{CommittedState, ReaderTracker},
};

/// Database configuration options.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Page size (power of two, 512..=65536). Used only at creation; an
    /// existing file dictates its own page size.
    pub page_size: usize,
    /// Maximum pages to cache in memory.
    pub cache_size: usize,
    /// Refuse write transactions.
    pub read_only: bool,
    /// Whether to fsync during commit (default true; disable only for
    /// throwaway data and tests).
    pub sync_on_commit: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_size: 1024, // ~4MB with 4KB pages
            read_only: false,
            sync_on_commit: true,
        }
    }
}

/// The main database handle.
///
/// Thread-safe: any number of concurrent read transactions, one write
/// transaction at a time. Closing is dropping; read transactions borrow
/// the database, so none can outlive it.
pub struct Database<B: StorageBackend> {
    backend: B,
    cache: PageCache,
    /// Current committed state, atomically swapped at commit. Readers
    /// capture it; this is what makes commits all-or-nothing in memory.
    committed: ArcSwap<CommittedState>,
    /// Live-reader multiset for the freelist reuse threshold.
    tracker: ReaderTracker,
    /// Serializes write transactions; the guard lives in the transaction.
    write_lock: std::sync::Mutex<()>,
    config: DatabaseConfig,
}

impl Database<FileBackend> {
    /// Opens an existing database file.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, not a vellum database, or has no
    /// valid meta slot.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, DatabaseConfig::default())
    }

    /// Opens an existing database file with explicit configuration.
    ///
    /// # Errors
    ///
    /// See [`Database::open`].
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: DatabaseConfig) -> Result<Self> {
        let backend = FileBackend::open(path)?;
        Self::from_backend(backend, config)
    }

    /// Creates a new database file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be created or written.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_config(path, DatabaseConfig::default())
    }

    /// Creates a new database file with explicit configuration.
    ///
    /// # Errors
    ///
    /// See [`Database::create`].
    pub fn create_with_config<P: AsRef<Path>>(path: P, config: DatabaseConfig) -> Result<Self> {
        let backend = FileBackend::create(path, config.page_size)?;
        Self::from_backend(backend, config)
    }
}

impl Database<InMemoryBackend> {
    /// Creates a new in-memory database (for tests and benchmarks).
    ///
    /// # Errors
    ///
    /// Fails only on invalid configuration.
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_config(DatabaseConfig::default())
    }

    /// Creates a new in-memory database with explicit configuration.
    ///
    /// # Errors
    ///
    /// Fails only on invalid configuration.
    pub fn open_in_memory_with_config(config: DatabaseConfig) -> Result<Self> {
        validate_page_size(config.page_size)?;
        let backend = InMemoryBackend::with_page_size(config.page_size);
        Self::from_backend(backend, config)
    }
}

impl<B: StorageBackend> Database<B> {
    fn from_backend(backend: B, mut config: DatabaseConfig) -> Result<Self> {
        config.page_size = backend.page_size();

        let state = if backend.file_size()? == 0 {
            if config.read_only {
                return Err(Error::ReadOnly);
            }
            Self::initialize_new(&backend)?
        } else {
            Self::load_state(&backend)?
        };

        Ok(Self {
            backend,
            cache: PageCache::new(config.cache_size),
            committed: ArcSwap::from_pointee(state),
            tracker: ReaderTracker::new(),
            write_lock: std::sync::Mutex::new(()),
            config,
        })
    }

    /// First-time initialization: header page, an empty leaf as root,
    /// meta slot A at txn 1, sync; meta slot B at txn 0, sync.
    fn initialize_new(backend: &B) -> Result<CommittedState> {
        let page_size = backend.page_size();

        let mut header_page = Page::new(HEADER_PAGE_ID, page_size, PageKind::Header, 0);
        FileHeader::new(page_size).encode_into(&mut header_page)?;
        backend.write_page(HEADER_PAGE_ID, &header_page.data)?;

        let root = FIRST_DATA_PAGE_ID;
        let mut root_page = Page::new(root, page_size, PageKind::Leaf, 1);
        crate::btree::node::LeafNode::default().encode_into(&mut root_page)?;
        backend.write_page(root, &root_page.data)?;

        let page_count = FIRST_DATA_PAGE_ID + 1;
        let meta_a = Meta { txn_id: 1, root, freelist_root: 0, page_count };
        let mut meta_page = Page::new(META_PAGE_A, page_size, PageKind::Meta, 1);
        meta_a.encode_into(&mut meta_page)?;
        backend.write_page(META_PAGE_A, &meta_page.data)?;
        backend.sync()?;

        let meta_b = Meta { txn_id: 0, root, freelist_root: 0, page_count };
        let mut meta_page = Page::new(META_PAGE_B, page_size, PageKind::Meta, 0);
        meta_b.encode_into(&mut meta_page)?;
        backend.write_page(META_PAGE_B, &meta_page.data)?;
        backend.sync()?;

        Ok(CommittedState {
            txn_id: 1,
            root,
            freelist_root: 0,
            page_count,
            meta_page: META_PAGE_A,
        })
    }

    /// Loads the committed state from disk: validate the file header,
    /// read both meta slots, and pick the higher valid txn id.
    fn load_state(backend: &B) -> Result<CommittedState> {
        // Full header page validation (the backend only sniffed a prefix).
        let header_page = Page::from_bytes(HEADER_PAGE_ID, backend.read_page(HEADER_PAGE_ID)?);
        header_page.expect_kind(PageKind::Header)?;
        if !header_page.verify_checksum() {
            return Err(Error::ChecksumMismatch { page_id: HEADER_PAGE_ID });
        }
        FileHeader::from_payload(header_page.payload()?)?;

        let slot_a = Self::read_meta_slot(backend, META_PAGE_A);
        let slot_b = Self::read_meta_slot(backend, META_PAGE_B);

        let (meta, meta_page) = match (slot_a, slot_b) {
            (Ok(a), Ok(b)) => {
                if a.txn_id >= b.txn_id {
                    (a, META_PAGE_A)
                } else {
                    (b, META_PAGE_B)
                }
            },
            (Ok(a), Err(_)) => {
                tracing::warn!(slot = META_PAGE_B, "meta slot invalid, using the other slot");
                (a, META_PAGE_A)
            },
            (Err(_), Ok(b)) => {
                tracing::warn!(slot = META_PAGE_A, "meta slot invalid, using the other slot");
                (b, META_PAGE_B)
            },
            (Err(_), Err(_)) => {
                return Err(Error::Corrupted {
                    reason: "Both meta pages are invalid".to_string(),
                });
            },
        };

        Ok(CommittedState {
            txn_id: meta.txn_id,
            root: meta.root,
            freelist_root: meta.freelist_root,
            page_count: meta.page_count,
            meta_page,
        })
    }

    fn read_meta_slot(backend: &B, slot: PageId) -> Result<Meta> {
        let page = Page::from_bytes(slot, backend.read_page(slot)?);
        Meta::from_page(&page)
    }

    /// Begins a read-only transaction.
    ///
    /// Captures the committed state and registers in the live-reader set.
    /// The snapshot is fixed here: later commits are not observed.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for admission
    /// control.
    pub fn begin_read(&self) -> Result<ReadTransaction<'_, B>> {
        // Capture-then-register leaves a window where commits could slip
        // in and a writer could compute its reuse threshold without this
        // reader. Registering is cheap, so: register, verify the state is
        // still current, retry otherwise. Once the verify passes, every
        // later writer sees the registration.
        loop {
            let state = **self.committed.load();
            self.tracker.register(state.txn_id);
            let latest = **self.committed.load();
            if latest.txn_id == state.txn_id {
                return Ok(ReadTransaction { db: self, state });
            }
            self.tracker.unregister(state.txn_id);
        }
    }

    /// Begins a write transaction, blocking until the writer lock is free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`] for a read-only database and
    /// [`Error::Poisoned`] if a previous writer panicked.
    pub fn begin_write(&self) -> Result<WriteTransaction<'_, B>> {
        if self.config.read_only {
            return Err(Error::ReadOnly);
        }

        let guard = self.write_lock.lock().map_err(|_| Error::Poisoned)?;

        let state = **self.committed.load();
        let oldest_reader = self.tracker.oldest().unwrap_or(state.txn_id);
        let (records, chain) = self.load_freelist(state.freelist_root)?;

        Ok(WriteTransaction {
            db: self,
            txn_id: state.txn_id + 1,
            root: state.root,
            next_page: state.page_count,
            base_meta_page: state.meta_page,
            dirty: HashMap::new(),
            freelist: FreelistView::new(records, chain, oldest_reader),
            savepoints: Vec::new(),
            poisoned: false,
            _write_guard: guard,
        })
    }

    /// Walks the freelist chain, returning all records and the chain page
    /// ids themselves.
    fn load_freelist(&self, root: PageId) -> Result<(Vec<(TxnId, PageId)>, Vec<PageId>)> {
        let mut records = Vec::new();
        let mut chain = Vec::new();
        let mut seen = HashSet::new();

        let mut current = root;
        while current != 0 {
            if !seen.insert(current) {
                return Err(Error::Corrupted { reason: "Freelist chain cycle".to_string() });
            }
            let page = self.read_page(current)?;
            let node = FreelistNode::decode(&page)?;
            chain.push(current);
            records.extend(node.entries);
            current = node.next;
        }

        Ok((records, chain))
    }

    /// Reads and verifies a page: cache first, then the backend, with
    /// magic, recorded-id and checksum validation.
    pub(crate) fn read_page(&self, page_id: PageId) -> Result<Page> {
        if let Some(page) = self.cache.get(page_id) {
            return Ok(page);
        }

        let data = self.backend.read_page(page_id)?;
        if data.iter().all(|&b| b == 0) {
            // Never-written page (read past the committed high-water mark).
            return Err(Error::PageNotFound { page_id });
        }

        let page = Page::from_bytes(page_id, data);
        let header = page.header()?;
        if header.page_id != page_id {
            return Err(Error::Corrupted {
                reason: format!(
                    "Page {page_id} records id {} in its header",
                    header.page_id
                ),
            });
        }
        if !page.verify_checksum() {
            return Err(Error::ChecksumMismatch { page_id });
        }

        self.cache.insert(page.clone());
        Ok(page)
    }

    /// Returns database statistics.
    ///
    /// # Errors
    ///
    /// Fails if the freelist chain cannot be read.
    pub fn stats(&self) -> Result<DatabaseStats> {
        let state = **self.committed.load();
        let (records, _) = self.load_freelist(state.freelist_root)?;
        let threshold = self.tracker.oldest().unwrap_or(state.txn_id);
        let reusable = records.iter().filter(|(txn, _)| *txn < threshold).count();

        Ok(DatabaseStats {
            page_size: self.config.page_size,
            txn_id: state.txn_id,
            total_pages: state.page_count,
            cached_pages: self.cache.stats().size,
            free_pages: records.len(),
            reusable_pages: reusable,
            live_readers: self.tracker.live_count(),
        })
    }

    pub(crate) fn committed_state(&self) -> CommittedState {
        **self.committed.load()
    }

    pub(crate) fn page_size(&self) -> usize {
        self.config.page_size
    }
}

/// Database statistics.
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    /// Page size in bytes.
    pub page_size: usize,
    /// Transaction id of the committed state.
    pub txn_id: TxnId,
    /// High-water mark: total pages ever allocated.
    pub total_pages: u64,
    /// Pages currently in the shared cache.
    pub cached_pages: usize,
    /// Total records in the freelist.
    pub free_pages: usize,
    /// Freelist records old enough to reuse right now.
    pub reusable_pages: usize,
    /// Live read transactions.
    pub live_readers: usize,
}

// ============================================================================
// Read transactions
// ============================================================================

/// A read-only transaction: a fixed point-in-time snapshot.
///
/// Holds no locks; its only footprint is the live-reader registration,
/// which delays page reuse (long-lived readers grow the file). Dropping
/// the transaction releases the registration.
pub struct ReadTransaction<'db, B: StorageBackend> {
    db: &'db Database<B>,
    state: CommittedState,
}

impl<'db, B: StorageBackend> ReadTransaction<'db, B> {
    /// Returns the value stored under `key` in this snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error on page-level corruption or I/O failure.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        BTree::new(self.state.root, SnapshotPages { db: self.db }).get(key)
    }

    /// Whether `key` exists in this snapshot.
    ///
    /// # Errors
    ///
    /// See [`ReadTransaction::get`].
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Lazy ordered scan of `range` within this snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial seek fails.
    pub fn range(&self, range: Range) -> Result<RangeScan<SnapshotPages<'_, B>>> {
        BTree::new(self.state.root, SnapshotPages { db: self.db }).into_range(range)
    }

    /// The snapshot's transaction id.
    pub fn txn_id(&self) -> TxnId {
        self.state.txn_id
    }

    /// Releases the snapshot. Equivalent to dropping the transaction.
    pub fn abort(self) {}
}

impl<'db, B: StorageBackend> Drop for ReadTransaction<'db, B> {
    fn drop(&mut self) {
        // Unblocks reuse of pages freed at or after this snapshot.
        self.db.tracker.unregister(self.state.txn_id);
    }
}

// ============================================================================
// Write transactions
// ============================================================================

/// In-memory savepoint for nested transactions.
///
/// Captures everything a rollback must restore; pages and freelist state
/// are cheap to clone relative to the I/O they stand in for.
struct Savepoint {
    root: PageId,
    next_page: PageId,
    dirty: HashMap<PageId, Page>,
    freelist: FreelistView,
}

/// A write transaction.
///
/// Buffers every new page privately; nothing is visible to readers (or
/// durable) until [`commit`](WriteTransaction::commit). Aborting (or
/// just dropping) discards the buffer; no on-disk state has changed.
///
/// A failed page-level operation poisons the transaction: further
/// operations, including commit, fail with
/// [`Error::TransactionAborted`], and the database itself stays usable.
pub struct WriteTransaction<'db, B: StorageBackend> {
    db: &'db Database<B>,
    txn_id: TxnId,
    root: PageId,
    /// High-water mark for fresh allocations within this transaction.
    next_page: PageId,
    /// Meta slot of the snapshot this transaction builds on; the commit
    /// targets the other slot.
    base_meta_page: PageId,
    /// Buffered page writes, keyed by page id.
    dirty: HashMap<PageId, Page>,
    freelist: FreelistView,
    savepoints: Vec<Savepoint>,
    poisoned: bool,
    _write_guard: std::sync::MutexGuard<'db, ()>,
}

impl<'db, B: StorageBackend> WriteTransaction<'db, B> {
    /// This transaction's id (the committed id will be this value).
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::TransactionAborted);
        }
        Ok(())
    }

    /// Poison on page-level failures, but not on input validation: a
    /// rejected key or value leaves the transaction fully usable.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            match err {
                Error::EmptyKey
                | Error::KeyTooLarge { .. }
                | Error::ValueTooLarge { .. }
                | Error::NoActiveSavepoint => {},
                _ => self.poisoned = true,
            }
        }
        result
    }

    /// Inserts or updates a key (an upsert).
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyKey`], [`Error::KeyTooLarge`] or
    /// [`Error::ValueTooLarge`] without side effects; page-level errors
    /// poison the transaction.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let result = self.put_inner(key, value);
        self.track(result)
    }

    fn put_inner(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let provider = WriterPages {
            db: self.db,
            txn_id: self.txn_id,
            dirty: &mut self.dirty,
            freelist: &mut self.freelist,
            next_page: &mut self.next_page,
        };
        let mut tree = BTree::new(self.root, provider);
        tree.insert(key, value)?;
        let new_root = tree.root();
        self.root = new_root;
        Ok(())
    }

    /// Deletes a key. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Page-level errors poison the transaction.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        let result = self.delete_inner(key);
        self.track(result)
    }

    fn delete_inner(&mut self, key: &[u8]) -> Result<bool> {
        let provider = WriterPages {
            db: self.db,
            txn_id: self.txn_id,
            dirty: &mut self.dirty,
            freelist: &mut self.freelist,
            next_page: &mut self.next_page,
        };
        let mut tree = BTree::new(self.root, provider);
        let old = tree.delete(key)?;
        let new_root = tree.root();
        self.root = new_root;
        Ok(old.is_some())
    }

    /// Returns the value under `key` as seen by this transaction,
    /// including its own uncommitted writes.
    ///
    /// # Errors
    ///
    /// Returns an error on page-level corruption or I/O failure.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        BTree::new(self.root, TxnPages { db: self.db, dirty: &self.dirty }).get(key)
    }

    /// Lazy ordered scan over this transaction's view (own writes
    /// included).
    ///
    /// # Errors
    ///
    /// Returns an error if the initial seek fails.
    pub fn range(&self, range: Range) -> Result<RangeScan<TxnPages<'_, B>>> {
        self.ensure_open()?;
        BTree::new(self.root, TxnPages { db: self.db, dirty: &self.dirty }).into_range(range)
    }

    /// Opens a nested transaction level: an in-memory savepoint.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is poisoned.
    pub fn savepoint(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.savepoints.push(Savepoint {
            root: self.root,
            next_page: self.next_page,
            dirty: self.dirty.clone(),
            freelist: self.freelist.clone(),
        });
        Ok(())
    }

    /// Commits the innermost savepoint, merging its changes into the
    /// enclosing level. Nothing touches disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveSavepoint`] if none is open.
    pub fn release_savepoint(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.savepoints.pop().map(|_| ()).ok_or(Error::NoActiveSavepoint)
    }

    /// Rolls back to the innermost savepoint, discarding every change
    /// made since it was opened.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveSavepoint`] if none is open.
    pub fn rollback_savepoint(&mut self) -> Result<()> {
        self.ensure_open()?;
        let savepoint = self.savepoints.pop().ok_or(Error::NoActiveSavepoint)?;
        self.root = savepoint.root;
        self.next_page = savepoint.next_page;
        self.dirty = savepoint.dirty;
        self.freelist = savepoint.freelist;
        Ok(())
    }

    /// Commits the transaction: runs the dual-meta protocol and makes all
    /// changes visible atomically.
    ///
    /// # Errors
    ///
    /// On failure nothing is visible and the old meta remains valid; the
    /// database stays usable.
    pub fn commit(mut self) -> Result<()> {
        self.ensure_open()?;

        let page_size = self.db.page_size();
        let per_page = FreelistNode::max_entries(page_size);

        // Rebuild the freelist chain on newly allocated pages (the chain
        // obeys CoW like everything else). Sizing uses the pre-drain
        // record count: drawing an available record for a chain page only
        // shrinks the final record set, so the chain never runs short;
        // at worst it carries slack.
        let needed = self.freelist.record_count().div_ceil(per_page);
        let mut chain_ids: Vec<PageId> = Vec::with_capacity(needed);
        for _ in 0..needed {
            let id = match self.freelist.allocate() {
                Some(id) => id,
                None => {
                    let id = self.next_page;
                    self.next_page += 1;
                    id
                },
            };
            chain_ids.push(id);
        }

        let freelist = std::mem::take(&mut self.freelist);
        let records = freelist.into_records(self.txn_id);
        let freelist_root = chain_ids.first().copied().unwrap_or(0);

        let mut chain_pages = Vec::with_capacity(chain_ids.len());
        let mut offset = 0usize;
        for (i, &chain_id) in chain_ids.iter().enumerate() {
            let end = (offset + per_page).min(records.len());
            let node = FreelistNode {
                next: chain_ids.get(i + 1).copied().unwrap_or(0),
                entries: records[offset..end].to_vec(),
            };
            offset = end;
            let mut page = Page::new(chain_id, page_size, PageKind::Freelist, self.txn_id);
            node.encode_into(&mut page)?;
            chain_pages.push(page);
        }

        // 1. Write all new pages. 2. Data sync: durable but unreachable.
        let dirty: Vec<Page> = std::mem::take(&mut self.dirty).into_values().collect();
        for page in dirty.iter().chain(chain_pages.iter()) {
            self.db.backend.write_page(page.id, &page.data)?;
        }
        if self.db.config.sync_on_commit {
            self.db.backend.sync()?;
        }

        // 3. Write the inactive meta slot. 4. Meta sync: the commit point.
        let meta_slot = if self.base_meta_page == META_PAGE_A { META_PAGE_B } else { META_PAGE_A };
        let meta = Meta {
            txn_id: self.txn_id,
            root: self.root,
            freelist_root,
            page_count: self.next_page,
        };
        let mut meta_page = Page::new(meta_slot, page_size, PageKind::Meta, self.txn_id);
        meta.encode_into(&mut meta_page)?;
        self.db.backend.write_page(meta_slot, &meta_page.data)?;
        if self.db.config.sync_on_commit {
            self.db.backend.sync()?;
        }

        // 5. Publish: cache the committed pages and swap the state.
        for page in dirty.into_iter().chain(chain_pages) {
            self.db.cache.insert(page);
        }
        let state = CommittedState {
            txn_id: self.txn_id,
            root: self.root,
            freelist_root,
            page_count: self.next_page,
            meta_page: meta_slot,
        };
        self.db.committed.store(Arc::new(state));

        tracing::debug!(txn_id = self.txn_id, root = self.root, "commit");
        Ok(())
    }

    /// Discards the transaction. Nothing on disk has changed; equivalent
    /// to dropping it.
    pub fn abort(self) {}
}

// ============================================================================
// Page providers
// ============================================================================

/// Read-only provider over the committed snapshot a read transaction
/// captured.
pub struct SnapshotPages<'db, B: StorageBackend> {
    db: &'db Database<B>,
}

impl<'db, B: StorageBackend> PageProvider for SnapshotPages<'db, B> {
    fn read_page(&self, page_id: PageId) -> Result<Page> {
        self.db.read_page(page_id)
    }

    fn write_page(&mut self, _page: Page) {
        unreachable!("write_page on a read-only snapshot provider");
    }

    fn allocate_page(&mut self, _kind: PageKind) -> Page {
        unreachable!("allocate_page on a read-only snapshot provider");
    }

    fn free_page(&mut self, _page_id: PageId) {
        unreachable!("free_page on a read-only snapshot provider");
    }

    fn page_size(&self) -> usize {
        self.db.page_size()
    }
}

/// Read-only provider for reads inside a write transaction: buffered
/// pages first (read-your-own-writes), then the committed state.
pub struct TxnPages<'a, B: StorageBackend> {
    db: &'a Database<B>,
    dirty: &'a HashMap<PageId, Page>,
}

impl<'a, B: StorageBackend> PageProvider for TxnPages<'a, B> {
    fn read_page(&self, page_id: PageId) -> Result<Page> {
        if let Some(page) = self.dirty.get(&page_id) {
            return Ok(page.clone());
        }
        self.db.read_page(page_id)
    }

    fn write_page(&mut self, _page: Page) {
        unreachable!("write_page on a read-only transaction provider");
    }

    fn allocate_page(&mut self, _kind: PageKind) -> Page {
        unreachable!("allocate_page on a read-only transaction provider");
    }

    fn free_page(&mut self, _page_id: PageId) {
        unreachable!("free_page on a read-only transaction provider");
    }

    fn page_size(&self) -> usize {
        self.db.page_size()
    }
}

/// Mutating provider for the write transaction: buffers writes, allocates
/// from the freelist view before extending the file, and routes frees to
/// deferred reclamation.
struct WriterPages<'t, 'db, B: StorageBackend> {
    db: &'db Database<B>,
    txn_id: TxnId,
    dirty: &'t mut HashMap<PageId, Page>,
    freelist: &'t mut FreelistView,
    next_page: &'t mut PageId,
}

impl<'t, 'db, B: StorageBackend> PageProvider for WriterPages<'t, 'db, B> {
    fn read_page(&self, page_id: PageId) -> Result<Page> {
        if let Some(page) = self.dirty.get(&page_id) {
            return Ok(page.clone());
        }
        self.db.read_page(page_id)
    }

    fn write_page(&mut self, page: Page) {
        self.dirty.insert(page.id, page);
    }

    fn allocate_page(&mut self, kind: PageKind) -> Page {
        let page_id = match self.freelist.allocate() {
            Some(id) => id,
            None => {
                let id = *self.next_page;
                *self.next_page += 1;
                id
            },
        };
        Page::new(page_id, self.db.page_size(), kind, self.txn_id)
    }

    fn free_page(&mut self, page_id: PageId) {
        if self.dirty.remove(&page_id).is_some() {
            // Allocated by this very transaction: never visible to anyone,
            // immediately reusable.
            self.freelist.reclaim(page_id);
        } else {
            // Committed page: defer until no reader can reference it.
            self.freelist.free(page_id);
        }
    }

    fn page_size(&self) -> usize {
        self.db.page_size()
    }
}
