//! Shared page cache with clock eviction.
//!
//! Caches committed page versions to reduce disk I/O. Write transactions
//! buffer their pages privately and only publish them here after a
//! successful commit, so the cache never holds uncommitted data and
//! eviction is always allowed.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

use super::Page;
use crate::error::PageId;

/// Page cache with clock (second-chance) eviction.
pub struct PageCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct CacheInner {
    pages: HashMap<PageId, CacheEntry>,
    /// Insertion order ring for the clock sweep.
    order: Vec<PageId>,
    clock_hand: usize,
}

struct CacheEntry {
    page: Page,
    /// Set on access, cleared by a clock sweep (second chance).
    accessed: bool,
}

/// Cache occupancy and hit-rate counters.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Pages currently cached.
    pub size: usize,
    /// Total cache hits since creation.
    pub hits: u64,
    /// Total cache misses since creation.
    pub misses: u64,
}

impl PageCache {
    /// Creates a cache holding at most `capacity` pages.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(CacheInner {
                pages: HashMap::with_capacity(capacity),
                order: Vec::with_capacity(capacity),
                clock_hand: 0,
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns a clone of the cached page, or `None` if not present.
    pub fn get(&self, page_id: PageId) -> Option<Page> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.pages.get_mut(&page_id) {
            entry.accessed = true;
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.page.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Inserts (or replaces) a page, evicting via the clock sweep at capacity.
    pub fn insert(&self, page: Page) {
        let page_id = page.id;
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.pages.get_mut(&page_id) {
            entry.page = page;
            entry.accessed = true;
            return;
        }

        if inner.pages.len() >= self.capacity {
            Self::evict_one(&mut inner);
        }

        inner.order.push(page_id);
        inner.pages.insert(page_id, CacheEntry { page, accessed: true });
    }

    /// Removes a page from the cache.
    pub fn remove(&self, page_id: PageId) {
        let mut inner = self.inner.lock();
        if inner.pages.remove(&page_id).is_some() {
            inner.order.retain(|&id| id != page_id);
            if inner.clock_hand >= inner.order.len() {
                inner.clock_hand = 0;
            }
        }
    }

    /// Clock sweep: evict the first entry without a recent access, clearing
    /// access bits as the hand passes. Two full sweeps always find a victim.
    fn evict_one(inner: &mut CacheInner) {
        if inner.order.is_empty() {
            return;
        }

        let max_iterations = inner.order.len() * 2;
        for _ in 0..max_iterations {
            if inner.clock_hand >= inner.order.len() {
                inner.clock_hand = 0;
            }
            let candidate = inner.order[inner.clock_hand];

            let evict = match inner.pages.get_mut(&candidate) {
                Some(entry) if entry.accessed => {
                    entry.accessed = false;
                    false
                },
                Some(_) => true,
                // Stale order entry; drop it in place.
                None => {
                    inner.order.remove(inner.clock_hand);
                    continue;
                },
            };

            if evict {
                inner.pages.remove(&candidate);
                inner.order.remove(inner.clock_hand);
                return;
            }
            inner.clock_hand += 1;
        }
    }

    /// Returns occupancy and hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.inner.lock().pages.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageKind;

    fn make_page(id: PageId) -> Page {
        Page::new(id, 512, PageKind::Leaf, 1)
    }

    #[test]
    fn test_insert_and_get() {
        let cache = PageCache::new(4);
        cache.insert(make_page(1));

        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_eviction_at_capacity() {
        let cache = PageCache::new(2);
        cache.insert(make_page(1));
        cache.insert(make_page(2));
        cache.insert(make_page(3));

        assert_eq!(cache.stats().size, 2);
    }

    #[test]
    fn test_replace_existing() {
        let cache = PageCache::new(2);
        cache.insert(make_page(1));

        let mut newer = make_page(1);
        newer.data[40] = 0x7;
        cache.insert(newer);

        assert_eq!(cache.stats().size, 1);
        assert_eq!(cache.get(1).unwrap().data[40], 0x7);
    }

    #[test]
    fn test_remove() {
        let cache = PageCache::new(4);
        cache.insert(make_page(1));
        cache.remove(1);
        assert!(cache.get(1).is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_second_chance_prefers_cold_pages() {
        let cache = PageCache::new(2);
        cache.insert(make_page(1));
        cache.insert(make_page(2));

        // Touch page 1 so page 2 is the colder candidate.
        let _ = cache.get(1);
        // First sweep clears both access bits, second evicts the first
        // unaccessed entry; either way capacity holds and page 3 lands.
        cache.insert(make_page(3));
        assert!(cache.get(3).is_some());
        assert_eq!(cache.stats().size, 2);
    }
}
