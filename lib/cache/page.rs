//! Cached page table and eviction bookkeeping.

use bytes::Bytes;
use hashlink::LinkedHashMap;
use tracing::trace;

/// One cached file.
///
/// The page table is the sole long-term owner of the content buffer.
/// Sessions reading from a page hold only its inode key and resolve the page
/// under the cache lock on every transfer, so table growth and eviction can
/// never dangle a reference.
#[derive(Debug)]
pub(crate) struct CachePage {
    /// Total byte size of the cached file.
    pub(crate) size: u64,
    /// Open sessions reading this page. A page with `refs > 0` must never
    /// be evicted.
    pub(crate) refs: u32,
    /// Logical-clock stamp of the most recent close; 0 until first closed.
    pub(crate) last_use: u64,
    /// File content, loaded whole at insert time.
    pub(crate) data: Bytes,
}

/// Inode-keyed table of resident pages with byte-occupancy accounting.
///
/// Iteration order is insertion order, which doubles as the eviction
/// tie-break: should two unreferenced pages ever carry the same `last_use`
/// stamp, the earlier-inserted one goes first.
#[derive(Debug, Default)]
pub(crate) struct PageTable {
    pages: LinkedHashMap<u64, CachePage>,
    /// Sum of `size` over all resident pages.
    used: u64,
}

impl PageTable {
    pub(crate) fn contains(&self, ino: u64) -> bool {
        self.pages.contains_key(&ino)
    }

    pub(crate) fn get(&self, ino: u64) -> Option<&CachePage> {
        self.pages.get(&ino)
    }

    pub(crate) fn get_mut(&mut self, ino: u64) -> Option<&mut CachePage> {
        self.pages.get_mut(&ino)
    }

    /// Resident pages.
    pub(crate) fn len(&self) -> usize {
        self.pages.len()
    }

    /// Bytes of resident content.
    pub(crate) fn used(&self) -> u64 {
        self.used
    }

    /// Insert a freshly loaded page, pinned by its first session.
    ///
    /// The caller checks for an existing page under the same lock, so `ino`
    /// is never already present.
    pub(crate) fn insert(&mut self, ino: u64, data: Bytes) {
        debug_assert!(!self.pages.contains_key(&ino));
        let size = data.len() as u64;
        self.used += size;
        self.pages.insert(
            ino,
            CachePage {
                size,
                refs: 1,
                last_use: 0,
                data,
            },
        );
        trace!(ino, size, resident = self.used, "inserted page");
    }

    /// Bytes held by pages no session has open.
    pub(crate) fn freeable(&self) -> u64 {
        self.pages
            .values()
            .filter(|page| page.refs == 0)
            .map(|page| page.size)
            .sum()
    }

    /// Try to clear room for `incoming` bytes under a `max_bytes` budget.
    ///
    /// Feasibility is decided up front: if even evicting every unreferenced
    /// page cannot fit the new content, nothing is evicted and `false` is
    /// returned so the caller can fall back to uncached serving. Otherwise
    /// unreferenced pages are evicted oldest-stamp-first until `incoming`
    /// fits, and `true` is returned.
    pub(crate) fn make_room(&mut self, incoming: u64, max_bytes: u64) -> bool {
        let free = max_bytes.saturating_sub(self.used);
        if incoming <= free {
            return true;
        }
        if free.saturating_add(self.freeable()) < incoming {
            return false;
        }
        while incoming > max_bytes.saturating_sub(self.used) {
            // Feasibility was established above, so a victim always exists.
            if self.evict_oldest().is_none() {
                return false;
            }
        }
        true
    }

    /// Evict the unreferenced page with the smallest `last_use` stamp,
    /// returning the bytes freed.
    fn evict_oldest(&mut self) -> Option<u64> {
        let mut victim: Option<(u64, u64)> = None;
        for (&ino, page) in &self.pages {
            if page.refs != 0 {
                continue;
            }
            // Strict comparison keeps the first-inserted page on a tie.
            match victim {
                Some((_, stamp)) if page.last_use >= stamp => {}
                _ => victim = Some((ino, page.last_use)),
            }
        }
        let (ino, _) = victim?;
        let page = self.pages.remove(&ino)?;
        self.used -= page.size;
        trace!(
            ino,
            size = page.size,
            last_use = page.last_use,
            resident = self.used,
            "evicted page"
        );
        Some(page.size)
    }
}
