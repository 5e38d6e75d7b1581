//! Cache facade tying pages, sessions and the descriptor table together.
//!
//! All state sits behind one mutex. Transfers deliberately run outside it:
//! [`FileCache::send`] snapshots what it needs under the lock, moves bytes
//! with the lock released, then relocks to advance the session cursor, so a
//! slow client never stalls other sessions.

use std::collections::TryReserveError;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::page::PageTable;
use super::session::{self, Session};
use super::table::SessionTable;
use super::{CacheError, Handle};

/// Point-in-time occupancy numbers, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Resident pages.
    pub pages: usize,
    /// Bytes held by resident pages.
    pub resident_bytes: u64,
    /// Sessions currently open.
    pub open_sessions: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    pages: PageTable,
    sessions: SessionTable,
    /// Logical clock, bumped on every cached close to stamp recency.
    clock: u64,
}

/// Thread-safe, capacity-bounded whole-file cache.
///
/// Pages are keyed by inode, so hard links and aliased paths to the same
/// file share a single resident copy. Opening a file that cannot fit even
/// after evicting every unreferenced page falls back to an uncached session
/// that streams from disk.
#[derive(Debug)]
pub struct FileCache {
    max_bytes: u64,
    state: Mutex<CacheState>,
}

impl FileCache {
    /// Create a cache that keeps at most `max_bytes` of file content
    /// resident.
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open `path` for serving and return the session handle.
    ///
    /// A resident page is reused and pinned. Otherwise the file is loaded
    /// whole if room can be made under the capacity bound, evicting
    /// least-recently-closed pages as needed; if no amount of eviction
    /// would fit it, the session streams from disk instead. An infeasible
    /// fit evicts nothing.
    pub fn open(&self, path: &Path) -> Result<Handle, CacheError> {
        let not_found = |source: io::Error| CacheError::NotFound {
            path: path.to_owned(),
            source,
        };

        let file = File::open(path).map_err(not_found)?;
        let meta = file.metadata().map_err(not_found)?;
        if !meta.is_file() {
            return Err(not_found(io::ErrorKind::InvalidInput.into()));
        }
        let ino = meta.ino();
        let size = meta.size();

        let mut guard = self.lock();
        let state = &mut *guard;

        if state.pages.contains(ino) {
            // Slot first: allocation is the only fallible step, and this
            // order leaves nothing to unwind when it fails.
            let handle = state.sessions.alloc(Session::Cached { ino, pos: 0 })?;
            if let Some(page) = state.pages.get_mut(ino) {
                page.refs += 1;
                trace!(%handle, ino, refs = page.refs, "cache hit");
            }
            return Ok(handle);
        }

        // Loading happens under the lock so two concurrent opens of the
        // same file cannot both miss and double-load it.
        if state.pages.make_room(size, self.max_bytes) {
            let data = match load_whole(&file, size) {
                Ok(data) => data,
                Err(LoadFailure::Alloc(err)) => return Err(CacheError::Allocation(err)),
                Err(LoadFailure::Read(err)) => return Err(not_found(err)),
            };
            let handle = state.sessions.alloc(Session::Cached { ino, pos: 0 })?;
            state.pages.insert(ino, data);
            debug!(%handle, ino, size, "cached new page");
            Ok(handle)
        } else {
            let handle = state.sessions.alloc(Session::Uncached { file, size, sent: 0 })?;
            debug!(%handle, size, "file exceeds reclaimable room, serving uncached");
            Ok(handle)
        }
    }

    /// Total size in bytes of the file behind `handle`.
    pub fn filesize(&self, handle: Handle) -> Result<u64, CacheError> {
        let state = self.lock();
        match state.sessions.get(handle) {
            Some(Session::Cached { ino, .. }) => state
                .pages
                .get(*ino)
                .map(|page| page.size)
                .ok_or(CacheError::UnknownHandle(handle)),
            Some(Session::Uncached { size, .. }) => Ok(*size),
            None => Err(CacheError::UnknownHandle(handle)),
        }
    }

    /// Send up to `max` bytes from the session's cursor into `writer`,
    /// returning the bytes moved. `Ok(0)` means the session reached end of
    /// file (or, for an uncached session, that the file shrank underneath
    /// it).
    ///
    /// The transfer itself runs with the cache unlocked; the cursor only
    /// advances by what was actually delivered.
    pub fn send<W: Write + AsFd>(
        &self,
        handle: Handle,
        writer: &mut W,
        max: usize,
    ) -> Result<usize, CacheError> {
        enum Work {
            Cached(Bytes),
            Uncached { file: File, offset: u64, want: usize },
            Done,
        }

        let work = {
            let mut guard = self.lock();
            let state = &mut *guard;
            match state
                .sessions
                .get_mut(handle)
                .ok_or(CacheError::UnknownHandle(handle))?
            {
                Session::Cached { ino, pos } => {
                    let (ino, pos) = (*ino, *pos);
                    let page = state
                        .pages
                        .get(ino)
                        .ok_or(CacheError::UnknownHandle(handle))?;
                    let end = page.data.len().min(pos.saturating_add(max));
                    if pos >= end {
                        Work::Done
                    } else {
                        Work::Cached(page.data.slice(pos..end))
                    }
                }
                Session::Uncached { file, size, sent } => {
                    let want = (max as u64).min(size.saturating_sub(*sent));
                    if want == 0 {
                        Work::Done
                    } else {
                        Work::Uncached {
                            file: file.try_clone()?,
                            offset: *sent,
                            want: want as usize,
                        }
                    }
                }
            }
        };

        let sent = match work {
            Work::Done => return Ok(0),
            Work::Cached(chunk) => {
                writer.write_all(&chunk)?;
                chunk.len()
            }
            Work::Uncached { file, offset, want } => {
                session::transfer_from_file(&file, writer, offset, want)?
            }
        };

        match self.lock().sessions.get_mut(handle) {
            Some(Session::Cached { pos, .. }) => *pos += sent,
            Some(Session::Uncached { sent: done, .. }) => *done += sent as u64,
            None => warn!(%handle, "session vanished mid-transfer"),
        }
        Ok(sent)
    }

    /// Close the session behind `handle`, unpinning its page if it was
    /// cached and stamping the page with the current logical clock.
    pub fn close(&self, handle: Handle) -> Result<(), CacheError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        match state.sessions.free(handle) {
            Some(Session::Cached { ino, .. }) => {
                if let Some(page) = state.pages.get_mut(ino) {
                    page.refs = page.refs.saturating_sub(1);
                    state.clock += 1;
                    page.last_use = state.clock;
                    trace!(%handle, ino, refs = page.refs, stamp = page.last_use, "closed");
                }
                Ok(())
            }
            Some(Session::Uncached { .. }) => {
                trace!(%handle, "closed uncached session");
                Ok(())
            }
            None => Err(CacheError::UnknownHandle(handle)),
        }
    }

    /// Current occupancy.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            pages: state.pages.len(),
            resident_bytes: state.pages.used(),
            open_sessions: state.sessions.occupied(),
        }
    }

    /// Tear the cache down, releasing every page and session.
    pub fn destroy(self) -> CacheStats {
        let stats = self.stats();
        if stats.open_sessions > 0 {
            warn!(sessions = stats.open_sessions, "destroying cache with open sessions");
        }
        debug!(
            pages = stats.pages,
            resident = stats.resident_bytes,
            "cache destroyed"
        );
        stats
    }
}

enum LoadFailure {
    Alloc(TryReserveError),
    Read(io::Error),
}

/// Read exactly `size` bytes of `file` into an immutable buffer.
fn load_whole(file: &File, size: u64) -> Result<Bytes, LoadFailure> {
    let len = usize::try_from(size)
        .map_err(|_| LoadFailure::Read(io::ErrorKind::OutOfMemory.into()))?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(LoadFailure::Alloc)?;
    file.take(size).read_to_end(&mut buf).map_err(LoadFailure::Read)?;
    if buf.len() < len {
        // The file shrank between stat and read.
        return Err(LoadFailure::Read(io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(Bytes::from(buf))
}
