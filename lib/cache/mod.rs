//! Reference-counted, capacity-bounded file cache.
//!
//! Files are cached whole and keyed by inode, so hard links and aliased
//! paths share one resident copy. Every open session pins its page; pages
//! nobody holds open are reclaimed least-recently-closed-first when a new
//! file needs room, and files no amount of eviction can fit are served
//! straight from disk instead.

use std::collections::TryReserveError;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

mod fcache;
mod page;
mod session;
mod table;

pub use fcache::{CacheStats, FileCache};

/// Failures surfaced by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The path does not name a readable regular file.
    #[error("cannot serve {path}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The handle does not correspond to a live session.
    #[error("no open session behind handle {0}")]
    UnknownHandle(Handle),
    /// Moving bytes to the client failed.
    #[error("transfer failed")]
    Transfer(#[from] io::Error),
    /// A page buffer or the descriptor table could not be allocated.
    #[error("out of memory")]
    Allocation(#[from] TryReserveError),
}

/// Opaque identifier for an open file session.
///
/// Handles stay valid for the lifetime of their session: descriptor table
/// growth never moves or renumbers a live slot. A freed handle may be
/// reissued by a later [`FileCache::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub(crate) usize);

impl Handle {
    /// Slot index backing this handle.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
