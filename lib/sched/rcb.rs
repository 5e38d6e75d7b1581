//! Request control blocks.

use crate::cache::Handle;

/// One admitted transfer and its scheduling state.
///
/// An `Rcb` owns the client connection for its whole queued life; retiring
/// or aborting the transfer drops the connection and closes it.
#[derive(Debug)]
pub struct Rcb<C> {
    pub(crate) seq: u64,
    pub(crate) conn: C,
    pub(crate) handle: Handle,
    pub(crate) remaining: u64,
    pub(crate) quantum: u64,
    pub(crate) level: usize,
}

impl<C> Rcb<C> {
    pub(crate) fn new(seq: u64, conn: C, handle: Handle, size: u64, quantum: u64) -> Self {
        Self {
            seq,
            conn,
            handle,
            remaining: size,
            quantum,
            level: 0,
        }
    }

    /// Admission sequence number, unique within one scheduler.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Cache session this transfer reads from.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Bytes still owed to the client.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Byte budget for the next turn.
    #[must_use]
    pub fn quantum(&self) -> u64 {
        self.quantum
    }

    /// Feedback level, 0 being the highest priority.
    #[must_use]
    pub fn level(&self) -> usize {
        self.level
    }

    /// The connection bytes are delivered to.
    pub fn conn_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}
