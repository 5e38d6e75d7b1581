//! Transfer scheduling.
//!
//! Admitted requests become [`Rcb`]s queued inside a [`Scheduler`], which
//! hands them out one turn at a time under the configured [`Policy`].
//! Worker threads check a job out with [`Scheduler::next_job`], move at
//! most its quantum of bytes, and hand it back through
//! [`Scheduler::update`], which requeues, demotes or retires it.

use std::fmt;

use crate::cache::Handle;

mod policy;
mod rcb;
mod scheduler;

pub use policy::{Policy, PolicyParseError, Tuning};
pub use rcb::Rcb;
pub use scheduler::Scheduler;

/// Admission was refused because the scheduler is at capacity.
///
/// The connection and its already-open session travel back to the caller,
/// who decides how to fail the request and must close the session.
pub struct QueueFull<C> {
    /// Connection the rejected request arrived on.
    pub conn: C,
    /// Session that was opened for the request.
    pub handle: Handle,
}

impl<C> fmt::Debug for QueueFull<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueFull")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl<C> fmt::Display for QueueFull<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheduler is at capacity")
    }
}

impl<C> std::error::Error for QueueFull<C> {}
