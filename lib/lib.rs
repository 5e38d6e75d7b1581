//! fairserve core library.
//!
//! Two halves make up the serving core: [`cache`], a reference-counted,
//! capacity-bounded file cache keyed by inode, and [`sched`], the request
//! scheduler that time-slices transfers across clients under a configurable
//! policy.

/// Reference-counted file cache and per-client session backends.
pub mod cache;
/// Transfer scheduling policies and request queues.
pub mod sched;
