//! Policy-driven request queues.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, trace, warn};

use crate::cache::{FileCache, Handle};

use super::policy::{Policy, Tuning};
use super::rcb::Rcb;
use super::QueueFull;

#[derive(Debug)]
enum QueueSet<C> {
    /// Kept sorted by remaining bytes, FIFO among equals.
    Sjf(VecDeque<Rcb<C>>),
    Rr(VecDeque<Rcb<C>>),
    /// One FIFO per feedback level, drained top level first.
    Mlfb(Vec<VecDeque<Rcb<C>>>),
}

#[derive(Debug)]
struct SchedState<C> {
    queues: QueueSet<C>,
    /// Admitted transfers not yet retired, queued or checked out.
    live: usize,
    /// Next admission sequence number.
    seq: u64,
}

/// Thread-safe request scheduler generic over the connection type.
///
/// Jobs move through a check-out cycle: [`Scheduler::next_job`] removes the
/// most urgent Rcb, the caller transfers at most [`Rcb::quantum`] bytes,
/// and [`Scheduler::update`] settles the turn. A checked-out job still
/// counts against capacity.
#[derive(Debug)]
pub struct Scheduler<C> {
    policy: Policy,
    tuning: Tuning,
    state: Mutex<SchedState<C>>,
}

impl<C> Scheduler<C> {
    /// Build a scheduler for `policy`. A zero quantum or zero levels would
    /// wedge every transfer, so both are clamped to 1 with a warning.
    #[must_use]
    pub fn new(policy: Policy, mut tuning: Tuning) -> Self {
        if tuning.quantum == 0 {
            warn!("quantum of 0 requested, clamping to 1");
            tuning.quantum = 1;
        }
        if tuning.levels == 0 {
            warn!("0 feedback levels requested, clamping to 1");
            tuning.levels = 1;
        }
        let queues = match policy {
            Policy::Sjf => QueueSet::Sjf(VecDeque::new()),
            Policy::RoundRobin => QueueSet::Rr(VecDeque::new()),
            Policy::Mlfb => QueueSet::Mlfb((0..tuning.levels).map(|_| VecDeque::new()).collect()),
        };
        Self {
            policy,
            tuning,
            state: Mutex::new(SchedState {
                queues,
                live: 0,
                seq: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The discipline this scheduler runs.
    #[must_use]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Admit a transfer of `size` bytes, or hand everything back if the
    /// scheduler is at capacity.
    pub fn submit(&self, conn: C, handle: Handle, size: u64) -> Result<(), QueueFull<C>> {
        let mut state = self.lock();
        if self.tuning.capacity.is_some_and(|cap| state.live >= cap) {
            return Err(QueueFull { conn, handle });
        }
        let seq = state.seq;
        state.seq += 1;
        state.live += 1;

        // Shortest-job-first grants the whole file in one turn.
        let quantum = match self.policy {
            Policy::Sjf => size,
            Policy::RoundRobin | Policy::Mlfb => self.tuning.quantum,
        };
        let rcb = Rcb::new(seq, conn, handle, size, quantum);
        trace!(seq, %handle, size, "admitted");
        match &mut state.queues {
            QueueSet::Sjf(queue) => insert_sorted(queue, rcb),
            QueueSet::Rr(queue) => queue.push_back(rcb),
            // `levels` is never empty, `new` clamps it.
            QueueSet::Mlfb(levels) => levels[0].push_back(rcb),
        }
        Ok(())
    }

    /// Check out the most urgent job, if any is queued.
    pub fn next_job(&self) -> Option<Rcb<C>> {
        let mut state = self.lock();
        let rcb = match &mut state.queues {
            QueueSet::Sjf(queue) | QueueSet::Rr(queue) => queue.pop_front(),
            QueueSet::Mlfb(levels) => levels.iter_mut().find_map(VecDeque::pop_front),
        }?;
        trace!(
            seq = rcb.seq,
            remaining = rcb.remaining,
            quantum = rcb.quantum,
            "checked out"
        );
        Some(rcb)
    }

    /// Settle a turn: charge `served` bytes against the job, then retire it
    /// if done or queue it for another turn.
    ///
    /// Under MLFB an unfinished job drops one level (until the bottom) and
    /// doubles its quantum. Under SJF a turn is expected to finish the
    /// whole file, so an unfinished job is logged loudly and requeued with
    /// its remainder as the new quantum.
    pub fn update(&self, cache: &FileCache, served: u64, mut rcb: Rcb<C>) {
        rcb.remaining = rcb.remaining.saturating_sub(served);
        if rcb.remaining == 0 {
            debug!(seq = rcb.seq, handle = %rcb.handle, "transfer complete");
            self.release(cache, rcb);
            return;
        }
        match self.policy {
            Policy::Sjf => {
                error!(
                    seq = rcb.seq,
                    remaining = rcb.remaining,
                    "shortest-job turn ended before the file did"
                );
                rcb.quantum = rcb.remaining;
            }
            Policy::Mlfb if rcb.level + 1 < self.tuning.levels => {
                rcb.level += 1;
                rcb.quantum = rcb.quantum.saturating_mul(2);
                trace!(seq = rcb.seq, level = rcb.level, quantum = rcb.quantum, "demoted");
            }
            Policy::RoundRobin | Policy::Mlfb => {}
        }
        let mut state = self.lock();
        match &mut state.queues {
            QueueSet::Sjf(queue) => insert_sorted(queue, rcb),
            QueueSet::Rr(queue) => queue.push_back(rcb),
            QueueSet::Mlfb(levels) => levels[rcb.level].push_back(rcb),
        }
    }

    /// Give up on a checked-out job, closing its session and connection.
    pub fn abort(&self, cache: &FileCache, rcb: Rcb<C>) {
        warn!(seq = rcb.seq, remaining = rcb.remaining, "aborting transfer");
        self.release(cache, rcb);
    }

    fn release(&self, cache: &FileCache, rcb: Rcb<C>) {
        if let Err(err) = cache.close(rcb.handle) {
            warn!(seq = rcb.seq, "session close failed: {err}");
        }
        self.lock().live -= 1;
        // rcb drops here, hanging up the connection
    }

    /// Admission sequence numbers of queued jobs, in service order.
    /// Checked-out jobs are not included.
    #[must_use]
    pub fn pending(&self) -> Vec<u64> {
        let state = self.lock();
        match &state.queues {
            QueueSet::Sjf(queue) | QueueSet::Rr(queue) => queue.iter().map(Rcb::seq).collect(),
            QueueSet::Mlfb(levels) => levels.iter().flatten().map(Rcb::seq).collect(),
        }
    }

    /// Admitted transfers not yet finished, queued or checked out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().live
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a [`Scheduler::submit`] right now would be refused.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.tuning.capacity.is_some_and(|cap| self.lock().live >= cap)
    }
}

/// Keep an SJF queue ordered by remaining bytes, FIFO among equals.
fn insert_sorted<C>(queue: &mut VecDeque<Rcb<C>>, rcb: Rcb<C>) {
    let at = queue
        .iter()
        .position(|queued| queued.remaining > rcb.remaining)
        .unwrap_or(queue.len());
    queue.insert(at, rcb);
}
