//! Descriptor table mapping handles to live sessions.

use std::collections::TryReserveError;

use tracing::trace;

use super::Handle;
use super::session::Session;

const INITIAL_SLOTS: usize = 16;

/// Slot-stable session table.
///
/// A [`Handle`] indexes straight into the slot vector. Growth appends slots
/// without moving existing entries, so issued handles stay valid until
/// freed, and freed slots are reissued lowest-index-first.
#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    slots: Vec<Option<Session>>,
}

impl SessionTable {
    /// Place `session` in the lowest free slot, doubling the table when
    /// every slot is taken. Growth failure surfaces to the caller rather
    /// than aborting the process.
    pub(crate) fn alloc(&mut self, session: Session) -> Result<Handle, TryReserveError> {
        if let Some(idx) = self.slots.iter().position(Option::is_none) {
            self.slots[idx] = Some(session);
            return Ok(Handle(idx));
        }
        let grow_to = INITIAL_SLOTS.max(self.slots.len() * 2);
        self.slots.try_reserve_exact(grow_to - self.slots.len())?;
        let idx = self.slots.len();
        self.slots.resize_with(grow_to, || None);
        self.slots[idx] = Some(session);
        trace!(slots = grow_to, "grew session table");
        Ok(Handle(idx))
    }

    pub(crate) fn get(&self, handle: Handle) -> Option<&Session> {
        self.slots.get(handle.0)?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, handle: Handle) -> Option<&mut Session> {
        self.slots.get_mut(handle.0)?.as_mut()
    }

    /// Remove the session behind `handle`, leaving its slot free for reuse.
    pub(crate) fn free(&mut self, handle: Handle) -> Option<Session> {
        self.slots.get_mut(handle.0)?.take()
    }

    /// Live sessions.
    pub(crate) fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::Cached { ino: 0, pos: 0 }
    }

    #[test]
    fn allocates_lowest_free_slot() {
        let mut table = SessionTable::default();
        assert_eq!(table.alloc(session()).unwrap(), Handle(0));
        assert_eq!(table.alloc(session()).unwrap(), Handle(1));
        assert_eq!(table.alloc(session()).unwrap(), Handle(2));

        assert!(table.free(Handle(1)).is_some());
        assert_eq!(
            table.alloc(session()).unwrap(),
            Handle(1),
            "freed slot is reissued before untouched ones"
        );
    }

    #[test]
    fn growth_keeps_existing_handles_valid() {
        let mut table = SessionTable::default();
        let handles: Vec<Handle> = (0..INITIAL_SLOTS + 4)
            .map(|_| table.alloc(session()).unwrap())
            .collect();

        for (idx, handle) in handles.iter().enumerate() {
            assert_eq!(handle.index(), idx);
            assert!(table.get(*handle).is_some(), "slot {idx} must survive growth");
        }
        assert_eq!(table.occupied(), INITIAL_SLOTS + 4);
    }

    #[test]
    fn free_is_idempotent_per_issue() {
        let mut table = SessionTable::default();
        let handle = table.alloc(session()).unwrap();

        assert!(table.free(handle).is_some());
        assert!(table.free(handle).is_none(), "second free finds nothing");
        assert!(table.get(handle).is_none());
    }

    #[test]
    fn unknown_handles_resolve_to_nothing() {
        let mut table = SessionTable::default();
        assert!(table.get(Handle(7)).is_none());
        assert!(table.get_mut(Handle(7)).is_none());
        assert!(table.free(Handle(7)).is_none());
    }
}
