//! Breakpoint and watchpoint tables.

use std::collections::BTreeMap;

use crate::api::{AccessKind, BreakpointId, MemoryAccess, WatchpointId};

/// Stop before executing the instruction at `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Breakpoint {
    /// Handle.
    pub id: BreakpointId,
    /// Instruction address.
    pub address: u32,
    /// Disabled breakpoints never stop execution.
    pub enabled: bool,
    /// Times this breakpoint stopped execution.
    pub hit_count: u64,
}

/// Which accesses a watchpoint reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum WatchKind {
    /// Loads only.
    Read,
    /// Stores only.
    Write,
    /// Loads and stores.
    ReadWrite,
}

impl WatchKind {
    /// True when an access of `kind` qualifies.
    #[must_use]
    pub const fn matches(self, kind: AccessKind) -> bool {
        matches!(
            (self, kind),
            (Self::ReadWrite, _) | (Self::Read, AccessKind::Read) | (Self::Write, AccessKind::Write)
        )
    }
}

/// Stop after an instruction accesses `[address, address + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Watchpoint {
    /// Handle.
    pub id: WatchpointId,
    /// First watched byte.
    pub address: u32,
    /// Watched byte count.
    pub size: u32,
    /// Qualifying access direction.
    pub kind: WatchKind,
    /// Disabled watchpoints never stop execution.
    pub enabled: bool,
    /// Times this watchpoint stopped execution.
    pub hit_count: u64,
}

impl Watchpoint {
    /// True when `access` qualifies for this watchpoint.
    #[must_use]
    pub fn triggers_on(&self, access: &MemoryAccess) -> bool {
        self.enabled && self.kind.matches(access.kind) && access.overlaps(self.address, self.size)
    }
}

/// Breakpoints keyed by id, in creation order.
#[derive(Debug, Clone, Default)]
pub struct BreakpointTable {
    entries: BTreeMap<BreakpointId, Breakpoint>,
    next_id: u32,
}

impl BreakpointTable {
    /// Adds an enabled breakpoint.
    pub fn insert(&mut self, address: u32) -> BreakpointId {
        let id = BreakpointId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            Breakpoint {
                id,
                address,
                enabled: true,
                hit_count: 0,
            },
        );
        id
    }

    /// Removes a breakpoint.
    pub fn remove(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        self.entries.remove(&id)
    }

    /// Breakpoint by id.
    #[must_use]
    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.entries.get(&id)
    }

    /// Mutable breakpoint by id.
    pub fn get_mut(&mut self, id: BreakpointId) -> Option<&mut Breakpoint> {
        self.entries.get_mut(&id)
    }

    /// All breakpoints.
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.entries.values()
    }

    /// Records a hit on the first enabled breakpoint at `address`.
    pub fn hit(&mut self, address: u32) -> Option<&Breakpoint> {
        let breakpoint = self
            .entries
            .values_mut()
            .find(|breakpoint| breakpoint.enabled && breakpoint.address == address)?;
        breakpoint.hit_count += 1;
        Some(breakpoint)
    }
}

/// Watchpoints keyed by id, in creation order.
#[derive(Debug, Clone, Default)]
pub struct WatchpointTable {
    entries: BTreeMap<WatchpointId, Watchpoint>,
    next_id: u32,
}

impl WatchpointTable {
    /// Adds an enabled watchpoint.
    pub fn insert(&mut self, address: u32, size: u32, kind: WatchKind) -> WatchpointId {
        let id = WatchpointId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            Watchpoint {
                id,
                address,
                size,
                kind,
                enabled: true,
                hit_count: 0,
            },
        );
        id
    }

    /// Removes a watchpoint.
    pub fn remove(&mut self, id: WatchpointId) -> Option<Watchpoint> {
        self.entries.remove(&id)
    }

    /// Watchpoint by id.
    #[must_use]
    pub fn get(&self, id: WatchpointId) -> Option<&Watchpoint> {
        self.entries.get(&id)
    }

    /// Mutable watchpoint by id.
    pub fn get_mut(&mut self, id: WatchpointId) -> Option<&mut Watchpoint> {
        self.entries.get_mut(&id)
    }

    /// All watchpoints.
    pub fn iter(&self) -> impl Iterator<Item = &Watchpoint> {
        self.entries.values()
    }

    /// Records a hit on the first watchpoint that `access` triggers.
    pub fn hit(&mut self, access: &MemoryAccess) -> Option<&Watchpoint> {
        let watchpoint = self
            .entries
            .values_mut()
            .find(|watchpoint| watchpoint.triggers_on(access))?;
        watchpoint.hit_count += 1;
        Some(watchpoint)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{BreakpointTable, WatchKind, WatchpointTable};
    use crate::api::{AccessKind, MemoryAccess};

    #[test]
    fn disabled_breakpoints_never_hit() {
        let mut table = BreakpointTable::default();
        let id = table.insert(0x1004);
        table.get_mut(id).expect("present").enabled = false;
        assert!(table.hit(0x1004).is_none());

        table.get_mut(id).expect("present").enabled = true;
        assert_eq!(table.hit(0x1004).map(|bp| bp.hit_count), Some(1));
        assert_eq!(table.get(id).map(|bp| bp.hit_count), Some(1));
    }

    #[test]
    fn ids_are_not_reused_after_removal() {
        let mut table = BreakpointTable::default();
        let first = table.insert(0x1000);
        assert!(table.remove(first).is_some());
        let second = table.insert(0x1000);
        assert_ne!(first, second);
        assert!(table.remove(first).is_none());
    }

    #[rstest]
    #[case(WatchKind::Write, AccessKind::Write, 0x2002, true)]
    #[case(WatchKind::Write, AccessKind::Read, 0x2000, false)]
    #[case(WatchKind::Read, AccessKind::Read, 0x2003, true)]
    #[case(WatchKind::ReadWrite, AccessKind::Write, 0x1FFD, true)]
    #[case(WatchKind::ReadWrite, AccessKind::Write, 0x2004, false)]
    fn watchpoints_match_direction_and_range(
        #[case] watch: WatchKind,
        #[case] kind: AccessKind,
        #[case] address: u32,
        #[case] expected: bool,
    ) {
        let mut table = WatchpointTable::default();
        table.insert(0x2000, 4, watch);
        let access = MemoryAccess {
            address,
            size: 4,
            kind,
        };
        assert_eq!(table.hit(&access).is_some(), expected);
    }
}
