// id.rs — Stable identifiers for compiled state and scheduled objects
//
// Slots index the state variables of one namespace in declaration order.
// Group and monitor IDs are handed out by the network in registration order,
// which is also the order they run in on every tick.

/// Index of a state variable within its namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

impl SlotId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier for a group (one code object plus its state) in a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

impl GroupId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier for a monitor in a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorId(pub u32);

impl MonitorId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Allocator for network IDs. Produces monotonically increasing IDs in
/// registration order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_group: u32,
    next_monitor: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_group(&mut self) -> GroupId {
        let id = GroupId(self.next_group);
        self.next_group += 1;
        id
    }

    pub fn alloc_monitor(&mut self) -> MonitorId {
        let id = MonitorId(self.next_monitor);
        self.next_monitor += 1;
        id
    }
}
