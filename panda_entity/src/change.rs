//! Global change index and the eight change groups used by `*CHANGES`.
//!
//! Every mutation stamps the field or attribute it touched with the next
//! value from a single monotonically increasing counter. Each connection
//! remembers, per group, the counter value it last reported; a
//! `*CHANGES.GROUP?` query walks every entity in that group and reports
//! the ones stamped since then.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeGroup {
    Config,
    Bits,
    Position,
    Read,
    Attr,
    Table,
    Metadata,
    /// The union of all seven groups, used by a bare `*CHANGES?`.
    All,
}

impl ChangeGroup {
    pub const GROUPS: [ChangeGroup; 7] = [
        ChangeGroup::Config,
        ChangeGroup::Bits,
        ChangeGroup::Position,
        ChangeGroup::Read,
        ChangeGroup::Attr,
        ChangeGroup::Table,
        ChangeGroup::Metadata,
    ];

    pub fn from_name(name: &str) -> Option<ChangeGroup> {
        match name {
            "CONFIG" => Some(ChangeGroup::Config),
            "BITS" => Some(ChangeGroup::Bits),
            "POSITION" => Some(ChangeGroup::Position),
            "READ" => Some(ChangeGroup::Read),
            "ATTR" => Some(ChangeGroup::Attr),
            "TABLE" => Some(ChangeGroup::Table),
            "METADATA" => Some(ChangeGroup::Metadata),
            "" => Some(ChangeGroup::All),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            ChangeGroup::Config => 0,
            ChangeGroup::Bits => 1,
            ChangeGroup::Position => 2,
            ChangeGroup::Read => 3,
            ChangeGroup::Attr => 4,
            ChangeGroup::Table => 5,
            ChangeGroup::Metadata => 6,
            ChangeGroup::All => 7,
        }
    }
}

/// The single global counter. Shared (via `Arc`) by every field and
/// attribute's change-index slot and by each connection's
/// last-reported-index table.
#[derive(Default)]
pub struct ChangeIndex {
    counter: AtomicU64,
}

impl ChangeIndex {
    pub fn new() -> ChangeIndex {
        // Start at 1 so 0 reliably means "never changed" in a field's slot.
        ChangeIndex { counter: AtomicU64::new(1) }
    }

    /// Returns the next unique index and advances the counter. Returns the
    /// post-increment value: every stamp this hands out must compare
    /// strictly greater than any baseline previously captured via
    /// `current()`, or a mutation racing a `*CHANGES` query immediately
    /// before it could be stamped with exactly the query's baseline and
    /// get silently dropped by `changed_since`'s strict `>` filter.
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

/// Per-connection bookkeeping: the index each group was last reported at.
pub struct ConnectionChangeState {
    last_reported: [u64; 8],
}

impl Default for ConnectionChangeState {
    fn default() -> Self {
        ConnectionChangeState { last_reported: [0; 8] }
    }
}

impl ConnectionChangeState {
    pub fn new() -> ConnectionChangeState {
        ConnectionChangeState::default()
    }

    /// Returns the previously reported index for `group`, then advances it
    /// to `new_index` (the global counter's current value at query time).
    pub fn advance(&mut self, group: ChangeGroup, new_index: u64) -> u64 {
        let groups = if matches!(group, ChangeGroup::All) {
            ChangeGroup::GROUPS.to_vec()
        } else {
            vec![group]
        };
        let previous = self.last_reported[group.index()];
        for g in groups {
            self.last_reported[g.index()] = new_index;
        }
        if matches!(group, ChangeGroup::All) {
            self.last_reported[ChangeGroup::All.index()] = new_index;
        }
        previous
    }

    pub fn last(&self, group: ChangeGroup) -> u64 {
        self.last_reported[group.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_next_calls_are_monotonic() {
        let idx = ChangeIndex::new();
        let a = idx.next();
        let b = idx.next();
        assert!(b > a);
    }

    #[test]
    fn connection_state_tracks_per_group_baseline() {
        let mut state = ConnectionChangeState::new();
        assert_eq!(state.advance(ChangeGroup::Config, 5), 0);
        assert_eq!(state.last(ChangeGroup::Config), 5);
        assert_eq!(state.advance(ChangeGroup::Config, 9), 5);
    }
}
