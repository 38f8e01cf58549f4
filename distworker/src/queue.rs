//! Pending item indices with one-ahead lookahead.
//!
//! The run loop only drains while at least two indices are queued, so the
//! item being run always knows what runs after it. The executor uses that
//! to decide whether shared setup can stay alive. The single exception is
//! the final drain at shutdown, which runs with no lookahead.

use std::collections::VecDeque;

use crate::protocol::ItemIndex;

/// An index taken off the queue, with the index that will run next (if known).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    pub index: ItemIndex,
    pub next: Option<ItemIndex>,
}

#[derive(Debug, Clone, Default)]
pub struct RunQueue {
    pending: VecDeque<ItemIndex>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append indices in the order the controller sent them.
    pub fn enqueue_many(&mut self, indices: impl IntoIterator<Item = ItemIndex>) {
        self.pending.extend(indices);
    }

    /// Append the whole plan, `0..count`.
    pub fn enqueue_all(&mut self, count: usize) {
        self.pending.extend(0..count);
    }

    pub fn drain_one(&mut self) -> Option<Drained> {
        let index = self.pending.pop_front()?;
        Some(Drained {
            index,
            next: self.pending.front().copied(),
        })
    }

    /// True when a drain would still leave a lookahead behind.
    pub fn has_lookahead(&self) -> bool {
        self.pending.len() >= 2
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ItemIndex> + '_ {
        self.pending.iter().copied()
    }
}
