//! Subscriber callbacks and notification batching.

use almanac_core::types::{Record, Uid};

/// Position within the initial population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub scanned: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    Success,
    /// First error hit while populating.
    Failed(String),
}

/// Receives the notifications of one live query.
///
/// Callbacks run while the backend holds its session lock and must not call
/// back into the backend.
pub trait Subscriber: Send {
    /// `progress` is set for matches found by the initial population.
    fn on_added(&mut self, uid: &Uid, record: &Record, progress: Option<Progress>);

    fn on_changed(&mut self, uid: &Uid, record: &Record);

    fn on_removed(&mut self, uid: &Uid);

    fn on_query_complete(&mut self, status: &QueryStatus);

    fn on_status_message(&mut self, message: &str);

    /// Called after each delivered batch.
    fn flushed(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Add,
    Change,
    Remove,
}

/// Notifications waiting for delivery.
///
/// Only one kind is buffered at a time; queueing another kind flushes first,
/// so delivery order is event order.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    adds: Vec<(Uid, Record, Option<Progress>)>,
    changes: Vec<(Uid, Record)>,
    removes: Vec<Uid>,
}

impl Pending {
    pub(crate) fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.changes.is_empty() && self.removes.is_empty()
    }

    /// Whether something of a kind other than `kind` is buffered.
    pub(crate) fn holds_other_than(&self, kind: Kind) -> bool {
        match kind {
            Kind::Add => !self.changes.is_empty() || !self.removes.is_empty(),
            Kind::Change => !self.adds.is_empty() || !self.removes.is_empty(),
            Kind::Remove => !self.adds.is_empty() || !self.changes.is_empty(),
        }
    }

    /// Buffered count of `kind` after pushing.
    pub(crate) fn push_add(&mut self, uid: Uid, record: Record, progress: Option<Progress>) -> usize {
        self.adds.push((uid, record, progress));
        self.adds.len()
    }

    pub(crate) fn push_change(&mut self, uid: Uid, record: Record) -> usize {
        self.changes.push((uid, record));
        self.changes.len()
    }

    pub(crate) fn push_remove(&mut self, uid: Uid) -> usize {
        self.removes.push(uid);
        self.removes.len()
    }

    /// Hands everything buffered to `subscriber`. Returns whether anything was
    /// delivered.
    pub(crate) fn deliver(&mut self, subscriber: &mut dyn Subscriber) -> bool {
        if self.is_empty() {
            return false;
        }
        for (uid, record, progress) in self.adds.drain(..) {
            subscriber.on_added(&uid, &record, progress);
        }
        for (uid, record) in self.changes.drain(..) {
            subscriber.on_changed(&uid, &record);
        }
        for uid in self.removes.drain(..) {
            subscriber.on_removed(&uid);
        }
        subscriber.flushed();
        true
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}
