//! Live query sessions.
//!
//! A session keeps one subscriber in sync with the records matching a query.
//! It starts POPULATING: the ids to examine sit in a worklist that
//! [`LiveQuerySession::next_slice`] works through a few at a time, so
//! mutations are never stuck behind a full scan. Once the worklist is empty
//! the session is STEADY and only reacts to [`LiveQuerySession::update`] and
//! [`LiveQuerySession::remove`]. [`LiveQuerySession::stop`] is terminal.
//!
//! Notifications are batched; see [`LiveConfig`] for the thresholds.

use crate::flush::FlushTimer;
use almanac_core::store::RecordStore;
use almanac_core::types::{LiveSettings, Record, Uid};
use almanac_query::{Evaluator, Expression};
use notify::{Kind, Pending};
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

mod notify;

pub use notify::{Progress, QueryStatus, Subscriber};

/// Status message sent when population starts.
pub const SEARCHING_MESSAGE: &str = "Searching";

/// Batching and slicing parameters of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveConfig {
    /// Ids examined per [`LiveQuerySession::next_slice`].
    pub slice_size: usize,
    /// Add batch size to start with. Doubles after every full batch.
    pub initial_add_threshold: usize,
    pub max_add_threshold: usize,
    pub change_threshold: usize,
    pub remove_threshold: usize,
    /// Longest a notification waits in a partial batch.
    pub flush_delay: Duration,
}

impl From<&LiveSettings> for LiveConfig {
    fn from(settings: &LiveSettings) -> Self {
        Self {
            slice_size: settings.slice_size.max(1),
            initial_add_threshold: settings.initial_add_threshold.max(1),
            max_add_threshold: settings
                .max_add_threshold
                .max(settings.initial_add_threshold.max(1)),
            change_threshold: settings.change_threshold.max(1),
            remove_threshold: settings.remove_threshold.max(1),
            flush_delay: Duration::from_millis(settings.flush_delay_ms),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::from(&LiveSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Populating,
    Steady,
    Stopped,
}

pub struct LiveQuerySession {
    expression: Expression,
    subscriber: Box<dyn Subscriber>,
    config: LiveConfig,
    state: SessionState,
    worklist: VecDeque<Uid>,
    scanned: usize,
    total: usize,
    members: HashSet<Uid>,
    pending: Pending,
    add_threshold: usize,
    timer: FlushTimer,
    failure: Option<String>,
}

impl std::fmt::Debug for LiveQuerySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuerySession")
            .field("query", &self.expression.source())
            .field("state", &self.state)
            .field("scanned", &self.scanned)
            .field("total", &self.total)
            .field("members", &self.members.len())
            .finish()
    }
}

impl LiveQuerySession {
    /// Starts populating over `candidates`, the ids that may match.
    pub fn start(
        expression: Expression,
        candidates: Vec<Uid>,
        mut subscriber: Box<dyn Subscriber>,
        config: LiveConfig,
    ) -> Self {
        subscriber.on_status_message(SEARCHING_MESSAGE);
        debug!(
            query = expression.source(),
            candidates = candidates.len(),
            "live query started"
        );

        Self {
            expression,
            subscriber,
            total: candidates.len(),
            worklist: candidates.into(),
            scanned: 0,
            members: HashSet::new(),
            pending: Pending::default(),
            add_threshold: config.initial_add_threshold,
            timer: FlushTimer::new(config.flush_delay),
            config,
            state: SessionState::Populating,
            failure: None,
        }
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_populating(&self) -> bool {
        self.state == SessionState::Populating
    }

    pub fn progress(&self) -> Progress {
        Progress {
            scanned: self.scanned,
            total: self.total,
        }
    }

    pub fn is_member(&self, uid: &Uid) -> bool {
        self.members.contains(uid)
    }

    /// Current members in ascending order.
    pub fn members(&self) -> Vec<Uid> {
        let mut members: Vec<Uid> = self.members.iter().cloned().collect();
        members.sort();
        members
    }

    /// Current add batch size.
    pub fn add_threshold(&self) -> usize {
        self.add_threshold
    }

    /// Examines up to `slice_size` ids from the worklist. Returns whether the
    /// session is still populating afterwards.
    pub fn next_slice<S>(&mut self, store: &S, evaluator: &Evaluator) -> bool
    where
        S: RecordStore + ?Sized,
    {
        if self.state != SessionState::Populating {
            return false;
        }

        for _ in 0..self.config.slice_size {
            let Some(uid) = self.worklist.pop_front() else {
                break;
            };
            self.scanned += 1;

            match store.get(&uid) {
                Ok(Some(record)) => {
                    let matches = evaluator.matches(&self.expression, &record);
                    match (self.members.contains(&uid), matches) {
                        (false, true) => {
                            let progress = self.progress();
                            self.members.insert(uid.clone());
                            self.queue_add(uid, record, Some(progress));
                        }
                        (true, false) => {
                            self.members.remove(&uid);
                            self.queue_remove(uid);
                        }
                        // Already decided by a mutation that arrived first.
                        (true, true) | (false, false) => {}
                    }
                }
                Ok(None) => {
                    if self.members.remove(&uid) {
                        self.queue_remove(uid);
                    }
                }
                Err(e) => {
                    warn!(uid = %uid, error = %e, "live query could not read record");
                    self.subscriber
                        .on_status_message(&format!("Failed to read {uid}: {e}"));
                    self.failure.get_or_insert_with(|| e.to_string());
                }
            }
        }

        if self.worklist.is_empty() {
            self.complete();
            return false;
        }
        true
    }

    /// Re-evaluates a record that was created or modified.
    pub fn update(&mut self, record: &Record, evaluator: &Evaluator) {
        if self.state == SessionState::Stopped {
            return;
        }
        let uid = record.uid();
        let matches = evaluator.matches(&self.expression, record);

        match (self.members.contains(uid), matches) {
            (true, true) => self.queue_change(uid.clone(), record.clone()),
            (false, true) => {
                self.members.insert(uid.clone());
                self.queue_add(uid.clone(), record.clone(), None);
            }
            (true, false) => {
                self.members.remove(uid);
                self.queue_remove(uid.clone());
            }
            (false, false) => {}
        }
    }

    /// Reacts to a record leaving the store.
    pub fn remove(&mut self, uid: &Uid) {
        if self.state == SessionState::Stopped {
            return;
        }
        if self.members.remove(uid) {
            self.queue_remove(uid.clone());
        }
    }

    /// Delivers every buffered notification.
    pub fn flush(&mut self) {
        self.timer.disarm();
        self.pending.deliver(self.subscriber.as_mut());
    }

    /// Flushes if the batch delay has passed.
    pub fn flush_if_due(&mut self, now: Instant) {
        if self.timer.fire_if_due(now) {
            self.pending.deliver(self.subscriber.as_mut());
        }
    }

    /// Delivers what is buffered, then goes quiet for good.
    pub fn stop(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        self.flush();
        self.state = SessionState::Stopped;
        self.members = HashSet::new();
        self.worklist = VecDeque::new();
        self.pending.clear();
        debug!(query = self.expression.source(), "live query stopped");
    }
}

/// Internal helpers.
impl LiveQuerySession {
    fn complete(&mut self) {
        self.state = SessionState::Steady;
        self.worklist = VecDeque::new();
        self.flush();

        let status = match self.failure.take() {
            Some(message) => QueryStatus::Failed(message),
            None => QueryStatus::Success,
        };
        debug!(
            query = self.expression.source(),
            members = self.members.len(),
            ?status,
            "live query populated"
        );
        self.subscriber.on_query_complete(&status);
    }

    fn make_room_for(&mut self, kind: Kind) {
        if self.pending.holds_other_than(kind) {
            self.flush();
        }
    }

    fn queue_add(&mut self, uid: Uid, record: Record, progress: Option<Progress>) {
        self.make_room_for(Kind::Add);
        if self.pending.push_add(uid, record, progress) >= self.add_threshold {
            self.flush();
            self.add_threshold = self
                .add_threshold
                .saturating_mul(2)
                .min(self.config.max_add_threshold);
        } else {
            self.timer.arm(Instant::now());
        }
    }

    fn queue_change(&mut self, uid: Uid, record: Record) {
        self.make_room_for(Kind::Change);
        if self.pending.push_change(uid, record) >= self.config.change_threshold {
            self.flush();
        } else {
            self.timer.arm(Instant::now());
        }
    }

    fn queue_remove(&mut self, uid: Uid) {
        self.make_room_for(Kind::Remove);
        if self.pending.push_remove(uid) >= self.config.remove_threshold {
            self.flush();
        } else {
            self.timer.arm(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests;
