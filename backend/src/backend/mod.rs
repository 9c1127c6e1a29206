use crate::live::{LiveConfig, LiveQuerySession, SessionState, Subscriber};
use crate::summary::SummaryIndex;
use almanac_core::changes::error::ChangeError;
use almanac_core::changes::{ChangeSet, ChangeTracker};
use almanac_core::store::error::StoreError;
use almanac_core::store::{DbStore, RecordStore};
use almanac_core::types::{Config, Record, Settings, SettingsError, Uid};
use almanac_query::{
    CompileError, Compiler, Evaluator, Expression, OccurrenceSource, SingleOccurrence, time,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("query error: {0}")]
    Compile(#[from] CompileError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("change tracking error: {0}")]
    Changes(#[from] ChangeError),

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("record not found: {0}")]
    NotFound(Uid),

    #[error("record already exists: {0}")]
    AlreadyExists(Uid),

    #[error("unknown live query session: {0}")]
    UnknownSession(SessionId),
}

/// Handle of a live query session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The operation surface over one record store.
///
/// Locks are always taken in the order store, summary, sessions, and a
/// mutation holds all three until every session has seen it. Notifications
/// therefore reach every subscriber in one global mutation order. Summary
/// saves also hold the store lock, so a save never stamps a time later than
/// a store change it does not contain.
pub struct Backend<S: RecordStore> {
    store: Mutex<S>,
    /// `None` when the summary is disabled in settings.
    summary: Mutex<Option<SummaryIndex>>,
    sessions: Mutex<BTreeMap<SessionId, LiveQuerySession>>,
    changes: ChangeTracker,
    compiler: Compiler,
    occurrences: Arc<dyn OccurrenceSource>,
    live_config: LiveConfig,
    next_session: AtomicU64,
}

impl Backend<DbStore> {
    /// Opens the redb store, settings and caches under `config.base_path`.
    ///
    /// Invalid settings are logged and replaced by their defaults.
    pub fn open_at(config: &Config, compiler: Compiler) -> Result<Self, BackendError> {
        let settings = Settings::load(&config.settings_path())?;
        let problems = settings.validate();
        let settings = if problems.is_empty() {
            settings
        } else {
            for problem in &problems {
                warn!(problem = %problem, "invalid setting, using default");
            }
            settings.with_defaults_for_invalid()
        };

        let store = DbStore::open(&config.store_path())?;
        Self::open(store, compiler, config, &settings)
    }
}

impl<S: RecordStore> Backend<S> {
    /// Wraps `store`, loading the summary or rebuilding it when the file is
    /// missing, unreadable or older than the store.
    pub fn open(
        store: S,
        compiler: Compiler,
        config: &Config,
        settings: &Settings,
    ) -> Result<Self, BackendError> {
        let summary = if settings.summary.enabled {
            let mut summary = SummaryIndex::new(
                config.summary_path(),
                Duration::from_millis(settings.summary.flush_delay_ms),
            );
            let store_modified = store.modified_at()?;
            if !(summary.load() && summary.is_up_to_date(store_modified)) {
                info!(path = %summary.path().display(), "rebuilding summary from store");
                summary.rebuild(&store.records()?);
            }
            Some(summary)
        } else {
            None
        };

        Ok(Self {
            store: Mutex::new(store),
            summary: Mutex::new(summary),
            sessions: Mutex::new(BTreeMap::new()),
            changes: ChangeTracker::new(config.checkpoints_path()),
            compiler,
            occurrences: Arc::new(SingleOccurrence),
            live_config: LiveConfig::from(&settings.live),
            next_session: AtomicU64::new(1),
        })
    }

    /// Replaces the recurrence expansion used by `occur-in-time-range`.
    pub fn with_occurrences(mut self, occurrences: Arc<dyn OccurrenceSource>) -> Self {
        self.occurrences = occurrences;
        self
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn compile(&self, query: &str) -> Result<Expression, BackendError> {
        Ok(self.compiler.compile(query)?)
    }

    pub fn create(&self, record: Record) -> Result<(), BackendError> {
        let mut store = self.store.lock();
        if store.contains(record.uid())? {
            return Err(BackendError::AlreadyExists(record.uid().clone()));
        }
        store.put(record.clone())?;
        self.publish_put(&record);
        debug!(uid = %record.uid(), "created record");
        Ok(())
    }

    pub fn modify(&self, record: Record) -> Result<(), BackendError> {
        let mut store = self.store.lock();
        if !store.contains(record.uid())? {
            return Err(BackendError::NotFound(record.uid().clone()));
        }
        store.put(record.clone())?;
        self.publish_put(&record);
        debug!(uid = %record.uid(), "modified record");
        Ok(())
    }

    /// Removes every uid or, if any is missing, none of them.
    pub fn remove(&self, uids: &[Uid]) -> Result<(), BackendError> {
        let mut store = self.store.lock();
        for uid in uids {
            if !store.contains(uid)? {
                return Err(BackendError::NotFound(uid.clone()));
            }
        }

        let mut summary = self.summary.lock();
        let mut sessions = self.sessions.lock();
        for uid in uids {
            store.delete(uid)?;
            if let Some(summary) = summary.as_mut() {
                summary.remove(uid);
            }
            for session in sessions.values_mut() {
                session.remove(uid);
            }
        }
        debug!(count = uids.len(), "removed records");
        Ok(())
    }

    pub fn get(&self, uid: &Uid) -> Result<Record, BackendError> {
        self.store
            .lock()
            .get(uid)?
            .ok_or_else(|| BackendError::NotFound(uid.clone()))
    }

    /// Matching records in ascending uid order.
    pub fn list(&self, query: &str) -> Result<Vec<Record>, BackendError> {
        let expression = self.compile(query)?;
        let evaluator = self.evaluator();
        let store = self.store.lock();

        if let Some(uids) = self.search_summary(&*store, &expression, &evaluator)? {
            let mut records = Vec::with_capacity(uids.len());
            for uid in uids {
                match store.get(&uid)? {
                    Some(record) => records.push(record),
                    None => warn!(uid = %uid, "summary lists a record the store lacks"),
                }
            }
            return Ok(records);
        }

        Ok(store
            .records()?
            .into_iter()
            .filter(|record| evaluator.matches(&expression, record))
            .collect())
    }

    /// Uids of matching records in ascending order.
    pub fn list_uids(&self, query: &str) -> Result<Vec<Uid>, BackendError> {
        let expression = self.compile(query)?;
        let evaluator = self.evaluator();
        let store = self.store.lock();

        if let Some(uids) = self.search_summary(&*store, &expression, &evaluator)? {
            return Ok(uids);
        }

        Ok(store
            .records()?
            .into_iter()
            .filter(|record| evaluator.matches(&expression, record))
            .map(|record| record.uid().clone())
            .collect())
    }

    /// Diffs the store against the named checkpoint and advances it.
    pub fn get_changes(&self, checkpoint: &str) -> Result<ChangeSet, BackendError> {
        let store = self.store.lock();
        let records = store.records()?;
        Ok(self.changes.compute_changes(records, checkpoint)?)
    }

    /// Drops a checkpoint. Returns whether it existed.
    pub fn forget_changes(&self, checkpoint: &str) -> Result<bool, BackendError> {
        Ok(self.changes.forget(checkpoint)?)
    }

    /// Starts a live query. Population happens in [`Backend::run_slice`].
    pub fn subscribe(
        &self,
        query: &str,
        subscriber: Box<dyn Subscriber>,
    ) -> Result<SessionId, BackendError> {
        let expression = self.compile(query)?;
        let evaluator = self.evaluator();

        let store = self.store.lock();
        let candidates = match self.search_summary(&*store, &expression, &evaluator)? {
            Some(uids) => uids,
            None => store.uids()?,
        };

        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let session = LiveQuerySession::start(expression, candidates, subscriber, self.live_config);
        self.sessions.lock().insert(id, session);
        drop(store);

        info!(session = %id, query, "subscribed");
        Ok(id)
    }

    /// Stops a session after delivering what it has buffered.
    pub fn unsubscribe(&self, id: SessionId) -> Result<(), BackendError> {
        let mut session = self
            .sessions
            .lock()
            .remove(&id)
            .ok_or(BackendError::UnknownSession(id))?;
        session.stop();
        info!(session = %id, "unsubscribed");
        Ok(())
    }

    /// Current members of a session in ascending order.
    pub fn session_members(&self, id: SessionId) -> Result<Vec<Uid>, BackendError> {
        self.sessions
            .lock()
            .get(&id)
            .map(LiveQuerySession::members)
            .ok_or(BackendError::UnknownSession(id))
    }

    pub fn session_state(&self, id: SessionId) -> Result<SessionState, BackendError> {
        self.sessions
            .lock()
            .get(&id)
            .map(LiveQuerySession::state)
            .ok_or(BackendError::UnknownSession(id))
    }

    /// Runs one population slice of every populating session. Returns whether
    /// any session still has work left.
    pub fn run_slice(&self) -> bool {
        let evaluator = self.evaluator();
        let store = self.store.lock();
        let mut sessions = self.sessions.lock();

        let mut remaining = false;
        for session in sessions.values_mut() {
            if session.next_slice(&*store, &evaluator) {
                remaining = true;
            }
        }
        remaining
    }

    /// Fires due summary and notification flushes.
    pub fn tick(&self, now: Instant) {
        let _store = self.store.lock();
        if let Some(summary) = self.summary.lock().as_mut() {
            summary.flush_if_due(now);
        }
        for session in self.sessions.lock().values_mut() {
            session.flush_if_due(now);
        }
    }

    /// Saves the summary and delivers every buffered notification now.
    pub fn flush(&self) -> bool {
        let _store = self.store.lock();
        let saved = match self.summary.lock().as_mut() {
            Some(summary) => summary.save(),
            None => true,
        };
        for session in self.sessions.lock().values_mut() {
            session.flush();
        }
        saved
    }

    /// Earliest pending flush deadline of the summary, if it has unsaved
    /// changes.
    pub fn summary_flush_deadline(&self) -> Option<Instant> {
        self.summary
            .lock()
            .as_ref()
            .and_then(SummaryIndex::flush_deadline)
    }

    /// Runs `f` with shared access to the store.
    pub fn with_store<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let store = self.store.lock();
        f(&*store)
    }
}

impl<S: RecordStore + 'static> Backend<S> {
    /// Drives population on a background thread until no session has work.
    pub fn populate_in_background(self: &Arc<Self>) -> JoinHandle<()> {
        let backend = Arc::clone(self);
        thread::spawn(move || {
            let mut slices = 0usize;
            while backend.run_slice() {
                slices += 1;
            }
            debug!(slices, "background population finished");
        })
    }
}

/// Internal helpers.
impl<S: RecordStore> Backend<S> {
    fn evaluator(&self) -> Evaluator {
        Evaluator::new(time::now()).with_occurrences(Arc::clone(&self.occurrences))
    }

    /// `store` is the caller's locked store.
    fn search_summary(
        &self,
        store: &S,
        expression: &Expression,
        evaluator: &Evaluator,
    ) -> Result<Option<Vec<Uid>>, BackendError> {
        match self.summary.lock().as_ref() {
            Some(summary) => Ok(summary.search(expression, evaluator, store)?),
            None => Ok(None),
        }
    }

    /// Caller holds the store lock.
    fn publish_put(&self, record: &Record) {
        let evaluator = self.evaluator();
        let mut summary = self.summary.lock();
        let mut sessions = self.sessions.lock();

        if let Some(summary) = summary.as_mut() {
            summary.add(record);
        }
        for session in sessions.values_mut() {
            session.update(record, &evaluator);
        }
    }
}

impl<S: RecordStore> Drop for Backend<S> {
    fn drop(&mut self) {
        if let Some(summary) = self.summary.get_mut().as_mut() {
            summary.save();
        }
        for session in self.sessions.get_mut().values_mut() {
            session.stop();
        }
    }
}
