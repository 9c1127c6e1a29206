//! Summary index: cached contact fields for fast simple queries.
//!
//! Holds one [`SummaryEntry`] per record, in memory and in a versioned binary
//! file next to the store. Queries that only test cached fields (see
//! [`SUMMARY_FIELDS`]) are answered by evaluating them against the minimal
//! record rebuilt from each entry.
//!
//! An entry holds at most three addresses, one value per name field and
//! strings up to 65535 bytes. Records that carry more are kept in an overflow
//! set, and searches evaluate those against the store instead of the entry,
//! so search results always equal a full evaluation.
//!
//! The file is a cache. Any problem reading it makes [`SummaryIndex::load`]
//! return false and the caller rebuilds from the store.

use crate::flush::FlushTimer;
use almanac_core::fs::replace_file;
use almanac_core::store::RecordStore;
use almanac_core::store::error::StoreError;
use almanac_core::types::{FieldView, Record, Uid, fields};
use almanac_query::{Evaluator, Expression, is_summary_answerable};
use error::SummaryError;
use meta::SummaryMeta;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

mod disk;
mod meta;

pub mod error {
    use almanac_core::types::UidError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum SummaryError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("not a summary file")]
        BadMagic,

        #[error("unsupported summary version: {0}")]
        UnsupportedVersion(u32),

        #[error("summary truncated (entry {entry:?})")]
        Truncated { entry: Option<usize> },

        #[error("entry {entry} holds invalid UTF-8: {source}")]
        InvalidText {
            entry: usize,
            source: std::str::Utf8Error,
        },

        #[error("entry {entry} holds an invalid uid: {source}")]
        InvalidUid { entry: usize, source: UidError },

        #[error("{0} unexpected bytes after the last entry")]
        TrailingData(usize),

        #[error("summary metadata file is missing")]
        MissingMeta,

        #[error("summary metadata is unreadable: {0}")]
        Meta(#[from] serde_json::Error),

        #[error("summary metadata does not describe the summary file")]
        MetaMismatch,
    }
}

/// Fields whose text tests the summary can answer.
pub const SUMMARY_FIELDS: &[&str] = &[
    fields::ID,
    fields::NICKNAME,
    fields::FULL_NAME,
    fields::GIVEN_NAME,
    fields::FAMILY_NAME,
    fields::FILE_AS,
    fields::EMAIL,
];

/// Cached fields of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryEntry {
    pub uid: Uid,
    pub nickname: String,
    pub full_name: String,
    pub given_name: String,
    pub family_name: String,
    pub file_as: String,
    /// First three addresses; unused slots are empty.
    pub emails: [String; 3],
    pub is_list: bool,
    pub list_show_addresses: bool,
    pub wants_html: bool,
    /// Distinguishes an explicit "no HTML" from no preference.
    pub wants_html_set: bool,
}

impl SummaryEntry {
    pub fn from_record(record: &Record) -> Self {
        let text = |field: &str| {
            let value = record.text(field).unwrap_or_default();
            disk::truncate_utf8(value, disk::MAX_STRING_LEN).to_string()
        };

        let mut emails: [String; 3] = Default::default();
        let addresses = record
            .lookup(fields::EMAIL)
            .texts()
            .filter(|address| !address.is_empty());
        for (slot, address) in emails.iter_mut().zip(addresses) {
            *slot = disk::truncate_utf8(address, disk::MAX_STRING_LEN).to_string();
        }

        let flag = |field: &str| matches!(record.lookup(field), FieldView::Flag(true));
        let wants_html = match record.lookup(fields::WANTS_HTML) {
            FieldView::Flag(value) => Some(value),
            _ => None,
        };

        Self {
            uid: record.uid().clone(),
            nickname: text(fields::NICKNAME),
            full_name: text(fields::FULL_NAME),
            given_name: text(fields::GIVEN_NAME),
            family_name: text(fields::FAMILY_NAME),
            file_as: text(fields::FILE_AS),
            emails,
            is_list: flag(fields::IS_LIST),
            list_show_addresses: flag(fields::LIST_SHOW_ADDRESSES),
            wants_html: wants_html.unwrap_or(false),
            wants_html_set: wants_html.is_some(),
        }
    }

    /// Minimal contact carrying only the cached fields.
    pub fn to_record(&self) -> Record {
        let mut record = Record::contact(self.uid.clone());
        for (field, value) in [
            (fields::NICKNAME, &self.nickname),
            (fields::FULL_NAME, &self.full_name),
            (fields::GIVEN_NAME, &self.given_name),
            (fields::FAMILY_NAME, &self.family_name),
            (fields::FILE_AS, &self.file_as),
        ] {
            if !value.is_empty() {
                record.set(field, value.as_str());
            }
        }

        let emails: Vec<String> = self
            .emails
            .iter()
            .filter(|email| !email.is_empty())
            .cloned()
            .collect();
        if !emails.is_empty() {
            record.set(fields::EMAIL, emails);
        }

        if self.is_list {
            record.set(fields::IS_LIST, true);
        }
        if self.list_show_addresses {
            record.set(fields::LIST_SHOW_ADDRESSES, true);
        }
        if self.wants_html_set {
            record.set(fields::WANTS_HTML, self.wants_html);
        }
        record
    }

    /// Whether text tests on every cached field see the same values in
    /// [`SummaryEntry::to_record`] as in `record`.
    pub fn holds(&self, record: &Record) -> bool {
        let cached = self.to_record();
        SUMMARY_FIELDS.iter().all(|field| {
            tested_texts(record.lookup(field)) == tested_texts(cached.lookup(field))
        })
    }

    /// The nine strings in file order.
    pub(crate) fn strings(&self) -> [&str; 9] {
        [
            self.uid.as_str(),
            &self.nickname,
            &self.full_name,
            &self.given_name,
            &self.family_name,
            &self.file_as,
            &self.emails[0],
            &self.emails[1],
            &self.emails[2],
        ]
    }
}

/// In-memory summary plus its backing file.
#[derive(Debug)]
pub struct SummaryIndex {
    path: PathBuf,
    entries: Vec<SummaryEntry>,
    positions: HashMap<Uid, usize>,
    /// Entries that do not hold their whole record.
    overflow: HashSet<Uid>,
    /// Time of the last successful save, as recorded in the metadata file.
    saved_at: Option<SystemTime>,
    dirty: bool,
    timer: FlushTimer,
}

impl SummaryIndex {
    pub fn new(path: impl Into<PathBuf>, flush_delay: Duration) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
            positions: HashMap::new(),
            overflow: HashSet::new(),
            saved_at: None,
            dirty: false,
            timer: FlushTimer::new(flush_delay),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.positions.contains_key(uid)
    }

    pub fn get(&self, uid: &Uid) -> Option<&SummaryEntry> {
        self.positions.get(uid).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[SummaryEntry] {
        &self.entries
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether searches read this record from the store.
    pub fn is_overflow(&self, uid: &Uid) -> bool {
        self.overflow.contains(uid)
    }

    /// Pending flush deadline, if any change is unsaved.
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Adds or replaces the entry for `record`.
    pub fn add(&mut self, record: &Record) {
        self.insert_entry(record);
        self.mark_dirty();
    }

    /// Returns whether an entry was removed.
    pub fn remove(&mut self, uid: &Uid) -> bool {
        let removed = self.remove_entry(uid);
        if removed {
            self.mark_dirty();
        }
        removed
    }

    /// Uids matching `expression` in ascending order, or `None` when the
    /// expression tests something the summary does not cache.
    ///
    /// Overflow entries are evaluated against their record in `store`.
    pub fn search<S>(
        &self,
        expression: &Expression,
        evaluator: &Evaluator,
        store: &S,
    ) -> Result<Option<Vec<Uid>>, StoreError>
    where
        S: RecordStore + ?Sized,
    {
        if !is_summary_answerable(expression, SUMMARY_FIELDS) {
            return Ok(None);
        }

        let mut uids = Vec::new();
        for entry in &self.entries {
            let matches = if self.overflow.contains(&entry.uid) {
                match store.get(&entry.uid)? {
                    Some(record) => evaluator.matches(expression, &record),
                    None => {
                        warn!(uid = %entry.uid, "summary lists a record the store lacks");
                        false
                    }
                }
            } else {
                evaluator.matches(expression, &entry.to_record())
            };
            if matches {
                uids.push(entry.uid.clone());
            }
        }
        uids.sort();
        Ok(Some(uids))
    }

    pub fn to_full_record(&self, uid: &Uid) -> Option<Record> {
        self.get(uid).map(SummaryEntry::to_record)
    }

    /// Whether the last load or save happened after the store's last change.
    ///
    /// An index that was never loaded or saved is never up to date.
    pub fn is_up_to_date(&self, store_modified: SystemTime) -> bool {
        self.saved_at.is_some_and(|saved_at| store_modified < saved_at)
    }

    /// Replaces the in-memory contents with the file's.
    ///
    /// On any failure the index is left empty and false is returned.
    pub fn load(&mut self) -> bool {
        match self.read_snapshot() {
            Ok((snapshot, saved_at, overflow)) => {
                self.positions = snapshot
                    .entries
                    .iter()
                    .enumerate()
                    .map(|(i, entry)| (entry.uid.clone(), i))
                    .collect();
                // Duplicate ids would break the one-entry-per-uid rule.
                if self.positions.len() != snapshot.entries.len() {
                    warn!(path = %self.path.display(), "summary holds duplicate ids, discarding");
                    self.clear();
                    return false;
                }
                if let Some(unknown) = overflow
                    .iter()
                    .find(|uid| !self.positions.contains_key(*uid))
                {
                    warn!(
                        path = %self.path.display(),
                        uid = %unknown,
                        "summary metadata lists an unknown id, discarding"
                    );
                    self.clear();
                    return false;
                }
                info!(
                    path = %self.path.display(),
                    entries = snapshot.entries.len(),
                    overflow = overflow.len(),
                    mtime = snapshot.mtime,
                    "loaded summary"
                );
                self.entries = snapshot.entries;
                self.overflow = overflow;
                self.saved_at = Some(saved_at);
                self.dirty = false;
                self.timer.disarm();
                true
            }
            Err(SummaryError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no summary file");
                self.clear();
                false
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "summary unusable, discarding");
                self.clear();
                false
            }
        }
    }

    /// Writes the index if it has unsaved changes. A clean index is not
    /// written at all.
    ///
    /// On failure the previous files are kept, the index stays dirty and the
    /// flush timer is re-armed so a later tick retries.
    pub fn save(&mut self) -> bool {
        if !self.dirty {
            return true;
        }
        let now = SystemTime::now();

        match self.write_files(now) {
            Ok(()) => {
                self.saved_at = Some(now);
                self.dirty = false;
                self.timer.disarm();
                debug!(
                    path = %self.path.display(),
                    entries = self.entries.len(),
                    overflow = self.overflow.len(),
                    "saved summary"
                );
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to save summary");
                self.timer.arm(Instant::now());
                false
            }
        }
    }

    /// Replaces the contents with entries for `records`.
    pub fn rebuild<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) {
        self.clear();
        for record in records {
            self.insert_entry(record);
        }
        info!(
            entries = self.entries.len(),
            overflow = self.overflow.len(),
            "rebuilt summary"
        );
        self.mark_dirty();
    }

    /// Saves if the flush deadline has passed. Returns whether a save ran.
    pub fn flush_if_due(&mut self, now: Instant) -> bool {
        if !self.timer.fire_if_due(now) {
            return false;
        }
        self.save();
        true
    }
}

/// Internal helpers.
impl SummaryIndex {
    /// Reads and cross-checks the summary and its metadata file.
    fn read_snapshot(
        &self,
    ) -> Result<(disk::Snapshot, SystemTime, HashSet<Uid>), SummaryError> {
        let data = std::fs::read(&self.path)?;
        let snapshot = disk::decode(&data)?;

        let meta_bytes = match std::fs::read(meta::meta_path(&self.path)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SummaryError::MissingMeta);
            }
            Err(e) => return Err(e.into()),
        };
        let (saved_at, overflow) =
            serde_json::from_slice::<SummaryMeta>(&meta_bytes)?.verify(&data)?;
        Ok((snapshot, saved_at, overflow))
    }

    /// Summary first, then the metadata naming its hash. A crash in between
    /// leaves a pair that fails verification.
    fn write_files(&self, now: SystemTime) -> Result<(), SummaryError> {
        let mut bytes = Vec::new();
        disk::encode(&mut bytes, epoch_seconds(now), &self.entries)?;
        let meta_json = serde_json::to_vec_pretty(&SummaryMeta::new(&bytes, now, &self.overflow))?;

        replace_file(&self.path, |w| w.write_all(&bytes))?;
        replace_file(&meta::meta_path(&self.path), |w| w.write_all(&meta_json))?;
        Ok(())
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
        self.overflow.clear();
        self.saved_at = None;
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.timer.arm(Instant::now());
    }

    fn insert_entry(&mut self, record: &Record) {
        self.remove_entry(record.uid());
        let entry = SummaryEntry::from_record(record);
        if !entry.holds(record) {
            self.overflow.insert(record.uid().clone());
        }
        self.positions.insert(record.uid().clone(), self.entries.len());
        self.entries.push(entry);
    }

    fn remove_entry(&mut self, uid: &Uid) -> bool {
        self.overflow.remove(uid);
        let Some(index) = self.positions.remove(uid) else {
            return false;
        };
        self.entries.swap_remove(index);
        if let Some(moved) = self.entries.get(index) {
            self.positions.insert(moved.uid.clone(), index);
        }
        true
    }
}

/// Distinct values a text test compares against; a field without text
/// compares as the empty string.
fn tested_texts(view: FieldView<'_>) -> Vec<&str> {
    let mut texts: Vec<&str> = view.texts().collect();
    if texts.is_empty() {
        texts.push("");
    }
    texts.sort_unstable();
    texts.dedup();
    texts
}

fn epoch_seconds(time: SystemTime) -> u32 {
    let seconds = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    u32::try_from(seconds).unwrap_or(u32::MAX)
}
