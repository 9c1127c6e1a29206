//! End-to-end behaviour of the backend over both store implementations.

use almanac_backend::{
    Backend, Progress, QueryStatus, SessionState, Subscriber, SummaryIndex,
};
use almanac_core::store::{DbStore, MemoryStore, RecordStore};
use almanac_core::types::{Config, Record, Settings, Uid, fields};
use almanac_query::{Compiler, Evaluator};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

#[derive(Clone, Default)]
struct Membership {
    added: Arc<Mutex<Vec<String>>>,
    current: Arc<Mutex<BTreeSet<String>>>,
    completed: Arc<Mutex<Option<QueryStatus>>>,
}

impl Subscriber for Membership {
    fn on_added(&mut self, uid: &Uid, _record: &Record, _progress: Option<Progress>) {
        self.added.lock().push(uid.to_string());
        self.current.lock().insert(uid.to_string());
    }

    fn on_changed(&mut self, uid: &Uid, _record: &Record) {
        assert!(self.current.lock().contains(uid.as_str()));
    }

    fn on_removed(&mut self, uid: &Uid) {
        assert!(self.current.lock().remove(uid.as_str()));
    }

    fn on_query_complete(&mut self, status: &QueryStatus) {
        *self.completed.lock() = Some(status.clone());
    }

    fn on_status_message(&mut self, _message: &str) {}
}

fn uid(s: &str) -> Uid {
    Uid::try_from(s).unwrap()
}

fn ann_and_bo() -> Vec<Record> {
    vec![
        Record::contact(uid("1"))
            .with(fields::FULL_NAME, "Ann Lee")
            .with(fields::EMAIL, ["a@x.com"]),
        Record::contact(uid("2")).with(fields::FULL_NAME, "Bo"),
    ]
}

fn config(temp: &TempDir) -> Config {
    Config {
        base_path: temp.path().to_path_buf(),
    }
}

fn memory_backend(temp: &TempDir, records: Vec<Record>) -> Backend<MemoryStore> {
    Backend::open(
        MemoryStore::from_records(records),
        Compiler::contacts(),
        &config(temp),
        &Settings::default(),
    )
    .unwrap()
}

fn db_backend(temp: &TempDir, records: Vec<Record>) -> Backend<DbStore> {
    let backend = Backend::open_at(&config(temp), Compiler::contacts()).unwrap();
    for record in records {
        backend.create(record).unwrap();
    }
    backend
}

fn ids(uids: &[Uid]) -> Vec<&str> {
    uids.iter().map(|u| u.as_str()).collect()
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn contains_matches_case_insensitively() {
    let temp = TempDir::new().unwrap();
    let backend = memory_backend(&temp, ann_and_bo());

    let found = backend.list_uids(r#"(contains "full_name" "an")"#).unwrap();

    assert_eq!(ids(&found), ["1"]);
}

#[test]
fn addresses_past_the_third_are_searchable() {
    let temp = TempDir::new().unwrap();
    let mut records = ann_and_bo();
    records.push(
        Record::contact(uid("9"))
            .with(fields::EMAIL, ["a@x.com", "b@x.com", "c@x.com", "zed@x.com"]),
    );
    records.push(Record::contact(uid("10")).with(fields::FULL_NAME, ["Ann", "Zoe"]));
    let backend = db_backend(&temp, records);

    assert_eq!(
        ids(&backend.list_uids(r#"(contains "email" "zed")"#).unwrap()),
        ["9"]
    );
    assert_eq!(
        ids(&backend.list_uids(r#"(contains "full_name" "zoe")"#).unwrap()),
        ["10"]
    );

    let membership = Membership::default();
    let id = backend
        .subscribe(r#"(contains "email" "zed")"#, Box::new(membership.clone()))
        .unwrap();
    while backend.run_slice() {}
    assert_eq!(ids(&backend.session_members(id).unwrap()), ["9"]);
    assert_eq!(*membership.added.lock(), ["9"]);
}

#[test]
fn exists_ignores_records_without_the_field() {
    let temp = TempDir::new().unwrap();
    let backend = db_backend(&temp, ann_and_bo());

    let found = backend.list_uids(r#"(exists "email")"#).unwrap();

    assert_eq!(ids(&found), ["1"]);
}

// ============================================================================
// Live queries
// ============================================================================

#[test]
fn live_query_reports_new_member_once() {
    let temp = TempDir::new().unwrap();
    let backend = memory_backend(&temp, ann_and_bo());
    let membership = Membership::default();

    let id = backend
        .subscribe(r#"(exists "email")"#, Box::new(membership.clone()))
        .unwrap();
    while backend.run_slice() {}
    assert_eq!(*membership.completed.lock(), Some(QueryStatus::Success));
    membership.added.lock().clear();

    backend
        .modify(
            Record::contact(uid("2"))
                .with(fields::FULL_NAME, "Bo")
                .with(fields::EMAIL, ["b@y.com"]),
        )
        .unwrap();
    backend.flush();

    assert_eq!(*membership.added.lock(), ["2"]);
    assert_eq!(ids(&backend.session_members(id).unwrap()), ["1", "2"]);
}

#[test]
fn live_membership_tracks_full_evaluation() {
    let temp = TempDir::new().unwrap();
    let backend = db_backend(&temp, ann_and_bo());
    let query = r#"(or (contains "full_name" "an") (exists "email"))"#;
    let membership = Membership::default();
    let id = backend
        .subscribe(query, Box::new(membership.clone()))
        .unwrap();

    // Mutations interleaved with population.
    backend.run_slice();
    backend
        .create(Record::contact(uid("3")).with(fields::FULL_NAME, "Dana"))
        .unwrap();
    backend.run_slice();
    backend
        .modify(Record::contact(uid("1")).with(fields::FULL_NAME, "Lee"))
        .unwrap();
    backend
        .create(Record::contact(uid("4")).with(fields::EMAIL, ["d@z.com"]))
        .unwrap();
    while backend.run_slice() {}
    backend.remove(&[uid("4")]).unwrap();
    backend.flush();

    let expected = backend.list_uids(query).unwrap();
    assert_eq!(backend.session_members(id).unwrap(), expected);
    assert_eq!(
        membership.current.lock().iter().cloned().collect::<Vec<_>>(),
        ids(&expected)
    );
    assert_eq!(backend.session_state(id).unwrap(), SessionState::Steady);
}

// ============================================================================
// Change tracking
// ============================================================================

#[test]
fn changes_since_checkpoint() {
    let temp = TempDir::new().unwrap();
    let backend = db_backend(&temp, ann_and_bo());

    let initial = backend.get_changes("phone-sync").unwrap();
    assert_eq!(initial.added.len(), 2);

    backend
        .modify(Record::contact(uid("2")).with(fields::FULL_NAME, "Bob"))
        .unwrap();
    backend.remove(&[uid("1")]).unwrap();
    backend
        .create(Record::contact(uid("3")).with(fields::FULL_NAME, "Cy"))
        .unwrap();

    let changes = backend.get_changes("phone-sync").unwrap();
    assert_eq!(
        changes.added.iter().map(|r| r.uid().as_str()).collect::<Vec<_>>(),
        ["3"]
    );
    assert_eq!(
        changes.modified.iter().map(|r| r.uid().as_str()).collect::<Vec<_>>(),
        ["2"]
    );
    assert_eq!(ids(&changes.deleted), ["1"]);

    assert!(backend.get_changes("phone-sync").unwrap().is_empty());
    assert_eq!(backend.get_changes("laptop-sync").unwrap().added.len(), 2);
}

// ============================================================================
// Summary persistence
// ============================================================================

#[test]
fn summary_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    drop(db_backend(&temp, ann_and_bo()));

    let mut summary = SummaryIndex::new(config.summary_path(), Duration::from_millis(10));
    assert!(summary.load());
    assert_eq!(summary.len(), 2);

    let expression = Compiler::contacts()
        .compile(r#"(contains "full_name" "an")"#)
        .unwrap();
    let found = summary
        .search(&expression, &Evaluator::new(0), &MemoryStore::new())
        .unwrap()
        .unwrap();
    assert_eq!(ids(&found), ["1"]);

    let record = summary.to_full_record(&uid("1")).unwrap();
    assert_eq!(record.text(fields::FULL_NAME), Some("Ann Lee"));

    let reopened = Backend::open_at(&config, Compiler::contacts()).unwrap();
    assert_eq!(
        reopened.with_store(|store| store.records().unwrap()),
        ann_and_bo()
    );
}
