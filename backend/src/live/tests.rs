use super::*;
use almanac_core::store::MemoryStore;
use almanac_core::store::error::StoreError;
use almanac_core::types::fields;
use almanac_query::Compiler;
use common::{Event, Recorder, contact, evaluator, make_uid, start};
use parking_lot::Mutex;
use std::sync::Arc;

mod common {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(super) enum Event {
        Added(String, Option<Progress>),
        Changed(String),
        Removed(String),
        Complete(QueryStatus),
        Status(String),
        Flushed,
    }

    #[derive(Clone, Default)]
    pub(super) struct Recorder(Arc<Mutex<Vec<Event>>>);

    impl Recorder {
        /// Takes the events recorded so far.
        pub(super) fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.0.lock())
        }
    }

    impl Subscriber for Recorder {
        fn on_added(&mut self, uid: &Uid, _record: &Record, progress: Option<Progress>) {
            self.0.lock().push(Event::Added(uid.to_string(), progress));
        }

        fn on_changed(&mut self, uid: &Uid, _record: &Record) {
            self.0.lock().push(Event::Changed(uid.to_string()));
        }

        fn on_removed(&mut self, uid: &Uid) {
            self.0.lock().push(Event::Removed(uid.to_string()));
        }

        fn on_query_complete(&mut self, status: &QueryStatus) {
            self.0.lock().push(Event::Complete(status.clone()));
        }

        fn on_status_message(&mut self, message: &str) {
            self.0.lock().push(Event::Status(message.to_string()));
        }

        fn flushed(&mut self) {
            self.0.lock().push(Event::Flushed);
        }
    }

    pub(super) fn make_uid(s: &str) -> Uid {
        Uid::try_from(s).unwrap()
    }

    pub(super) fn contact(id: &str, name: &str) -> Record {
        Record::contact(make_uid(id)).with(fields::FULL_NAME, name)
    }

    pub(super) fn evaluator() -> Evaluator {
        Evaluator::new(0)
    }

    pub(super) fn small_config() -> LiveConfig {
        LiveConfig {
            slice_size: 2,
            initial_add_threshold: 2,
            max_add_threshold: 4,
            change_threshold: 2,
            remove_threshold: 2,
            flush_delay: Duration::from_millis(100),
        }
    }

    pub(super) fn start(query: &str, candidates: &[&str]) -> (LiveQuerySession, Recorder) {
        let recorder = Recorder::default();
        let expression = Compiler::contacts().compile(query).unwrap();
        let session = LiveQuerySession::start(
            expression,
            candidates.iter().map(|id| make_uid(id)).collect(),
            Box::new(recorder.clone()),
            small_config(),
        );
        (session, recorder)
    }

    pub(super) fn added(id: &str, scanned: usize, total: usize) -> Event {
        Event::Added(id.to_string(), Some(Progress { scanned, total }))
    }
}

mod config {
    use super::*;

    #[test]
    fn test_from_settings() {
        let settings = LiveSettings {
            slice_size: 0,
            initial_add_threshold: 10,
            max_add_threshold: 5,
            flush_delay_ms: 250,
            ..LiveSettings::default()
        };

        let config = LiveConfig::from(&settings);

        assert_eq!(config.slice_size, 1);
        assert_eq!(config.initial_add_threshold, 10);
        assert_eq!(config.max_add_threshold, 10);
        assert_eq!(config.flush_delay, Duration::from_millis(250));
    }
}

mod populating {
    use super::common::added;
    use super::*;

    #[test]
    fn test_population_batches_and_completes_once() {
        let store = MemoryStore::from_records(
            ["1", "2", "3", "4", "5"].map(|id| contact(id, "Someone")),
        );
        let (mut session, recorder) = start("#t", &["1", "2", "3", "4", "5"]);
        assert_eq!(recorder.take(), vec![Event::Status(SEARCHING_MESSAGE.to_string())]);

        assert!(session.next_slice(&store, &evaluator()));
        assert_eq!(
            recorder.take(),
            vec![added("1", 1, 5), added("2", 2, 5), Event::Flushed]
        );
        assert_eq!(session.add_threshold(), 4);

        assert!(session.next_slice(&store, &evaluator()));
        assert_eq!(recorder.take(), vec![]);

        assert!(!session.next_slice(&store, &evaluator()));
        assert_eq!(
            recorder.take(),
            vec![
                added("3", 3, 5),
                added("4", 4, 5),
                added("5", 5, 5),
                Event::Flushed,
                Event::Complete(QueryStatus::Success),
            ]
        );
        assert_eq!(session.state(), SessionState::Steady);

        assert!(!session.next_slice(&store, &evaluator()));
        assert_eq!(recorder.take(), vec![]);
    }

    #[test]
    fn test_only_matches_become_members() {
        let store = MemoryStore::from_records([
            contact("1", "Ann Lee"),
            contact("2", "Bo"),
            contact("3", "Dana"),
        ]);
        let (mut session, recorder) = start(r#"(contains "full_name" "an")"#, &["1", "2", "3"]);

        while session.next_slice(&store, &evaluator()) {}

        assert_eq!(session.members(), vec![make_uid("1"), make_uid("3")]);
        let events = recorder.take();
        assert_eq!(
            events.last(),
            Some(&Event::Complete(QueryStatus::Success))
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, Event::Added(..)))
                .count(),
            2
        );
    }

    #[test]
    fn test_empty_worklist_completes_immediately() {
        let store = MemoryStore::new();
        let (mut session, recorder) = start("#t", &[]);
        recorder.take();

        assert!(!session.next_slice(&store, &evaluator()));
        assert_eq!(recorder.take(), vec![Event::Complete(QueryStatus::Success)]);
    }

    #[test]
    fn test_mutation_before_scan_is_not_repeated() {
        let mut store = MemoryStore::from_records([contact("1", "Ann"), contact("2", "Bo")]);
        let (mut session, recorder) = start("#t", &["1", "2"]);
        recorder.take();

        let renamed = contact("2", "Bob");
        store.put(renamed.clone()).unwrap();
        session.update(&renamed, &evaluator());

        while session.next_slice(&store, &evaluator()) {}

        let events = recorder.take();
        let adds_of_2 = events
            .iter()
            .filter(|e| matches!(e, Event::Added(id, _) if id == "2"))
            .count();
        assert_eq!(adds_of_2, 1);
        assert!(events.contains(&Event::Added("2".to_string(), None)));
        assert_eq!(session.members(), vec![make_uid("1"), make_uid("2")]);
    }

    #[test]
    fn test_deleted_before_scan_is_skipped() {
        let mut store = MemoryStore::from_records([contact("1", "Ann"), contact("2", "Bo")]);
        let (mut session, recorder) = start("#t", &["1", "2"]);
        recorder.take();

        store.delete(&make_uid("2")).unwrap();
        session.remove(&make_uid("2"));
        while session.next_slice(&store, &evaluator()) {}

        assert_eq!(session.members(), vec![make_uid("1")]);
        assert_eq!(
            recorder.take(),
            vec![
                added("1", 1, 2),
                Event::Flushed,
                Event::Complete(QueryStatus::Success)
            ]
        );
    }

    struct FailingStore {
        inner: MemoryStore,
        broken: Uid,
    }

    impl RecordStore for FailingStore {
        fn get(&self, uid: &Uid) -> Result<Option<Record>, StoreError> {
            if *uid == self.broken {
                return Err(StoreError::Io(std::io::Error::other("disk on fire")));
            }
            self.inner.get(uid)
        }

        fn put(&mut self, record: Record) -> Result<Option<Record>, StoreError> {
            self.inner.put(record)
        }

        fn delete(&mut self, uid: &Uid) -> Result<Option<Record>, StoreError> {
            self.inner.delete(uid)
        }

        fn uids(&self) -> Result<Vec<Uid>, StoreError> {
            self.inner.uids()
        }

        fn records(&self) -> Result<Vec<Record>, StoreError> {
            self.inner.records()
        }

        fn modified_at(&self) -> Result<std::time::SystemTime, StoreError> {
            self.inner.modified_at()
        }
    }

    #[test]
    fn test_read_failure_reported_in_status() {
        let store = FailingStore {
            inner: MemoryStore::from_records([contact("1", "Ann"), contact("2", "Bo")]),
            broken: make_uid("1"),
        };
        let (mut session, recorder) = start("#t", &["1", "2"]);
        recorder.take();

        while session.next_slice(&store, &evaluator()) {}

        let events = recorder.take();
        assert!(matches!(&events[0], Event::Status(m) if m.contains("disk on fire")));
        assert_eq!(
            events.last(),
            Some(&Event::Complete(QueryStatus::Failed(
                "IO error: disk on fire".to_string()
            )))
        );
        assert_eq!(session.members(), vec![make_uid("2")]);
    }
}

mod steady {
    use super::*;

    fn steady_session(query: &str) -> (LiveQuerySession, Recorder) {
        let (mut session, recorder) = start(query, &[]);
        session.next_slice(&MemoryStore::new(), &evaluator());
        recorder.take();
        (session, recorder)
    }

    #[test]
    fn test_membership_rules() {
        let (mut session, recorder) = steady_session(r#"(contains "full_name" "ann")"#);

        session.update(&contact("1", "Ann"), &evaluator());
        session.update(&contact("1", "Anne"), &evaluator());
        session.update(&contact("1", "Bo"), &evaluator());
        session.update(&contact("2", "Bo"), &evaluator());
        session.flush();

        assert_eq!(
            recorder.take(),
            vec![
                Event::Added("1".to_string(), None),
                Event::Flushed,
                Event::Changed("1".to_string()),
                Event::Flushed,
                Event::Removed("1".to_string()),
                Event::Flushed,
            ]
        );
        assert!(session.members().is_empty());
    }

    #[test]
    fn test_remove_only_notifies_members() {
        let (mut session, recorder) = steady_session("#t");
        session.update(&contact("1", "Ann"), &evaluator());
        session.flush();
        recorder.take();

        session.remove(&make_uid("9"));
        session.remove(&make_uid("1"));
        session.flush();

        assert_eq!(
            recorder.take(),
            vec![Event::Removed("1".to_string()), Event::Flushed]
        );
        assert!(!session.is_member(&make_uid("1")));
    }

    #[test]
    fn test_change_threshold_flushes() {
        let (mut session, recorder) = steady_session("#t");
        session.update(&contact("1", "Ann"), &evaluator());
        session.update(&contact("2", "Bo"), &evaluator());
        recorder.take();

        session.update(&contact("1", "Ann 2"), &evaluator());
        assert_eq!(recorder.take(), vec![]);
        session.update(&contact("2", "Bo 2"), &evaluator());

        assert_eq!(
            recorder.take(),
            vec![
                Event::Changed("1".to_string()),
                Event::Changed("2".to_string()),
                Event::Flushed,
            ]
        );
    }

    #[test]
    fn test_add_threshold_grows_to_max() {
        let (mut session, recorder) = steady_session("#t");
        assert_eq!(session.add_threshold(), 2);

        for id in ["1", "2"] {
            session.update(&contact(id, "x"), &evaluator());
        }
        assert_eq!(session.add_threshold(), 4);

        for id in ["3", "4", "5"] {
            session.update(&contact(id, "x"), &evaluator());
        }
        assert_eq!(recorder.take().len(), 3);

        session.update(&contact("6", "x"), &evaluator());
        assert_eq!(recorder.take().len(), 5);
        assert_eq!(session.add_threshold(), 4);
    }

    #[test]
    fn test_delayed_flush() {
        let (mut session, recorder) = steady_session("#t");
        session.update(&contact("1", "Ann"), &evaluator());

        session.flush_if_due(Instant::now());
        assert_eq!(recorder.take(), vec![]);

        session.flush_if_due(Instant::now() + Duration::from_secs(1));
        assert_eq!(
            recorder.take(),
            vec![Event::Added("1".to_string(), None), Event::Flushed]
        );
    }

    #[test]
    fn test_stop_drains_then_goes_quiet() {
        let (mut session, recorder) = steady_session("#t");
        session.update(&contact("1", "Ann"), &evaluator());

        session.stop();
        assert_eq!(
            recorder.take(),
            vec![Event::Added("1".to_string(), None), Event::Flushed]
        );
        assert_eq!(session.state(), SessionState::Stopped);

        session.update(&contact("2", "Bo"), &evaluator());
        session.remove(&make_uid("1"));
        session.flush();
        session.stop();
        assert!(!session.next_slice(&MemoryStore::new(), &evaluator()));
        assert_eq!(recorder.take(), vec![]);
        assert!(session.members().is_empty());
    }

    #[test]
    fn test_stop_while_populating() {
        let store = MemoryStore::from_records([contact("1", "Ann"), contact("2", "Bo")]);
        let (mut session, recorder) = start("#t", &["1", "2"]);
        recorder.take();

        session.stop();
        assert!(!session.next_slice(&store, &evaluator()));
        assert_eq!(recorder.take(), vec![]);
    }
}
