//! End-to-end tests of the capture pipeline against in-memory collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use tattle_core::config::keys;
use tattle_core::{ConfigProvider, ExceptionEvent, FixedClock, TomlConfig};
use tattle_ledger::{
    day_key, BlobStore, DuplicateLedger, Fingerprint, FsBlobStore, LedgerError, MemoryBlobStore,
    StoreLock,
};
use tattle_notify::{CaptureError, ErrorLogger, MailTransport, Notifier, Outcome};

// ── Test doubles ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Delivery {
    recipients: Vec<String>,
    subject: String,
    body: String,
}

#[derive(Default)]
struct RecordingTransport {
    deliveries: Mutex<Vec<Delivery>>,
    attempts: AtomicUsize,
    should_fail: bool,
}

impl RecordingTransport {
    fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl MailTransport for RecordingTransport {
    async fn deliver(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), CaptureError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(CaptureError::Transport("connection refused".to_string()));
        }
        self.deliveries.lock().unwrap().push(Delivery {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "recording"
    }
}

#[derive(Default)]
struct RecordingLogger {
    lines: Mutex<Vec<String>>,
}

impl RecordingLogger {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl ErrorLogger for RecordingLogger {
    fn error(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }
}

/// Store whose every operation fails, as if the disk were gone.
struct UnreachableStore;

impl BlobStore for UnreachableStore {
    fn exists(&self, _key: &str) -> Result<bool, LedgerError> {
        Err(LedgerError::Unavailable("store offline".into()))
    }
    fn read(&self, _key: &str) -> Result<Vec<u8>, LedgerError> {
        Err(LedgerError::Unavailable("store offline".into()))
    }
    fn write(&self, _key: &str, _bytes: &[u8]) -> Result<(), LedgerError> {
        Err(LedgerError::Unavailable("store offline".into()))
    }
    fn keys(&self) -> Result<Vec<String>, LedgerError> {
        Err(LedgerError::Unavailable("store offline".into()))
    }
    fn lock(&self, _key: &str, _timeout: Duration) -> Result<StoreLock, LedgerError> {
        Ok(StoreLock::noop())
    }
}

/// Provider that counts how often the type table is read.
struct CountingConfig {
    inner: TomlConfig,
    type_lookups: AtomicUsize,
}

impl ConfigProvider for CountingConfig {
    fn get(&self, key: &str) -> Option<toml::Value> {
        if key == keys::TYPES {
            self.type_lookups.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.get(key)
    }
}

// ── Harness ─────────────────────────────────────────────────────────

const CAPTURE_ALL: &str = r#"
[notifier]
silent = false
capture = ["*"]
to = ["ops@example.com", "dev@example.com"]
"#;

struct Harness {
    notifier: Arc<Notifier>,
    transport: Arc<RecordingTransport>,
    logger: Arc<RecordingLogger>,
    clock: Arc<FixedClock>,
    ledger: Arc<DuplicateLedger>,
}

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
}

fn build(config_toml: &str, store: Arc<dyn BlobStore>, transport: RecordingTransport) -> Harness {
    let config = Arc::new(TomlConfig::from_toml(config_toml).unwrap());
    let ledger = Arc::new(DuplicateLedger::new(store, Duration::from_secs(5)));
    let transport = Arc::new(transport);
    let logger = Arc::new(RecordingLogger::default());
    let clock = Arc::new(FixedClock::new(start_date()));

    let notifier = Notifier::builder(config, Arc::clone(&ledger), transport.clone())
        .logger(logger.clone())
        .clock(clock.clone())
        .build();

    Harness {
        notifier: Arc::new(notifier),
        transport,
        logger,
        clock,
        ledger,
    }
}

fn harness(config_toml: &str) -> (Harness, MemoryBlobStore) {
    let store = MemoryBlobStore::new();
    let h = build(config_toml, Arc::new(store.clone()), RecordingTransport::default());
    (h, store)
}

fn sample_event() -> ExceptionEvent {
    ExceptionEvent::new("QueryException", "table users missing", "src/db.rs", 88)
}

fn today(h: &Harness) -> String {
    use tattle_core::Clock;
    day_key(h.clock.today())
}

// ── Silent mode ─────────────────────────────────────────────────────

#[tokio::test]
async fn silent_mode_has_no_side_effects() {
    let (h, store) = harness(
        r#"
[notifier]
silent = true
capture = ["*"]
to = ["ops@example.com"]
"#,
    );

    let outcome = h.notifier.capture_exception(&sample_event(), true).await.unwrap();

    assert_eq!(outcome, Outcome::Silent);
    assert!(h.transport.sent().is_empty());
    assert!(store.keys().unwrap().is_empty(), "ledger must not be touched");
    assert!(h.logger.lines().is_empty());
}

#[tokio::test]
async fn unconfigured_notifier_is_silent() {
    let (h, store) = harness("");
    assert_eq!(h.notifier.capture(&sample_event()).await, Outcome::Silent);
    assert!(store.keys().unwrap().is_empty());
}

#[tokio::test]
async fn silent_mode_ignores_broken_settings() {
    let (h, _) = harness("[notifier]\nsilent = true\ncapture = 12\n");
    let outcome = h.notifier.capture_exception(&sample_event(), true).await.unwrap();
    assert_eq!(outcome, Outcome::Silent);
}

// ── Bot filtering ───────────────────────────────────────────────────

#[tokio::test]
async fn crawler_requests_are_dropped() {
    let (h, store) = harness(CAPTURE_ALL);
    let event = sample_event()
        .with_user_agent("Mozilla/5.0 (compatible; GoogleBot/2.1; +http://www.google.com/bot.html)");

    assert_eq!(h.notifier.capture(&event).await, Outcome::Bot);
    assert!(h.transport.sent().is_empty());
    assert!(store.keys().unwrap().is_empty());
}

#[tokio::test]
async fn configured_bot_list_replaces_defaults() {
    let (h, _) = harness(
        r#"
[notifier]
silent = false
capture = ["*"]
ignored_bots = ["uptimerobot"]
to = ["ops@example.com"]
"#,
    );

    let monitor = sample_event().with_user_agent("Mozilla/5.0+(compatible; UptimeRobot/2.0)");
    assert_eq!(h.notifier.capture(&monitor).await, Outcome::Bot);

    let google = ExceptionEvent::new("E", "other", "a.rs", 1).with_user_agent("Googlebot/2.1");
    assert_eq!(h.notifier.capture(&google).await, Outcome::Sent);
}

#[tokio::test]
async fn missing_user_agent_is_not_a_bot() {
    let (h, _) = harness(CAPTURE_ALL);
    assert_eq!(h.notifier.capture(&sample_event()).await, Outcome::Sent);
}

// ── Capture list ────────────────────────────────────────────────────

#[tokio::test]
async fn wildcard_sends_exactly_one_mail() {
    let (h, _) = harness(CAPTURE_ALL);

    assert_eq!(h.notifier.capture(&sample_event()).await, Outcome::Sent);

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipients, vec!["ops@example.com", "dev@example.com"]);
    assert_eq!(sent[0].subject, "QueryException: table users missing (db.rs:88)");
    assert!(sent[0].body.contains("table users missing"));
}

#[tokio::test]
async fn subtype_of_listed_kind_is_captured() {
    let (h, _) = harness(
        r#"
[notifier]
silent = false
capture = ["DatabaseException"]
to = ["ops@example.com"]

[notifier.types]
QueryException = ["DatabaseException"]
DatabaseException = ["RuntimeException"]
"#,
    );

    assert_eq!(h.notifier.capture(&sample_event()).await, Outcome::Sent);

    let unrelated = ExceptionEvent::new("HttpException", "404", "src/http.rs", 10);
    assert_eq!(h.notifier.capture(&unrelated).await, Outcome::NotCaptured);

    let parent = ExceptionEvent::new("RuntimeException", "generic", "src/lib.rs", 5);
    assert_eq!(h.notifier.capture(&parent).await, Outcome::NotCaptured);

    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test]
async fn type_table_is_resolved_once() {
    let config = Arc::new(CountingConfig {
        inner: TomlConfig::from_toml(
            r#"
[notifier]
silent = false
capture = ["DatabaseException"]
to = ["ops@example.com"]

[notifier.types]
QueryException = ["DatabaseException"]
"#,
        )
        .unwrap(),
        type_lookups: AtomicUsize::new(0),
    });
    let ledger = Arc::new(DuplicateLedger::new(
        Arc::new(MemoryBlobStore::new()),
        Duration::from_secs(1),
    ));
    let transport = Arc::new(RecordingTransport::default());
    let notifier = Notifier::builder(config.clone(), ledger, transport.clone()).build();
    assert_eq!(config.type_lookups.load(Ordering::SeqCst), 1);

    for line in 1..=3 {
        let event = ExceptionEvent::new("QueryException", "boom", "src/db.rs", line);
        assert_eq!(notifier.capture(&event).await, Outcome::Sent);
    }

    assert_eq!(transport.sent().len(), 3);
    assert_eq!(config.type_lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_type_table_fails_captures_not_construction() {
    let (h, _) = harness(
        r#"
[notifier]
silent = false
capture = ["*"]
to = ["ops@example.com"]
types = "QueryException"
"#,
    );

    assert_eq!(h.notifier.capture(&sample_event()).await, Outcome::Failed);
    let lines = h.logger.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("notifier.types"), "got: {}", lines[0]);
}

#[tokio::test]
async fn empty_capture_list_sends_nothing_but_records_fingerprint() {
    let (h, _) = harness("[notifier]\nsilent = false\nto = [\"ops@example.com\"]\n");

    assert_eq!(h.notifier.capture(&sample_event()).await, Outcome::NotCaptured);
    assert!(h.transport.sent().is_empty());
    // the duplicate check runs before the capture list
    let fp = Fingerprint::of(&sample_event());
    assert!(h.ledger.contains(&today(&h), &fp).unwrap());
}

// ── Deduplication ───────────────────────────────────────────────────

#[tokio::test]
async fn same_day_repeat_is_suppressed() {
    let (h, _) = harness(CAPTURE_ALL);
    let event = sample_event();

    assert_eq!(h.notifier.capture(&event).await, Outcome::Sent);
    assert_eq!(h.notifier.capture(&event).await, Outcome::Duplicate);

    assert_eq!(h.transport.sent().len(), 1);
    let entries = h.ledger.entries(&today(&h)).unwrap();
    assert_eq!(entries, vec![Fingerprint::of(&event).to_string()]);
}

#[tokio::test]
async fn fingerprint_ignores_kind_and_request() {
    let (h, _) = harness(CAPTURE_ALL);
    let first = ExceptionEvent::new("A", "boom", "a.rs", 1);
    let second = ExceptionEvent::new("B", "boom", "a.rs", 1).with_user_agent("curl/8.0");

    assert_eq!(h.notifier.capture(&first).await, Outcome::Sent);
    assert_eq!(h.notifier.capture(&second).await, Outcome::Duplicate);
}

#[tokio::test]
async fn different_line_is_a_new_exception() {
    let (h, _) = harness(CAPTURE_ALL);
    assert_eq!(
        h.notifier.capture(&ExceptionEvent::new("A", "boom", "a.rs", 1)).await,
        Outcome::Sent
    );
    assert_eq!(
        h.notifier.capture(&ExceptionEvent::new("A", "boom", "a.rs", 2)).await,
        Outcome::Sent
    );
}

#[tokio::test]
async fn next_day_notifies_again() {
    let (h, _) = harness(CAPTURE_ALL);
    let event = sample_event();

    assert_eq!(h.notifier.capture(&event).await, Outcome::Sent);
    h.clock.advance_days(1);
    assert_eq!(h.notifier.capture(&event).await, Outcome::Sent);
    assert_eq!(h.notifier.capture(&event).await, Outcome::Duplicate);

    assert_eq!(h.transport.sent().len(), 2);
    assert_eq!(h.ledger.days().unwrap(), vec!["14.03.2025", "15.03.2025"]);
}

#[tokio::test]
async fn mail_time_follows_the_ledger_day() {
    let (h, _) = harness(CAPTURE_ALL);

    h.notifier.capture(&sample_event()).await;
    h.clock.advance_days(1);
    h.notifier.capture(&ExceptionEvent::new("E", "later", "a.rs", 1)).await;

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].body.contains("2025-03-14 00:00:00"), "got: {}", sent[0].body);
    assert!(sent[1].body.contains("2025-03-15 00:00:00"), "got: {}", sent[1].body);
    assert_eq!(h.ledger.days().unwrap(), vec!["14.03.2025", "15.03.2025"]);
}

#[tokio::test]
async fn dedup_disabled_sends_every_time_and_skips_ledger() {
    let (h, store) = harness(
        r#"
[notifier]
silent = false
capture = ["*"]
ignore_duplicates = false
to = ["ops@example.com"]
"#,
    );

    for _ in 0..3 {
        assert_eq!(h.notifier.capture(&sample_event()).await, Outcome::Sent);
    }
    assert_eq!(h.transport.sent().len(), 3);
    assert!(store.keys().unwrap().is_empty());
}

#[tokio::test]
async fn crawler_hits_are_not_recorded() {
    let (h, store) = harness(CAPTURE_ALL);
    let bot = sample_event().with_user_agent("bingbot/2.0");

    assert_eq!(h.notifier.capture(&bot).await, Outcome::Bot);
    assert!(store.keys().unwrap().is_empty());
    // the crawler hit did not consume the day's first occurrence
    assert_eq!(h.notifier.capture(&sample_event()).await, Outcome::Sent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_occurrences_notify_once() {
    let (h, _) = harness(CAPTURE_ALL);
    let event = Arc::new(sample_event());

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let notifier = Arc::clone(&h.notifier);
            let event = Arc::clone(&event);
            tokio::spawn(async move { notifier.capture_exception(&event, true).await })
        })
        .collect();

    let mut sent = 0;
    let mut duplicates = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            Outcome::Sent => sent += 1,
            Outcome::Duplicate => duplicates += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(sent, 1);
    assert_eq!(duplicates, 15);
    assert_eq!(h.transport.sent().len(), 1);
    assert_eq!(h.ledger.entries(&today(&h)).unwrap().len(), 1);
}

#[tokio::test]
async fn filesystem_ledger_record_layout() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsBlobStore::new(dir.path()).unwrap());
    let h = build(CAPTURE_ALL, store, RecordingTransport::default());

    h.notifier.capture(&sample_event()).await;
    h.notifier.capture(&sample_event()).await;

    let raw = std::fs::read_to_string(dir.path().join("14.03.2025.json")).unwrap();
    let parsed: Vec<String> = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed, vec![Fingerprint::of(&sample_event()).to_string()]);
    assert!(parsed[0].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert!(!dir.path().join("14.03.2025.json.lock").exists());
}

// ── Failure isolation ───────────────────────────────────────────────

#[tokio::test]
async fn transport_failure_is_swallowed_and_logged_once() {
    let h = build(CAPTURE_ALL, Arc::new(MemoryBlobStore::new()), RecordingTransport::failing());

    let outcome = h.notifier.capture_exception(&sample_event(), false).await;

    assert_eq!(outcome.unwrap(), Outcome::Failed);
    assert_eq!(h.transport.attempts.load(Ordering::SeqCst), 1);
    let lines = h.logger.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("TransportError"), "got: {}", lines[0]);
    assert!(lines[0].contains("connection refused"), "got: {}", lines[0]);
}

#[tokio::test]
async fn transport_failure_propagates_when_asked() {
    let h = build(CAPTURE_ALL, Arc::new(MemoryBlobStore::new()), RecordingTransport::failing());

    let err = h
        .notifier
        .capture_exception(&sample_event(), true)
        .await
        .unwrap_err();

    assert!(matches!(err, CaptureError::Transport(_)));
    assert_eq!(h.logger.lines().len(), 1);
}

#[tokio::test]
async fn ledger_failure_is_swallowed() {
    let h = build(CAPTURE_ALL, Arc::new(UnreachableStore), RecordingTransport::default());

    assert_eq!(h.notifier.capture(&sample_event()).await, Outcome::Failed);
    assert!(h.transport.sent().is_empty());
    let lines = h.logger.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("LedgerIOError"), "got: {}", lines[0]);
}

#[tokio::test]
async fn ledger_failure_propagates_when_asked() {
    let h = build(CAPTURE_ALL, Arc::new(UnreachableStore), RecordingTransport::default());
    let err = h
        .notifier
        .capture_exception(&sample_event(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::Ledger(_)));
}

#[tokio::test]
async fn malformed_config_is_logged() {
    let (h, _) = harness("[notifier]\nsilent = false\ncapture = 12\n");

    let err = h
        .notifier
        .capture_exception(&sample_event(), true)
        .await
        .unwrap_err();

    assert!(matches!(err, CaptureError::Config(_)));
    let lines = h.logger.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("ConfigurationError"), "got: {}", lines[0]);
    assert!(lines[0].contains("notifier.capture"), "got: {}", lines[0]);
}

#[tokio::test]
async fn missing_recipients_is_a_config_failure() {
    let (h, _) = harness("[notifier]\nsilent = false\ncapture = [\"*\"]\n");
    assert_eq!(h.notifier.capture(&sample_event()).await, Outcome::Failed);
    assert!(h.logger.lines()[0].contains("notifier.to"));
}

#[tokio::test]
async fn formatter_failure_is_logged() {
    struct BrokenFormatter;
    impl tattle_notify::Formatter for BrokenFormatter {
        fn to_subject(&self, _event: &ExceptionEvent) -> Result<String, CaptureError> {
            Err(CaptureError::Format("undefined variable".into()))
        }
        fn to_body(&self, _event: &ExceptionEvent) -> Result<String, CaptureError> {
            Ok(String::new())
        }
    }

    let config = Arc::new(TomlConfig::from_toml(CAPTURE_ALL).unwrap());
    let ledger = Arc::new(DuplicateLedger::new(
        Arc::new(MemoryBlobStore::new()),
        Duration::from_secs(1),
    ));
    let transport = Arc::new(RecordingTransport::default());
    let logger = Arc::new(RecordingLogger::default());
    let notifier = Notifier::builder(config, ledger, transport.clone())
        .formatter(Arc::new(BrokenFormatter))
        .logger(logger.clone())
        .build();

    assert_eq!(notifier.capture(&sample_event()).await, Outcome::Failed);
    assert!(transport.sent().is_empty());
    assert!(logger.lines()[0].contains("FormatterError"));
}

// ── Test mail ───────────────────────────────────────────────────────

#[tokio::test]
async fn send_test_bypasses_gates() {
    let (h, store) = harness("[notifier]\nsilent = true\nto = [\"ops@example.com\"]\n");

    h.notifier.send_test().await.unwrap();

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.starts_with("TattleTest:"), "got: {}", sent[0].subject);
    assert!(store.keys().unwrap().is_empty());
}
