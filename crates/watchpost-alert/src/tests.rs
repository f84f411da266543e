use crate::condition::{evaluate, CompareOp, Condition};
use crate::cooldown::{self, CooldownStore};
use crate::error::AlertError;
use crate::observer::{Observer, ObserverSession};
use crate::scan::{RuleOutcome, ScanOrchestrator};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use watchpost_common::types::Rule;

fn make_rule(url: &str, condition: &str, cooldown_hours: f64) -> Rule {
    Rule {
        url: url.to_string(),
        selector: "//button[@id='add-to-cart']".to_string(),
        success_condition: condition.to_string(),
        cooldown_hours,
        enabled: true,
    }
}

fn at_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

fn setup() -> (TempDir, CooldownStore) {
    let dir = TempDir::new().unwrap();
    let store = CooldownStore::open(dir.path().join("cooldowns.json")).unwrap();
    (dir, store)
}

#[derive(Clone)]
enum Reply {
    Count(i64),
    Fail(&'static str),
    Hang,
    Panic,
}

#[derive(Default)]
struct FakeObserver {
    replies: HashMap<String, Reply>,
    fail_open: bool,
    fetched: Arc<Mutex<Vec<String>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl FakeObserver {
    fn with(replies: &[(&str, Reply)]) -> Self {
        Self {
            replies: replies
                .iter()
                .map(|(url, reply)| (url.to_string(), reply.clone()))
                .collect(),
            ..Default::default()
        }
    }
}

struct FakeSession {
    replies: HashMap<String, Reply>,
    fetched: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl Observer for FakeObserver {
    fn name(&self) -> &str {
        "fake"
    }

    async fn open_session(&self) -> anyhow::Result<Box<dyn ObserverSession>> {
        if self.fail_open {
            anyhow::bail!("browser failed to launch");
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            replies: self.replies.clone(),
            fetched: self.fetched.clone(),
            closed: self.closed.clone(),
        }))
    }
}

#[async_trait]
impl ObserverSession for FakeSession {
    async fn fetch(
        &mut self,
        url: &str,
        _selector: &str,
        _timeout: std::time::Duration,
    ) -> anyhow::Result<i64> {
        self.fetched.lock().unwrap().push(url.to_string());
        match self.replies.get(url) {
            Some(Reply::Count(n)) => Ok(*n),
            Some(Reply::Fail(msg)) => Err(anyhow::anyhow!("{msg}")),
            Some(Reply::Hang) => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(0)
            }
            Some(Reply::Panic) => panic!("renderer crashed"),
            None => Err(anyhow::anyhow!("navigation failed")),
        }
    }

    async fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Condition grammar ──

#[test]
fn evaluator_truth_table() {
    assert!(evaluate(3, ">2").unwrap());
    assert!(!evaluate(0, ">0").unwrap());
    assert!(evaluate(5, "==5").unwrap());
    assert!(!evaluate(5, "!=5").unwrap());
    assert!(evaluate(1, ">=1").unwrap());
    assert!(evaluate(0, "<1").unwrap());
    assert!(evaluate(1, "<=1").unwrap());
    assert!(!evaluate(2, "<=1").unwrap());
}

#[test]
fn evaluator_tolerates_whitespace_and_signs() {
    assert!(evaluate(0, "  > -1 ").unwrap());
    let cond: Condition = "!= 0".parse().unwrap();
    assert_eq!(cond.operator, CompareOp::NotEqual);
    assert_eq!(cond.operand, 0);
}

#[test]
fn evaluator_rejects_malformed_conditions() {
    for bad in [">>1", "", ">", "=1", "=>1", "> 1 || true", "1", ">1.5", "process.exit()"] {
        let err = evaluate(1, bad).expect_err(bad);
        assert!(
            matches!(err, AlertError::Configuration(_)),
            "unexpected error for {bad:?}: {err}"
        );
    }
}

// ── Cooldown ledger ──

#[test]
fn missing_ledger_file_is_empty() {
    let (_dir, store) = setup();
    assert!(store.ledger().is_empty());
    assert!(!store.has_pending_writes());
}

#[test]
fn corrupt_ledger_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cooldowns.json");
    std::fs::write(&path, "[1, 2, 3]").unwrap();
    let err = CooldownStore::open(&path).err().expect("corrupt ledger must fail");
    assert!(matches!(err, AlertError::LedgerCorrupt { .. }));
}

#[test]
fn reset_replaces_corrupt_ledger_without_reading_it() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cooldowns.json");
    std::fs::write(&path, "{\"abc\": not json").unwrap();
    assert!(CooldownStore::open(&path).is_err());

    let store = CooldownStore::reset(&path).unwrap();
    assert!(store.ledger().is_empty());
    assert!(!store.has_pending_writes());
    assert!(CooldownStore::open(&path).unwrap().ledger().is_empty());
}

#[test]
fn reset_creates_missing_ledger_directory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state").join("cooldowns.json");
    CooldownStore::reset(&path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "{}");
}

#[test]
fn fractional_instants_are_rounded_to_millis() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cooldowns.json");
    let rule = make_rule("https://shop.example/p/1", ">0", 0.1);
    let fp = rule.fingerprint();
    std::fs::write(&path, format!("{{\"{fp}\": 1700000360000.6, \"abc\": 1700000360000.0001}}")).unwrap();

    let store = CooldownStore::open(&path).unwrap();
    assert_eq!(store.ledger().eligible_again_at(&fp), Some(1_700_000_360_001));
    assert_eq!(
        store.ledger().eligible_again_at(&"abc".to_string().into()),
        Some(1_700_000_360_000)
    );
}

#[test]
fn unreadable_ledger_is_fatal() {
    let dir = TempDir::new().unwrap();
    // A directory in place of the file.
    let err = CooldownStore::open(dir.path()).err().expect("directory must fail");
    assert!(matches!(err, AlertError::LedgerRead { .. }));
}

#[test]
fn ledger_reads_flat_json_map() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cooldowns.json");
    let rule = make_rule("https://shop.example/p/1", ">0", 1.0);
    let fp = rule.fingerprint();
    std::fs::write(&path, format!("{{\n  \"{fp}\": 1700000000000\n}}")).unwrap();

    let ledger = cooldown::load(&path).unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.eligible_again_at(&fp), Some(1_700_000_000_000));
}

#[test]
fn eligibility_boundary_is_exclusive() {
    let (_dir, mut store) = setup();
    let rule = make_rule("https://shop.example/p/1", ">0", 0.0);
    let fp = rule.fingerprint();
    let t = 1_700_000_000_000;
    assert!(store.is_eligible(&fp, at_millis(t)));

    store.record_cooldown(&fp, &rule, at_millis(t)).unwrap();
    assert_eq!(store.ledger().eligible_again_at(&fp), Some(t));

    assert!(!store.is_eligible(&fp, at_millis(t - 1)));
    assert!(!store.is_eligible(&fp, at_millis(t)));
    assert!(store.is_eligible(&fp, at_millis(t + 1)));
}

#[test]
fn record_cooldown_never_extends_running_cooldown() {
    let (_dir, mut store) = setup();
    let rule = make_rule("https://shop.example/p/1", ">0", 2.0);
    let fp = rule.fingerprint();
    let start = Utc::now();

    assert!(store.record_cooldown(&fp, &rule, start).unwrap());
    let first = store.ledger().eligible_again_at(&fp).unwrap();
    assert_eq!(first, start.timestamp_millis() + 2 * 3_600_000);

    for minutes in [1, 30, 119] {
        let later = start + Duration::minutes(minutes);
        assert!(!store.record_cooldown(&fp, &rule, later).unwrap());
        assert_eq!(store.ledger().eligible_again_at(&fp), Some(first));
    }
}

#[test]
fn expired_cooldown_is_renewed() {
    let (_dir, mut store) = setup();
    let rule = make_rule("https://shop.example/p/1", ">0", 1.0);
    let fp = rule.fingerprint();
    let start = Utc::now();
    store.record_cooldown(&fp, &rule, start).unwrap();

    let later = start + Duration::hours(2);
    assert!(store.record_cooldown(&fp, &rule, later).unwrap());
    assert_eq!(
        store.ledger().eligible_again_at(&fp),
        Some(later.timestamp_millis() + 3_600_000)
    );
}

#[test]
fn recorded_cooldown_survives_reopen() {
    let (dir, mut store) = setup();
    let rule = make_rule("https://shop.example/p/1", ">0", 1.0);
    let fp = rule.fingerprint();
    store.record_cooldown(&fp, &rule, Utc::now()).unwrap();

    let reopened = CooldownStore::open(dir.path().join("cooldowns.json")).unwrap();
    assert_eq!(reopened.ledger(), store.ledger());
}

#[test]
fn invalidate_all_clears_persisted_ledger() {
    let (dir, mut store) = setup();
    let now = Utc::now();
    for i in 0..3 {
        let rule = make_rule(&format!("https://shop.example/p/{i}"), ">0", 5.0);
        store.record_cooldown(&rule.fingerprint(), &rule, now).unwrap();
    }
    assert_eq!(store.ledger().len(), 3);

    store.invalidate_all().unwrap();
    assert!(store.ledger().is_empty());
    let reopened = CooldownStore::open(dir.path().join("cooldowns.json")).unwrap();
    assert!(reopened.ledger().is_empty());
}

#[test]
fn failed_write_is_kept_and_flushed_later() {
    let (dir, mut store) = setup();
    let path = dir.path().join("cooldowns.json");
    std::fs::create_dir(&path).unwrap();

    let rule = make_rule("https://shop.example/p/1", ">0", 1.0);
    let fp = rule.fingerprint();
    let err = store.record_cooldown(&fp, &rule, Utc::now()).unwrap_err();
    assert!(matches!(err, AlertError::LedgerWrite { .. }));
    assert!(store.has_pending_writes());
    assert!(store.ledger().eligible_again_at(&fp).is_some());

    std::fs::remove_dir(&path).unwrap();
    store.flush().unwrap();
    assert!(!store.has_pending_writes());
    assert_eq!(cooldown::load(&path).unwrap().len(), 1);
}

// ── Scan cycle ──

#[tokio::test]
async fn first_satisfied_run_alerts_and_records_cooldown() {
    let (_dir, mut store) = setup();
    let rule = make_rule("https://shop.example/p/kettle", ">0", 24.0);
    let observer = FakeObserver::with(&[("https://shop.example/p/kettle", Reply::Count(2))]);
    let now = Utc::now();

    let report = ScanOrchestrator::new(&observer, &mut store)
        .run_cycle(std::slice::from_ref(&rule), now)
        .await
        .unwrap();

    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].url, rule.url);
    assert_eq!(report.alerts[0].observed, 2);
    assert_eq!(
        store.ledger().eligible_again_at(&rule.fingerprint()),
        Some(now.timestamp_millis() + 24 * 3_600_000)
    );
}

#[tokio::test]
async fn rerun_within_cooldown_is_suppressed() {
    let (_dir, mut store) = setup();
    let rule = make_rule("https://shop.example/p/kettle", ">0", 24.0);
    let observer = FakeObserver::with(&[("https://shop.example/p/kettle", Reply::Count(2))]);
    let rules = vec![rule.clone()];
    let now = Utc::now();

    ScanOrchestrator::new(&observer, &mut store)
        .run_cycle(&rules, now)
        .await
        .unwrap();
    let ledger_after_first = store.ledger().clone();

    let report = ScanOrchestrator::new(&observer, &mut store)
        .run_cycle(&rules, now + Duration::seconds(5))
        .await
        .unwrap();

    assert!(report.alerts.is_empty());
    assert!(matches!(
        report.rules[0].outcome,
        RuleOutcome::Suppressed { observed: 2, .. }
    ));
    assert_eq!(store.ledger(), &ledger_after_first);
}

#[tokio::test]
async fn unsatisfied_rule_is_distinct_from_suppressed() {
    let (_dir, mut store) = setup();
    let rule = make_rule("https://shop.example/p/gone", ">0", 1.0);
    let observer = FakeObserver::with(&[("https://shop.example/p/gone", Reply::Count(0))]);

    let report = ScanOrchestrator::new(&observer, &mut store)
        .run_cycle(&[rule], Utc::now())
        .await
        .unwrap();

    assert!(report.alerts.is_empty());
    assert_eq!(report.rules[0].outcome, RuleOutcome::NotSatisfied { observed: 0 });
    assert!(store.ledger().is_empty());
}

#[tokio::test]
async fn per_rule_failures_do_not_abort_cycle() {
    let (_dir, mut store) = setup();
    let rules = vec![
        make_rule("https://a.example/broken", ">0", 1.0),
        make_rule("https://a.example/malformed", ">>1", 1.0),
        make_rule("https://a.example/slow", ">0", 1.0),
        make_rule("https://a.example/negative-cooldown", ">0", -3.0),
        make_rule("https://a.example/ok", ">=1", 1.0),
    ];
    let observer = FakeObserver::with(&[
        ("https://a.example/broken", Reply::Fail("selector timeout")),
        ("https://a.example/malformed", Reply::Count(5)),
        ("https://a.example/slow", Reply::Hang),
        ("https://a.example/negative-cooldown", Reply::Count(5)),
        ("https://a.example/ok", Reply::Count(1)),
    ]);

    let report = ScanOrchestrator::new(&observer, &mut store)
        .with_fetch_timeout(std::time::Duration::from_millis(50))
        .run_cycle(&rules, Utc::now())
        .await
        .unwrap();

    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].url, "https://a.example/ok");
    for r in &report.rules[..4] {
        assert!(
            matches!(r.outcome, RuleOutcome::Skipped { .. }),
            "{} should be skipped, got {:?}",
            r.url,
            r.outcome
        );
    }
    // Malformed rules are rejected before any fetch.
    let fetched = observer.fetched.lock().unwrap().clone();
    assert_eq!(
        fetched,
        vec![
            "https://a.example/broken",
            "https://a.example/slow",
            "https://a.example/ok"
        ]
    );
    assert_eq!(observer.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disabled_rules_are_not_observed() {
    let (_dir, mut store) = setup();
    let mut rule = make_rule("https://a.example/off", ">0", 1.0);
    rule.enabled = false;
    let observer = FakeObserver::with(&[("https://a.example/off", Reply::Count(9))]);

    let report = ScanOrchestrator::new(&observer, &mut store)
        .run_cycle(&[rule], Utc::now())
        .await
        .unwrap();

    assert!(report.alerts.is_empty());
    assert_eq!(report.rules[0].outcome, RuleOutcome::Disabled);
    assert!(observer.fetched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn alerts_follow_rule_order_and_dedupe_within_cycle() {
    let (_dir, mut store) = setup();
    let rules = vec![
        make_rule("https://a.example/3", ">0", 1.0),
        make_rule("https://a.example/1", ">0", 1.0),
        make_rule("https://a.example/3", ">0", 1.0),
        make_rule("https://a.example/2", ">0", 1.0),
    ];
    let observer = FakeObserver::with(&[
        ("https://a.example/1", Reply::Count(1)),
        ("https://a.example/2", Reply::Count(1)),
        ("https://a.example/3", Reply::Count(1)),
    ]);

    let report = ScanOrchestrator::new(&observer, &mut store)
        .run_cycle(&rules, Utc::now())
        .await
        .unwrap();

    let urls: Vec<&str> = report.alerts.iter().map(|a| a.url.as_str()).collect();
    assert_eq!(
        urls,
        vec!["https://a.example/3", "https://a.example/1", "https://a.example/2"]
    );
    assert!(matches!(report.rules[2].outcome, RuleOutcome::Suppressed { .. }));
    assert_eq!(store.ledger().len(), 3);
}

#[tokio::test]
async fn session_opened_once_per_cycle() {
    let (_dir, mut store) = setup();
    let rules: Vec<Rule> = (0..4)
        .map(|i| make_rule(&format!("https://a.example/{i}"), "==0", 1.0))
        .collect();
    let observer = FakeObserver::default();

    ScanOrchestrator::new(&observer, &mut store)
        .run_cycle(&rules, Utc::now())
        .await
        .unwrap();

    assert_eq!(observer.opened.load(Ordering::SeqCst), 1);
    assert_eq!(observer.closed.load(Ordering::SeqCst), 1);
    assert_eq!(observer.fetched.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn observer_session_failure_is_fatal() {
    let (_dir, mut store) = setup();
    let observer = FakeObserver {
        fail_open: true,
        ..Default::default()
    };

    let err = ScanOrchestrator::new(&observer, &mut store)
        .run_cycle(&[make_rule("https://a.example/x", ">0", 1.0)], Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AlertError::ObserverSession(_)));
    assert!(err.to_string().contains("browser failed to launch"));
}

#[tokio::test]
async fn ledger_write_failure_still_alerts() {
    let (dir, mut store) = setup();
    std::fs::create_dir(dir.path().join("cooldowns.json")).unwrap();
    let rule = make_rule("https://a.example/x", ">0", 1.0);
    let observer = FakeObserver::with(&[("https://a.example/x", Reply::Count(1))]);

    let report = ScanOrchestrator::new(&observer, &mut store)
        .run_cycle(&[rule], Utc::now())
        .await
        .unwrap();

    assert_eq!(report.alerts.len(), 1);
    assert!(store.has_pending_writes());
}

#[tokio::test]
async fn session_closed_when_cycle_is_cancelled() {
    let (_dir, mut store) = setup();
    let observer = FakeObserver::with(&[("https://a.example/slow", Reply::Hang)]);
    let rules = [make_rule("https://a.example/slow", ">0", 1.0)];

    let mut orchestrator = ScanOrchestrator::new(&observer, &mut store)
        .with_fetch_timeout(std::time::Duration::from_secs(3600));
    let cycle = orchestrator.run_cycle(&rules, Utc::now());
    assert!(tokio::time::timeout(std::time::Duration::from_millis(50), cycle)
        .await
        .is_err());

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(observer.opened.load(Ordering::SeqCst), 1);
    assert_eq!(observer.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn session_closed_when_cycle_panics() {
    let observer = FakeObserver::with(&[("https://a.example/crash", Reply::Panic)]);
    let closed = observer.closed.clone();
    let dir = TempDir::new().unwrap();
    let ledger_path = dir.path().join("cooldowns.json");

    let task = tokio::spawn(async move {
        let mut store = CooldownStore::open(ledger_path).unwrap();
        let rules = [make_rule("https://a.example/crash", ">0", 1.0)];
        ScanOrchestrator::new(&observer, &mut store)
            .run_cycle(&rules, Utc::now())
            .await
    });
    assert!(task.await.unwrap_err().is_panic());

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}
