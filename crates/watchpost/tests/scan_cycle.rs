use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use watchpost::app::{reset_ledger, Watchpost};
use watchpost::config::WatchpostConfig;
use watchpost_alert::observer::{Observer, ObserverSession};
use watchpost_alert::scan::RuleOutcome;

/// Serves fixed counts per URL; unknown URLs fail.
struct StaticObserver {
    counts: HashMap<String, i64>,
}

struct StaticSession {
    counts: HashMap<String, i64>,
}

#[async_trait]
impl Observer for StaticObserver {
    fn name(&self) -> &str {
        "static"
    }

    async fn open_session(&self) -> Result<Box<dyn ObserverSession>> {
        Ok(Box::new(StaticSession {
            counts: self.counts.clone(),
        }))
    }
}

#[async_trait]
impl ObserverSession for StaticSession {
    async fn fetch(&mut self, url: &str, _selector: &str, _timeout: Duration) -> Result<i64> {
        self.counts
            .get(url)
            .copied()
            .ok_or_else(|| anyhow!("connection refused"))
    }

    async fn close(self: Box<Self>) {}
}

fn config(dir: &Path) -> Result<WatchpostConfig> {
    let content = format!(
        r#"
ledger_path = "{ledger}"
subject = "Back in stock"

[[rules]]
url = "https://shop.example/p/kettle"
selector = "in-stock"
success_condition = ">0"
cooldown_hours = 1

[[rules]]
url = "https://shop.example/p/toaster"
selector = "in-stock"
success_condition = ">0"
cooldown_hours = 1

[[rules]]
url = "https://shop.example/p/offline"
selector = "in-stock"
success_condition = ">0"
cooldown_hours = 1

[[providers]]
provider_id = "logfile"
recipients = [{{ filename = "{log}" }}]

[[providers]]
provider_id = "carrier_pigeon"
"#,
        ledger = dir.join("ledger.json").display(),
        log = dir.join("alerts.log").display(),
    );
    WatchpostConfig::parse(&content)
}

fn watchpost(dir: &Path) -> Result<Watchpost> {
    let observer = StaticObserver {
        counts: HashMap::from([
            ("https://shop.example/p/kettle".to_string(), 2),
            ("https://shop.example/p/toaster".to_string(), 0),
        ]),
    };
    Watchpost::with_observer(config(dir)?, Box::new(observer))
}

fn logged_alerts(dir: &Path) -> usize {
    std::fs::read_to_string(dir.join("alerts.log"))
        .map(|s| s.matches("Subject: Back in stock").count())
        .unwrap_or(0)
}

#[tokio::test]
async fn cycle_alerts_then_suppresses_within_cooldown() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let mut watchpost = watchpost(dir.path())?;
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();

    let first = watchpost.run_cycle(start).await?;
    assert_eq!(first.scan.alerts.len(), 1);
    assert_eq!(first.scan.alerts[0].url, "https://shop.example/p/kettle");
    assert!(matches!(first.scan.rules[1].outcome, RuleOutcome::NotSatisfied { observed: 0 }));
    assert!(matches!(first.scan.rules[2].outcome, RuleOutcome::Skipped { .. }));
    assert_eq!(first.notifications.len(), 2);
    assert!(first.notifications[0].delivered);
    assert!(!first.notifications[1].delivered);
    assert_eq!(logged_alerts(dir.path()), 1);

    let second = watchpost.run_cycle(start + ChronoDuration::minutes(30)).await?;
    assert!(second.scan.alerts.is_empty());
    assert!(matches!(second.scan.rules[0].outcome, RuleOutcome::Suppressed { .. }));
    assert!(second.notifications.is_empty());
    assert_eq!(logged_alerts(dir.path()), 1);

    let third = watchpost.run_cycle(start + ChronoDuration::minutes(61)).await?;
    assert_eq!(third.scan.alerts.len(), 1);
    assert_eq!(logged_alerts(dir.path()), 2);
    Ok(())
}

#[tokio::test]
async fn cooldowns_survive_restart_and_reset() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();

    watchpost(dir.path())?.run_cycle(start).await?;

    let mut restarted = watchpost(dir.path())?;
    assert_eq!(restarted.store().ledger().len(), 1);
    let report = restarted.run_cycle(start + ChronoDuration::minutes(5)).await?;
    assert!(report.scan.alerts.is_empty());

    restarted.reset_cooldowns()?;
    assert!(restarted.store().ledger().is_empty());
    let report = restarted.run_cycle(start + ChronoDuration::minutes(6)).await?;
    assert_eq!(report.scan.alerts.len(), 1);
    assert_eq!(logged_alerts(dir.path()), 2);
    Ok(())
}

#[tokio::test]
async fn reset_clears_corrupt_ledger() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    std::fs::write(dir.path().join("ledger.json"), "{\"abc\": [broken")?;
    assert!(watchpost(dir.path()).is_err());

    reset_ledger(&config(dir.path())?)?;

    let mut watchpost = watchpost(dir.path())?;
    assert!(watchpost.store().ledger().is_empty());
    let report = watchpost.run_cycle(Utc::now()).await?;
    assert_eq!(report.scan.alerts.len(), 1);
    Ok(())
}
