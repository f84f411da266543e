use crate::condition::Condition;
use crate::cooldown::CooldownStore;
use crate::error::{AlertError, Result};
use crate::observer::{Observer, ObserverSession};
use chrono::{DateTime, Utc};
use std::time::Duration;
use watchpost_common::fingerprint::Fingerprint;
use watchpost_common::types::{AlertItem, Rule};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// What happened to one rule during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Disabled,
    /// Malformed rule or failed observation; the rule is retried next cycle.
    Skipped { reason: String },
    NotSatisfied { observed: i64 },
    /// Satisfied, but a cooldown recorded earlier is still running.
    Suppressed { observed: i64, eligible_again_at: i64 },
    Alerted { observed: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleReport {
    pub url: String,
    pub fingerprint: Fingerprint,
    pub outcome: RuleOutcome,
}

/// Result of one cycle: alerts in rule order plus a per-rule trail.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub alerts: Vec<AlertItem>,
    pub rules: Vec<RuleReport>,
}

impl ScanReport {
    fn count(&self, pred: impl Fn(&RuleOutcome) -> bool) -> usize {
        self.rules.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Owns the cycle's observer session. If the cycle unwinds or is dropped
/// before [`SessionGuard::close`], the session is closed on the runtime in
/// the background.
struct SessionGuard {
    session: Option<Box<dyn ObserverSession>>,
}

impl SessionGuard {
    async fn close(mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        tracing::warn!("Scan cycle aborted, releasing observer session");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(session.close());
            }
            Err(_) => tracing::error!("No runtime to close observer session on"),
        }
    }
}

/// Drives one scan cycle over the configured rules.
pub struct ScanOrchestrator<'a> {
    observer: &'a dyn Observer,
    store: &'a mut CooldownStore,
    fetch_timeout: Duration,
}

impl<'a> ScanOrchestrator<'a> {
    pub fn new(observer: &'a dyn Observer, store: &'a mut CooldownStore) -> Self {
        Self {
            observer,
            store,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Evaluates `rules` in order and returns the alerts eligible to notify.
    ///
    /// # Errors
    ///
    /// Only failing to open the observer session aborts the cycle. Rule
    /// level failures are logged and recorded as [`RuleOutcome::Skipped`].
    pub async fn run_cycle(&mut self, rules: &[Rule], now: DateTime<Utc>) -> Result<ScanReport> {
        tracing::info!(
            observer = self.observer.name(),
            rules = rules.len(),
            "Scan cycle started"
        );

        let session = self
            .observer
            .open_session()
            .await
            .map_err(|e| AlertError::ObserverSession(format!("{e:#}")))?;

        let mut guard = SessionGuard {
            session: Some(session),
        };
        let report = match guard.session.as_deref_mut() {
            Some(session) => self.scan_rules(session, rules, now).await,
            None => ScanReport::default(),
        };
        guard.close().await;

        if self.store.has_pending_writes() {
            if let Err(e) = self.store.flush() {
                tracing::error!(error = %e, "Cooldown ledger still not persisted at end of cycle");
            }
        }

        tracing::info!(
            alerts = report.alerts.len(),
            suppressed = report.count(|o| matches!(o, RuleOutcome::Suppressed { .. })),
            skipped = report.count(|o| matches!(o, RuleOutcome::Skipped { .. })),
            "Scan cycle finished"
        );
        Ok(report)
    }

    async fn scan_rules(
        &mut self,
        session: &mut dyn ObserverSession,
        rules: &[Rule],
        now: DateTime<Utc>,
    ) -> ScanReport {
        let mut report = ScanReport::default();

        for rule in rules {
            let fingerprint = rule.fingerprint();
            let outcome = if rule.enabled {
                self.scan_rule(session, rule, &fingerprint, now, &mut report.alerts)
                    .await
            } else {
                tracing::debug!(url = %rule.url, "Rule disabled, skipping");
                RuleOutcome::Disabled
            };
            report.rules.push(RuleReport {
                url: rule.url.clone(),
                fingerprint,
                outcome,
            });
        }

        report
    }

    async fn scan_rule(
        &mut self,
        session: &mut dyn ObserverSession,
        rule: &Rule,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
        alerts: &mut Vec<AlertItem>,
    ) -> RuleOutcome {
        let condition = match validate(rule) {
            Ok(condition) => condition,
            Err(e) => {
                tracing::warn!(url = %rule.url, fingerprint = %fingerprint, error = %e, "Skipping malformed rule");
                return RuleOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        let observed = match self.observe(session, rule).await {
            Ok(observed) => observed,
            Err(e) => {
                tracing::warn!(url = %rule.url, fingerprint = %fingerprint, error = %e, "Observation failed, skipping rule");
                return RuleOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        let satisfied = condition.matches(observed);
        tracing::info!(
            url = %rule.url,
            observed,
            condition = %condition,
            satisfied,
            "Rule evaluated"
        );
        if !satisfied {
            return RuleOutcome::NotSatisfied { observed };
        }

        if !self.store.is_eligible(fingerprint, now) {
            let eligible_again_at = self
                .store
                .ledger()
                .eligible_again_at(fingerprint)
                .unwrap_or_default();
            tracing::info!(
                url = %rule.url,
                fingerprint = %fingerprint,
                eligible_again_at,
                "Condition satisfied but still cooling down, not alerting"
            );
            return RuleOutcome::Suppressed {
                observed,
                eligible_again_at,
            };
        }

        alerts.push(AlertItem::new(rule, fingerprint.clone(), observed, now));
        if let Err(e) = self.store.record_cooldown(fingerprint, rule, now) {
            tracing::error!(
                url = %rule.url,
                fingerprint = %fingerprint,
                error = %e,
                "Failed to persist cooldown, will retry on next ledger write"
            );
        }
        RuleOutcome::Alerted { observed }
    }

    async fn observe(&self, session: &mut dyn ObserverSession, rule: &Rule) -> Result<i64> {
        let fetch = session.fetch(&rule.url, &rule.selector, self.fetch_timeout);
        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(count)) => Ok(count),
            Ok(Err(e)) => Err(AlertError::Observation {
                url: rule.url.clone(),
                reason: format!("{e:#}"),
            }),
            Err(_) => Err(AlertError::Observation {
                url: rule.url.clone(),
                reason: format!("timed out after {:?}", self.fetch_timeout),
            }),
        }
    }
}

/// Checks a rule before any observation is spent on it.
fn validate(rule: &Rule) -> Result<Condition> {
    let condition = rule.success_condition.parse::<Condition>()?;
    if rule.cooldown_millis().is_none() {
        return Err(AlertError::Configuration(format!(
            "cooldown_hours must be a non-negative number, got {}",
            rule.cooldown_hours
        )));
    }
    Ok(condition)
}
