use crate::config::WatchpostConfig;
use crate::observer::build_observer;
use anyhow::Result;
use chrono::{DateTime, Utc};
use watchpost_alert::cooldown::CooldownStore;
use watchpost_alert::observer::Observer;
use watchpost_alert::scan::{ScanOrchestrator, ScanReport};
use watchpost_notify::plugin::ProviderRegistry;
use watchpost_notify::router::{NotificationRouter, ProviderOutcome};

/// Empties the configured ledger without loading it, so a corrupt ledger
/// can be cleared before anything else opens it.
pub fn reset_ledger(config: &WatchpostConfig) -> Result<()> {
    CooldownStore::reset(&config.ledger_path)?;
    Ok(())
}

/// Everything one cycle produced.
#[derive(Debug)]
pub struct CycleSummary {
    pub scan: ScanReport,
    pub notifications: Vec<ProviderOutcome>,
}

/// Scanner, cooldown ledger and notification router wired from one
/// [`WatchpostConfig`].
pub struct Watchpost {
    config: WatchpostConfig,
    observer: Box<dyn Observer>,
    router: NotificationRouter,
    store: CooldownStore,
}

impl Watchpost {
    pub fn new(config: WatchpostConfig) -> Result<Self> {
        let observer = build_observer(&config.observer)?;
        Self::with_observer(config, observer)
    }

    pub fn with_observer(config: WatchpostConfig, observer: Box<dyn Observer>) -> Result<Self> {
        let store = CooldownStore::open(&config.ledger_path)?;
        let registry = ProviderRegistry::default();
        for provider in &config.providers {
            if !registry.has_plugin(&provider.provider_id) {
                tracing::warn!(
                    provider = provider.display_name(),
                    provider_id = %provider.provider_id,
                    "No plugin registered for provider, it will be skipped"
                );
            }
        }
        let router = NotificationRouter::new(registry)
            .with_subject(config.subject.clone())
            .with_init_timeout(config.provider_init_timeout());
        Ok(Self {
            config,
            observer,
            router,
            store,
        })
    }

    pub fn config(&self) -> &WatchpostConfig {
        &self.config
    }

    pub fn store(&self) -> &CooldownStore {
        &self.store
    }

    /// Drops every cooldown so all rules are eligible on the next cycle.
    pub fn reset_cooldowns(&mut self) -> Result<()> {
        self.store = CooldownStore::reset(&self.config.ledger_path)?;
        Ok(())
    }

    /// Scans every rule, then hands the eligible alerts to the providers.
    ///
    /// # Errors
    ///
    /// Fails when the ledger cannot be read or the observer session cannot
    /// be opened. Rule and provider failures are reported in the summary.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleSummary> {
        // Pick up changes made by other processes unless we hold unwritten entries.
        if !self.store.has_pending_writes() {
            self.store = CooldownStore::open(&self.config.ledger_path)?;
        }

        let scan = ScanOrchestrator::new(self.observer.as_ref(), &mut self.store)
            .with_fetch_timeout(self.config.fetch_timeout())
            .run_cycle(&self.config.rules, now)
            .await?;

        let notifications = self
            .router
            .dispatch(&scan.alerts, &self.config.providers)
            .await;

        Ok(CycleSummary {
            scan,
            notifications,
        })
    }
}
