use crate::error::NotifyError;
use crate::plugin::ProviderRegistry;
use crate::{NotificationProvider, OutgoingAlert};
use std::time::Duration;
use watchpost_common::payload::{AlertContent, DEFAULT_SUBJECT};
use watchpost_common::types::{AlertItem, ProviderConfig};

/// Where a provider got to during one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRuntimeState {
    Uninitialized,
    Ready,
    Sending,
    Disconnected,
    Failed,
}

/// Per-provider result of a dispatch.
#[derive(Debug, Clone)]
pub struct ProviderOutcome {
    pub provider: String,
    pub state: ProviderRuntimeState,
    pub delivered: bool,
    pub errors: Vec<String>,
}

/// Fans one set of alerts out to every enabled provider.
///
/// Providers run one after another in configuration order, each through
/// `initialize → send → shutdown`. A failure at any step is logged and
/// confined to that provider.
pub struct NotificationRouter {
    registry: ProviderRegistry,
    subject: String,
    init_timeout: Option<Duration>,
}

impl NotificationRouter {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            subject: DEFAULT_SUBJECT.to_string(),
            init_timeout: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Bounds `initialize()`, which may otherwise wait indefinitely for
    /// external authorization.
    pub fn with_init_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Delivers `alerts` through every enabled provider. Never fails as a
    /// whole; see the returned outcomes for per-provider results.
    pub async fn dispatch(
        &self,
        alerts: &[AlertItem],
        providers: &[ProviderConfig],
    ) -> Vec<ProviderOutcome> {
        if alerts.is_empty() {
            tracing::info!("No alerts this cycle, skipping notification");
            return Vec::new();
        }

        let content = AlertContent::render(&self.subject, alerts);
        let mut outcomes = Vec::new();

        for config in providers {
            if !config.enabled {
                tracing::debug!(provider = config.display_name(), "Provider disabled, skipping");
                continue;
            }
            outcomes.push(self.deliver(config, &content).await);
        }

        let delivered = outcomes.iter().filter(|o| o.delivered).count();
        tracing::info!(
            alerts = alerts.len(),
            providers = outcomes.len(),
            delivered,
            "Notification dispatch finished"
        );
        outcomes
    }

    async fn deliver(&self, config: &ProviderConfig, content: &AlertContent) -> ProviderOutcome {
        let mut outcome = ProviderOutcome {
            provider: config.display_name().to_string(),
            state: ProviderRuntimeState::Uninitialized,
            delivered: false,
            errors: Vec::new(),
        };

        let mut provider = match self.registry.create_provider(config) {
            Ok(provider) => provider,
            Err(e) => {
                tracing::error!(
                    provider = config.display_name(),
                    provider_id = %config.provider_id,
                    error = %e,
                    "Provider misconfigured, skipping"
                );
                outcome.state = ProviderRuntimeState::Failed;
                outcome.errors.push(e.to_string());
                return outcome;
            }
        };

        if let Some(plugin) = self.registry.get_plugin(&config.provider_id) {
            tracing::debug!(
                provider = config.display_name(),
                credentials = %plugin.redact_credentials(&config.credentials),
                recipients = config.recipients.len(),
                "Initializing provider"
            );
        }

        if let Err(e) = self.initialize(provider.as_mut(), config).await {
            tracing::error!(provider = config.display_name(), error = %e, "Provider initialization failed");
            outcome.state = ProviderRuntimeState::Failed;
            outcome.errors.push(e.to_string());
            return outcome;
        }
        outcome.state = ProviderRuntimeState::Ready;

        let alert = OutgoingAlert {
            content,
            recipients: &config.recipients,
            sender: config.sender.as_ref(),
        };
        outcome.state = ProviderRuntimeState::Sending;
        match provider.send(&alert).await {
            Ok(()) => {
                tracing::info!(
                    provider = config.display_name(),
                    recipients = config.recipients.len(),
                    "Notification sent"
                );
                outcome.delivered = true;
            }
            Err(e) => {
                tracing::error!(
                    provider = config.display_name(),
                    recipients = config.recipients.len(),
                    error = %e,
                    "Notification delivery failed"
                );
                outcome.errors.push(e.to_string());
            }
        }

        if let Err(e) = provider.shutdown().await {
            tracing::warn!(provider = config.display_name(), error = %e, "Provider shutdown failed");
            outcome.errors.push(e.to_string());
        }
        outcome.state = ProviderRuntimeState::Disconnected;
        outcome
    }

    async fn initialize(
        &self,
        provider: &mut dyn NotificationProvider,
        config: &ProviderConfig,
    ) -> crate::error::Result<()> {
        let init = provider.initialize(&config.credentials);
        match self.init_timeout {
            Some(limit) => tokio::time::timeout(limit, init)
                .await
                .unwrap_or_else(|_| {
                    Err(NotifyError::Timeout {
                        provider: config.display_name().to_string(),
                        stage: "initialize",
                        after: limit,
                    })
                }),
            None => init.await,
        }
    }
}
