use crate::error::{NotifyError, Result};
use crate::utils::redact_sensitive_json;
use crate::NotificationProvider;
use serde_json::Value;
use std::collections::HashMap;
use watchpost_common::types::ProviderConfig;

/// Factory for [`NotificationProvider`] instances.
///
/// Each plugin is registered in the [`ProviderRegistry`] under its
/// `name()`, which is what a [`ProviderConfig::provider_id`] refers to.
pub trait ProviderPlugin: Send + Sync {
    /// Returns the provider identifier (e.g., `"smtp"`, `"logfile"`).
    fn name(&self) -> &str;

    /// Describes which [`watchpost_common::types::Contact`] field this
    /// provider delivers to (e.g., `"email"`, `"phone_number"`).
    fn recipient_type(&self) -> &str;

    /// Validates the credentials blob against this plugin's expected schema.
    fn validate_credentials(&self, credentials: &Value) -> anyhow::Result<()>;

    /// Creates a fresh, uninitialized provider for one dispatch.
    fn create_provider(&self, config: &ProviderConfig) -> Box<dyn NotificationProvider>;

    /// Returns a copy of `credentials` safe to log.
    fn redact_credentials(&self, credentials: &Value) -> Value {
        redact_sensitive_json(credentials)
    }
}

/// Static mapping from provider identifier to implementation, resolved at
/// startup.
///
/// # Examples
///
/// ```
/// use watchpost_notify::plugin::ProviderRegistry;
///
/// let registry = ProviderRegistry::default();
/// assert!(registry.has_plugin("smtp"));
/// assert!(registry.has_plugin("logfile"));
/// assert!(!registry.has_plugin("carrier-pigeon"));
/// ```
pub struct ProviderRegistry {
    plugins: HashMap<String, Box<dyn ProviderPlugin>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn ProviderPlugin>) {
        let name = plugin.name().to_string();
        self.plugins.insert(name, plugin);
    }

    /// Validates `config` and creates its provider.
    ///
    /// # Errors
    ///
    /// [`NotifyError::UnknownProvider`] when no plugin is registered under
    /// `config.provider_id`, [`NotifyError::InvalidConfig`] when the
    /// credentials do not validate.
    pub fn create_provider(&self, config: &ProviderConfig) -> Result<Box<dyn NotificationProvider>> {
        let plugin = self
            .plugins
            .get(&config.provider_id)
            .ok_or_else(|| NotifyError::UnknownProvider(config.provider_id.clone()))?;
        plugin
            .validate_credentials(&config.credentials)
            .map_err(|e| NotifyError::InvalidConfig(format!("{}: {e:#}", config.display_name())))?;
        Ok(plugin.create_provider(config))
    }

    pub fn get_plugin(&self, name: &str) -> Option<&dyn ProviderPlugin> {
        self.plugins.get(name).map(|p| p.as_ref())
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::providers::logfile::LogFilePlugin));
        registry.register(Box::new(crate::providers::webhook::WebhookPlugin));
        registry.register(Box::new(crate::providers::smtp::SmtpPlugin));
        registry.register(Box::new(crate::providers::brevo::BrevoPlugin));
        registry.register(Box::new(crate::providers::mailjet::MailjetPlugin));
        registry.register(Box::new(crate::providers::twilio::TwilioWhatsAppPlugin));
        registry
    }
}
