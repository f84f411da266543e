use crate::fingerprint::{self, Fingerprint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_enabled() -> bool {
    true
}

/// A monitored condition: "the resource at `url` has a `selector` match
/// count satisfying `success_condition`".
///
/// Field aliases accept the camelCase names used by older JSON rule files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub url: String,
    /// Content-extraction expression, passed to the observer untouched.
    #[serde(alias = "xpath")]
    pub selector: String,
    /// Comparison clause against the observed count, e.g. `">0"`.
    #[serde(alias = "successCondition")]
    pub success_condition: String,
    #[serde(alias = "cooldownHours", alias = "refactoryPeriod_hour")]
    pub cooldown_hours: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Rule {
    /// Stable identity of this rule, see [`fingerprint::fingerprint`].
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint::fingerprint(self)
    }

    /// Cooldown length in milliseconds, or `None` when `cooldown_hours`
    /// is negative or not a finite number.
    pub fn cooldown_millis(&self) -> Option<i64> {
        if !self.cooldown_hours.is_finite() || self.cooldown_hours < 0.0 {
            return None;
        }
        Some((self.cooldown_hours * 3_600_000.0).round() as i64)
    }
}

/// One rule that evaluated true and passed the cooldown check in a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertItem {
    pub fingerprint: Fingerprint,
    pub url: String,
    pub selector: String,
    pub success_condition: String,
    /// Match count reported by the observer.
    pub observed: i64,
    pub detected_at: DateTime<Utc>,
}

impl AlertItem {
    pub fn new(rule: &Rule, fingerprint: Fingerprint, observed: i64, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            url: rule.url.clone(),
            selector: rule.selector.clone(),
            success_condition: rule.success_condition.clone(),
            observed,
            detected_at: now,
        }
    }

    /// Short human label: the last non-empty path segment of the URL.
    ///
    /// ```
    /// use watchpost_common::types::{AlertItem, Rule};
    ///
    /// let rule = Rule {
    ///     url: "https://shop.example.com/products/blue-kettle/".into(),
    ///     selector: "//button".into(),
    ///     success_condition: ">0".into(),
    ///     cooldown_hours: 1.0,
    ///     enabled: true,
    /// };
    /// let item = AlertItem::new(&rule, rule.fingerprint(), 1, chrono::Utc::now());
    /// assert_eq!(item.label(), "blue-kettle");
    /// ```
    pub fn label(&self) -> &str {
        self.url
            .split('/')
            .filter(|s| !s.is_empty())
            .last()
            .unwrap_or(&self.url)
    }
}

/// An addressable party of a provider: an email mailbox, a phone number,
/// a log file or an HTTP endpoint depending on the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default, alias = "Email", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, alias = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, alias = "phoneNumber", skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Contact {
    /// Whichever address field is set, for log lines.
    pub fn address(&self) -> &str {
        self.email
            .as_deref()
            .or(self.phone_number.as_deref())
            .or(self.filename.as_deref())
            .or(self.url.as_deref())
            .unwrap_or("-")
    }
}

/// Configuration of one delivery provider instance. Loaded once and never
/// mutated by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry key selecting the implementation (e.g. `"smtp"`).
    #[serde(alias = "providerId")]
    pub provider_id: String,
    /// Optional instance label, distinguishes two instances of one provider in logs.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub recipients: Vec<Contact>,
    #[serde(default)]
    pub sender: Option<Contact>,
    /// Provider-specific secrets, validated by the provider plugin.
    #[serde(default)]
    pub credentials: serde_json::Value,
    /// Connection attempts allowed to session-holding providers.
    #[serde(default, alias = "maxConnectAttempts")]
    pub max_connect_attempts: Option<u32>,
}

impl ProviderConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.provider_id)
    }
}
