//! Notification delivery with pluggable providers.
//!
//! A dispatch renders the cycle's alerts once and hands them to every
//! enabled [`NotificationProvider`], each driven through
//! `initialize → send → shutdown` by the [`router::NotificationRouter`].
//! Providers are resolved from configuration through the static
//! [`plugin::ProviderRegistry`]. Built-in providers are log file, webhook,
//! SMTP, Brevo, Mailjet and Twilio WhatsApp.

pub mod error;
pub mod lifecycle;
pub mod plugin;
pub mod providers;
pub mod router;
pub mod utils;


use async_trait::async_trait;
use error::Result;
use serde_json::Value;
use watchpost_common::payload::AlertContent;
use watchpost_common::types::Contact;

/// One delivery request: the shared rendered content addressed with one
/// provider's recipients and sender.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingAlert<'a> {
    pub content: &'a AlertContent,
    pub recipients: &'a [Contact],
    pub sender: Option<&'a Contact>,
}

impl<'a> OutgoingAlert<'a> {
    pub fn subject(&self) -> &'a str {
        &self.content.subject
    }

    pub fn text_body(&self) -> &'a str {
        &self.content.text_body
    }

    pub fn structured_body(&self) -> &'a str {
        &self.content.structured_body
    }
}

/// A delivery channel (email API, messaging gateway, log file, ...).
///
/// A fresh instance is created for every dispatch and owned exclusively by
/// the router for that run, so implementations keep their client handles
/// as plain fields.
#[async_trait]
pub trait NotificationProvider: Send {
    /// Registry key of this provider (e.g. `"smtp"`).
    fn provider_id(&self) -> &str;

    /// Prepares the channel with the configured credentials. May wait for
    /// the remote side to become ready.
    ///
    /// # Errors
    ///
    /// An error means the provider is not used this dispatch.
    async fn initialize(&mut self, credentials: &Value) -> Result<()>;

    /// Delivers the alert to the recipients.
    async fn send(&mut self, alert: &OutgoingAlert<'_>) -> Result<()>;

    /// Releases whatever `initialize` acquired.
    async fn shutdown(&mut self) -> Result<()>;
}
