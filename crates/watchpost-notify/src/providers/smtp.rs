use crate::error::{NotifyError, Result};
use crate::lifecycle::{ConnectSignal, RetryPolicy, SessionConnector, SessionLifecycle};
use crate::plugin::ProviderPlugin;
use crate::utils::parse_credentials;
use crate::{NotificationProvider, OutgoingAlert};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use watchpost_common::types::{Contact, ProviderConfig};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Implicit TLS, usually port 465.
    Tls,
    /// Upgrade with STARTTLS, usually port 587.
    #[default]
    Starttls,
    /// Plain text. Local relays only.
    None,
}

#[derive(Debug, Clone, Deserialize)]
struct SmtpCredentials {
    host: String,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    #[serde(default)]
    security: SmtpSecurity,
}

/// Opens the SMTP connection and probes it with `NOOP`.
struct SmtpConnector {
    credentials: SmtpCredentials,
}

impl SmtpConnector {
    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let creds = &self.credentials;
        let mut builder = match creds.security {
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&creds.host),
            SmtpSecurity::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&creds.host)
            }
            SmtpSecurity::None => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &creds.host,
            )),
        }
        .map_err(|e| NotifyError::Smtp(e.to_string()))?
        .timeout(Some(SMTP_TIMEOUT));

        if let Some(port) = creds.port {
            builder = builder.port(port);
        }
        if let (Some(user), Some(pass)) = (&creds.username, &creds.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl SessionConnector for SmtpConnector {
    type Session = AsyncSmtpTransport<Tokio1Executor>;

    async fn connect(&mut self) -> ConnectSignal<Self::Session> {
        let transport = match self.build_transport() {
            Ok(transport) => transport,
            Err(e) => return ConnectSignal::Fatal(e.to_string()),
        };
        match transport.test_connection().await {
            Ok(true) => ConnectSignal::Ready(transport),
            Ok(false) => ConnectSignal::Retryable("server did not accept NOOP".to_string()),
            // 5xx replies (e.g. authentication rejected) will not improve on retry.
            Err(e) if e.is_permanent() => ConnectSignal::Fatal(e.to_string()),
            Err(e) => ConnectSignal::Retryable(e.to_string()),
        }
    }

    async fn disconnect(&mut self, session: Self::Session) -> Result<()> {
        drop(session);
        Ok(())
    }
}

/// SMTP email delivered over a session held for the whole dispatch.
pub struct SmtpProvider {
    policy: RetryPolicy,
    lifecycle: Option<SessionLifecycle<SmtpConnector>>,
}

impl SmtpProvider {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            lifecycle: None,
        }
    }

    fn to_mailbox(contact: &Contact) -> Result<Option<Mailbox>> {
        let Some(email) = contact.email.as_deref() else {
            return Ok(None);
        };
        let address = email
            .parse()
            .map_err(|e| NotifyError::InvalidConfig(format!("invalid email '{email}': {e}")))?;
        Ok(Some(Mailbox::new(contact.name.clone(), address)))
    }

    pub fn build_message(alert: &OutgoingAlert<'_>) -> Result<Message> {
        let from = alert
            .sender
            .map(Self::to_mailbox)
            .transpose()?
            .flatten()
            .ok_or_else(|| {
                NotifyError::InvalidConfig("smtp requires a sender with an email".to_string())
            })?;

        let mut builder = Message::builder().from(from).subject(alert.subject());
        let mut has_recipient = false;
        for recipient in alert.recipients {
            if let Some(mailbox) = Self::to_mailbox(recipient)? {
                builder = builder.to(mailbox);
                has_recipient = true;
            }
        }
        if !has_recipient {
            return Err(NotifyError::InvalidConfig(
                "smtp requires at least one recipient with an email".to_string(),
            ));
        }

        builder
            .multipart(MultiPart::alternative_plain_html(
                alert.text_body().to_string(),
                alert.structured_body().to_string(),
            ))
            .map_err(|e| NotifyError::Smtp(e.to_string()))
    }
}

#[async_trait]
impl NotificationProvider for SmtpProvider {
    fn provider_id(&self) -> &str {
        "smtp"
    }

    async fn initialize(&mut self, credentials: &Value) -> Result<()> {
        let credentials: SmtpCredentials = parse_credentials("smtp", credentials)?;
        let lifecycle = self.lifecycle.insert(SessionLifecycle::new(
            "smtp",
            SmtpConnector { credentials },
            self.policy.clone(),
        ));
        lifecycle.initialize().await
    }

    async fn send(&mut self, alert: &OutgoingAlert<'_>) -> Result<()> {
        let email = Self::build_message(alert)?;
        let lifecycle = self.lifecycle.as_mut().ok_or_else(|| NotifyError::Delivery {
            provider: "smtp".to_string(),
            reason: "send called before initialize".to_string(),
        })?;
        let transport = lifecycle.session_mut()?;

        let mut last_err = None;
        for attempt in 0..3u32 {
            match transport.send(email.clone()).await {
                Ok(_) => {
                    tracing::info!(recipients = alert.recipients.len(), "SMTP email sent");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "SMTP send failed, retrying");
                    let permanent = e.is_permanent();
                    last_err = Some(e);
                    if permanent {
                        break;
                    }
                    if attempt < 2 {
                        tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
                    }
                }
            }
        }

        Err(NotifyError::Smtp(
            last_err.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    async fn shutdown(&mut self) -> Result<()> {
        match self.lifecycle.as_mut() {
            Some(lifecycle) => lifecycle.shutdown().await,
            None => Ok(()),
        }
    }
}

pub struct SmtpPlugin;

impl ProviderPlugin for SmtpPlugin {
    fn name(&self) -> &str {
        "smtp"
    }

    fn recipient_type(&self) -> &str {
        "email"
    }

    fn validate_credentials(&self, credentials: &Value) -> anyhow::Result<()> {
        let creds: SmtpCredentials = serde_json::from_value(credentials.clone())
            .map_err(|e| anyhow::anyhow!("Invalid smtp credentials: {e}"))?;
        if creds.username.is_some() != creds.password.is_some() {
            anyhow::bail!("Invalid smtp credentials: username and password must be set together");
        }
        Ok(())
    }

    fn create_provider(&self, config: &ProviderConfig) -> Box<dyn NotificationProvider> {
        let policy = match config.max_connect_attempts {
            Some(max) => RetryPolicy::with_max_attempts(Some(max)),
            None => RetryPolicy::default(),
        };
        Box::new(SmtpProvider::new(policy))
    }
}
