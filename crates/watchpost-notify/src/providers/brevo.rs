use crate::error::{NotifyError, Result};
use crate::plugin::ProviderPlugin;
use crate::utils::{http_client, parse_credentials, send_with_retry};
use crate::{NotificationProvider, OutgoingAlert};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use watchpost_common::types::{Contact, ProviderConfig};

const SEND_URL: &str = "https://api.brevo.com/v3/smtp/email";

#[derive(Deserialize)]
struct BrevoCredentials {
    #[serde(alias = "key")]
    api_key: String,
}

/// Transactional email through the Brevo HTTP API. Stateless: no session
/// is held between `initialize` and `shutdown`.
#[derive(Default)]
pub struct BrevoProvider {
    client: Option<reqwest::Client>,
    api_key: String,
}

fn mailbox(contact: &Contact) -> Option<Value> {
    let email = contact.email.as_deref()?;
    let mut entry = serde_json::json!({ "email": email });
    if let Some(name) = &contact.name {
        entry["name"] = Value::String(name.clone());
    }
    Some(entry)
}

impl BrevoProvider {
    pub fn render_request(alert: &OutgoingAlert<'_>) -> Result<Value> {
        let sender = alert.sender.and_then(mailbox).ok_or_else(|| {
            NotifyError::InvalidConfig("brevo requires a sender with an email".to_string())
        })?;
        let to: Vec<Value> = alert.recipients.iter().filter_map(mailbox).collect();
        if to.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "brevo requires at least one recipient with an email".to_string(),
            ));
        }
        Ok(serde_json::json!({
            "sender": sender,
            "to": to,
            "subject": alert.subject(),
            "htmlContent": alert.structured_body(),
            "textContent": alert.text_body(),
        }))
    }
}

#[async_trait]
impl NotificationProvider for BrevoProvider {
    fn provider_id(&self) -> &str {
        "brevo"
    }

    async fn initialize(&mut self, credentials: &Value) -> Result<()> {
        let creds: BrevoCredentials = parse_credentials("brevo", credentials)?;
        self.api_key = creds.api_key;
        self.client = Some(http_client()?);
        Ok(())
    }

    async fn send(&mut self, alert: &OutgoingAlert<'_>) -> Result<()> {
        let client = self.client.as_ref().ok_or_else(|| NotifyError::Delivery {
            provider: "brevo".to_string(),
            reason: "send called before initialize".to_string(),
        })?;
        let body = Self::render_request(alert)?;
        let response = send_with_retry("brevo", || {
            client
                .post(SEND_URL)
                .header("api-key", &self.api_key)
                .header("accept", "application/json")
                .json(&body)
        })
        .await?;
        tracing::info!(response = %response, "Brevo email accepted");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }
}

pub struct BrevoPlugin;

impl ProviderPlugin for BrevoPlugin {
    fn name(&self) -> &str {
        "brevo"
    }

    fn recipient_type(&self) -> &str {
        "email"
    }

    fn validate_credentials(&self, credentials: &Value) -> anyhow::Result<()> {
        serde_json::from_value::<BrevoCredentials>(credentials.clone())
            .map_err(|e| anyhow::anyhow!("Invalid brevo credentials: {e}"))?;
        Ok(())
    }

    fn create_provider(&self, _config: &ProviderConfig) -> Box<dyn NotificationProvider> {
        Box::new(BrevoProvider::default())
    }
}
