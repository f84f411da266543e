use crate::error::{NotifyError, Result};
use crate::plugin::ProviderPlugin;
use crate::utils::{http_client, parse_credentials, send_with_retry};
use crate::{NotificationProvider, OutgoingAlert};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use watchpost_common::types::{Contact, ProviderConfig};

const SEND_URL: &str = "https://api.mailjet.com/v3.1/send";

#[derive(Deserialize)]
struct MailjetCredentials {
    #[serde(alias = "key")]
    api_key: String,
    #[serde(alias = "secret")]
    api_secret: String,
}

/// Email through the Mailjet v3.1 send API.
#[derive(Default)]
pub struct MailjetProvider {
    client: Option<reqwest::Client>,
    credentials: Option<MailjetCredentials>,
}

fn mailbox(contact: &Contact) -> Option<Value> {
    let email = contact.email.as_deref()?;
    let mut entry = serde_json::json!({ "Email": email });
    if let Some(name) = &contact.name {
        entry["Name"] = Value::String(name.clone());
    }
    Some(entry)
}

impl MailjetProvider {
    pub fn render_request(alert: &OutgoingAlert<'_>) -> Result<Value> {
        let from = alert.sender.and_then(mailbox).ok_or_else(|| {
            NotifyError::InvalidConfig("mailjet requires a sender with an email".to_string())
        })?;
        let to: Vec<Value> = alert.recipients.iter().filter_map(mailbox).collect();
        if to.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "mailjet requires at least one recipient with an email".to_string(),
            ));
        }
        Ok(serde_json::json!({
            "Messages": [{
                "From": from,
                "To": to,
                "Subject": alert.subject(),
                "TextPart": alert.text_body(),
                "HTMLPart": alert.structured_body(),
            }]
        }))
    }
}

#[async_trait]
impl NotificationProvider for MailjetProvider {
    fn provider_id(&self) -> &str {
        "mailjet"
    }

    async fn initialize(&mut self, credentials: &Value) -> Result<()> {
        self.credentials = Some(parse_credentials("mailjet", credentials)?);
        self.client = Some(http_client()?);
        Ok(())
    }

    async fn send(&mut self, alert: &OutgoingAlert<'_>) -> Result<()> {
        let (Some(client), Some(creds)) = (&self.client, &self.credentials) else {
            return Err(NotifyError::Delivery {
                provider: "mailjet".to_string(),
                reason: "send called before initialize".to_string(),
            });
        };
        let body = Self::render_request(alert)?;
        let response = send_with_retry("mailjet", || {
            client
                .post(SEND_URL)
                .basic_auth(&creds.api_key, Some(&creds.api_secret))
                .json(&body)
        })
        .await?;
        tracing::info!(response = %response, "Mailjet email accepted");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.client = None;
        self.credentials = None;
        Ok(())
    }
}

pub struct MailjetPlugin;

impl ProviderPlugin for MailjetPlugin {
    fn name(&self) -> &str {
        "mailjet"
    }

    fn recipient_type(&self) -> &str {
        "email"
    }

    fn validate_credentials(&self, credentials: &Value) -> anyhow::Result<()> {
        serde_json::from_value::<MailjetCredentials>(credentials.clone())
            .map_err(|e| anyhow::anyhow!("Invalid mailjet credentials: {e}"))?;
        Ok(())
    }

    fn create_provider(&self, _config: &ProviderConfig) -> Box<dyn NotificationProvider> {
        Box::new(MailjetProvider::default())
    }
}
