use crate::error::{NotifyError, Result};
use crate::plugin::ProviderPlugin;
use crate::utils::{http_client, parse_credentials, send_with_retry};
use crate::{NotificationProvider, OutgoingAlert};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use watchpost_common::types::ProviderConfig;

const API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[derive(Deserialize)]
struct TwilioCredentials {
    #[serde(alias = "sid")]
    account_sid: String,
    #[serde(alias = "token")]
    auth_token: String,
}

/// WhatsApp messages through the Twilio Messages API, one request per
/// recipient phone number.
#[derive(Default)]
pub struct TwilioWhatsAppProvider {
    client: Option<reqwest::Client>,
    credentials: Option<TwilioCredentials>,
}

/// `whatsapp:` address with a leading `+` on the number.
pub fn whatsapp_address(number: &str) -> String {
    let number = number.trim();
    if number.starts_with('+') {
        format!("whatsapp:{number}")
    } else {
        format!("whatsapp:+{number}")
    }
}

#[async_trait]
impl NotificationProvider for TwilioWhatsAppProvider {
    fn provider_id(&self) -> &str {
        "twilio_whatsapp"
    }

    async fn initialize(&mut self, credentials: &Value) -> Result<()> {
        self.credentials = Some(parse_credentials("twilio_whatsapp", credentials)?);
        self.client = Some(http_client()?);
        Ok(())
    }

    async fn send(&mut self, alert: &OutgoingAlert<'_>) -> Result<()> {
        let (Some(client), Some(creds)) = (&self.client, &self.credentials) else {
            return Err(NotifyError::Delivery {
                provider: "twilio_whatsapp".to_string(),
                reason: "send called before initialize".to_string(),
            });
        };
        let from = alert
            .sender
            .and_then(|s| s.phone_number.as_deref())
            .map(whatsapp_address)
            .ok_or_else(|| {
                NotifyError::InvalidConfig(
                    "twilio_whatsapp requires a sender with a phone_number".to_string(),
                )
            })?;
        let url = format!("{API_BASE}/Accounts/{}/Messages.json", creds.account_sid);
        let mut failed = Vec::new();

        for recipient in alert.recipients {
            let Some(phone) = recipient.phone_number.as_deref() else {
                tracing::warn!(recipient = recipient.address(), "WhatsApp recipient has no phone_number, skipping");
                continue;
            };
            let form = [
                ("From", from.clone()),
                ("To", whatsapp_address(phone)),
                ("Body", alert.text_body().to_string()),
            ];
            let result = send_with_retry("twilio", || {
                client
                    .post(&url)
                    .basic_auth(&creds.account_sid, Some(&creds.auth_token))
                    .form(&form)
            })
            .await;
            match result {
                Ok(_) => tracing::info!(phone, "WhatsApp message accepted"),
                Err(e) => {
                    tracing::error!(phone, error = %e, "WhatsApp message failed");
                    failed.push(format!("{phone}: {e}"));
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Delivery {
                provider: "twilio_whatsapp".to_string(),
                reason: failed.join("; "),
            })
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.client = None;
        self.credentials = None;
        Ok(())
    }
}

pub struct TwilioWhatsAppPlugin;

impl ProviderPlugin for TwilioWhatsAppPlugin {
    fn name(&self) -> &str {
        "twilio_whatsapp"
    }

    fn recipient_type(&self) -> &str {
        "phone_number"
    }

    fn validate_credentials(&self, credentials: &Value) -> anyhow::Result<()> {
        serde_json::from_value::<TwilioCredentials>(credentials.clone())
            .map_err(|e| anyhow::anyhow!("Invalid twilio_whatsapp credentials: {e}"))?;
        Ok(())
    }

    fn create_provider(&self, _config: &ProviderConfig) -> Box<dyn NotificationProvider> {
        Box::new(TwilioWhatsAppProvider::default())
    }
}
