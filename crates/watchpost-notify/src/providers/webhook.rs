use crate::error::{NotifyError, Result};
use crate::plugin::ProviderPlugin;
use crate::utils::{http_client, parse_credentials, send_with_retry};
use crate::{NotificationProvider, OutgoingAlert};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use watchpost_common::types::ProviderConfig;

#[derive(Debug, Default, Deserialize)]
struct WebhookCredentials {
    bearer_token: Option<String>,
}

/// POSTs the structured alert as JSON to each recipient `url`.
#[derive(Default)]
pub struct WebhookProvider {
    client: Option<reqwest::Client>,
    bearer_token: Option<String>,
}

impl WebhookProvider {
    pub fn render_body(alert: &OutgoingAlert<'_>) -> Value {
        serde_json::json!({
            "subject": alert.subject(),
            "text": alert.text_body(),
            "html": alert.structured_body(),
            "alerts": alert.content.items,
        })
    }
}

#[async_trait]
impl NotificationProvider for WebhookProvider {
    fn provider_id(&self) -> &str {
        "webhook"
    }

    async fn initialize(&mut self, credentials: &Value) -> Result<()> {
        let creds: WebhookCredentials = if credentials.is_null() {
            WebhookCredentials::default()
        } else {
            parse_credentials("webhook", credentials)?
        };
        self.bearer_token = creds.bearer_token;
        self.client = Some(http_client()?);
        Ok(())
    }

    async fn send(&mut self, alert: &OutgoingAlert<'_>) -> Result<()> {
        let client = self.client.as_ref().ok_or_else(|| NotifyError::Delivery {
            provider: "webhook".to_string(),
            reason: "send called before initialize".to_string(),
        })?;
        let body = Self::render_body(alert);
        let mut last_err = None;

        for recipient in alert.recipients {
            let Some(url) = recipient.url.as_deref() else {
                tracing::warn!(recipient = recipient.address(), "Webhook recipient has no url, skipping");
                continue;
            };
            let result = send_with_retry("webhook", || {
                let req = client.post(url).json(&body);
                match &self.bearer_token {
                    Some(token) => req.bearer_auth(token),
                    None => req,
                }
            })
            .await;
            match result {
                Ok(_) => tracing::info!(url, "Webhook delivered"),
                Err(e) => {
                    tracing::error!(url, error = %e, "Webhook failed after retries");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }
}

pub struct WebhookPlugin;

impl ProviderPlugin for WebhookPlugin {
    fn name(&self) -> &str {
        "webhook"
    }

    fn recipient_type(&self) -> &str {
        "url"
    }

    fn validate_credentials(&self, credentials: &Value) -> anyhow::Result<()> {
        if !credentials.is_null() {
            serde_json::from_value::<WebhookCredentials>(credentials.clone())
                .map_err(|e| anyhow::anyhow!("Invalid webhook credentials: {e}"))?;
        }
        Ok(())
    }

    fn create_provider(&self, _config: &ProviderConfig) -> Box<dyn NotificationProvider> {
        Box::new(WebhookProvider::default())
    }
}
