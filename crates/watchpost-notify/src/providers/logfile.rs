use crate::error::{NotifyError, Result};
use crate::plugin::ProviderPlugin;
use crate::{NotificationProvider, OutgoingAlert};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use watchpost_common::types::ProviderConfig;

const RULE: &str = "--------------------------------------------------";

/// Appends each alert to the files named by the recipients' `filename`.
#[derive(Default)]
pub struct LogFileProvider;

impl LogFileProvider {
    pub fn format_entry(alert: &OutgoingAlert<'_>) -> String {
        format!(
            "\n{RULE}\n{time}\nSubject: {subject}\nContent: {text}\n{RULE}\n",
            time = Utc::now().to_rfc3339(),
            subject = alert.subject(),
            text = alert.text_body(),
        )
    }

    fn resolve(filename: &str) -> Result<PathBuf> {
        let path = PathBuf::from(filename);
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(std::env::current_dir()?.join(path))
        }
    }

    async fn append(path: &PathBuf, entry: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationProvider for LogFileProvider {
    fn provider_id(&self) -> &str {
        "logfile"
    }

    async fn initialize(&mut self, _credentials: &Value) -> Result<()> {
        Ok(())
    }

    async fn send(&mut self, alert: &OutgoingAlert<'_>) -> Result<()> {
        let entry = Self::format_entry(alert);
        let mut failed = Vec::new();

        for recipient in alert.recipients {
            let Some(filename) = recipient.filename.as_deref() else {
                tracing::warn!(recipient = recipient.address(), "Log file recipient has no filename, skipping");
                continue;
            };
            let result = match Self::resolve(filename) {
                Ok(path) => {
                    tracing::debug!(path = %path.display(), "Writing notification to log file");
                    Self::append(&path, &entry).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::error!(filename, error = %e, "Failed to write notification");
                failed.push(format!("{filename}: {e}"));
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Delivery {
                provider: "logfile".to_string(),
                reason: failed.join("; "),
            })
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct LogFilePlugin;

impl ProviderPlugin for LogFilePlugin {
    fn name(&self) -> &str {
        "logfile"
    }

    fn recipient_type(&self) -> &str {
        "filename"
    }

    fn validate_credentials(&self, _credentials: &Value) -> anyhow::Result<()> {
        Ok(())
    }

    fn create_provider(&self, _config: &ProviderConfig) -> Box<dyn NotificationProvider> {
        Box::new(LogFileProvider)
    }
}
