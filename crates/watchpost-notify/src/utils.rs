//! Helpers shared by the built-in providers.

use crate::error::{NotifyError, Result};
use serde_json::Value;
use std::time::Duration;

/// Maximum length of a remote response body quoted in errors and logs.
pub const MAX_BODY_LENGTH: usize = 2000;

/// Request timeout applied by every HTTP-based provider.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const SEND_ATTEMPTS: u32 = 3;

/// Truncate a string to at most `max_len` bytes on a char boundary.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

/// Redact sensitive fields from JSON credentials.
///
/// Replaces values of keys that look like secrets (password, token,
/// secret, api key, sid) with `"***"`, recursing into nested values.
pub fn redact_sensitive_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, val) in map {
                let key_lower = key.to_lowercase();
                let is_sensitive = key_lower.contains("password")
                    || key_lower.contains("passwd")
                    || key_lower.contains("token")
                    || key_lower.contains("secret")
                    || key_lower.contains("api_key")
                    || key_lower.contains("apikey")
                    || key_lower == "key"
                    || key_lower.contains("sid");

                if is_sensitive {
                    redacted.insert(key.clone(), Value::String("***".to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_json(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(redact_sensitive_json).collect()),
        _ => value.clone(),
    }
}

/// Parses typed credentials out of the configuration blob.
pub fn parse_credentials<T: serde::de::DeserializeOwned>(provider: &str, credentials: &Value) -> Result<T> {
    serde_json::from_value(credentials.clone())
        .map_err(|e| NotifyError::InvalidConfig(format!("invalid {provider} credentials: {e}")))
}

pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

/// Sends an HTTP request up to three times with exponential backoff and
/// returns the response body of the first 2xx reply.
///
/// `build` is called once per attempt since request builders are not
/// reusable.
pub async fn send_with_retry<F>(service: &str, build: F) -> Result<String>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;
    for attempt in 0..SEND_ATTEMPTS {
        match build().send().await {
            Ok(resp) => {
                let status = resp.status();
                let body = resp
                    .text()
                    .await
                    .unwrap_or_else(|e| format!("[failed to read response body: {e}]"));
                if status.is_success() {
                    return Ok(body);
                }
                tracing::warn!(
                    service,
                    attempt = attempt + 1,
                    status = %status,
                    "Remote API returned non-success status, retrying"
                );
                last_err = Some(NotifyError::Api {
                    service: service.to_string(),
                    status: status.as_u16(),
                    body: truncate_string(&body, MAX_BODY_LENGTH),
                });
            }
            Err(e) => {
                tracing::warn!(
                    service,
                    attempt = attempt + 1,
                    error = %e,
                    "Remote API request failed, retrying"
                );
                last_err = Some(e.into());
            }
        }
        if attempt + 1 < SEND_ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
        }
    }
    Err(last_err.unwrap_or_else(|| NotifyError::Delivery {
        provider: service.to_string(),
        reason: "no attempt was made".to_string(),
    }))
}
