use std::time::Duration;

/// Errors that can occur within the notification subsystem.
///
/// Every variant is confined to the provider that raised it; the router
/// logs it and moves on to the next provider.
///
/// # Examples
///
/// ```rust
/// use watchpost_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("missing api_key".to_string());
/// assert!(err.to_string().contains("api_key"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Provider configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid provider configuration: {0}")]
    InvalidConfig(String),

    /// The provider id is not registered in the plugin registry.
    #[error("Notify: unknown provider '{0}'")]
    UnknownProvider(String),

    /// A session-holding provider could not reach the ready state.
    #[error("Notify: {provider} lifecycle failed: {reason}")]
    Lifecycle { provider: String, reason: String },

    /// The provider was initialized but delivery did not go through.
    #[error("Notify: {provider} delivery failed: {reason}")]
    Delivery { provider: String, reason: String },

    /// A provider stage exceeded its time bound.
    #[error("Notify: {provider} {stage} timed out after {after:?}")]
    Timeout {
        provider: String,
        stage: &'static str,
        after: Duration,
    },

    /// An HTTP request to an external notification endpoint failed.
    #[error("Notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The external API returned a non-success response.
    #[error("Notify: API error from {service}: status={status}, body={body}")]
    Api {
        service: String,
        status: u16,
        body: String,
    },

    /// SMTP transport or message building error.
    #[error("Notify: SMTP error: {0}")]
    Smtp(String),

    #[error("Notify: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("Notify: JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
