use std::path::PathBuf;

/// Errors raised while scanning rules or maintaining the cooldown ledger.
///
/// Only ledger read failures and observer session failures abort a cycle;
/// the rest are confined to one rule.
///
/// # Examples
///
/// ```rust
/// use watchpost_alert::error::AlertError;
///
/// let err = AlertError::Configuration("unsupported operator in '>>1'".to_string());
/// assert!(err.to_string().contains(">>1"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// A rule is malformed (bad success condition, negative cooldown).
    #[error("Alert: invalid rule configuration: {0}")]
    Configuration(String),

    /// The observer could not produce a count for one rule.
    #[error("Alert: observation failed for {url}: {reason}")]
    Observation { url: String, reason: String },

    /// The ledger file exists but could not be read.
    #[error("Alert: failed to read cooldown ledger {}: {source}", path.display())]
    LedgerRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The ledger file was read but is not a fingerprint-to-millis map.
    #[error("Alert: cooldown ledger {} is corrupt: {source}", path.display())]
    LedgerCorrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Persisting the ledger failed. The in-memory entry is kept.
    #[error("Alert: failed to write cooldown ledger {}: {source}", path.display())]
    LedgerWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No observer session could be acquired for the cycle.
    #[error("Alert: observer session unavailable: {0}")]
    ObserverSession(String),
}

/// Convenience `Result` alias for scan operations.
pub type Result<T> = std::result::Result<T, AlertError>;
