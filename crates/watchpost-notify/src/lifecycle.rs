//! Connection lifecycle shared by providers that hold a persistent session.
//!
//! ```text
//! Uninitialized ──initialize──▶ Connecting ──Ready──▶ Ready ──shutdown──▶ Closed
//!                                 │  ▲
//!                       Retryable └──┘   Fatal / retries exhausted ──▶ Failed
//! ```
//!
//! A provider only supplies a [`SessionConnector`] that reports each
//! connection attempt as one of three signals; retry pacing, logging and
//! terminal failure are handled here so every session-holding provider
//! fails the same way from the router's point of view.

use crate::error::{NotifyError, Result};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Connecting,
    Ready,
    Closed,
    Failed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one connection attempt.
pub enum ConnectSignal<S> {
    /// Connected and authorized; the session is usable.
    Ready(S),
    /// Transient loss (network blip, server busy). Another attempt may succeed.
    Retryable(String),
    /// Non-recoverable (credentials revoked, logged out).
    Fatal(String),
}

/// Channel-specific connection logic plugged into [`SessionLifecycle`].
#[async_trait]
pub trait SessionConnector: Send {
    type Session: Send;

    async fn connect(&mut self) -> ConnectSignal<Self::Session>;

    async fn disconnect(&mut self, session: Self::Session) -> Result<()>;
}

/// How many connection attempts a provider gets and how far apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until a fatal signal arrives.
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: Option<u32>) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Exponential backoff: `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Owns a provider's session and drives it through [`LifecycleState`].
pub struct SessionLifecycle<C: SessionConnector> {
    provider: String,
    connector: C,
    policy: RetryPolicy,
    state: LifecycleState,
    session: Option<C::Session>,
}

impl<C: SessionConnector> SessionLifecycle<C> {
    pub fn new(provider: impl Into<String>, connector: C, policy: RetryPolicy) -> Self {
        Self {
            provider: provider.into(),
            connector,
            policy,
            state: LifecycleState::Uninitialized,
            session: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Connects, retrying retryable signals per the policy.
    ///
    /// # Errors
    ///
    /// [`NotifyError::Lifecycle`] on a fatal signal or when the policy's
    /// attempts run out; the lifecycle is then [`LifecycleState::Failed`].
    pub async fn initialize(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Uninitialized | LifecycleState::Closed => {}
            other => {
                return Err(self.lifecycle_error(format!("initialize called while {other}")));
            }
        }

        self.state = LifecycleState::Connecting;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.connector.connect().await {
                ConnectSignal::Ready(session) => {
                    self.session = Some(session);
                    self.state = LifecycleState::Ready;
                    tracing::info!(provider = %self.provider, attempts, "Provider session ready");
                    return Ok(());
                }
                ConnectSignal::Retryable(reason) => {
                    if self.policy.exhausted(attempts) {
                        self.state = LifecycleState::Failed;
                        tracing::error!(
                            provider = %self.provider,
                            attempts,
                            reason = %reason,
                            "Provider connection retries exhausted"
                        );
                        return Err(self.lifecycle_error(format!(
                            "gave up after {attempts} attempts: {reason}"
                        )));
                    }
                    let delay = self.policy.delay_for(attempts);
                    tracing::warn!(
                        provider = %self.provider,
                        attempt = attempts,
                        reason = %reason,
                        retry_in = ?delay,
                        "Provider connection lost, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                ConnectSignal::Fatal(reason) => {
                    self.state = LifecycleState::Failed;
                    tracing::error!(
                        provider = %self.provider,
                        attempts,
                        reason = %reason,
                        "Provider connection failed permanently"
                    );
                    return Err(self.lifecycle_error(reason));
                }
            }
        }
    }

    /// The live session; only available while [`LifecycleState::Ready`].
    pub fn session_mut(&mut self) -> Result<&mut C::Session> {
        let state = self.state;
        match self.session.as_mut() {
            Some(session) if state == LifecycleState::Ready => Ok(session),
            _ => Err(NotifyError::Lifecycle {
                provider: self.provider.clone(),
                reason: format!("session used while {state}"),
            }),
        }
    }

    /// Releases the session. A no-op unless the lifecycle is ready.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.state != LifecycleState::Ready {
            return Ok(());
        }
        self.state = LifecycleState::Closed;
        if let Some(session) = self.session.take() {
            self.connector.disconnect(session).await?;
        }
        tracing::debug!(provider = %self.provider, "Provider session closed");
        Ok(())
    }

    fn lifecycle_error(&self, reason: String) -> NotifyError {
        NotifyError::Lifecycle {
            provider: self.provider.clone(),
            reason,
        }
    }
}
