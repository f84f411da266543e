use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Source of observations: turns a resource locator and an opaque selector
/// into a count of matched elements.
///
/// One [`ObserverSession`] is opened per scan cycle and shared by every
/// rule in it, so expensive setup (a browser, a connection pool) happens
/// once.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Observer name used in logs (e.g. `"http"`).
    fn name(&self) -> &str;

    /// Acquires the session for one cycle.
    ///
    /// # Errors
    ///
    /// A failure here is fatal to the cycle.
    async fn open_session(&self) -> Result<Box<dyn ObserverSession>>;
}

/// A single navigable context. Sessions are used sequentially.
#[async_trait]
pub trait ObserverSession: Send {
    /// Fetches `url` and counts the elements matched by `selector`.
    ///
    /// Implementations should give up after `timeout`; the orchestrator
    /// enforces the same bound from outside as well.
    async fn fetch(&mut self, url: &str, selector: &str, timeout: Duration) -> Result<i64>;

    /// Releases the session. Called exactly once, on every exit path of
    /// the cycle.
    async fn close(self: Box<Self>);
}
