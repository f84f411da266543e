//! Built-in [`Observer`] implementations.

use crate::config::ObserverConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use watchpost_alert::observer::{Observer, ObserverSession};

const USER_AGENT: &str = concat!("watchpost/", env!("CARGO_PKG_VERSION"));
const MAX_STDERR_LOG: usize = 500;

pub fn build_observer(config: &ObserverConfig) -> Result<Box<dyn Observer>> {
    match config {
        ObserverConfig::Http => Ok(Box::new(HttpObserver)),
        ObserverConfig::Command { command } => Ok(Box::new(CommandObserver::new(command.clone())?)),
    }
}

/// Number of non-overlapping occurrences of `marker` in `body`.
pub fn count_markers(body: &str, marker: &str) -> Result<i64> {
    if marker.is_empty() {
        bail!("selector is empty");
    }
    Ok(body.matches(marker).count() as i64)
}

/// Fetches the page over HTTP and counts literal occurrences of the
/// selector in the response body.
pub struct HttpObserver;

struct HttpSession {
    client: reqwest::Client,
}

#[async_trait]
impl Observer for HttpObserver {
    fn name(&self) -> &str {
        "http"
    }

    async fn open_session(&self) -> Result<Box<dyn ObserverSession>> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Box::new(HttpSession { client }))
    }
}

#[async_trait]
impl ObserverSession for HttpSession {
    async fn fetch(&mut self, url: &str, selector: &str, timeout: Duration) -> Result<i64> {
        let body = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        count_markers(&body, selector)
    }

    async fn close(self: Box<Self>) {
        tracing::debug!("HTTP observer session closed");
    }
}

/// Delegates extraction to an external program, run once per rule as
/// `program args... <url> <selector>`. The program prints the match count
/// on stdout.
pub struct CommandObserver {
    program: String,
    args: Vec<String>,
}

impl CommandObserver {
    pub fn new(command: Vec<String>) -> Result<Self> {
        let mut parts = command.into_iter();
        let Some(program) = parts.next() else {
            bail!("observer command must name a program");
        };
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

struct CommandSession {
    program: String,
    args: Vec<String>,
}

#[async_trait]
impl Observer for CommandObserver {
    fn name(&self) -> &str {
        "command"
    }

    async fn open_session(&self) -> Result<Box<dyn ObserverSession>> {
        Ok(Box::new(CommandSession {
            program: self.program.clone(),
            args: self.args.clone(),
        }))
    }
}

#[async_trait]
impl ObserverSession for CommandSession {
    async fn fetch(&mut self, url: &str, selector: &str, timeout: Duration) -> Result<i64> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .arg(selector)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start '{}'", self.program))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .with_context(|| format!("'{}' did not finish within {timeout:?}", self.program))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(MAX_STDERR_LOG).collect();
            bail!("'{}' exited with {}: {stderr}", self.program, output.status);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        stdout
            .parse::<i64>()
            .with_context(|| format!("'{}' printed '{stdout}', expected an integer", self.program))
    }

    async fn close(self: Box<Self>) {}
}
