//! Identity provider seam.
//!
//! Credentials are short-lived bearer tokens issued by an external identity
//! provider. The REST client and the socket connection manager receive a
//! [`TokenProvider`] explicitly; nothing here reads ambient global state.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("No credentials configured. Use --token, WAYFARER_TOKEN or [auth] in the config file")]
    NotConfigured,

    #[error("Token command failed: {0}")]
    Command(String),

    #[error("Token command produced an empty token")]
    EmptyToken,
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a bearer token. `force_refresh` bypasses any cached credential.
    async fn token(&self, force_refresh: bool) -> Result<String, AuthError>;
}

/// A fixed token, e.g. from `--token`. A forced refresh returns the same value.
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self, _force_refresh: bool) -> Result<String, AuthError> {
        if self.token.trim().is_empty() {
            return Err(AuthError::NotConfigured);
        }
        Ok(self.token.clone())
    }
}

/// Obtain tokens by running an external command that prints one on stdout.
///
/// The last token is cached and handed out until a forced refresh is
/// requested, at which point the command is re-run with `refresh_arg`
/// appended (e.g. `--force`).
pub struct CommandToken {
    program: String,
    args: Vec<String>,
    refresh_arg: Option<String>,
    timeout: Duration,
    cached: ArcSwapOption<String>,
}

impl CommandToken {
    /// Build from a whitespace-separated command line.
    pub fn from_command_line(
        command_line: &str,
        refresh_arg: Option<String>,
    ) -> Result<Self, AuthError> {
        let mut parts = command_line.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| AuthError::Command("empty token command".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            refresh_arg: refresh_arg.filter(|a| !a.trim().is_empty()),
            timeout: Duration::from_secs(30),
            cached: ArcSwapOption::empty(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, force_refresh: bool) -> Result<String, AuthError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        if force_refresh {
            if let Some(arg) = &self.refresh_arg {
                cmd.arg(arg);
            }
        }

        debug!(program = %self.program, force_refresh, "Running token command");

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| AuthError::Command(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| AuthError::Command(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AuthError::Command(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }
        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for CommandToken {
    async fn token(&self, force_refresh: bool) -> Result<String, AuthError> {
        if !force_refresh {
            if let Some(token) = self.cached.load_full() {
                return Ok(token.as_ref().clone());
            }
        }
        let token = self.run(force_refresh).await?;
        self.cached.store(Some(Arc::new(token.clone())));
        Ok(token)
    }
}
