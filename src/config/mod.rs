use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::api::ApiClient;
use crate::auth::{CommandToken, StaticToken, TokenProvider};
use crate::rides::countdown::DEFAULT_REQUEST_WINDOW;
use crate::rides::tracker::DEFAULT_CURRENCY;
use crate::rides::RideTrackerOptions;
use crate::socket::connection::{DEFAULT_EMIT_BUFFER, DEFAULT_EVENT_BUFFER};
use crate::socket::transport::engine_url;
use crate::socket::ConnectionOptions;

pub const DEFAULT_CONFIG_FILE: &str = "wayfarer.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rides: RidesConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// REST base, including the `/api` prefix.
    #[serde(default = "default_api_url")]
    pub base_url: String,
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            timeout_secs: default_api_timeout(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_api_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// Server origin. Derived from `api.base_url` when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_socket_path")]
    pub path: String,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: None,
            path: default_socket_path(),
            reconnect_delay_ms: default_reconnect_delay(),
            connect_timeout_secs: default_connect_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_socket_path() -> String {
    "/socket.io".to_string()
}

fn default_reconnect_delay() -> u64 {
    1000
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Fixed bearer token.
    #[serde(default)]
    pub token: Option<String>,
    /// Command printing a token on stdout, e.g. `idp-cli token`.
    #[serde(default)]
    pub token_command: Option<String>,
    /// Extra argument passed to `token_command` when a fresh token is needed
    #[serde(default)]
    pub refresh_arg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RidesConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub city: String,
}

impl Default for RidesConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            currency: default_currency(),
            city: String::new(),
        }
    }
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_WINDOW.as_secs()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    /// Overrides `rides.city` for drivers.
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default = "default_location_interval")]
    pub location_interval_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            city: None,
            location_interval_secs: default_location_interval(),
        }
    }
}

fn default_location_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub log_level: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(url) = overrides.api_url.as_deref().filter(|u| !u.trim().is_empty()) {
            self.api.base_url = url.trim().to_string();
        }
        if let Some(token) = overrides.token.as_deref().filter(|t| !t.trim().is_empty()) {
            self.auth.token = Some(token.trim().to_string());
        }
        if let Some(level) = overrides.log_level.as_deref().filter(|l| !l.trim().is_empty()) {
            self.logging.level = level.trim().to_string();
        }
    }

    /// Everything `config check` reports, collected rather than stopping at
    /// the first problem.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let api = self.api.base_url.trim();
        if !(api.starts_with("http://") || api.starts_with("https://")) {
            problems.push(format!("api.base_url must be an http(s) URL, got '{}'", api));
        }
        if self.api.timeout_secs == 0 {
            problems.push("api.timeout_secs must be greater than zero".to_string());
        }

        match self.socket_url() {
            Ok(url) => {
                if let Err(e) = engine_url(&url, &self.socket.path) {
                    problems.push(format!("socket.url: {}", e));
                }
            }
            Err(e) => problems.push(e.to_string()),
        }
        if self.socket.reconnect_delay_ms == 0 {
            problems.push("socket.reconnect_delay_ms must be greater than zero".to_string());
        }
        if self.socket.connect_timeout_secs == 0 {
            problems.push("socket.connect_timeout_secs must be greater than zero".to_string());
        }
        if self.socket.event_buffer == 0 {
            problems.push("socket.event_buffer must be greater than zero".to_string());
        }

        let has_token = self.auth.token.as_deref().is_some_and(|t| !t.trim().is_empty());
        let has_command = self
            .auth
            .token_command
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());
        if !has_token && !has_command {
            problems.push("auth: set token, token_command, --token or WAYFARER_TOKEN".to_string());
        }

        if self.rides.request_timeout_secs == 0 {
            problems.push("rides.request_timeout_secs must be greater than zero".to_string());
        }
        if self.rides.currency.trim().is_empty() {
            problems.push("rides.currency must not be empty".to_string());
        }
        if self.driver.location_interval_secs == 0 {
            problems.push("driver.location_interval_secs must be greater than zero".to_string());
        }

        problems
    }

    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            return Ok(());
        }
        bail!("Invalid configuration:\n  {}", problems.join("\n  "))
    }

    /// Socket origin: explicit `socket.url`, or the API URL without its path.
    pub fn socket_url(&self) -> Result<String> {
        if let Some(url) = self.socket.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.trim().trim_end_matches('/').to_string());
        }
        let api = self.api.base_url.trim();
        let scheme_end = api
            .find("://")
            .with_context(|| format!("Cannot derive socket URL from '{}'", api))?;
        let host_start = scheme_end + 3;
        let origin_end = api[host_start..]
            .find('/')
            .map(|i| host_start + i)
            .unwrap_or(api.len());
        Ok(api[..origin_end].to_string())
    }

    pub fn connection_options(&self) -> Result<ConnectionOptions> {
        Ok(ConnectionOptions {
            socket_url: self.socket_url()?,
            path: self.socket.path.clone(),
            reconnect_delay: Duration::from_millis(self.socket.reconnect_delay_ms.max(1)),
            connect_timeout: Duration::from_secs(self.socket.connect_timeout_secs.max(1)),
            event_buffer: self.socket.event_buffer.max(1),
            emit_buffer: DEFAULT_EMIT_BUFFER,
        })
    }

    /// A static token wins over a token command.
    pub fn token_provider(&self) -> Result<Arc<dyn TokenProvider>> {
        if let Some(token) = self.auth.token.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(Arc::new(StaticToken::new(token.trim())));
        }
        if let Some(command) = self
            .auth
            .token_command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
        {
            let provider = CommandToken::from_command_line(command, self.auth.refresh_arg.clone())
                .context("Invalid auth.token_command")?;
            return Ok(Arc::new(provider));
        }
        Ok(Arc::new(StaticToken::new("")))
    }

    pub fn api_client(&self, tokens: Arc<dyn TokenProvider>) -> Result<ApiClient> {
        ApiClient::new(
            &self.api.base_url,
            Duration::from_secs(self.api.timeout_secs.max(1)),
            tokens,
        )
        .context("Failed to build HTTP client")
    }

    pub fn ride_options(&self, driver: bool) -> RideTrackerOptions {
        let city = match (&self.driver.city, driver) {
            (Some(city), true) if !city.trim().is_empty() => city.trim().to_string(),
            _ => self.rides.city.trim().to_string(),
        };
        RideTrackerOptions {
            city,
            currency: self.rides.currency.trim().to_string(),
            request_window: Duration::from_secs(self.rides.request_timeout_secs.max(1)),
        }
    }

    pub fn location_interval(&self) -> Duration {
        Duration::from_secs(self.driver.location_interval_secs.max(1))
    }
}
