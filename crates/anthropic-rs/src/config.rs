//! Client configuration and per-call overrides.
//!
//! [`ClientConfig`] holds the values shared by every call made through one
//! [`AnthropicClient`](crate::AnthropicClient). [`RequestOptions`] overrides
//! the timeout and retry budget for a single call and carries the caller's
//! cancellation token.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Default API endpoint root.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Environment variable overriding the base URL.
pub const BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";

/// Settings shared by all calls on one client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Sent as the `x-api-key` header.
    pub api_key: String,
    /// Endpoint root; `/v1/messages` is appended. Default: [`DEFAULT_BASE_URL`].
    pub base_url: String,
    /// Per-attempt timeout. Default: 10 minutes.
    pub timeout: Duration,
    /// Retries after the first attempt. Default: `2`.
    pub max_retries: u32,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: format!("anthropic-rs/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

// Keep the key out of debug logs.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Read the key from `ANTHROPIC_API_KEY` and an optional base URL from
    /// `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| Error::Config(format!("{API_KEY_ENV} is not set")))?;
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var(BASE_URL_ENV)
            && !base_url.trim().is_empty()
        {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Full URL of the messages endpoint.
    pub fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("API key is empty".into()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "base URL must start with http:// or https://, got `{}`",
                self.base_url
            )));
        }
        Ok(())
    }
}

/// Per-call overrides.
///
/// Unset fields fall back to the client's [`ClientConfig`]. The default token
/// is never cancelled, so a call without an explicit token only ends by
/// completion, failure or timeout.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub cancel: CancellationToken,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
