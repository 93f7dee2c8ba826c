//! # Runtime Configuration Module
//!
//! Environment variable configuration for dispatch and async responses.
//!
//! ## Environment Variables
//!
//! ### `JSGI_ENV`
//!
//! Name of the runtime profile (e.g. `development`, `production`). When set and
//! the resolved handler carries an environment-profile hook, the hook is called
//! with this name to obtain the handler that actually serves the request.
//!
//! ### `JSGI_ASYNC_TIMEOUT_MS`
//!
//! Default timeout for async responses in milliseconds. Default: `30000`.
//! `0` or `infinite` disables the timeout.
//!
//! ### `JSGI_ASYNC_AUTO_FLUSH`
//!
//! When `1` or `true`, async responses flush the channel after every drain.
//! Default: off.
//!
//! ## Usage
//!
//! ```rust
//! use jsgi_dispatch::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! println!("async timeout: {:?}", config.async_timeout);
//! ```

use std::env;
use std::time::Duration;

/// Default async response timeout in milliseconds.
pub const DEFAULT_ASYNC_TIMEOUT_MS: u64 = 30_000;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Runtime profile handed to environment-profile hooks
    pub profile: Option<String>,
    /// Default async timeout; `None` means the exchange never times out
    pub async_timeout: Option<Duration>,
    /// Default auto-flush flag for async responses
    pub auto_flush: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            profile: None,
            async_timeout: Some(Duration::from_millis(DEFAULT_ASYNC_TIMEOUT_MS)),
            auto_flush: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Invalid values fall back to defaults, matching `from_env`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let profile = lookup("JSGI_ENV")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let async_timeout = match lookup("JSGI_ASYNC_TIMEOUT_MS") {
            Some(val) => parse_timeout(&val),
            None => Some(Duration::from_millis(DEFAULT_ASYNC_TIMEOUT_MS)),
        };

        let auto_flush = lookup("JSGI_ASYNC_AUTO_FLUSH")
            .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        RuntimeConfig {
            profile,
            async_timeout,
            auto_flush,
        }
    }

    /// Set the runtime profile
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }
}

fn parse_timeout(val: &str) -> Option<Duration> {
    let val = val.trim();
    if val.eq_ignore_ascii_case("infinite") {
        return None;
    }
    match val.parse::<u64>() {
        Ok(0) => None,
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => Some(Duration::from_millis(DEFAULT_ASYNC_TIMEOUT_MS)),
    }
}
