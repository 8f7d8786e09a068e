//! Loop configuration.
//!
//! A [`Config`] can be built in code with chained setters, parsed from TOML,
//! or loaded from a file with environment overrides applied on top:
//!
//! ```toml
//! read_buffer_size = 1024
//! event_capacity = 64
//! connect_timeout_ms = 10000
//! user_agent = "curl/7.43.0"
//! ```
//!
//! Every field is optional; missing ones take their defaults.

use crate::error::{Error, Result};
use crate::payload::{DEFAULT_RESPONSE, DEFAULT_USER_AGENT};

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const ENV_USER_AGENT: &str = "MUXLOOP_USER_AGENT";
const ENV_CONNECT_TIMEOUT_MS: &str = "MUXLOOP_CONNECT_TIMEOUT_MS";
const ENV_READ_BUFFER_SIZE: &str = "MUXLOOP_READ_BUFFER_SIZE";

/// Tunables for an [`EventLoop`](crate::EventLoop).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Size of the temporary buffer each read goes through.
    pub read_buffer_size: usize,

    /// Maximum readiness events fetched per wait.
    pub event_capacity: usize,

    /// Listen backlog for server sockets.
    pub backlog: i32,

    /// Deadline for outbound connects. `None` waits as long as the OS does.
    pub connect_timeout_ms: Option<u64>,

    /// Cap on the bytes one connection may accumulate before it is closed.
    pub max_inbound_bytes: usize,

    /// `User-Agent` of the client request.
    pub user_agent: String,

    /// Text the server writes to every accepted connection.
    pub response: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            event_capacity: 64,
            backlog: 128,
            connect_timeout_ms: None,
            max_inbound_bytes: 8 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            response: DEFAULT_RESPONSE.to_string(),
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout_ms = timeout.map(|t| t.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    pub fn max_inbound_bytes(mut self, limit: usize) -> Self {
        self.max_inbound_bytes = limit;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    /// The connect deadline as a [`Duration`].
    pub fn connect_timeout_duration(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Parses a TOML document and validates it.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;

        Ok(config)
    }

    /// Loads a TOML file, applies environment overrides, and validates the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Config = toml::from_str(&source)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Applies `MUXLOOP_*` overrides looked up through `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(agent) = lookup(ENV_USER_AGENT) {
            self.user_agent = agent;
        }

        if let Some(value) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            let ms = value.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("{ENV_CONNECT_TIMEOUT_MS} is not a number: {value}"))
            })?;
            self.connect_timeout_ms = Some(ms);
        }

        if let Some(value) = lookup(ENV_READ_BUFFER_SIZE) {
            self.read_buffer_size = value.trim().parse::<usize>().map_err(|_| {
                Error::Config(format!("{ENV_READ_BUFFER_SIZE} is not a number: {value}"))
            })?;
        }

        Ok(())
    }

    /// Rejects values the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(Error::Config("read_buffer_size must be greater than 0".into()));
        }

        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be greater than 0".into()));
        }

        if self.backlog <= 0 {
            return Err(Error::Config("backlog must be greater than 0".into()));
        }

        if self.max_inbound_bytes == 0 {
            return Err(Error::Config("max_inbound_bytes must be greater than 0".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::new();

        assert!(config.validate().is_ok());
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.connect_timeout_duration(), None);
        assert_eq!(config.user_agent, "curl/7.43.0");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            connect_timeout_ms = 250
            user_agent = "muxloop-test"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.connect_timeout_duration(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.user_agent, "muxloop-test");
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_toml_str("read_buffer_size = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_toml_str("unknown_key = 1"),
            Err(Error::ConfigParse(_))
        ));
        assert!(Config::new().backlog(0).validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::new();

        config
            .apply_env_overrides(|key| match key {
                "MUXLOOP_CONNECT_TIMEOUT_MS" => Some("1500".into()),
                "MUXLOOP_USER_AGENT" => Some("agent/2".into()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.connect_timeout_ms, Some(1500));
        assert_eq!(config.user_agent, "agent/2");

        let err = config
            .apply_env_overrides(|key| (key == "MUXLOOP_READ_BUFFER_SIZE").then(|| "big".into()))
            .unwrap_err();
        assert!(err.to_string().contains("MUXLOOP_READ_BUFFER_SIZE"));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
    }
}
