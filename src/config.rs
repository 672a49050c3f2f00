//! Operator configuration, read from a TOML file

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use auditscope_api::ClientOptions;
use auditscope_server::{DEFAULT_MAX_CONNECTIONS, SessionSettings};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the WebSocket server binds
    pub listen: SocketAddr,
    pub max_connections: usize,
    pub polling: PollingConfig,
    pub http: HttpConfig,

    /// Catalog file replacing the built-in noise categories
    pub noise_catalog: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8787)),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            polling: PollingConfig::default(),
            http: HttpConfig::default(),
            noise_catalog: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollingConfig {
    pub default_interval_secs: f64,
    pub min_interval_secs: f64,
    pub max_interval_secs: f64,
    pub rate_limit_fallback_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 5.0,
            min_interval_secs: 2.0,
            max_interval_secs: 300.0,
            rate_limit_fallback_secs: 60,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_response_bytes: usize,

    /// Accept `http://` origins; only meant for local test doubles
    pub allow_insecure_origins: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_response_bytes: 10 * 1024 * 1024,
            allow_insecure_origins: false,
        }
    }
}

impl Config {
    /// Load from `path`, or use defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::parse(&content)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.polling;
        for (name, secs) in [
            ("polling.default_interval_secs", p.default_interval_secs),
            ("polling.min_interval_secs", p.min_interval_secs),
            ("polling.max_interval_secs", p.max_interval_secs),
        ] {
            ensure!(secs.is_finite() && secs > 0.0, "{} must be a positive number", name);
            ensure!(
                Duration::try_from_secs_f64(secs).is_ok(),
                "{} is too large",
                name
            );
        }
        ensure!(
            p.min_interval_secs <= p.default_interval_secs
                && p.default_interval_secs <= p.max_interval_secs,
            "polling intervals must satisfy min <= default <= max"
        );
        ensure!(self.http.timeout_secs > 0, "http.timeout_secs must be non-zero");
        ensure!(self.http.max_response_bytes > 0, "http.max_response_bytes must be non-zero");
        ensure!(self.max_connections > 0, "max_connections must be non-zero");
        Ok(())
    }

    pub fn session_settings(&self) -> Result<SessionSettings> {
        let p = &self.polling;
        let secs = |name: &str, value: f64| {
            Duration::try_from_secs_f64(value)
                .with_context(|| format!("polling.{} is not a valid duration", name))
        };
        Ok(SessionSettings {
            default_interval: secs("default_interval_secs", p.default_interval_secs)?,
            min_interval: secs("min_interval_secs", p.min_interval_secs)?,
            max_interval: secs("max_interval_secs", p.max_interval_secs)?,
            rate_limit_fallback: Duration::from_secs(p.rate_limit_fallback_secs),
        })
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout: Duration::from_secs(self.http.timeout_secs),
            max_response_bytes: self.http.max_response_bytes,
            allow_insecure: self.http.allow_insecure_origins,
        }
    }
}
