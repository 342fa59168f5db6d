//! Runtime settings
//!
//! Loaded with the `config` crate: built-in defaults, then an optional
//! `config/keyport` file, then `KEYPORT__`-prefixed environment variables
//! (e.g. `KEYPORT__FLOW__STATE_TTL_SECS=600`).

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use keyport_core::{KeyportError, ProviderConfig, Result};

use crate::state::MAX_STATE_TTL;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub flow: FlowSettings,
    #[serde(default)]
    pub http: HttpSettings,
    /// Provider configurations, when the file is also the config source
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowSettings {
    /// Lifetime of an issued callback state
    #[serde(default = "default_state_ttl_secs")]
    pub state_ttl_secs: u64,
    /// Upper bound for one identity exchange (token + user info)
    #[serde(default = "default_exchange_timeout_secs")]
    pub exchange_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_state_ttl_secs() -> u64 {
    300
}

fn default_exchange_timeout_secs() -> u64 {
    30
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            state_ttl_secs: default_state_ttl_secs(),
            exchange_timeout_secs: default_exchange_timeout_secs(),
        }
    }
}

impl FlowSettings {
    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    /// Load from `config/keyport.*` (if present) and the environment.
    pub fn load() -> Result<Self> {
        Self::build(config::File::with_name("config/keyport").required(false))
    }

    /// Load from an explicit file plus the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(config::File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .set_default("flow.state_ttl_secs", default_state_ttl_secs() as i64)
            .and_then(|b| {
                b.set_default(
                    "flow.exchange_timeout_secs",
                    default_exchange_timeout_secs() as i64,
                )
            })
            .and_then(|b| b.set_default("http.timeout_secs", default_http_timeout_secs() as i64))
            .map_err(config_error)?
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("KEYPORT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?;

        let settings: Self = config.try_deserialize().map_err(config_error)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.flow.state_ttl() > MAX_STATE_TTL {
            return Err(KeyportError::configuration(format!(
                "flow.state_ttl_secs must be at most {}, got {}",
                MAX_STATE_TTL.as_secs(),
                self.flow.state_ttl_secs
            )));
        }
        Ok(())
    }
}

fn config_error(e: config::ConfigError) -> KeyportError {
    KeyportError::configuration(e.to_string())
}
