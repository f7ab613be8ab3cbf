use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use std::fmt;
use std::time::Duration;

use crate::api::Error;
use crate::model::{Api, Region};

const CONFIG_FILE: &str = "sems";
const ENV_PREFIX: &str = "SEMS";

#[derive(Clone, Deserialize)]
pub struct Settings {
    pub region: String,
    /// Explicit portal host, takes precedence over `region`.
    pub address: Option<String>,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub station_id: Option<String>,
    pub debug: bool,
    pub heartbeat_secs: u64,
    /// Heartbeats before an idle connection is attempted again.
    pub run_again: u32,
    pub timeout_secs: u64,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("region", &self.region)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"********")
            .field("station_id", &self.station_id)
            .field("debug", &self.debug)
            .field("heartbeat_secs", &self.heartbeat_secs)
            .field("run_again", &self.run_again)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Settings {
    pub fn address(&self) -> Result<String, Error> {
        match self.address.as_deref().filter(|a| !a.is_empty()) {
            Some(address) => Ok(address.to_string()),
            None => self
                .region
                .parse::<Region>()
                .map(|region| region.host().to_string()),
        }
    }

    pub fn api(&self) -> Result<Api, Error> {
        Ok(Api {
            address: self.address()?,
            port: self.port,
            username: self.username.to_owned(),
            password: self.password.to_owned(),
            station_id: self.station_id.clone().filter(|id| !id.trim().is_empty()),
        })
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Settings from `sems.{toml,yaml,json,...}` when present, overridden by
/// `SEMS_*` environment variables.
pub fn read_settings() -> Result<Settings, ConfigError> {
    let mut settings = Config::default();
    settings
        .merge(File::with_name(CONFIG_FILE).required(false))?
        .merge(Environment::with_prefix(ENV_PREFIX))?;

    from_config(settings)
}

pub fn from_config(mut settings: Config) -> Result<Settings, ConfigError> {
    settings
        .set_default("region", "global")?
        .set_default("port", 82i64)?
        .set_default("debug", false)?
        .set_default("heartbeat_secs", 10i64)?
        .set_default("run_again", 6i64)?
        .set_default("timeout_secs", 30i64)?;

    settings.try_into()
}
