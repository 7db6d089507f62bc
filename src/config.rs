use crate::prelude::*;

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub ecu: Ecu,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_poll_interval")]
    pub poll_interval: Duration,

    #[serde(default = "Config::default_cache_max")]
    pub cache_max: u32,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Optional path to append DebugRecords to after failed queries
    pub diagnostics_file: Option<String>,
}

// Ecu {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Ecu {
    pub host: String,
    #[serde(default = "Config::default_port")]
    pub port: u16,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_timeout")]
    pub connect_timeout: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_timeout")]
    pub read_timeout: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_reopen_delay")]
    pub reopen_delay: Duration,

    #[serde(default = "Config::default_max_attempts")]
    pub max_attempts: u32,
}
impl Ecu {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            reopen_delay: self.reopen_delay,
            max_attempts: self.max_attempts,
        }
    }

    pub fn client(&self) -> EcuClient {
        EcuClient::new(self.host.clone(), self.port, self.settings())
    }
} // }}}

#[derive(Clone, Debug)]
pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&Config) -> R) -> R {
        let config = match self.config.lock() {
            Ok(config) => config,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&config)
    }

    pub fn ecu(&self) -> Ecu {
        self.with(|c| c.ecu.clone())
    }

    pub fn poll_interval(&self) -> Duration {
        self.with(|c| c.poll_interval)
    }

    pub fn cache_max(&self) -> u32 {
        self.with(|c| c.cache_max)
    }

    pub fn loglevel(&self) -> String {
        self.with(|c| c.loglevel.clone())
    }

    pub fn diagnostics_file(&self) -> Option<String> {
        self.with(|c| c.diagnostics_file.clone())
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        let config = Self::from_yaml(&content)?;

        info!("Configuration loaded successfully:");
        info!("  ECU: {}:{}", config.ecu.host, config.ecu.port);
        info!("    Connect Timeout: {}s", config.ecu.connect_timeout.as_secs());
        info!("    Read Timeout: {}s", config.ecu.read_timeout.as_secs());
        info!("    Reopen Delay: {}s", config.ecu.reopen_delay.as_secs());
        info!("    Max Attempts: {}", config.ecu.max_attempts);
        info!("  Poll Interval: {}s", config.poll_interval.as_secs());
        info!("  Cache Max: {}", config.cache_max);
        info!("  Log Level: {}", config.loglevel);
        if let Some(path) = &config.diagnostics_file {
            info!("  Diagnostics File: {}", path);
        }

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ecu.host.is_empty() {
            bail!("ecu.host cannot be empty");
        }
        if self.ecu.port == 0 {
            bail!("ecu.port must be between 1 and 65535");
        }
        if self.ecu.max_attempts == 0 {
            bail!("ecu.max_attempts must be at least 1");
        }
        if self.ecu.read_timeout.is_zero() {
            bail!("ecu.read_timeout must be at least 1 second");
        }
        if self.ecu.connect_timeout.is_zero() {
            bail!("ecu.connect_timeout must be at least 1 second");
        }
        if self.poll_interval.is_zero() {
            bail!("poll_interval must be at least 1 second");
        }

        Ok(())
    }

    fn default_port() -> u16 {
        crate::ecu::connection::DEFAULT_PORT
    }

    fn default_timeout() -> Duration {
        Duration::from_secs(10)
    }

    fn default_reopen_delay() -> Duration {
        Duration::from_secs(5)
    }

    fn default_max_attempts() -> u32 {
        3
    }

    fn default_poll_interval() -> Duration {
        Duration::from_secs(60)
    }

    fn default_cache_max() -> u32 {
        5
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_yaml("ecu:\n  host: 192.168.1.50\n").unwrap();
        assert_eq!(config.ecu.port, 8899);
        assert_eq!(config.ecu.settings(), ClientSettings::default());
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.cache_max, 5);
        assert_eq!(config.loglevel, "info");
        assert!(config.diagnostics_file.is_none());
    }

    #[test]
    fn durations_are_seconds() {
        let yaml = "
ecu:
  host: ecu.local
  port: 9000
  connect_timeout: 3
  read_timeout: 4
  reopen_delay: 0
  max_attempts: 5
poll_interval: 300
cache_max: 2
loglevel: debug
diagnostics_file: /tmp/ecu.jsonl
";
        let config = Config::from_yaml(yaml).unwrap();
        let settings = config.ecu.settings();
        assert_eq!(settings.connect_timeout, Duration::from_secs(3));
        assert_eq!(settings.read_timeout, Duration::from_secs(4));
        assert_eq!(settings.reopen_delay, Duration::ZERO);
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.diagnostics_file.as_deref(), Some("/tmp/ecu.jsonl"));

        let wrapper = ConfigWrapper::from_config(config);
        assert_eq!(wrapper.ecu().port(), 9000);
        assert_eq!(wrapper.cache_max(), 2);
        assert_eq!(wrapper.loglevel(), "debug");
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(Config::from_yaml("ecu:\n  host: ''\n").is_err());
        assert!(Config::from_yaml("ecu:\n  host: a\n  port: 0\n").is_err());
        assert!(Config::from_yaml("ecu:\n  host: a\n  max_attempts: 0\n").is_err());
        assert!(Config::from_yaml("ecu:\n  host: a\npoll_interval: 0\n").is_err());
        assert!(Config::from_yaml("poll_interval: 10\n").is_err());
    }
}
