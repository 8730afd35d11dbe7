//! Relay configuration.
//!
//! Loaded from TOML, then overridden by the variables in [`env_vars`].
//! Every field has a default so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::things::{ThingRecord, UserRecord};

/// Default values.
pub mod defaults {
    pub const BROKER_URL: &str = "nats://localhost:4222";
    pub const ACK_TIMEOUT_MS: u64 = 5_000;
    pub const DB_PATH: &str = "data/thingrelay.redb";
    pub const HTTP_LISTEN: &str = "0.0.0.0:8185";
    /// One request per base URL every 2.5 seconds.
    pub const RATE_INTERVAL_MS: u64 = 2_500;
    pub const RATE_BURST: u32 = 1;
    pub const EXECUTION_TIMEOUT_SECS: u64 = 30;
    pub const LOG_FILTER: &str = "thingrelay=info";
    pub const SMTP_PORT: u16 = 587;
    pub const SMPP_ADDRESS: &str = "localhost:2775";
}

/// Environment variable names.
pub mod env_vars {
    pub const BROKER_KIND: &str = "THINGRELAY_BROKER_KIND";
    pub const BROKER_URL: &str = "THINGRELAY_BROKER_URL";
    pub const ACK_TIMEOUT_MS: &str = "THINGRELAY_ACK_TIMEOUT_MS";
    pub const DB_PATH: &str = "THINGRELAY_DB_PATH";
    pub const HTTP_LISTEN: &str = "THINGRELAY_HTTP_LISTEN";
    pub const LOG_JSON: &str = "THINGRELAY_LOG_JSON";
    pub const LOG_FILTER: &str = "THINGRELAY_LOG";
    pub const SMTP_HOST: &str = "THINGRELAY_SMTP_HOST";
    pub const SMTP_USERNAME: &str = "THINGRELAY_SMTP_USERNAME";
    pub const SMTP_PASSWORD: &str = "THINGRELAY_SMTP_PASSWORD";
    pub const SMPP_ADDRESS: &str = "THINGRELAY_SMPP_ADDRESS";
    pub const SMPP_PASSWORD: &str = "THINGRELAY_SMPP_PASSWORD";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    #[default]
    Nats,
    Mqtt,
    Memory,
}

impl BrokerKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nats" => Some(Self::Nats),
            "mqtt" => Some(Self::Mqtt),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    pub url: String,
    /// Bound on subscribe, unsubscribe and publish acknowledgments.
    pub ack_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Nats,
            url: defaults::BROKER_URL.to_string(),
            ack_timeout_ms: defaults::ACK_TIMEOUT_MS,
        }
    }
}

impl BrokerConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// redb file, or `:memory:` for a volatile store.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: defaults::DB_PATH.to_string(),
        }
    }
}

impl StorageConfig {
    pub fn is_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: defaults::HTTP_LISTEN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownlinksConfig {
    pub rate_interval_ms: u64,
    pub rate_burst: u32,
    pub execution_timeout_secs: u64,
}

impl Default for DownlinksConfig {
    fn default() -> Self {
        Self {
            rate_interval_ms: defaults::RATE_INTERVAL_MS,
            rate_burst: defaults::RATE_BURST,
            execution_timeout_secs: defaults::EXECUTION_TIMEOUT_SECS,
        }
    }
}

impl DownlinksConfig {
    pub fn rate_interval(&self) -> Duration {
        Duration::from_millis(self.rate_interval_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

/// SMTP relay used by the email notifier. An empty host disables it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub from_name: String,
    pub use_tls: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: defaults::SMTP_PORT,
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            from_name: "ThingRelay".to_string(),
            use_tls: true,
        }
    }
}

impl SmtpConfig {
    pub fn enabled(&self) -> bool {
        !self.host.is_empty()
    }
}

/// SMSC connection used by the SMS notifier. An empty system id disables it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmppConfig {
    pub address: String,
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub source_addr: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
}

impl Default for SmppConfig {
    fn default() -> Self {
        Self {
            address: defaults::SMPP_ADDRESS.to_string(),
            system_id: String::new(),
            password: String::new(),
            system_type: String::new(),
            source_addr: String::new(),
            source_addr_ton: 5,
            source_addr_npi: 0,
            dest_addr_ton: 1,
            dest_addr_npi: 1,
        }
    }
}

impl SmppConfig {
    pub fn enabled(&self) -> bool {
        !self.system_id.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive.
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: defaults::LOG_FILTER.to_string(),
            json: false,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub broker: BrokerConfig,
    pub storage: StorageConfig,
    pub http: HttpConfig,
    pub downlinks: DownlinksConfig,
    pub smtp: SmtpConfig,
    pub smpp: SmppConfig,
    pub log: LogConfig,
    /// Fixtures for the built-in Things directory.
    pub things: Vec<ThingRecord>,
    pub users: Vec<UserRecord>,
}

impl RelayConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Validation(format!("invalid config: {}", e)))
    }

    /// Read a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source.
    pub fn apply_env_from<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = get(env_vars::BROKER_KIND).and_then(|v| BrokerKind::parse(&v)) {
            self.broker.kind = kind;
        }
        if let Some(url) = get(env_vars::BROKER_URL) {
            self.broker.url = url;
        }
        if let Some(ms) = get(env_vars::ACK_TIMEOUT_MS).and_then(|v| v.parse().ok()) {
            self.broker.ack_timeout_ms = ms;
        }
        if let Some(path) = get(env_vars::DB_PATH) {
            self.storage.path = path;
        }
        if let Some(listen) = get(env_vars::HTTP_LISTEN) {
            self.http.listen = listen;
        }
        if let Some(filter) = get(env_vars::LOG_FILTER) {
            self.log.filter = filter;
        }
        if let Some(json) = get(env_vars::LOG_JSON) {
            self.log.json = matches!(json.as_str(), "1" | "true" | "yes");
        }
        if let Some(host) = get(env_vars::SMTP_HOST) {
            self.smtp.host = host;
        }
        if let Some(user) = get(env_vars::SMTP_USERNAME) {
            self.smtp.username = user;
        }
        if let Some(password) = get(env_vars::SMTP_PASSWORD) {
            self.smtp.password = password;
        }
        if let Some(address) = get(env_vars::SMPP_ADDRESS) {
            self.smpp.address = address;
        }
        if let Some(password) = get(env_vars::SMPP_PASSWORD) {
            self.smpp.password = password;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker.ack_timeout_ms == 0 {
            return Err(Error::Validation("broker.ack_timeout_ms must be positive".into()));
        }
        if self.downlinks.rate_interval_ms == 0 || self.downlinks.rate_burst == 0 {
            return Err(Error::Validation(
                "downlinks rate limit must be positive".into(),
            ));
        }
        if self.downlinks.execution_timeout_secs == 0 {
            return Err(Error::Validation(
                "downlinks.execution_timeout_secs must be positive".into(),
            ));
        }
        if self.smtp.enabled() && self.smtp.from_address.is_empty() {
            return Err(Error::Validation("smtp.from_address is required".into()));
        }
        for thing in &self.things {
            if thing.id.is_empty() || thing.key.is_empty() {
                return Err(Error::Validation("things need an id and a key".into()));
            }
            thing.profile.validate()?;
        }
        Ok(())
    }
}
