//! # Client Configuration
//!
//! Plain configuration structs with defaults, loadable from JSON. Durations
//! are written in milliseconds (`idle_timeout_ms`, `connect_timeout_ms`, ...).
//!
//! ```text
//! {
//!   "addresses": ["10.0.0.1:8087", "10.0.0.2:8087"],
//!   "min_connections": 2,
//!   "max_connections": 20,
//!   "idle_timeout_ms": 60000,
//!   "credentials": { "user": "app", "password": "secret" }
//! }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ClientError, ClientResult};

/// Default cluster protocol port.
pub const DEFAULT_PORT: u16 = 8087;

/// Host and port of one cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Address {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = ClientError;

    /// Parses `host:port`; a bare host gets [`DEFAULT_PORT`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ClientError::InvalidConfig(format!("invalid address {:?}", s));

        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (s, DEFAULT_PORT),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Address::new(host, port))
    }
}

impl TryFrom<String> for Address {
    type Error = ClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// User and password sent over TLS on every new connection.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Cluster members; each new connection picks one at random.
    pub addresses: Vec<Address>,
    /// Connections kept open once connected.
    pub min_connections: usize,
    /// Hard cap on simultaneous connections.
    pub max_connections: usize,
    /// Idle connections above the minimum are closed after this long.
    #[serde(rename = "idle_timeout_ms", deserialize_with = "millis")]
    pub idle_timeout: Duration,
    /// Optional TCP connect timeout.
    #[serde(rename = "connect_timeout_ms", deserialize_with = "optional_millis")]
    pub connect_timeout: Option<Duration>,
    /// Delay before replacing a connection that closed with an error.
    #[serde(rename = "reconnect_delay_ms", deserialize_with = "millis")]
    pub reconnect_delay: Duration,
    /// Enables the TLS and authentication handshake.
    pub credentials: Option<Credentials>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            addresses: vec![Address::new("127.0.0.1", DEFAULT_PORT)],
            min_connections: 0,
            max_connections: 20,
            idle_timeout: Duration::from_secs(60),
            connect_timeout: None,
            reconnect_delay: Duration::from_millis(250),
            credentials: None,
        }
    }
}

impl PoolConfig {
    /// Default settings against the given addresses.
    pub fn with_addresses(addresses: Vec<Address>) -> Self {
        PoolConfig {
            addresses,
            ..PoolConfig::default()
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> ClientResult<Self> {
        let config: PoolConfig = serde_json::from_str(json)
            .map_err(|err| ClientError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.addresses.is_empty() {
            return Err(ClientError::InvalidConfig(
                "at least one address is required".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ClientError::InvalidConfig(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ClientError::InvalidConfig(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

/// Configuration for the convenience client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    #[serde(flatten)]
    pub pool: PoolConfig,
    /// Optional per-request deadline applied by [`crate::Client`].
    #[serde(rename = "request_timeout_ms", deserialize_with = "optional_millis")]
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn from_json(json: &str) -> ClientResult<Self> {
        let config: ClientConfig = serde_json::from_str(json)
            .map_err(|err| ClientError::InvalidConfig(err.to_string()))?;
        config.pool.validate()?;
        Ok(config)
    }
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn optional_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
}
