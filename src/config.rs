use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sflow::DecodeOptions;

use crate::correlator::CorrelatorConfig;

/// Default sFlow collector port
pub const DEFAULT_PORT: u16 = 6343;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("read config file failed, {0}")]
    Io(#[from] std::io::Error),

    #[error("parse config failed, {0}")]
    Yaml(#[from] serde_yaml::Error),
}

const fn default_listen() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))
}

const fn default_report_interval() -> Duration {
    Duration::from_secs(30)
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The address to receive sFlow datagrams on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Configures the receive buffer size using the "SO_RCVBUF" option on the socket.
    #[serde(default, with = "humanize::bytes::serde_option")]
    pub receive_buffer_bytes: Option<usize>,

    /// How often the collector logs a summary of what it has seen.
    #[serde(
        default = "default_report_interval",
        with = "humanize::duration::serde"
    )]
    pub report_interval: Duration,

    #[serde(default)]
    pub decode: DecodeOptions,

    #[serde(default)]
    pub correlator: CorrelatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: default_listen(),
            receive_buffer_bytes: None,
            report_interval: default_report_interval(),
            decode: DecodeOptions::default(),
            correlator: CorrelatorConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, Error> {
        let content = std::fs::read_to_string(path)?;
        Config::from_yaml(&content)
    }

    /// An empty document yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Config, Error> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }

        serde_yaml::from_str(content).map_err(Into::into)
    }
}
