use std::{collections::HashMap, fs::read_to_string, net::SocketAddrV4, str::FromStr};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    ///
    /// relay server listen address
    ///
    /// The IPv4 address and port the UDP socket binds to. The wire
    /// format is IPv4 only, so an IPv4 socket address is required
    /// here.
    ///
    #[serde(default = "Server::listen")]
    pub listen: SocketAddrV4,
}

impl Server {
    fn listen() -> SocketAddrV4 {
        "127.0.0.1:8896".parse().unwrap()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Runtime {
    ///
    /// Token rotation period, in seconds.
    ///
    /// A fresh admission token is issued this often; the previous one
    /// stays acceptable for one more period.
    ///
    #[serde(default = "Runtime::token_rotation")]
    pub token_rotation: u64,
    ///
    /// Session idle timeout, in seconds.
    ///
    /// A session that handles no packet for this long is evicted from
    /// both indices.
    ///
    #[serde(default = "Runtime::idle_timeout")]
    pub idle_timeout: u64,
    ///
    /// Eviction interval, in seconds.
    ///
    /// Eviction scans run at most this often, on packet arrival and on
    /// idle ticks alike.
    ///
    #[serde(default = "Runtime::eviction_interval")]
    pub eviction_interval: u64,
    ///
    /// Receive deadline, in milliseconds.
    ///
    /// The read timeout on the UDP socket. Expiry is the housekeeping
    /// tick, and the stop signal is honored within one deadline.
    ///
    #[serde(default = "Runtime::recv_deadline")]
    pub recv_deadline: u64,
}

impl Runtime {
    fn token_rotation() -> u64 {
        5
    }

    fn idle_timeout() -> u64 {
        30
    }

    fn eviction_interval() -> u64 {
        5
    }

    fn recv_deadline() -> u64 {
        50
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            token_rotation: Self::token_rotation(),
            idle_timeout: Self::idle_timeout(),
            eviction_interval: Self::eviction_interval(),
            recv_deadline: Self::recv_deadline(),
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Auth {
    ///
    /// static user credentials
    ///
    /// Username to shared-secret pairs loaded once at startup. This
    /// table is consulted before the runtime record store, so a static
    /// entry shadows a record with the same username.
    ///
    #[serde(default)]
    pub static_credentials: HashMap<String, String>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub runtime: Runtime,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: relay-server --config /etc/relay-server/config.toml
    ///
    #[arg(long, short)]
    config: Option<String>,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    /// Load command line parameters, if the configuration file path is
    /// specified, the configuration is read from the configuration
    /// file, otherwise the default configuration is used.
    ///
    pub fn load() -> Result<Self> {
        Ok(match Cli::parse().config {
            Some(path) => toml::from_str(&read_to_string(&path)?)?,
            None => Self::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.runtime.token_rotation, 5);
        assert_eq!(config.runtime.idle_timeout, 30);
        assert_eq!(config.runtime.eviction_interval, 5);
        assert_eq!(config.runtime.recv_deadline, 50);
        assert!(config.auth.static_credentials.is_empty());
    }

    #[test]
    fn parse_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:4478"

            [runtime]
            idle-timeout = 60

            [log]
            level = "debug"

            [auth.static-credentials]
            user1 = "password1"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:4478".parse::<SocketAddrV4>().unwrap());
        assert_eq!(config.runtime.idle_timeout, 60);
        assert_eq!(config.runtime.token_rotation, 5);
        assert_eq!(
            config.auth.static_credentials.get("user1").map(String::as_str),
            Some("password1")
        );
    }
}
