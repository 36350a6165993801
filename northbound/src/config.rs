use std::{fs::read_to_string, net::SocketAddr};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    #[serde(default = "Server::address")]
    pub address: SocketAddr,
}

impl Server {
    fn address() -> SocketAddr {
        "0.0.0.0:8080".parse().unwrap()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self { address: Self::address() }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Db {
    #[serde(default = "Db::url")]
    pub url: String,
}

impl Db {
    fn url() -> String {
        "postgres://localhost/coap_gateway".to_string()
    }
}

impl Default for Db {
    fn default() -> Self {
        Self { url: Self::url() }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Cache {
    #[serde(default = "Cache::url")]
    pub url: String,
}

impl Cache {
    fn url() -> String {
        "redis://localhost/0".to_string()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self { url: Self::url() }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub db: Db,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub log: Log,
    /// Used to build each gateway pod's forwarding URL (spec §4.8 step 2).
    #[serde(default = "Config::pod_service")]
    pub pod_service: String,
    #[serde(default = "Config::pod_namespace")]
    pub pod_namespace: String,
    #[serde(default = "Config::pod_port")]
    pub pod_port: u16,
}

impl Config {
    fn pod_service() -> String {
        "coap-gateway".to_string()
    }

    fn pod_namespace() -> String {
        "default".to_string()
    }

    /// Each gateway pod's Request Router HTTP listener (`gateway`'s
    /// `Http::address`, default `0.0.0.0:8081`), not the CoAP-over-TLS port.
    fn pod_port() -> u16 {
        8081
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: Server::default(),
            db: Db::default(),
            cache: Cache::default(),
            log: Log::default(),
            pod_service: Self::pod_service(),
            pod_namespace: Self::pod_namespace(),
            pod_port: Self::pod_port(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS")
)]
struct Cli {
    /// Path to a TOML configuration file. Every value may also be supplied
    /// or overridden by an environment variable (spec §6).
    #[arg(long, short)]
    config: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let cli = Cli::parse();

        let mut config = match cli.config {
            Some(path) => toml::from_str(&read_to_string(&path).context("reading config file")?)
                .context("parsing config file")?,
            None => Config::default(),
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("ADDRESS") {
            self.server.address = v.parse().context("ADDRESS")?;
        }
        if let Ok(v) = std::env::var("DB_URL") {
            self.db.url = v;
        }
        if let Ok(v) = std::env::var("CACHE_URL") {
            self.cache.url = v;
        }
        Ok(())
    }
}
