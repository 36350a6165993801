use std::{fs::read_to_string, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tcp,
    TcpTls,
}

impl Default for Network {
    fn default() -> Self {
        Self::Tcp
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "tcp" => Ok(Self::Tcp),
            "tcp-tls" => Ok(Self::TcpTls),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    #[serde(default = "Server::address")]
    pub address: SocketAddr,
    #[serde(default)]
    pub network: Network,
}

impl Server {
    fn address() -> SocketAddr {
        "0.0.0.0:5684".parse().unwrap()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self { address: Self::address(), network: Network::default() }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Keepalive {
    #[serde(default = "Keepalive::time")]
    pub time_secs: u64,
    #[serde(default = "Keepalive::interval")]
    pub interval_secs: u64,
    #[serde(default = "Keepalive::retry")]
    pub retry: u32,
}

impl Keepalive {
    fn time() -> u64 {
        30
    }

    fn interval() -> u64 {
        10
    }

    fn retry() -> u32 {
        3
    }

    pub fn as_options(&self) -> gateway_core::KeepaliveOptions {
        gateway_core::KeepaliveOptions {
            idle: Duration::from_secs(self.time_secs),
            interval: Duration::from_secs(self.interval_secs),
            retry: self.retry,
            ping_deadline: Duration::from_secs(1),
        }
    }
}

impl Default for Keepalive {
    fn default() -> Self {
        Self { time_secs: Self::time(), interval_secs: Self::interval(), retry: Self::retry() }
    }
}

/// The pod-local HTTP listener the Request Router's remote-forward branch
/// targets (spec §4.8 step 3) — distinct from `Server::address`, which
/// speaks CoAP-over-TCP, not HTTP.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Http {
    #[serde(default = "Http::address")]
    pub address: SocketAddr,
}

impl Http {
    fn address() -> SocketAddr {
        "0.0.0.0:8081".parse().unwrap()
    }
}

impl Default for Http {
    fn default() -> Self {
        Self { address: Self::address() }
    }
}

/// mTLS material (spec §6). `ca_pool` is a directory of PEM-encoded CA
/// certificates, classified into roots and intermediates at load time.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Tls {
    pub certificate: Option<String>,
    pub certificate_key: Option<String>,
    pub ca_pool: Option<String>,
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

#[derive(Deserialize, Debug, Clone, Copy)]
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

/// Supplemental feature (§11): a periodic debug ticker logging session
/// counts, off by default.
#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub struct Debug {
    #[serde(default)]
    pub ticker: bool,
    #[serde(default = "Debug::ticker_interval")]
    pub ticker_interval_secs: u64,
}

impl Debug {
    fn ticker_interval() -> u64 {
        30
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub keepalive: Keepalive,
    #[serde(default)]
    pub tls: Tls,
    #[serde(default)]
    pub db: Db,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub debug: Debug,
    /// This pod's own address (`MY_POD_IP`), written into the routing
    /// cache on device login.
    #[serde(default)]
    pub pod_ip: String,
    /// Kubernetes service/namespace this pod is reached through, used to
    /// build other pods' forwarding URLs (spec §4.8 step 2, §11 "Pod DNS
    /// construction detail").
    #[serde(default = "Config::pod_service")]
    pub pod_service: String,
    #[serde(default = "Config::pod_namespace")]
    pub pod_namespace: String,
}

impl Config {
    fn pod_service() -> String {
        "coap-gateway".to_string()
    }

    fn pod_namespace() -> String {
        "default".to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: Server::default(),
            http: Http::default(),
            keepalive: Keepalive::default(),
            tls: Tls::default(),
            db: Db::default(),
            cache: Cache::default(),
            log: Log::default(),
            debug: Debug::default(),
            pod_ip: String::new(),
            pod_service: Self::pod_service(),
            pod_namespace: Self::pod_namespace(),
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
    /// or overridden by an environment variable (spec §6); the file is
    /// optional when the environment alone is sufficient.
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
        if let Ok(v) = std::env::var("NETWORK") {
            self.server.network = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Ok(v) = std::env::var("HTTP_ADDRESS") {
            self.http.address = v.parse().context("HTTP_ADDRESS")?;
        }
        if let Ok(v) = std::env::var("KEEPALIVE_TIME") {
            self.keepalive.time_secs = v.parse().context("KEEPALIVE_TIME")?;
        }
        if let Ok(v) = std::env::var("KEEPALIVE_INTERVAL") {
            self.keepalive.interval_secs = v.parse().context("KEEPALIVE_INTERVAL")?;
        }
        if let Ok(v) = std::env::var("KEEPALIVE_RETRY") {
            self.keepalive.retry = v.parse().context("KEEPALIVE_RETRY")?;
        }
        if let Ok(v) = std::env::var("TLS_CERTIFICATE") {
            self.tls.certificate = Some(v);
        }
        if let Ok(v) = std::env::var("TLS_CERTIFICATE_KEY") {
            self.tls.certificate_key = Some(v);
        }
        if let Ok(v) = std::env::var("TLS_CA_POOL") {
            self.tls.ca_pool = Some(v);
        }
        if let Ok(v) = std::env::var("DB_URL") {
            self.db.url = v;
        }
        if let Ok(v) = std::env::var("CACHE_URL") {
            self.cache.url = v;
        }
        if let Ok(v) = std::env::var("MY_POD_IP") {
            self.pod_ip = v;
        }
        if let Ok(v) = std::env::var("MY_POD_SERVICE") {
            self.pod_service = v;
        }
        if let Ok(v) = std::env::var("MY_POD_NAMESPACE") {
            self.pod_namespace = v;
        }
        Ok(())
    }
}
