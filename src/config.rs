use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use dirs::config_dir;
use log::LevelFilter;
use serde::Deserialize;

pub const DEFAULT_SERVER: &str = "default";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub servers: BTreeMap<String, RpcConfig>,
    pub intervals: PollIntervals,
    pub theme: Theme,
    pub log_level: LevelFilter,
    /// File preferences are written back to.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    pub verify_ssl: bool,
    pub user_agent: String,
    pub url: Option<String>,
}

impl RpcConfig {
    pub fn endpoint(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let mut path = self.path.clone();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, path)
    }

    /// Host shown to users; an explicit url wins over the host field.
    pub fn hostname(&self) -> String {
        self.url
            .as_deref()
            .and_then(|url| reqwest::Url::parse(url).ok())
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| self.host.clone())
    }
}

/// Cadence of each polling loop. Uniform across servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub torrents: Duration,
    pub details: Duration,
    pub session: Duration,
    pub stats: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            torrents: Duration::from_secs(3),
            details: Duration::from_secs(3),
            session: Duration::from_secs(5),
            stats: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::System => "system",
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

/// Where the polling core reads per-server connection parameters from.
pub trait ConfigStore {
    fn server_connection(&self, server: &str) -> Option<RpcConfig>;
}

/// Config loaded from CLI, environment and the TOML file; UI preferences are
/// persisted back into that file.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    config: AppConfig,
}

impl FileConfigStore {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn server_ids(&self) -> impl Iterator<Item = &str> {
        self.config.servers.keys().map(String::as_str)
    }

    pub fn theme(&self) -> Theme {
        self.config.theme
    }

    pub fn set_theme(&mut self, theme: Theme) -> Result<()> {
        let path = self
            .config
            .path
            .clone()
            .context("no config file location available to persist preferences")?;
        write_theme(&path, theme)?;
        self.config.theme = theme;
        Ok(())
    }
}

impl ConfigStore for FileConfigStore {
    fn server_connection(&self, server: &str) -> Option<RpcConfig> {
        self.config.servers.get(server).cloned()
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless poller for Transmission daemons", long_about = None)]
pub struct Cli {
    /// Server the connection flags below apply to.
    #[arg(long, default_value = DEFAULT_SERVER)]
    pub name: String,
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub path: Option<String>,
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long)]
    pub timeout: Option<f64>,
    /// Overrides the torrent list interval, in seconds.
    #[arg(long)]
    pub poll_interval: Option<f64>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub tls: bool,
    #[arg(long = "no-tls", action = ArgAction::SetTrue)]
    pub no_tls: bool,
    #[arg(long)]
    pub insecure: bool,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// Servers to open; all configured servers when omitted.
    #[arg(long = "server")]
    pub servers: Vec<String>,
    /// Server whose updates are printed; the first opened one by default.
    #[arg(long)]
    pub active: Option<String>,
    /// Torrent id to poll details for on the active server.
    #[arg(long)]
    pub details: Option<i64>,
    /// Also poll transfer statistics.
    #[arg(long)]
    pub stats: bool,
    /// Stop after this many seconds.
    #[arg(long)]
    pub duration: Option<f64>,
    /// Persist the UI theme preference and exit.
    #[arg(long, value_enum)]
    pub set_theme: Option<Theme>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    rpc: Option<FileRpcConfig>,
    #[serde(default)]
    servers: BTreeMap<String, FileRpcConfig>,
    intervals: Option<FileIntervals>,
    interface: Option<FileInterface>,
    log_level: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
struct FileRpcConfig {
    url: Option<String>,
    scheme: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    username: Option<String>,
    password: Option<String>,
    timeout: Option<f64>,
    tls: Option<bool>,
    verify_ssl: Option<bool>,
    user_agent: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileIntervals {
    torrents: Option<f64>,
    details: Option<f64>,
    session: Option<f64>,
    stats: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileInterface {
    theme: Option<Theme>,
}

/// Connection flags lifted from the CLI; env and file values fill the gaps.
#[derive(Debug, Default)]
struct ConnectionOverrides {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    username: Option<String>,
    password: Option<String>,
    timeout: Option<f64>,
    tls: Option<bool>,
    verify_ssl: Option<bool>,
    user_agent: Option<String>,
}

impl ConnectionOverrides {
    fn from_cli(cli: &Cli, env: &dyn Fn(&str) -> Option<String>) -> Self {
        let tls_flag = if cli.tls {
            Some(true)
        } else if cli.no_tls {
            Some(false)
        } else {
            None
        };
        let verify_ssl = if cli.insecure {
            Some(false)
        } else {
            env("TRANSMISSION_VERIFY_SSL").and_then(|v| parse_bool(&v))
        };
        Self {
            url: cli.url.clone().or_else(|| env("TRANSMISSION_URL")),
            host: cli.host.clone().or_else(|| env("TRANSMISSION_HOST")),
            port: cli
                .port
                .or_else(|| env("TRANSMISSION_PORT").and_then(|v| v.parse().ok())),
            path: cli.path.clone().or_else(|| env("TRANSMISSION_RPC_PATH")),
            username: cli.username.clone().or_else(|| env("TRANSMISSION_USERNAME")),
            password: cli.password.clone().or_else(|| env("TRANSMISSION_PASSWORD")),
            timeout: cli
                .timeout
                .or_else(|| env("TRANSMISSION_TIMEOUT").and_then(|v| v.parse().ok())),
            tls: tls_flag.or_else(|| env("TRANSMISSION_TLS").and_then(|v| parse_bool(&v))),
            verify_ssl,
            user_agent: env("TRANSMISSION_USER_AGENT"),
        }
    }

    fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.host.is_none()
            && self.port.is_none()
            && self.path.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.timeout.is_none()
            && self.tls.is_none()
            && self.verify_ssl.is_none()
            && self.user_agent.is_none()
    }
}

pub fn build_config(cli: &Cli) -> Result<AppConfig> {
    let path = resolve_config_path(cli.config.as_deref());
    let file_config = match &path {
        Some(path) => read_file_config(path)?,
        None => None,
    };
    build_config_with(cli, file_config.unwrap_or_default(), path, &|name| {
        env::var(name).ok()
    })
}

fn build_config_with(
    cli: &Cli,
    file_config: FileConfig,
    path: Option<PathBuf>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<AppConfig> {
    let FileConfig {
        rpc,
        servers: mut file_servers,
        intervals,
        interface,
        log_level,
    } = file_config;

    if let Some(legacy) = rpc {
        file_servers.entry(DEFAULT_SERVER.to_string()).or_insert(legacy);
    }

    let overrides = ConnectionOverrides::from_cli(cli, env);
    let mut servers = BTreeMap::new();
    for (name, file) in &file_servers {
        if *name == cli.name {
            continue;
        }
        let server = build_server(name, Some(file), &ConnectionOverrides::default())?;
        servers.insert(name.clone(), server);
    }
    let targeted = file_servers.get(&cli.name);
    if targeted.is_some() || file_servers.is_empty() || !overrides.is_empty() {
        let server = build_server(&cli.name, targeted, &overrides)?;
        servers.insert(cli.name.clone(), server);
    }

    let mut intervals = resolve_intervals(intervals.unwrap_or_default())?;
    let poll_override = cli
        .poll_interval
        .or_else(|| env("TRANSMISSION_POLL_INTERVAL").and_then(|v| v.parse().ok()));
    if let Some(secs) = poll_override {
        intervals.torrents = positive_interval("poll interval", secs)?;
    }

    let log_level_str = cli
        .log_level
        .clone()
        .or_else(|| env("TRANSMISSION_LOG_LEVEL"))
        .or(log_level)
        .unwrap_or_else(|| "info".to_string());
    let log_level = LevelFilter::from_str(&log_level_str).unwrap_or(LevelFilter::Info);

    Ok(AppConfig {
        servers,
        intervals,
        theme: interface.and_then(|i| i.theme).unwrap_or_default(),
        log_level,
        path,
    })
}

fn build_server(
    name: &str,
    file: Option<&FileRpcConfig>,
    overrides: &ConnectionOverrides,
) -> Result<RpcConfig> {
    let url = overrides
        .url
        .clone()
        .or_else(|| file.and_then(|cfg| cfg.url.clone()));

    let host = overrides
        .host
        .clone()
        .or_else(|| file.and_then(|cfg| cfg.host.clone()))
        .unwrap_or_else(|| "localhost".to_string());

    let port = overrides
        .port
        .or_else(|| file.and_then(|cfg| cfg.port))
        .unwrap_or(9091);

    let path = overrides
        .path
        .clone()
        .or_else(|| file.and_then(|cfg| cfg.path.clone()))
        .unwrap_or_else(|| "/transmission/rpc".to_string());

    let username = overrides
        .username
        .clone()
        .or_else(|| file.and_then(|cfg| cfg.username.clone()));

    let password = overrides
        .password
        .clone()
        .or_else(|| file.and_then(|cfg| cfg.password.clone()));

    let timeout_secs = overrides
        .timeout
        .or_else(|| file.and_then(|cfg| cfg.timeout))
        .unwrap_or(10.0);

    let timeout = positive_interval(&format!("server {name}: timeout"), timeout_secs)?;

    let use_tls = overrides
        .tls
        .or_else(|| file.and_then(|cfg| cfg.tls))
        .unwrap_or(false);

    let verify_ssl = overrides
        .verify_ssl
        .or_else(|| file.and_then(|cfg| cfg.verify_ssl))
        .unwrap_or(true);

    let scheme = file
        .and_then(|cfg| cfg.scheme.clone())
        .unwrap_or_else(|| if use_tls { "https" } else { "http" }.to_string());

    let user_agent = overrides
        .user_agent
        .clone()
        .or_else(|| file.and_then(|cfg| cfg.user_agent.clone()))
        .unwrap_or_else(|| "transmission-poller".to_string());

    Ok(RpcConfig {
        scheme,
        host,
        port,
        path,
        username,
        password,
        timeout,
        verify_ssl,
        user_agent,
        url,
    })
}

fn resolve_intervals(file: FileIntervals) -> Result<PollIntervals> {
    let defaults = PollIntervals::default();
    let pick = |label: &str, value: Option<f64>, default: Duration| match value {
        Some(secs) => positive_interval(label, secs),
        None => Ok(default),
    };
    Ok(PollIntervals {
        torrents: pick("torrents interval", file.torrents, defaults.torrents)?,
        details: pick("details interval", file.details, defaults.details)?,
        session: pick("session interval", file.session, defaults.session)?,
        stats: pick("stats interval", file.stats, defaults.stats)?,
    })
}

/// Intervals and timeouts above a week are almost certainly typos.
const MAX_SECONDS: f64 = 7.0 * 24.0 * 60.0 * 60.0;

fn positive_interval(label: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        anyhow::bail!("{label} must be a positive number of seconds");
    }
    if secs > MAX_SECONDS {
        anyhow::bail!("{label} must be at most {MAX_SECONDS} seconds");
    }
    Duration::try_from_secs_f64(secs).with_context(|| format!("{label} is out of range"))
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = env::var("TRANSMISSION_POLLER_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    let dir = config_dir()?;
    let modern_path = dir.join("transmission-poller").join("config.toml");
    let legacy_path = dir.join("transmission-poller.toml");
    if !modern_path.exists() && legacy_path.exists() {
        return Some(legacy_path);
    }
    Some(modern_path)
}

fn read_file_config(path: &Path) -> Result<Option<FileConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let parsed: FileConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(Some(parsed))
}

/// Rewrites only `interface.theme`, leaving every other key in place.
fn write_theme(path: &Path, theme: Theme) -> Result<()> {
    let mut document = if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        contents
            .parse::<toml::Table>()
            .with_context(|| format!("failed to parse config file {}", path.display()))?
    } else {
        toml::Table::new()
    };

    let interface = document
        .entry("interface")
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    let Some(interface) = interface.as_table_mut() else {
        anyhow::bail!("`interface` in {} is not a table", path.display());
    };
    interface.insert(
        "theme".to_string(),
        toml::Value::String(theme.as_str().to_string()),
    );

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rendered = toml::to_string_pretty(&document)?;
    fs::write(path, rendered)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
