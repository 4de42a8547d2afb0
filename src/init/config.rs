// SPDX-License-Identifier: Apache-2.0

//! Layered configuration resolution: built-in defaults, then the TOML
//! config file, then command-line/environment overrides, the file losing to
//! the flags. The result is one strongly-typed record with every option
//! enumerated; unknown keys in the file are rejected at load time.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use encoding_rs::Encoding;
use gethostname::gethostname;
use serde::Deserialize;

use crate::init::args::AgentRun;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 21327;
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 1.0;
pub const DEFAULT_TAIL_LINES: u64 = 50;
pub const DEFAULT_ENCODING: &str = "utf-8";
pub const DEFAULT_HEARTBEAT_SECS: f64 = 30.0;
pub const DEFAULT_RUN_AS_USER: &str = "nobody";

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(String),
    Io(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(opt) => write!(f, "required option '{}' is not set", opt),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
            ConfigError::Io(msg) => write!(f, "cannot read configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// The fully resolved agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub client_name: String,
    pub log_files: Vec<PathBuf>,
    pub poll_interval: Duration,
    pub tail_lines: u64,
    pub encoding: &'static Encoding,
    pub use_ssl: bool,
    pub tls_ca_file: Option<String>,
    pub tls_skip_verify: bool,
    pub heartbeat_interval: Duration,
    pub drop_privileges: bool,
    pub run_as_user: String,
}

/// What the TOML file may contain. `deny_unknown_fields` turns typos into
/// load-time errors instead of silently ignored settings.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    password: Option<String>,
    client_name: Option<String>,
    log_files: Option<Vec<PathBuf>>,
    poll_interval: Option<f64>,
    tail_lines: Option<u64>,
    encoding: Option<String>,
    use_ssl: Option<bool>,
    tls_ca_file: Option<String>,
    tls_skip_verify: Option<bool>,
    heartbeat_interval: Option<f64>,
    drop_privileges: Option<bool>,
    run_as_user: Option<String>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", path.display(), e)))
    }
}

/// Resolve the layered configuration. Fatal on missing password/log-files,
/// an empty host, non-positive intervals, or an unusable encoding.
pub fn resolve(args: &AgentRun) -> Result<AgentConfig, ConfigError> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let host = args
        .host
        .clone()
        .or(file.host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    if host.is_empty() {
        return Err(ConfigError::Missing("host"));
    }

    let password = args
        .password
        .clone()
        .or(file.password)
        .ok_or(ConfigError::Missing("password"))?;
    if password.is_empty() {
        return Err(ConfigError::Missing("password"));
    }

    let log_files = if args.log_files.is_empty() {
        file.log_files.unwrap_or_default()
    } else {
        args.log_files.clone()
    };
    if log_files.is_empty() {
        return Err(ConfigError::Missing("log-files"));
    }

    let poll_secs = args
        .poll_interval
        .or(file.poll_interval)
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    let poll_interval = positive_secs("poll-interval", poll_secs)?;

    let heartbeat_secs = args
        .heartbeat_interval
        .or(file.heartbeat_interval)
        .unwrap_or(DEFAULT_HEARTBEAT_SECS);
    let heartbeat_interval = positive_secs("heartbeat-interval", heartbeat_secs)?;

    let encoding_label = args
        .encoding
        .clone()
        .or(file.encoding)
        .unwrap_or_else(|| DEFAULT_ENCODING.to_string());
    let encoding = lookup_encoding(&encoding_label)?;

    let client_name = match args.client_name.clone().or(file.client_name) {
        Some(name) if !name.is_empty() => name,
        _ => gethostname().to_string_lossy().into_owned(),
    };

    Ok(AgentConfig {
        host,
        port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
        password,
        client_name,
        log_files,
        poll_interval,
        tail_lines: args.tail_lines.or(file.tail_lines).unwrap_or(DEFAULT_TAIL_LINES),
        encoding,
        use_ssl: args.use_ssl.or(file.use_ssl).unwrap_or(true),
        tls_ca_file: args.tls_ca_file.clone().or(file.tls_ca_file),
        tls_skip_verify: args
            .tls_skip_verify
            .or(file.tls_skip_verify)
            .unwrap_or(false),
        heartbeat_interval,
        drop_privileges: args
            .drop_privileges
            .or(file.drop_privileges)
            .unwrap_or(false),
        run_as_user: args
            .run_as_user
            .clone()
            .or(file.run_as_user)
            .unwrap_or_else(|| DEFAULT_RUN_AS_USER.to_string()),
    })
}

fn positive_secs(name: &str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::Invalid(format!(
            "{} must be a positive number of seconds, got {}",
            name, secs
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn lookup_encoding(label: &str) -> Result<&'static Encoding, ConfigError> {
    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| ConfigError::Invalid(format!("unknown encoding '{}'", label)))?;
    // Line splitting is byte-level, so the terminator byte must mean the
    // same thing in the configured charset.
    if !encoding.is_ascii_compatible() {
        return Err(ConfigError::Invalid(format!(
            "encoding '{}' is not ASCII-compatible and cannot be tailed line-wise",
            label
        )));
    }
    Ok(encoding)
}
