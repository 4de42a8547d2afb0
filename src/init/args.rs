// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use std::path::PathBuf;

/// Command-line surface of the agent. Every tailing/connection option is
/// optional here so the layered resolution in [`crate::init::config`] can
/// tell "explicitly set" from "fall back to file or default".
#[derive(Debug, Args, Clone, Default)]
pub struct AgentRun {
    /// TOML configuration file; flags and environment win over it
    #[arg(long, env = "TAILPOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Collector address
    #[arg(long, env = "TAILPOST_HOST")]
    pub host: Option<String>,

    /// Collector port
    #[arg(long, env = "TAILPOST_PORT")]
    pub port: Option<u16>,

    /// Shared secret used to authenticate to the collector
    #[arg(long, env = "TAILPOST_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Client name reported to the collector (defaults to the hostname)
    #[arg(long, env = "TAILPOST_CLIENT_NAME")]
    pub client_name: Option<String>,

    /// File to tail; repeat for multiple files
    #[arg(
        long = "log-file",
        env = "TAILPOST_LOG_FILES",
        value_delimiter = ',',
        action = clap::ArgAction::Append
    )]
    pub log_files: Vec<PathBuf>,

    /// Tailing poll period in seconds
    #[arg(long, env = "TAILPOST_POLL_INTERVAL")]
    pub poll_interval: Option<f64>,

    /// Lines sent from each file's tail at first connect
    #[arg(long, env = "TAILPOST_TAIL_LINES")]
    pub tail_lines: Option<u64>,

    /// Charset the tailed files are decoded with
    #[arg(long, env = "TAILPOST_ENCODING")]
    pub encoding: Option<String>,

    /// Wrap the collector connection in TLS
    #[arg(long, env = "TAILPOST_USE_SSL")]
    pub use_ssl: Option<bool>,

    /// PEM file with the CA certificate to trust instead of native roots
    #[arg(long, env = "TAILPOST_TLS_CA_FILE")]
    pub tls_ca_file: Option<String>,

    /// Trust any collector certificate (self-signed test setups only)
    #[arg(long, env = "TAILPOST_TLS_SKIP_VERIFY")]
    pub tls_skip_verify: Option<bool>,

    /// Heartbeat period in seconds
    #[arg(long, env = "TAILPOST_HEARTBEAT_INTERVAL")]
    pub heartbeat_interval: Option<f64>,

    /// Drop elevated rights after startup
    #[arg(long, env = "TAILPOST_DROP_PRIVILEGES")]
    pub drop_privileges: Option<bool>,

    /// Unprivileged identity to switch to
    #[arg(long, env = "TAILPOST_RUN_AS_USER")]
    pub run_as_user: Option<String>,

    /// Daemonize
    #[arg(long, env = "TAILPOST_DAEMON", default_value = "false")]
    pub daemon: bool,

    /// PID file
    #[arg(long, env = "TAILPOST_PID_FILE", default_value = "/tmp/tailpost.pid")]
    pub pid_file: String,

    /// Log file for daemon output
    #[arg(long, env = "TAILPOST_DAEMON_LOG", default_value = "/tmp/tailpost.log")]
    pub daemon_log: String,
}
