// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::crypto::init_crypto_provider;
use crate::exporter::auth::AgentIdentity;
use crate::exporter::retry::RetryConfig;
use crate::exporter::supervisor::{ConnectionSupervisor, SupervisorConfig};
use crate::exporter::tls::TlsOptions;
use crate::init::config::AgentConfig;
use crate::privs;
use crate::tail::MonitoredFile;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub async fn run(
        self,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let config = self.config;

        info!(
            client = %config.client_name,
            collector = %format!("{}:{}", config.host, config.port),
            files = config.log_files.len(),
            tls = config.use_ssl,
            "starting tailpost"
        );

        if config.use_ssl {
            init_crypto_provider()?;
        }

        if config.drop_privileges {
            privs::drop_privileges(&config.run_as_user)?;
        }

        let files: Vec<MonitoredFile> = config
            .log_files
            .iter()
            .map(|path| MonitoredFile::new(path.clone(), config.encoding, config.tail_lines))
            .collect();

        let supervisor_config = SupervisorConfig {
            host: config.host,
            port: config.port,
            identity: AgentIdentity {
                client: config.client_name,
                secret: config.password,
            },
            use_tls: config.use_ssl,
            tls: TlsOptions {
                ca_file: config.tls_ca_file,
                skip_verify: config.tls_skip_verify,
            },
            poll_interval: config.poll_interval,
            heartbeat_interval: config.heartbeat_interval,
            connect_timeout: CONNECT_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            retry: RetryConfig::default(),
        };

        let supervisor = ConnectionSupervisor::new(supervisor_config, files);

        let mut task_set: JoinSet<Result<(), Box<dyn Error + Send + Sync>>> = JoinSet::new();
        {
            let cancel = cancel.clone();
            task_set.spawn(async move { supervisor.run(cancel).await });
        }

        while let Some(res) = task_set.join_next().await {
            res??;
        }

        Ok(())
    }
}
