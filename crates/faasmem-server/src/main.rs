//! faasmem - HTTP service handing out shared-memory segments hosted in
//! serverless action containers.

mod api;
mod observability;

use anyhow::{bail, Context, Result};
use api::{ApiServer, ServerConfig};
use clap::{Parser, ValueEnum};
use faasmem_core::runtime::cli::{CliConfig, CliRuntime};
use faasmem_core::runtime::rest::{RestConfig, RestRuntime};
use faasmem_core::runtime::LocalRuntime;
use faasmem_core::{ActionArtifact, ActionRuntime, KeyPolicy, Manager, PoolConfig};
use observability::{init_tracing, LogFormat};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Which platform actions are provisioned on
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RuntimeKind {
    /// Control-plane REST API
    Rest,
    /// The `wsk` command line
    Cli,
    /// In-process actions with real local segments
    Local,
}

/// Shared-memory segments backed by a pool of serverless actions.
#[derive(Parser, Debug)]
#[command(name = "faasmem")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port of the HTTP front end
    #[arg(long, default_value_t = 7070)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Platform adapter
    #[arg(long, value_enum, default_value_t = RuntimeKind::Rest)]
    runtime: RuntimeKind,

    /// Control-plane host, with optional scheme
    #[arg(long, env = "OPENWHISK_APIHOST")]
    api_host: Option<String>,

    #[arg(long, env = "OPENWHISK_AUTH_USER", default_value = "")]
    auth_user: String,

    #[arg(
        long,
        env = "OPENWHISK_AUTH_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    auth_password: String,

    /// Platform namespace
    #[arg(long, default_value = "guest")]
    namespace: String,

    /// Accept self-signed control-plane certificates
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    insecure: bool,

    /// Path of the `wsk` binary
    #[arg(long, default_value = "wsk")]
    wsk: PathBuf,

    /// Properties file passed to `wsk` as WSK_CONFIG_FILE
    #[arg(long)]
    wsk_config: Option<PathBuf>,

    /// Action source uploaded on provisioning
    #[arg(long, default_value = "action/__main__.py")]
    code: PathBuf,

    /// Container image of every action
    #[arg(long, default_value = "kingdo/action-python-v3.10:latest")]
    image: String,

    /// Warm idle actions to keep provisioned
    #[arg(long, default_value_t = 1)]
    pool_size: usize,

    /// Memory every action needs besides its segments, in MB
    #[arg(long, default_value_t = 64)]
    base_memory: u32,

    /// Capacity of a shared action, in MiB
    #[arg(long, default_value_t = 512)]
    shared_capacity: u32,

    /// Requests above this many MiB get an action of their own
    #[arg(long, default_value_t = 256)]
    sharing_threshold: u32,

    /// Seconds between keepalive pings
    #[arg(long, default_value_t = 15)]
    health_interval: u64,

    /// Seconds before an unanswered ping counts as failed
    #[arg(long, default_value_t = 60)]
    ping_timeout: u64,

    /// Seconds to wait after a failed background provisioning
    #[arg(long, default_value_t = 10)]
    retry_cooldown: u64,

    /// Parallel background provisioning attempts
    #[arg(long, default_value_t = 2)]
    max_concurrent_provisions: usize,

    /// `free-list` or `random-probe`
    #[arg(long, default_value = "free-list")]
    key_policy: KeyPolicy,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Log at debug level regardless of RUST_LOG
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            pool_size: self.pool_size,
            base_overhead_mb: self.base_memory,
            shared_capacity: self.shared_capacity,
            sharing_threshold: self.sharing_threshold,
            key_policy: self.key_policy,
            health_interval: Duration::from_secs(self.health_interval),
            ping_timeout: Duration::from_secs(self.ping_timeout),
            retry_cooldown: Duration::from_secs(self.retry_cooldown),
            max_concurrent_provisions: self.max_concurrent_provisions,
            artifact: ActionArtifact {
                code_path: self.code.clone(),
                image: self.image.clone(),
            },
            ..PoolConfig::default()
        }
    }

    fn action_runtime(&self) -> Result<Arc<dyn ActionRuntime>> {
        let ping_timeout = Duration::from_secs(self.ping_timeout);
        Ok(match self.runtime {
            RuntimeKind::Rest => {
                let Some(api_host) = self.api_host.clone() else {
                    bail!("--api-host (or OPENWHISK_APIHOST) is required with --runtime rest");
                };
                let runtime = RestRuntime::new(RestConfig {
                    api_host,
                    namespace: self.namespace.clone(),
                    auth_user: self.auth_user.clone(),
                    auth_password: self.auth_password.clone(),
                    accept_invalid_certs: self.insecure,
                    ping_timeout,
                })
                .context("Failed to build control-plane client")?;
                Arc::new(runtime)
            }
            RuntimeKind::Cli => Arc::new(CliRuntime::new(CliConfig {
                wsk: self.wsk.clone(),
                config_file: self.wsk_config.clone(),
                ping_timeout,
            })),
            RuntimeKind::Local => Arc::new(LocalRuntime::new()),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.debug)?;

    let runtime = cli.action_runtime()?;
    let config = cli.pool_config();
    tracing::info!(
        runtime = runtime.kind(),
        pool_size = config.pool_size,
        shared_capacity = config.shared_capacity,
        sharing_threshold = config.sharing_threshold,
        "starting action pool"
    );

    let manager = Arc::new(
        Manager::start(runtime, config)
            .await
            .context("Failed to start action pool")?,
    );

    let server = ApiServer::new(
        ServerConfig::new(cli.host.clone(), cli.port),
        Arc::clone(&manager),
    );
    let served = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    tracing::info!("tearing down actions");
    manager.shutdown().await;
    served.context("HTTP server failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["faasmem", "--api-host", "10.0.0.1"]).unwrap();
        assert_eq!(cli.port, 7070);
        assert_eq!(cli.runtime, RuntimeKind::Rest);
        assert!(cli.insecure);

        let config = cli.pool_config();
        assert_eq!(config.base_overhead_mb, 64);
        assert_eq!(config.shared_capacity, 512);
        assert_eq!(config.sharing_threshold, 256);
        assert_eq!(config.key_policy, KeyPolicy::FreeList);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tuning_flags() {
        let cli = Cli::try_parse_from([
            "faasmem",
            "--runtime",
            "local",
            "--pool-size",
            "4",
            "--key-policy",
            "random-probe",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.runtime, RuntimeKind::Local);
        assert_eq!(cli.log_format, LogFormat::Json);

        let config = cli.pool_config();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.key_policy, KeyPolicy::RandomProbe);
    }

    #[test]
    fn test_rest_requires_host() {
        let cli = Cli::try_parse_from(["faasmem", "--runtime", "rest"]).unwrap();
        if cli.api_host.is_none() {
            assert!(cli.action_runtime().is_err());
        }
    }

    #[test]
    fn test_bad_key_policy_is_rejected() {
        assert!(Cli::try_parse_from(["faasmem", "--key-policy", "lottery"]).is_err());
    }
}
