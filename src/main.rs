//! ha-sidecar -- operator CLI over the HA coordination core.
//!
//! Each subcommand refreshes the configuration store once, runs a single
//! store or engine operation against the fresh snapshot and exits.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use ha_sidecar::config::Config;
use ha_sidecar::HaContext;

/// Command-line arguments for the HA sidecar.
#[derive(Parser, Debug)]
#[command(
    name = "ha-sidecar",
    version,
    about = "HA coordination sidecar for consensus database engines"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "ha-sidecar.example.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Claim the leader lease for this member and write the HA config.
    Init {
        /// Cluster system identifier.
        #[arg(long)]
        sys_id: String,
        /// Extra `key=value` pairs stored in the extras record.
        #[arg(long, value_parser = parse_key_value)]
        extra: Vec<(String, String)>,
    },
    /// Print the current cluster snapshot as JSON.
    Status,
    /// Print the local engine's role.
    Role,
    /// Check that the consensus group has exactly one leader.
    Health,
    /// List engine membership and roster health.
    Members,
    /// Move engine leadership to this member.
    Promote,
    /// Remove a member from the consensus group.
    Leave {
        member: String,
    },
    /// Acquire or renew the leader lease for this member.
    Lease,
    /// Run a shell command on a member.
    Exec {
        member: String,
        command: String,
        /// Deadline in seconds (defaults to `dcs.exec_timeout_secs`).
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    if config.logging.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ha_sidecar::config::load_config(&cli.config)?;
    config.apply_env_overrides();
    init_tracing(&config);
    info!("Loaded configuration from {}", cli.config);

    if config.observability.metrics {
        let addr: SocketAddr = config.observability.metrics_addr.parse()?;
        ha_sidecar::metrics::init_metrics(addr)?;
        ha_sidecar::metrics::describe_metrics();
        info!("Prometheus metrics listening on {}", addr);
    }

    let ctx = HaContext::from_config(config).await?;
    let store = &ctx.store;
    let engine = &ctx.engine;

    if let Command::Init { sys_id, extra } = &cli.command {
        let extra = (!extra.is_empty())
            .then(|| extra.iter().cloned().collect::<BTreeMap<String, String>>());
        store.init(sys_id, extra).await?;
    }

    let cluster = store.refresh().await?;

    match cli.command {
        Command::Init { .. } => {
            let leader = cluster.leader.as_ref().map(|l| l.name()).unwrap_or_default();
            println!(
                "initialized {} (sys-id {}, leader {})",
                store.cluster_name(),
                cluster.sys_id,
                leader
            );
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(cluster.as_ref())?);
        }
        Command::Role => {
            println!("{:?}", engine.role(&cluster).await);
        }
        Command::Health => {
            if !engine.is_cluster_healthy(&cluster).await {
                anyhow::bail!("cluster {} is unhealthy", store.cluster_name());
            }
            println!("healthy");
        }
        Command::Members => {
            for addr in engine.member_addrs(&cluster).await {
                println!("engine  {addr}");
            }
            for member in &cluster.members {
                let healthy = engine.is_member_healthy(&cluster, member).await;
                let leader = engine.is_leader_member(&cluster, Some(member));
                println!(
                    "roster  {} address={} healthy={} leader={}",
                    member.name, member.address, healthy, leader
                );
            }
        }
        Command::Promote => {
            engine.promote(&cluster).await?;
            println!("promoted {}", engine.member_name());
        }
        Command::Leave { member } => {
            engine.leave_member_from_cluster(&cluster, &member).await?;
            println!("{member} left the cluster");
        }
        Command::Lease => {
            if store.update_lease().await? {
                println!("lease held by {}", engine.member_name());
            } else {
                warn!("Lease not acquired");
                let holder = cluster
                    .leader
                    .as_ref()
                    .map(|l| l.name().to_string())
                    .unwrap_or_default();
                anyhow::bail!("lease not acquired (holder: '{holder}')");
            }
        }
        Command::Exec {
            member,
            command,
            timeout,
        } => {
            let secs = timeout.unwrap_or(ctx.config.dcs.exec_timeout_secs);
            let timeout = Duration::from_secs(secs);
            let output = store.execute_on_member(&member, &command, timeout).await?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
        }
    }

    Ok(())
}
