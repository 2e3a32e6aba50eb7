use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use idpool_tonic_core::idpool::ManagerConfig;

/// Runtime configuration for the `idpool-tonic-server` binary.
///
/// Every value can be given as a CLI flag or an environment variable (a
/// `.env` file is loaded first). Cluster members must agree on the cooldown
/// and expected consumer count; the node id must be unique per member.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "idpool-tonic-server",
    version,
    about = "A gRPC service handing out cluster-shared integer ids"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/idpool.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Identity of this cluster member. Names this node's local pools, so it
    /// must be unique across the cluster and stable across restarts.
    ///
    /// Environment variable: `NODE_ID`
    #[arg(long, env = "NODE_ID", default_value_t = String::from("node-0"))]
    pub node_id: String,

    /// Upper bound on waiting for a pool lock, in milliseconds.
    ///
    /// Environment variable: `LOCK_TIMEOUT_MS`
    #[arg(long, env = "LOCK_TIMEOUT_MS", default_value_t = 10_000)]
    pub lock_timeout_ms: u64,

    /// How many times a commit that raced another writer is retried.
    ///
    /// Environment variable: `COMMIT_RETRIES`
    #[arg(long, env = "COMMIT_RETRIES", default_value_t = 1)]
    pub commit_retries: usize,

    /// Seconds a released id waits before it can be handed out again.
    ///
    /// Environment variable: `ID_COOLDOWN_SECS`
    #[arg(long, env = "ID_COOLDOWN_SECS", default_value_t = 30)]
    pub id_cooldown_secs: u64,

    /// Number of consumers a pool is sized for when no block size is given:
    /// each block is `(high - low + 1) / EXPECTED_CONSUMERS` ids.
    ///
    /// Environment variable: `EXPECTED_CONSUMERS`
    #[arg(long, env = "EXPECTED_CONSUMERS", default_value_t = 10)]
    pub expected_consumers: u32,

    /// Largest `size` accepted by `AllocateIdRange`.
    ///
    /// Environment variable: `MAX_RANGE_SIZE`
    #[arg(long, env = "MAX_RANGE_SIZE", default_value_t = 65_536)]
    pub max_range_size: u32,

    /// Seconds between sweeps of released ids.
    ///
    /// Environment variable: `RECLAIM_INTERVAL_SECS`
    #[arg(long, env = "RECLAIM_INTERVAL_SECS", default_value_t = 30)]
    pub reclaim_interval_secs: u64,

    /// Seconds to wait for in-flight requests to finish on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub manager: ManagerConfig,
    pub max_range_size: u32,
    pub reclaim_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.lock_timeout_ms == 0 {
            bail!("LOCK_TIMEOUT_MS must be greater than 0");
        }

        if args.max_range_size == 0 {
            bail!("MAX_RANGE_SIZE must be greater than 0");
        }

        if args.reclaim_interval_secs == 0 {
            bail!("RECLAIM_INTERVAL_SECS must be greater than 0");
        }

        let manager = ManagerConfig::new(args.node_id)
            .with_lock_timeout(Duration::from_millis(args.lock_timeout_ms))
            .with_commit_retries(args.commit_retries)
            .with_expected_consumers(args.expected_consumers)
            .with_delayed_time_sec(args.id_cooldown_secs);

        if let Err(e) = manager.validate() {
            bail!("Invalid manager config: {e}");
        }

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            manager,
            max_range_size: args.max_range_size,
            reclaim_interval: Duration::from_secs(args.reclaim_interval_secs),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }
}
