//! Command line flags and the validated server configuration built from them.

use crate::error::ConfigError;
use clap::{Parser, ValueEnum};
use shared::{DEFAULT_DATAGRAM_SIZE, MAX_UDP_PAYLOAD};
use std::path::PathBuf;
use std::time::Duration;

/// What CONNECT does when the session already has a different character bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RebindPolicy {
    /// Refuse the request and keep the existing binding.
    Reject,
    /// Tear the whole session down, then refuse the request.
    ForceDisconnect,
}

/// Command line arguments of the dedicated server.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,
    /// UDP port to listen on
    #[clap(short, long, default_value = "1337")]
    pub port: u16,
    /// Packet workers (defaults to the number of CPU cores)
    #[clap(short, long)]
    pub workers: Option<usize>,
    /// Datagrams buffered between the socket and the workers
    #[clap(long, default_value = "4096")]
    pub queue_capacity: usize,
    /// Largest datagram accepted, in bytes
    #[clap(long, default_value_t = DEFAULT_DATAGRAM_SIZE)]
    pub max_datagram_size: usize,
    /// How long the collector waits on a full queue before dropping (0 waits forever)
    #[clap(long, default_value = "0")]
    pub enqueue_timeout_ms: u64,
    /// Per-call timeout for game store access
    #[clap(long, default_value = "2000")]
    pub store_timeout_ms: u64,
    /// Concurrent game store calls
    #[clap(long, default_value = "8")]
    pub store_pool_size: usize,
    /// Characters allowed per account
    #[clap(long, default_value = "10")]
    pub max_character_slots: u32,
    /// Disconnect sessions silent for this long (0 disables)
    #[clap(long, default_value = "0")]
    pub idle_timeout_secs: u64,
    /// Drop sessions that bind no character within this long (0 disables)
    #[clap(long, default_value = "30")]
    pub unbound_grace_secs: u64,
    /// Behaviour when a session connects a second character
    #[clap(long, value_enum, default_value = "reject")]
    pub rebind_policy: RebindPolicy,
    /// JSON file with templates, NPCs and characters
    #[clap(long, default_value = "data/world.json")]
    pub world: PathBuf,
    /// Time workers get to drain the queue at shutdown
    #[clap(long, default_value = "1000")]
    pub drain_timeout_ms: u64,
    /// Times the collector is restarted after a socket failure
    #[clap(long, default_value = "5")]
    pub max_collector_restarts: u32,
    /// Seconds between statistics log lines (0 disables)
    #[clap(long, default_value = "30")]
    pub stats_interval_secs: u64,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_datagram_size: usize,
    /// `None` blocks the collector until the queue has room.
    pub enqueue_timeout: Option<Duration>,
    pub store_timeout: Duration,
    pub store_pool_size: usize,
    pub max_character_slots: u32,
    pub idle_timeout: Option<Duration>,
    /// Quiet sessions without a character are dropped after this long.
    pub unbound_grace: Option<Duration>,
    pub rebind_policy: RebindPolicy,
    pub drain_timeout: Duration,
    pub max_collector_restarts: u32,
    pub stats_interval: Option<Duration>,
}

impl ServerConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let config = Self {
            bind_addr: format!("{}:{}", args.host, args.port),
            workers: args.workers.unwrap_or_else(default_workers),
            queue_capacity: args.queue_capacity,
            max_datagram_size: args.max_datagram_size,
            enqueue_timeout: non_zero_millis(args.enqueue_timeout_ms),
            store_timeout: Duration::from_millis(args.store_timeout_ms),
            store_pool_size: args.store_pool_size,
            max_character_slots: args.max_character_slots,
            idle_timeout: non_zero_secs(args.idle_timeout_secs),
            unbound_grace: non_zero_secs(args.unbound_grace_secs),
            rebind_policy: args.rebind_policy,
            drain_timeout: Duration::from_millis(args.drain_timeout_ms),
            max_collector_restarts: args.max_collector_restarts,
            stats_interval: non_zero_secs(args.stats_interval_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks limits that clap cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(ConfigError::DatagramSize(self.max_datagram_size));
        }
        if self.store_pool_size == 0 {
            return Err(ConfigError::ZeroStorePool);
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    /// Loopback on an ephemeral port; used by tests and embedders.
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            workers: default_workers(),
            queue_capacity: 4096,
            max_datagram_size: DEFAULT_DATAGRAM_SIZE,
            enqueue_timeout: None,
            store_timeout: Duration::from_secs(2),
            store_pool_size: 8,
            max_character_slots: 10,
            idle_timeout: None,
            unbound_grace: Some(Duration::from_secs(30)),
            rebind_policy: RebindPolicy::Reject,
            drain_timeout: Duration::from_secs(1),
            max_collector_restarts: 5,
            stats_interval: None,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["server"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_args(&parse(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:1337");
        assert!(config.workers >= 1);
        assert_eq!(config.queue_capacity, 4096);
        assert_eq!(config.max_datagram_size, 4096);
        assert_eq!(config.enqueue_timeout, None);
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.unbound_grace, Some(Duration::from_secs(30)));
        assert_eq!(config.rebind_policy, RebindPolicy::Reject);
        assert_eq!(config.stats_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_overrides() {
        let args = parse(&[
            "-H",
            "127.0.0.1",
            "-p",
            "9000",
            "--workers",
            "3",
            "--enqueue-timeout-ms",
            "50",
            "--idle-timeout-secs",
            "120",
            "--unbound-grace-secs",
            "0",
            "--rebind-policy",
            "force-disconnect",
        ]);
        let config = ServerConfig::from_args(&args).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.workers, 3);
        assert_eq!(config.enqueue_timeout, Some(Duration::from_millis(50)));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.unbound_grace, None);
        assert_eq!(config.rebind_policy, RebindPolicy::ForceDisconnect);
    }

    #[test]
    fn test_invalid_limits() {
        let result = ServerConfig::from_args(&parse(&["--workers", "0"]));
        assert_eq!(result.unwrap_err(), ConfigError::ZeroWorkers);

        let result = ServerConfig::from_args(&parse(&["--queue-capacity", "0"]));
        assert_eq!(result.unwrap_err(), ConfigError::ZeroQueueCapacity);

        let result = ServerConfig::from_args(&parse(&["--max-datagram-size", "70000"]));
        assert_eq!(result.unwrap_err(), ConfigError::DatagramSize(70000));

        let result = ServerConfig::from_args(&parse(&["--store-pool-size", "0"]));
        assert_eq!(result.unwrap_err(), ConfigError::ZeroStorePool);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }
}
