//! # CLI Interface
//!
//! Defines the command-line argument structure for `rumor-node` using
//! `clap` derive. Cluster harnesses start the binary without arguments, so
//! every flag has a default and running the node needs no subcommand.

use clap::{Args, Parser, Subcommand};

use rumor_protocol::config::{FIRST_ATTEMPT_TIMEOUT, RETRY_TIMEOUT};
use rumor_protocol::GossipConfig;

use crate::logging::LogFormat;

/// Rumor gossip broadcast node.
///
/// Reads newline-delimited JSON messages on stdin, writes replies and peer
/// traffic to stdout, and logs to stderr.
#[derive(Parser, Debug)]
#[command(
    name = "rumor-node",
    about = "Rumor gossip broadcast node",
    version,
    propagate_version = true
)]
pub struct RumorNodeCli {
    /// Optional subcommand. Without one, the node starts.
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Node settings, used when no subcommand is given.
    #[command(flatten)]
    pub run: RunArgs,
}

/// Subcommands besides the default "run the node".
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print version information and exit.
    Version,
}

/// Settings for a running node.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Deadline for the first delivery attempt to each neighbor, in
    /// milliseconds.
    #[arg(
        long,
        env = "RUMOR_FIRST_ATTEMPT_TIMEOUT_MS",
        default_value_t = FIRST_ATTEMPT_TIMEOUT.as_millis() as u64
    )]
    pub first_attempt_timeout_ms: u64,

    /// Deadline for each retry attempt, in milliseconds. Must be shorter
    /// than the first-attempt deadline.
    #[arg(
        long,
        env = "RUMOR_RETRY_TIMEOUT_MS",
        default_value_t = RETRY_TIMEOUT.as_millis() as u64
    )]
    pub retry_timeout_ms: u64,

    /// Log output format.
    #[arg(long, env = "RUMOR_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics on this port. Disabled when omitted.
    #[arg(long, env = "RUMOR_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

impl RunArgs {
    /// The engine configuration these flags describe.
    pub fn gossip_config(&self) -> GossipConfig {
        GossipConfig {
            first_attempt_timeout_ms: self.first_attempt_timeout_ms,
            retry_timeout_ms: self.retry_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        RumorNodeCli::command().debug_assert();
    }

    #[test]
    fn no_arguments_runs_with_defaults() {
        let cli = RumorNodeCli::try_parse_from(["rumor-node"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.gossip_config(), GossipConfig::default());
        assert_eq!(cli.run.metrics_port, None);
    }

    #[test]
    fn timeouts_are_overridable() {
        let cli = RumorNodeCli::try_parse_from([
            "rumor-node",
            "--first-attempt-timeout-ms",
            "800",
            "--retry-timeout-ms",
            "100",
            "--log-format",
            "json",
        ])
        .unwrap();

        let config = cli.run.gossip_config();
        assert_eq!(config.first_attempt_timeout_ms, 800);
        assert_eq!(config.retry_timeout_ms, 100);
        assert_eq!(cli.run.log_format, LogFormat::Json);
    }
}
