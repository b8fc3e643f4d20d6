//! CLI argument definitions for trapwire-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Trapwire honeypot log daemon.
///
/// Tails trap service logs, normalizes and enriches each event,
/// persists them in batches and streams stored events to live subscribers.
#[derive(Parser, Debug)]
#[command(name = "trapwire-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to trapwire.toml configuration file.
    #[arg(short, long, default_value = "/etc/trapwire/trapwire.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = DaemonCli::parse_from(["trapwire-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/trapwire/trapwire.toml"));
        assert!(cli.log_level.is_none());
        assert!(!cli.validate);
    }

    #[test]
    fn overrides() {
        let cli = DaemonCli::parse_from([
            "trapwire-daemon",
            "-c",
            "/tmp/t.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--validate",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/t.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert!(cli.validate);
    }
}
