//! Command-line arguments

use std::time::Duration;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "mcpxd")]
#[command(version, about = "Aggregate MCP servers behind one HTTP front door")]
pub struct Cli {
    /// Config file path or http(s) URL (.json, .yaml/.yml or .toml)
    #[arg(short, long, env = "MCPX_CONFIG", default_value = "config.json")]
    pub config: String,

    /// Accept invalid TLS certificates when fetching a config URL
    #[arg(long)]
    pub insecure: bool,

    /// Seconds to wait for open connections to drain on shutdown
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub shutdown_timeout: u64,
}

impl Cli {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["mcpxd"]).unwrap();
        assert_eq!(cli.config, "config.json");
        assert!(!cli.insecure);
        assert_eq!(cli.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_explicit_arguments() {
        let cli = Cli::try_parse_from([
            "mcpxd",
            "-c",
            "https://config.example/mcpx.yaml",
            "--insecure",
            "--shutdown-timeout",
            "12",
        ])
        .unwrap();
        assert_eq!(cli.config, "https://config.example/mcpx.yaml");
        assert!(cli.insecure);
        assert_eq!(cli.shutdown_timeout(), Duration::from_secs(12));
    }

    #[test]
    fn test_version_flag_short_circuits() {
        let err = Cli::try_parse_from(["mcpxd", "-V"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
