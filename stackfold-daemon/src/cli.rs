//! CLI argument definitions for stackfold-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use stackfold_core::config::StackfoldConfig;

/// Stackfold multi-line log aggregation daemon.
///
/// Reads log lines from stdin, folds multi-line traces per source and
/// ships the resulting messages to the configured sink.
#[derive(Parser, Debug)]
#[command(name = "stackfold-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to stackfold.toml configuration file.
    #[arg(short, long, default_value = "/etc/stackfold/stackfold.toml")]
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

impl DaemonCli {
    /// Apply command-line overrides on top of a loaded configuration.
    ///
    /// The caller must re-validate afterwards.
    pub fn apply_overrides(&self, config: &mut StackfoldConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_flags() {
        let cli = DaemonCli::try_parse_from([
            "stackfold-daemon",
            "--config",
            "/tmp/sf.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--validate",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/sf.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.validate);
    }

    #[test]
    fn default_config_path() {
        let cli = DaemonCli::try_parse_from(["stackfold-daemon"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/stackfold/stackfold.toml"));
        assert!(!cli.validate);
    }

    #[test]
    fn overrides_replace_general_settings() {
        let cli = DaemonCli::try_parse_from(["stackfold-daemon", "--log-format", "pretty"]).unwrap();
        let mut config = StackfoldConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.general.log_level, "info");
    }
}
