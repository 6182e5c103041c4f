//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Bridges an RS485 NPK soil sensor to an MQTT telemetry platform.
#[derive(Parser, Debug, Clone)]
#[command(name = "npk-bridge")]
#[command(about = "Polls an NPK soil sensor over Modbus-RTU and publishes readings over MQTT")]
#[command(version)]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "npk-bridge.json5")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Poll and log readings without connecting to the broker.
    #[arg(long, conflicts_with = "once")]
    pub dry_run: bool,

    /// Take a single reading, print it as JSON and exit.
    #[arg(long)]
    pub once: bool,
}

impl BridgeArgs {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = BridgeArgs::try_parse_from(["npk-bridge"]).unwrap();
        assert_eq!(args.config, PathBuf::from("npk-bridge.json5"));
        assert_eq!(args.log_level, None);
        assert!(!args.dry_run);
        assert!(!args.once);
    }

    #[test]
    fn test_flags() {
        let args = BridgeArgs::try_parse_from([
            "npk-bridge",
            "-c",
            "/etc/npk/bridge.json5",
            "--log-level",
            "debug",
            "--once",
        ])
        .unwrap();

        assert_eq!(args.config, PathBuf::from("/etc/npk/bridge.json5"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.once);
    }

    #[test]
    fn test_dry_run_conflicts_with_once() {
        assert!(BridgeArgs::try_parse_from(["npk-bridge", "--dry-run", "--once"]).is_err());
    }
}
