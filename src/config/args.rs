//! Command-line arguments shared by every device binary

use super::{DEFAULT_CONTROL, DEFAULT_TRANSPORT};
use crate::logging::DEFAULT_LOG_FILTER;
use clap::Parser;
use std::path::PathBuf;

/// Arguments selecting which device of a topology this process runs
#[derive(Debug, Clone, Parser)]
#[command(about = "Run a fer device", long_about = None)]
pub struct DeviceArgs {
    /// Device id, as listed in the topology file
    #[arg(long)]
    pub id: String,

    /// Transport driver (inproc, tcp)
    #[arg(long, default_value = DEFAULT_TRANSPORT)]
    pub transport: String,

    /// Path to the JSON or TOML topology file
    #[arg(long)]
    pub mq_config: PathBuf,

    /// Device control mode
    #[arg(long, default_value = DEFAULT_CONTROL)]
    pub control: String,

    /// Write logs to this file instead of stdout
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log filter directive (RUST_LOG takes precedence)
    #[arg(long, default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args =
            DeviceArgs::try_parse_from(["dev", "--id", "sink1", "--mq-config", "topo.json"])
                .unwrap();
        assert_eq!(args.id, "sink1");
        assert_eq!(args.transport, DEFAULT_TRANSPORT);
        assert_eq!(args.control, DEFAULT_CONTROL);
        assert_eq!(args.mq_config, PathBuf::from("topo.json"));
        assert!(args.log_file.is_none());
    }

    #[test]
    fn test_id_is_required() {
        assert!(DeviceArgs::try_parse_from(["dev", "--mq-config", "topo.json"]).is_err());
    }

    #[test]
    fn test_transport_override() {
        let args = DeviceArgs::try_parse_from([
            "dev",
            "--id",
            "p",
            "--mq-config",
            "t.toml",
            "--transport",
            "inproc",
        ])
        .unwrap();
        assert_eq!(args.transport, "inproc");
    }
}
