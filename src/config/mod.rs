//! Configuration module for fer
//!
//! This module handles the static description of a device topology:
//! - Which devices exist and which channels each of them owns
//! - For every channel, the socket to create (type, bind/connect, address)
//! - Command-line arguments selecting the device, transport and topology file
//!
//! # Topology files
//!
//! Topology files use the FairMQ layout, in JSON or TOML (chosen by file
//! extension):
//!
//! ```json
//! {"fairMQOptions": {"devices": [
//!     {"id": "sampler1", "channels": [
//!         {"name": "data1", "sockets": [
//!             {"type": "push", "method": "bind", "address": "tcp://*:5555"}]}]}]}}
//! ```
//!
//! # Example
//!
//! ```ignore
//! use fer::config::{Config, DeviceArgs};
//! use clap::Parser;
//!
//! let args = DeviceArgs::parse();
//! let config = Config::from_args(&args)?;
//! let device = config.options.device(&config.id);
//! ```

pub mod args;

pub use args::DeviceArgs;

use crate::error::{FerError, Result};
use crate::mq::SocketKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Default transport driver name
pub const DEFAULT_TRANSPORT: &str = "tcp";

/// Default control mode
pub const DEFAULT_CONTROL: &str = "static";

/// Default socket send/receive buffer size (messages)
pub const DEFAULT_BUF_SIZE: usize = 1000;

// ==================== Process Configuration ====================

/// Everything a process needs to run one device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Id of the device this process runs
    pub id: String,
    /// Name of the transport driver to open
    pub transport: String,
    /// Control mode (recorded for diagnostics)
    pub control: String,
    /// Parsed topology
    pub options: Options,
}

impl Config {
    /// Build a configuration from parsed command-line arguments, loading the
    /// topology file they point at
    pub fn from_args(args: &DeviceArgs) -> Result<Self> {
        let options = Options::load(&args.mq_config)?;
        Ok(Self {
            id: args.id.clone(),
            transport: args.transport.clone(),
            control: args.control.clone(),
            options,
        })
    }

    /// The topology entry of the device this process runs
    pub fn device(&self) -> Result<&DeviceConfig> {
        self.options
            .device(&self.id)
            .ok_or_else(|| FerError::NoSuchDevice(self.id.clone()))
    }
}

// ==================== Topology ====================

#[derive(Debug, Serialize, Deserialize)]
struct TopologyFile {
    #[serde(rename = "fairMQOptions")]
    options: Options,
}

/// The set of devices making up a topology
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Options {
    /// Find a device by name (its id, or key when the id is empty)
    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|dev| dev.name() == name)
    }

    /// Parse a JSON topology document
    pub fn from_json(text: &str) -> Result<Self> {
        let file: TopologyFile = serde_json::from_str(text)
            .map_err(|e| FerError::Config(format!("Invalid JSON topology: {}", e)))?;
        Ok(file.options)
    }

    /// Parse a TOML topology document
    pub fn from_toml(text: &str) -> Result<Self> {
        let file: TopologyFile = toml::from_str(text)
            .map_err(|e| FerError::Config(format!("Invalid TOML topology: {}", e)))?;
        Ok(file.options)
    }

    /// Load a topology file, picking the format from its extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FerError::Config(format!("Failed to read topology {:?}: {}", path, e))
        })?;

        let options = if is_toml(path) {
            Self::from_toml(&text)?
        } else {
            Self::from_json(&text)?
        };

        tracing::debug!(
            "Loaded topology from {:?} ({} devices)",
            path,
            options.devices.len()
        );
        Ok(options)
    }

    /// Serialize to a pretty-printed JSON topology document
    pub fn to_json_pretty(&self) -> Result<String> {
        let file = TopologyFile {
            options: self.clone(),
        };
        serde_json::to_string_pretty(&file).map_err(|e| FerError::Serialization(e.to_string()))
    }

    /// Save as a topology file, picking the format from its extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = if is_toml(path) {
            let file = TopologyFile {
                options: self.clone(),
            };
            toml::to_string_pretty(&file).map_err(|e| FerError::Serialization(e.to_string()))?
        } else {
            self.to_json_pretty()?
        };
        std::fs::write(path, text)?;
        Ok(())
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

/// One device's slice of the topology
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl DeviceConfig {
    /// Create a device entry with the given id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Add a channel (builder style)
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channels.push(channel);
        self
    }

    /// The device name: its id, or its key when no id is set
    pub fn name(&self) -> &str {
        if self.id.is_empty() {
            &self.key
        } else {
            &self.id
        }
    }

    /// Find the first channel entry with the given name
    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|ch| ch.name == name)
    }
}

/// A named channel and its socket specifications
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub sockets: Vec<SocketConfig>,
}

impl ChannelConfig {
    /// Create a channel with a single socket specification
    pub fn new(name: impl Into<String>, socket: SocketConfig) -> Self {
        Self {
            name: name.into(),
            sockets: vec![socket],
        }
    }
}

/// How a socket is established and where
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Socket type, e.g. "push" or "sub"
    #[serde(rename = "type")]
    pub kind: String,
    /// "bind" or "connect"
    pub method: String,
    /// Transport address, e.g. "tcp://*:5555"
    pub address: String,
    #[serde(rename = "sndBufSize", default = "default_buf_size")]
    pub send_buf_size: usize,
    #[serde(rename = "rcvBufSize", default = "default_buf_size")]
    pub recv_buf_size: usize,
    #[serde(rename = "rateLogging", default)]
    pub rate_logging: u32,
}

fn default_buf_size() -> usize {
    DEFAULT_BUF_SIZE
}

impl SocketConfig {
    pub fn new(
        kind: impl Into<String>,
        method: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            method: method.into(),
            address: address.into(),
            send_buf_size: DEFAULT_BUF_SIZE,
            recv_buf_size: DEFAULT_BUF_SIZE,
            rate_logging: 0,
        }
    }

    /// Parse the connection method
    pub fn method(&self) -> Result<SocketMethod> {
        self.method.parse()
    }

    /// Parse the socket type
    pub fn kind(&self) -> Result<SocketKind> {
        self.kind
            .parse()
            .map_err(|_| FerError::UnknownSocketKind(self.kind.clone()))
    }
}

/// Whether a channel's socket listens or dials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketMethod {
    /// Listen at the configured address
    Bind,
    /// Dial the configured address
    Connect,
}

impl FromStr for SocketMethod {
    type Err = FerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bind" => Ok(SocketMethod::Bind),
            "connect" => Ok(SocketMethod::Connect),
            _ => Err(FerError::InvalidSocketMethod(s.to_string())),
        }
    }
}

impl fmt::Display for SocketMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketMethod::Bind => write!(f, "bind"),
            SocketMethod::Connect => write!(f, "connect"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "fairMQOptions": {
            "devices": [
                {
                    "id": "sampler1",
                    "channels": [{
                        "name": "data1",
                        "sockets": [{
                            "type": "push",
                            "method": "bind",
                            "address": "tcp://*:5555",
                            "sndBufSize": 500,
                            "rcvBufSize": 500,
                            "rateLogging": 1
                        }]
                    }]
                },
                {
                    "key": "sink",
                    "channels": [{
                        "name": "data2",
                        "sockets": [{
                            "type": "pull",
                            "method": "connect",
                            "address": "tcp://localhost:5556"
                        }]
                    }]
                }
            ]
        }
    }"#;

    #[test]
    fn test_parse_json_topology() {
        let opts = Options::from_json(SAMPLE).unwrap();
        assert_eq!(opts.devices.len(), 2);

        let sampler = opts.device("sampler1").unwrap();
        let sock = &sampler.channels[0].sockets[0];
        assert_eq!(sock.kind, "push");
        assert_eq!(sock.method().unwrap(), SocketMethod::Bind);
        assert_eq!(sock.send_buf_size, 500);
        assert_eq!(sock.rate_logging, 1);
    }

    #[test]
    fn test_device_name_falls_back_to_key() {
        let opts = Options::from_json(SAMPLE).unwrap();
        let sink = opts.device("sink").unwrap();
        assert_eq!(sink.name(), "sink");
        assert!(sink.id.is_empty());

        // Buffer sizes default when omitted
        let sock = &sink.channel("data2").unwrap().sockets[0];
        assert_eq!(sock.recv_buf_size, DEFAULT_BUF_SIZE);
    }

    #[test]
    fn test_missing_device() {
        let config = Config {
            id: "processor".to_string(),
            options: Options::from_json(SAMPLE).unwrap(),
            ..Default::default()
        };
        assert!(matches!(config.device(), Err(FerError::NoSuchDevice(_))));
    }

    #[test]
    fn test_socket_method_parsing() {
        assert_eq!("BIND".parse::<SocketMethod>().unwrap(), SocketMethod::Bind);
        assert_eq!(
            " connect ".parse::<SocketMethod>().unwrap(),
            SocketMethod::Connect
        );
        assert!(matches!(
            "broadcast".parse::<SocketMethod>(),
            Err(FerError::InvalidSocketMethod(m)) if m == "broadcast"
        ));
    }

    #[test]
    fn test_unknown_socket_kind() {
        let sock = SocketConfig::new("gossip", "bind", "inproc://x");
        assert!(matches!(sock.kind(), Err(FerError::UnknownSocketKind(_))));
    }

    #[test]
    fn test_parse_toml_topology() {
        let text = r#"
            [[fairMQOptions.devices]]
            id = "processor"

            [[fairMQOptions.devices.channels]]
            name = "data1"

            [[fairMQOptions.devices.channels.sockets]]
            type = "pull"
            method = "connect"
            address = "tcp://localhost:5555"
        "#;
        let opts = Options::from_toml(text).unwrap();
        let dev = opts.device("processor").unwrap();
        assert_eq!(dev.channels[0].sockets[0].address, "tcp://localhost:5555");
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        assert!(matches!(
            Options::from_json("{\"devices\": []}"),
            Err(FerError::Config(_))
        ));
    }

    #[test]
    fn test_save_and_load_roundtrip_formats() {
        let dir = tempfile::tempdir().unwrap();
        let opts = Options::from_json(SAMPLE).unwrap();

        for file in ["topology.json", "topology.toml"] {
            let path = dir.path().join(file);
            opts.save(&path).unwrap();
            assert_eq!(Options::load(&path).unwrap(), opts, "format of {}", file);
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = Options::load("/nonexistent/topology.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read topology"));
    }
}
