//! Test data builders for topologies

use fer::config::{ChannelConfig, Config, DeviceConfig, Options, SocketConfig};

/// Builder for one device entry
pub struct DeviceBuilder {
    cfg: DeviceConfig,
}

impl DeviceBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            cfg: DeviceConfig::new(id),
        }
    }

    /// Add a channel with a single socket
    pub fn channel(mut self, name: &str, kind: &str, method: &str, address: &str) -> Self {
        self.cfg = self
            .cfg
            .with_channel(ChannelConfig::new(name, SocketConfig::new(kind, method, address)));
        self
    }

    /// Add a channel listing several sockets
    pub fn channel_with_sockets(mut self, name: &str, sockets: &[(&str, &str, &str)]) -> Self {
        self.cfg = self.cfg.with_channel(ChannelConfig {
            name: name.to_string(),
            sockets: sockets
                .iter()
                .map(|(kind, method, address)| SocketConfig::new(*kind, *method, *address))
                .collect(),
        });
        self
    }

    pub fn build(self) -> DeviceConfig {
        self.cfg
    }
}

/// Builder for a whole topology
#[derive(Default)]
pub struct TopologyBuilder {
    devices: Vec<DeviceConfig>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, device: DeviceBuilder) -> Self {
        self.devices.push(device.build());
        self
    }

    pub fn build(self) -> Options {
        Options {
            devices: self.devices,
        }
    }

    /// Process configuration running device `id` over `transport`
    pub fn config(self, id: &str, transport: &str) -> Config {
        Config {
            id: id.to_string(),
            transport: transport.to_string(),
            control: "static".to_string(),
            options: self.build(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_builder() {
        let options = TopologyBuilder::new()
            .device(DeviceBuilder::new("a").channel("data", "pair", "bind", "x"))
            .device(DeviceBuilder::new("b"))
            .build();

        assert_eq!(options.devices.len(), 2);
        assert_eq!(options.device("a").unwrap().channels[0].sockets[0].address, "x");
        assert!(options.device("b").unwrap().channels.is_empty());
    }
}
