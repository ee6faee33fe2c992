//! Node configuration, loaded from a TOML file.

use std::net::Ipv4Addr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub host: HostSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub midi: MidiSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HostSection {
    /// Hostname advertised in Hello beacons. Defaults to the OS hostname.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSection {
    /// Local interface to bind for multicast send/receive. `None` binds all
    /// interfaces on the receiver and falls back to the default route on the
    /// sender.
    #[serde(default)]
    pub interface: Option<Ipv4Addr>,
    #[serde(default)]
    pub enable_loopback: bool,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            interface: None,
            enable_loopback: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MidiSection {
    /// (MIDI input device name, network name to publish it under).
    #[serde(default)]
    pub input_ports: Vec<(String, String)>,
    /// (network name of a remote device, local output port name to route it to).
    #[serde(default)]
    pub output_ports: Vec<(String, String)>,
    #[serde(default = "default_true")]
    pub ignore_midi_clock: bool,
    #[serde(default = "default_true")]
    pub save_cpu_time: bool,
}

impl Default for MidiSection {
    fn default() -> Self {
        Self {
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            ignore_midi_clock: true,
            save_cpu_time: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl NodeConfig {
    pub fn resolved_hostname(&self) -> String {
        self.host.name.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config: NodeConfig = toml::from_str("").unwrap();
        assert!(config.host.name.is_none());
        assert!(config.network.interface.is_none());
        assert!(!config.network.enable_loopback);
        assert!(config.midi.ignore_midi_clock);
        assert!(config.midi.save_cpu_time);
        assert!(config.midi.input_ports.is_empty());
    }

    #[test]
    fn parses_populated_config() {
        let toml_str = r#"
            [host]
            name = "alpha"

            [network]
            interface = "192.168.1.10"
            enable_loopback = true

            [midi]
            input_ports = [["Launchkey Mini", "keys"]]
            output_ports = [["keys", "loopMIDI Port"]]
            ignore_midi_clock = false
        "#;
        let config: NodeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host.name.as_deref(), Some("alpha"));
        assert_eq!(config.network.interface, Some(Ipv4Addr::new(192, 168, 1, 10)));
        assert!(config.network.enable_loopback);
        assert_eq!(
            config.midi.input_ports,
            vec![("Launchkey Mini".to_string(), "keys".to_string())]
        );
        assert!(!config.midi.ignore_midi_clock);
        assert!(config.midi.save_cpu_time);
    }
}
