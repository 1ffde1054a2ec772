//! Broker descriptor configuration.
//!
//! Each broker ships one TOML file naming how to reach it:
//!
//! ```toml
//! name = "Example Broker"
//! brand_icon = "example-broker"
//!
//! [ipc]
//! name = "/run/example-broker/sock"
//! object = "/com/example/broker"
//! interface = "com.example.Broker"
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing field for broker: {0}")]
    MissingField(&'static str),
    #[error("could not read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize)]
struct DescriptorInt {
    name: Option<String>,
    brand_icon: Option<String>,
    ipc: Option<IpcInt>,
}

#[derive(Debug, Deserialize)]
struct IpcInt {
    name: Option<String>,
    object: Option<String>,
    interface: Option<String>,
}

/// Where and how to place calls against one broker.
#[derive(Debug, Clone)]
pub struct IpcEndpoint {
    /// Socket address of the broker process.
    pub name: String,
    /// Object path the calls are addressed to.
    pub object: String,
    /// Method namespace prefix.
    pub interface: String,
}

#[derive(Debug, Clone)]
pub struct BrokerDescriptor {
    pub name: String,
    pub brand_icon: String,
    pub ipc: IpcEndpoint,
}

impl BrokerDescriptor {
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw: DescriptorInt = toml::from_str(contents)?;

        let name = raw.name.ok_or(ConfigError::MissingField("name"))?;
        let brand_icon = raw
            .brand_icon
            .ok_or(ConfigError::MissingField("brand_icon"))?;
        let ipc = raw.ipc.ok_or(ConfigError::MissingField("ipc"))?;

        Ok(BrokerDescriptor {
            name,
            brand_icon,
            ipc: IpcEndpoint {
                name: ipc.name.ok_or(ConfigError::MissingField("ipc.name"))?,
                object: ipc.object.ok_or(ConfigError::MissingField("ipc.object"))?,
                interface: ipc
                    .interface
                    .ok_or(ConfigError::MissingField("ipc.interface"))?,
            },
        })
    }

    pub fn load<P: AsRef<Path> + std::fmt::Debug>(config_file: P) -> Result<Self, ConfigError> {
        debug!("Broker configuration at {:?}", config_file);
        let contents = fs::read_to_string(&config_file)?;
        Self::parse(&contents)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;

    const FULL: &str = r#"
name = "Example Broker"
brand_icon = "example-broker"

[ipc]
name = "/run/example-broker/sock"
object = "/com/example/broker"
interface = "com.example.Broker"
"#;

    #[test]
    fn test_parse_full_descriptor() {
        let descriptor = BrokerDescriptor::parse(FULL).expect("failed to parse descriptor");
        assert_eq!(descriptor.name, "Example Broker");
        assert_eq!(descriptor.brand_icon, "example-broker");
        assert_eq!(descriptor.ipc.name, "/run/example-broker/sock");
        assert_eq!(descriptor.ipc.object, "/com/example/broker");
        assert_eq!(descriptor.ipc.interface, "com.example.Broker");
    }

    #[test]
    fn test_parse_names_missing_field() {
        for (strip, want) in [
            ("name = \"Example Broker\"\n", "name"),
            ("brand_icon = \"example-broker\"\n", "brand_icon"),
            ("name = \"/run/example-broker/sock\"\n", "ipc.name"),
            ("object = \"/com/example/broker\"\n", "ipc.object"),
            ("interface = \"com.example.Broker\"\n", "ipc.interface"),
        ] {
            let partial = FULL.replacen(strip, "", 1);
            match BrokerDescriptor::parse(&partial) {
                Err(ConfigError::MissingField(field)) => assert_eq!(field, want),
                other => panic!("expected missing field {}, got {:?}", want, other),
            }
        }
    }

    #[test]
    fn test_parse_missing_ipc_table() {
        let partial = "name = \"Example Broker\"\nbrand_icon = \"x\"\n";
        match BrokerDescriptor::parse(partial) {
            Err(ConfigError::MissingField(field)) => assert_eq!(field, "ipc"),
            other => panic!("expected missing ipc table, got {:?}", other),
        }
    }
}
