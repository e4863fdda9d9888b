// Discovery records and the events derived from them

use crate::config::constants::CURRENT_TXTVERS;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

/// Raw information published by a devkit, as last observed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiscoveryRecord {
    pub addresses: Vec<Ipv4Addr>,
    pub port: u16,
    /// TXT properties. Values are raw bytes; a key present without a value maps to empty.
    pub properties: HashMap<String, Vec<u8>>,
}

impl DiscoveryRecord {
    pub fn new(addresses: Vec<Ipv4Addr>, port: u16) -> Self {
        Self {
            addresses,
            port,
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl AsRef<[u8]>) -> Self {
        self.properties
            .insert(key.to_string(), value.as_ref().to_vec());
        self
    }

    /// Format version tag (`txtvers`), if advertised
    pub fn txtvers(&self) -> Option<&[u8]> {
        self.properties.get("txtvers").map(Vec::as_slice)
    }

    /// Records without a version tag predate versioning and are accepted.
    pub fn is_supported_version(&self) -> bool {
        match self.txtvers() {
            None => true,
            Some(version) => version == CURRENT_TXTVERS.as_bytes(),
        }
    }
}

/// A resolved, connectable devkit service.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub name: String,
    pub address: Ipv4Addr,
    pub port: u16,
    pub properties: HashMap<String, Vec<u8>>,
}

impl Endpoint {
    fn property_str(&self, key: &str) -> Option<&str> {
        let raw = self.properties.get(key)?;
        match std::str::from_utf8(raw) {
            Ok(s) => Some(s),
            Err(_) => {
                tracing::warn!(service = %self.name, key, "Ignoring non UTF-8 TXT property");
                None
            }
        }
    }

    /// `settings` property, a JSON object
    pub fn settings(&self) -> Option<Map<String, Value>> {
        let raw = self.property_str("settings")?;
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(map),
            Ok(other) => {
                tracing::warn!(service = %self.name, "settings is not a JSON object: {}", other);
                None
            }
            Err(e) => {
                tracing::warn!(service = %self.name, "settings does not parse as JSON: {}", e);
                None
            }
        }
    }

    /// `login` property, the user to ssh in as
    pub fn login(&self) -> Option<String> {
        self.property_str("login")
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// `devkit1` property, a shell-quoted argv
    pub fn entry_point(&self) -> Option<Vec<String>> {
        let raw = self.property_str("devkit1")?;
        match shlex::split(raw) {
            Some(argv) if !argv.is_empty() => Some(argv),
            Some(_) => None,
            None => {
                tracing::warn!(service = %self.name, "devkit1 is not valid shell syntax: {:?}", raw);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Add,
    Update,
    Remove,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Add => "add",
            EventKind::Update => "update",
            EventKind::Remove => "del",
        })
    }
}

/// `(kind, name)` pushed to the event queue after each map change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    pub kind: EventKind,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(record: DiscoveryRecord) -> Endpoint {
        Endpoint {
            name: "deck".to_string(),
            address: Ipv4Addr::new(10, 0, 0, 2),
            port: record.port,
            properties: record.properties,
        }
    }

    #[test]
    fn test_version_tag() {
        let untagged = DiscoveryRecord::new(vec![], 32000);
        assert!(untagged.is_supported_version());
        assert!(untagged.clone().with_property("txtvers", "1").is_supported_version());
        assert!(!untagged.with_property("txtvers", "2").is_supported_version());
    }

    #[test]
    fn test_entry_point_is_shell_split() {
        let record = DiscoveryRecord::new(vec![], 32000)
            .with_property("devkit1", "devkit-1 --flag 'with space'");
        assert_eq!(
            endpoint(record).entry_point(),
            Some(vec![
                "devkit-1".to_string(),
                "--flag".to_string(),
                "with space".to_string()
            ])
        );
    }

    #[test]
    fn test_settings_must_be_object() {
        let good = DiscoveryRecord::new(vec![], 32000).with_property("settings", r#"{"a":1}"#);
        assert_eq!(endpoint(good).settings().unwrap()["a"], 1);

        let bad = DiscoveryRecord::new(vec![], 32000).with_property("settings", "[1]");
        assert!(endpoint(bad).settings().is_none());
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::Add.to_string(), "add");
        assert_eq!(EventKind::Update.to_string(), "update");
        assert_eq!(EventKind::Remove.to_string(), "del");
    }
}
