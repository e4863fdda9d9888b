// Connection descriptor: everything needed to talk to one devkit

use crate::service::Endpoint;
use serde::Serialize;
use serde_json::{Map, Value};

use super::http::DevkitProperties;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionDescriptor {
    /// Name as resolved (service suffixes stripped in service-name mode)
    pub name: String,
    pub normalized_name: String,
    /// IPv4 literal from discovery, or the host as given in address mode
    pub address: String,
    pub login: Option<String>,
    /// argv of the devkit-side agent (`devkit1`)
    pub entry_point: Vec<String>,
    pub settings: Map<String, Value>,
    pub http_port: u16,
}

impl ConnectionDescriptor {
    pub(crate) fn new(
        name: &str,
        normalized_name: String,
        address: String,
        login: Option<String>,
        entry_point: Vec<String>,
        http_port: u16,
    ) -> Self {
        Self {
            name: name.to_string(),
            normalized_name,
            address,
            login,
            entry_point,
            settings: Map::new(),
            http_port,
        }
    }

    /// Take values advertised over discovery. Only unset fields are filled.
    pub fn fill_from_endpoint(&mut self, endpoint: &Endpoint) {
        if self.settings.is_empty() {
            if let Some(settings) = endpoint.settings() {
                self.settings = settings;
            }
        }
        if self.login.is_none() {
            self.login = endpoint.login();
            if let Some(login) = &self.login {
                tracing::debug!("Machine login: {}", login);
            }
        }
        if self.entry_point.is_empty() {
            if let Some(argv) = endpoint.entry_point() {
                tracing::debug!("devkit1 entry point: {:?}", argv);
                self.entry_point = argv;
            }
        }
    }

    /// Take values from the devkit's properties.json. Only unset fields are filled.
    pub fn fill_from_properties(&mut self, properties: DevkitProperties) {
        if self.settings.is_empty() {
            if let Some(settings) = properties.settings() {
                self.settings = settings;
            }
        }
        if self.login.is_none() {
            self.login = properties.login.filter(|l| !l.is_empty());
        }
        if self.entry_point.is_empty() {
            self.entry_point = properties
                .devkit1
                .map(|entry| entry.into_argv())
                .unwrap_or_default();
        }
    }

    pub fn needs_metadata(&self, need_login: bool, need_entry_point: bool) -> bool {
        (self.login.is_none() || self.entry_point.is_empty()) && (need_login || need_entry_point)
    }

    /// `http://address:port`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::DiscoveryRecord;
    use std::net::Ipv4Addr;

    fn descriptor(login: Option<&str>) -> ConnectionDescriptor {
        ConnectionDescriptor::new(
            "deck",
            "deck".to_string(),
            "10.0.0.2".to_string(),
            login.map(str::to_string),
            Vec::new(),
            32000,
        )
    }

    #[test]
    fn test_explicit_login_wins_over_discovery() {
        let record = DiscoveryRecord::new(vec![Ipv4Addr::new(10, 0, 0, 2)], 32000)
            .with_property("login", "deck")
            .with_property("devkit1", "devkit-1");
        let endpoint = Endpoint {
            name: "deck".to_string(),
            address: Ipv4Addr::new(10, 0, 0, 2),
            port: 32000,
            properties: record.properties,
        };

        let mut explicit = descriptor(Some("root"));
        explicit.fill_from_endpoint(&endpoint);
        assert_eq!(explicit.login.as_deref(), Some("root"));
        assert_eq!(explicit.entry_point, vec!["devkit-1".to_string()]);

        let mut unset = descriptor(None);
        unset.fill_from_endpoint(&endpoint);
        assert_eq!(unset.login.as_deref(), Some("deck"));
    }

    #[test]
    fn test_needs_metadata() {
        let mut d = descriptor(Some("deck"));
        assert!(d.needs_metadata(false, true));
        assert!(!d.needs_metadata(false, false));
        d.entry_point = vec!["devkit-1".to_string()];
        assert!(!d.needs_metadata(true, true));
    }

    #[test]
    fn test_base_url() {
        assert_eq!(descriptor(None).base_url(), "http://10.0.0.2:32000");
    }
}
