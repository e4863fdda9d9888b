// Machine resolution
//
// Turns what the user typed into a connection descriptor. Short names are
// tried as discovery names before plain hosts, since discovery also yields
// the login and settings without an extra round trip.

use crate::config::constants::DEFAULT_DEVKIT_HTTP_PORT;
use crate::errors::{DevkitError, Result};
use crate::service::DiscoveryCache;
use std::sync::Arc;

use super::descriptor::ConnectionDescriptor;
use super::http::DevkitHttpClient;
use super::names::{has_service_suffix, normalize_name, service_instance_name};

/// How to interpret a machine name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum NameType {
    #[default]
    Guess,
    ServiceName,
    Address,
}

#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub name: String,
    pub name_type: NameType,
    /// Caller-supplied login; discovery and metadata never override it
    pub login: Option<String>,
    pub entry_point: Vec<String>,
    pub need_login: bool,
    pub need_entry_point: bool,
    pub http_port: u16,
}

impl ResolveRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            name_type: NameType::Guess,
            login: None,
            entry_point: Vec::new(),
            need_login: true,
            need_entry_point: true,
            http_port: DEFAULT_DEVKIT_HTTP_PORT,
        }
    }

    pub fn name_type(mut self, name_type: NameType) -> Self {
        self.name_type = name_type;
        self
    }

    pub fn login(mut self, login: Option<String>) -> Self {
        self.login = login;
        self
    }

    pub fn entry_point(mut self, argv: Vec<String>) -> Self {
        self.entry_point = argv;
        self
    }

    pub fn need(mut self, login: bool, entry_point: bool) -> Self {
        self.need_login = login;
        self.need_entry_point = entry_point;
        self
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    ServiceName,
    Address,
}

enum Attempt {
    Found(ConnectionDescriptor),
    /// Not found this way; the next strategy may still succeed
    TryNext(DevkitError),
}

/// Ordered interpretations to try for `name`
fn strategies_for(name: &str, name_type: NameType) -> &'static [Strategy] {
    match name_type {
        NameType::ServiceName => &[Strategy::ServiceName],
        NameType::Address => &[Strategy::Address],
        NameType::Guess if has_service_suffix(name) => &[Strategy::ServiceName],
        NameType::Guess if name.contains('.') => &[Strategy::Address],
        NameType::Guess => &[Strategy::ServiceName, Strategy::Address],
    }
}

pub struct MachineResolver {
    discovery: Option<Arc<DiscoveryCache>>,
    http: DevkitHttpClient,
}

impl MachineResolver {
    /// `discovery` may be `None` when mDNS is unavailable; service-name
    /// lookups then report the machine as not found.
    pub fn new(discovery: Option<Arc<DiscoveryCache>>, http: DevkitHttpClient) -> Self {
        Self { discovery, http }
    }

    pub fn http(&self) -> &DevkitHttpClient {
        &self.http
    }

    pub fn resolve(&self, request: &ResolveRequest) -> Result<ConnectionDescriptor> {
        let mut descriptor = self.locate(request)?;
        self.complete_metadata(&mut descriptor, request);
        Ok(descriptor)
    }

    fn locate(&self, request: &ResolveRequest) -> Result<ConnectionDescriptor> {
        let strategies = strategies_for(&request.name, request.name_type);
        let mut last_miss = None;

        for strategy in strategies {
            if let Some(miss) = &last_miss {
                tracing::warn!("{}; assuming resolvable address instead", miss);
            }
            match self.attempt(*strategy, request)? {
                Attempt::Found(descriptor) => return Ok(descriptor),
                Attempt::TryNext(miss) => last_miss = Some(miss),
            }
        }

        Err(last_miss.unwrap_or_else(|| {
            DevkitError::machine_not_found(&request.name, "no resolution strategy applies")
        }))
    }

    fn attempt(&self, strategy: Strategy, request: &ResolveRequest) -> Result<Attempt> {
        match strategy {
            Strategy::ServiceName => match self.by_service_name(request) {
                Ok(descriptor) => Ok(Attempt::Found(descriptor)),
                Err(e) if e.is_machine_not_found() => Ok(Attempt::TryNext(e)),
                Err(e) => Err(e),
            },
            Strategy::Address => self.by_address(request).map(Attempt::Found),
        }
    }

    fn by_service_name(&self, request: &ResolveRequest) -> Result<ConnectionDescriptor> {
        let name = service_instance_name(&request.name);
        tracing::info!("Looking for machine with service name: {}", name);

        let discovery = self.discovery.as_ref().ok_or_else(|| {
            DevkitError::machine_not_found(&name, "service discovery is not running")
        })?;
        let endpoint = discovery.resolve(&name)?;
        tracing::info!("Machine IP: {}", endpoint.address);

        let mut descriptor = ConnectionDescriptor::new(
            &name,
            normalize_name(&name),
            endpoint.address.to_string(),
            request.login.clone(),
            request.entry_point.clone(),
            request.http_port,
        );
        descriptor.fill_from_endpoint(&endpoint);
        Ok(descriptor)
    }

    fn by_address(&self, request: &ResolveRequest) -> Result<ConnectionDescriptor> {
        let host = request.name.trim();
        if host.trim_end_matches('.').is_empty() {
            return Err(DevkitError::machine_not_found(
                &request.name,
                "empty address",
            ));
        }
        // The host is used exactly as typed; only the comparison key is normalized
        Ok(ConnectionDescriptor::new(
            &request.name,
            normalize_name(host),
            host.to_string(),
            request.login.clone(),
            request.entry_point.clone(),
            request.http_port,
        ))
    }

    /// Best-effort fill of login and entry point from the devkit's HTTP service.
    /// A failed fetch leaves fields unset; nothing is defaulted.
    fn complete_metadata(&self, descriptor: &mut ConnectionDescriptor, request: &ResolveRequest) {
        if descriptor.needs_metadata(request.need_login, request.need_entry_point) {
            match self.http.properties(&descriptor.address, descriptor.http_port) {
                Ok(properties) => descriptor.fill_from_properties(properties),
                Err(DevkitError::Network { target, reason }) => {
                    tracing::debug!("{} unavailable: {}", target, reason);
                }
                Err(e) => tracing::warn!("Ignoring devkit properties: {}", e),
            }
        }

        // Older devkits only publish the login name
        if descriptor.login.is_none() && request.need_login {
            match self.http.login_name(&descriptor.address, descriptor.http_port) {
                Ok(login) if !login.is_empty() => descriptor.login = Some(login),
                Ok(_) => tracing::error!("The devkit returned an empty login name"),
                Err(e) => tracing::error!(
                    "Unable to get the login name from the devkit, check it is running: {}",
                    e
                ),
            }
        }
    }
}
