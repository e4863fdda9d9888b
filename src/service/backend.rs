// Discovery backends
//
// The cache consumes a stream of resolved/removed services from a backend.
// Production uses mDNS via `mdns-sd`; `ChannelBackend` lets another source
// (or a test) feed events directly.

use crate::config::constants::DEVKIT_SERVICE_TYPE;
use crate::errors::{DevkitError, Result};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::net::IpAddr;
use std::time::Duration;

use super::record::DiscoveryRecord;

/// One observation from the discovery protocol, keyed by unqualified service name.
#[derive(Debug, Clone)]
pub enum BrowseEvent {
    Resolved {
        name: String,
        record: DiscoveryRecord,
    },
    Removed {
        name: String,
    },
}

/// Source of browse events, driven from the cache's listener thread.
pub trait DiscoveryBackend: Send + 'static {
    /// Wait up to `timeout` for the next event; `Ok(None)` when nothing arrived.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<BrowseEvent>>;

    /// Release protocol resources. Called once, from the listener thread.
    fn shutdown(&mut self) {}
}

/// Browses `_steamos-devkit._tcp.local.` on all interfaces.
pub struct MdnsBackend {
    daemon: ServiceDaemon,
    receiver: flume::Receiver<ServiceEvent>,
}

impl MdnsBackend {
    pub fn browse() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| {
            DevkitError::Configuration(format!("failed to create mDNS daemon: {}", e))
        })?;
        let receiver = daemon.browse(DEVKIT_SERVICE_TYPE).map_err(|e| {
            DevkitError::Configuration(format!("failed to browse {}: {}", DEVKIT_SERVICE_TYPE, e))
        })?;
        tracing::debug!("Browsing for {}", DEVKIT_SERVICE_TYPE);
        Ok(Self { daemon, receiver })
    }
}

impl DiscoveryBackend for MdnsBackend {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<BrowseEvent>> {
        let event = match self.receiver.recv_timeout(timeout) {
            Ok(event) => event,
            Err(flume::RecvTimeoutError::Timeout) => return Ok(None),
            Err(flume::RecvTimeoutError::Disconnected) => {
                return Err(DevkitError::Network {
                    target: DEVKIT_SERVICE_TYPE.to_string(),
                    reason: "mDNS daemon stopped".to_string(),
                })
            }
        };

        match event {
            ServiceEvent::ServiceResolved(info) => {
                let Some(name) = unqualified_name(info.get_fullname()) else {
                    tracing::warn!("Ignoring unexpected service {}", info.get_fullname());
                    return Ok(None);
                };
                let record = record_from_info(&info);
                tracing::debug!(
                    service = %name,
                    addresses = ?record.addresses,
                    port = record.port,
                    "Service resolved"
                );
                Ok(Some(BrowseEvent::Resolved {
                    name: name.to_string(),
                    record,
                }))
            }
            ServiceEvent::ServiceRemoved(_, fullname) => match unqualified_name(&fullname) {
                Some(name) => Ok(Some(BrowseEvent::Removed {
                    name: name.to_string(),
                })),
                None => Ok(None),
            },
            other => {
                tracing::trace!("mDNS event {:?}", other);
                Ok(None)
            }
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.daemon.stop_browse(DEVKIT_SERVICE_TYPE) {
            tracing::debug!("stop_browse: {}", e);
        }
        if let Err(e) = self.daemon.shutdown() {
            tracing::debug!("mDNS shutdown: {}", e);
        }
    }
}

/// `deck._steamos-devkit._tcp.local.` -> `deck`
pub fn unqualified_name(fullname: &str) -> Option<&str> {
    fullname
        .strip_suffix(DEVKIT_SERVICE_TYPE)
        .and_then(|s| s.strip_suffix('.'))
        .filter(|s| !s.is_empty())
}

fn record_from_info(info: &ServiceInfo) -> DiscoveryRecord {
    let mut addresses: Vec<_> = info
        .get_addresses()
        .iter()
        .filter_map(|addr| match addr {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
        .collect();
    addresses.sort();

    let mut record = DiscoveryRecord::new(addresses, info.get_port());
    for property in info.get_properties().iter() {
        record.properties.insert(
            property.key().to_string(),
            property.val().map(<[u8]>::to_vec).unwrap_or_default(),
        );
    }
    record
}

/// Backend fed through a channel.
pub struct ChannelBackend {
    receiver: flume::Receiver<BrowseEvent>,
}

impl ChannelBackend {
    pub fn channel() -> (flume::Sender<BrowseEvent>, Self) {
        let (sender, receiver) = flume::unbounded();
        (sender, Self { receiver })
    }
}

impl DiscoveryBackend for ChannelBackend {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<BrowseEvent>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(flume::RecvTimeoutError::Timeout) => Ok(None),
            // Feeder went away; keep serving what is cached
            Err(flume::RecvTimeoutError::Disconnected) => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}
