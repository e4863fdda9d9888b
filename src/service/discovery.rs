// Discovery cache
//
// A listener thread drains the discovery backend and is the only writer of
// the name -> record map. Every change is followed by a `(kind, name)` event
// on a FIFO queue. Readers take snapshots from the map at any time and may
// see slightly stale data.

use crate::config::constants::DEFAULT_DEVKIT_HTTP_PORT;
use crate::errors::{DevkitError, Result};
use dashmap::DashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::backend::{BrowseEvent, DiscoveryBackend, MdnsBackend};
use super::record::{DiscoveryEvent, DiscoveryRecord, Endpoint, EventKind};

/// How often the listener checks for a stop request while idle
const LISTENER_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Shared {
    records: DashMap<String, DiscoveryRecord>,
    /// Bumped after each map change; lookups wait on `changed`
    generation: Mutex<u64>,
    changed: Condvar,
    events: flume::Sender<DiscoveryEvent>,
}

impl Shared {
    fn apply(&self, event: BrowseEvent) {
        match event {
            BrowseEvent::Resolved { name, record } => {
                if !record.is_supported_version() {
                    tracing::warn!(
                        service = %name,
                        txtvers = %String::from_utf8_lossy(record.txtvers().unwrap_or_default()),
                        "Incompatible txtvers, ignoring service"
                    );
                    return;
                }
                let kind = match self.records.insert(name.clone(), record) {
                    Some(_) => EventKind::Update,
                    None => EventKind::Add,
                };
                tracing::info!(service = %name, "Service {}", kind);
                self.publish(kind, name);
            }
            BrowseEvent::Removed { name } => {
                if self.records.remove(&name).is_none() {
                    tracing::warn!(service = %name, "Removed service was not known");
                    return;
                }
                tracing::info!(service = %name, "Service removed");
                self.publish(EventKind::Remove, name);
            }
        }
    }

    fn publish(&self, kind: EventKind, name: String) {
        // Nobody listening is fine; the map is the source of truth
        let _ = self.events.send(DiscoveryEvent { kind, name });

        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        self.changed.notify_all();
    }
}

/// Owned discovery state with an explicit start/stop lifecycle.
pub struct DiscoveryCache {
    shared: Arc<Shared>,
    events: flume::Receiver<DiscoveryEvent>,
    stop: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    lookup_timeout: Duration,
}

impl DiscoveryCache {
    /// Browse the local network over mDNS.
    pub fn start_mdns(lookup_timeout: Duration) -> Result<Self> {
        Self::start(MdnsBackend::browse()?, lookup_timeout)
    }

    /// Spawn the listener thread over `backend`. `lookup_timeout` bounds
    /// `resolve` for names not yet cached.
    pub fn start(backend: impl DiscoveryBackend, lookup_timeout: Duration) -> Result<Self> {
        let (sender, events) = flume::unbounded();
        let shared = Arc::new(Shared {
            records: DashMap::new(),
            generation: Mutex::new(0),
            changed: Condvar::new(),
            events: sender,
        });
        let stop = Arc::new(AtomicBool::new(false));

        let listener = {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            let mut backend = backend;
            std::thread::Builder::new()
                .name("devkit-discovery".to_string())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        match backend.next_event(LISTENER_POLL_INTERVAL) {
                            Ok(Some(event)) => shared.apply(event),
                            Ok(None) => {}
                            Err(e) => {
                                tracing::error!("Discovery listener stopping: {}", e);
                                break;
                            }
                        }
                    }
                    backend.shutdown();
                    tracing::debug!("Discovery listener exited");
                })?
        };

        Ok(Self {
            shared,
            events,
            stop,
            listener: Mutex::new(Some(listener)),
            lookup_timeout,
        })
    }

    /// Stop the listener and wait for it. Cached records stay readable.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Discovery listener panicked");
            }
        }
    }

    /// The FIFO event queue. Only reliable if something keeps draining it;
    /// for current state query the map instead.
    pub fn events(&self) -> flume::Receiver<DiscoveryEvent> {
        self.events.clone()
    }

    pub fn next_event(&self, timeout: Duration) -> Option<DiscoveryEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Known service names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .records
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn address_for(&self, name: &str) -> Option<Ipv4Addr> {
        self.shared
            .records
            .get(name)
            .and_then(|record| record.addresses.first().copied())
    }

    /// Advertised port, or the default devkit HTTP port for unknown names
    pub fn port_for(&self, name: &str) -> u16 {
        self.shared
            .records
            .get(name)
            .map(|record| record.port)
            .unwrap_or(DEFAULT_DEVKIT_HTTP_PORT)
    }

    /// Cached endpoint, without waiting
    pub fn lookup(&self, name: &str) -> Option<Endpoint> {
        let record = self.shared.records.get(name)?.clone();
        to_endpoint(name, record).ok()
    }

    /// Cached endpoint, or wait up to the lookup timeout for the listener to see it.
    pub fn resolve(&self, name: &str) -> Result<Endpoint> {
        if let Some(record) = self.cached(name) {
            tracing::debug!(service = %name, "Service info is in cache");
            return to_endpoint(name, record);
        }

        tracing::debug!(service = %name, "Waiting for discovery of service");
        let started = Instant::now();
        let deadline = started + self.lookup_timeout;
        let mut generation = self
            .shared
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            // Checked under the generation lock so a concurrent insert cannot
            // slip between this check and the wait below
            if let Some(record) = self.cached(name) {
                tracing::debug!(service = %name, elapsed = ?started.elapsed(), "Service discovered");
                return to_endpoint(name, record);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            generation = self
                .shared
                .changed
                .wait_timeout(generation, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        Err(DevkitError::machine_not_found(
            name,
            "mDNS devkit service not found",
        ))
    }

    fn cached(&self, name: &str) -> Option<DiscoveryRecord> {
        self.shared.records.get(name).map(|entry| entry.clone())
    }
}

impl Drop for DiscoveryCache {
    fn drop(&mut self) {
        self.stop();
    }
}

fn to_endpoint(name: &str, record: DiscoveryRecord) -> Result<Endpoint> {
    let address = record.addresses.first().copied().ok_or_else(|| {
        DevkitError::machine_not_found(name, "service did not publish an IPv4 address yet")
    })?;
    Ok(Endpoint {
        name: name.to_string(),
        address,
        port: record.port,
        properties: record.properties,
    })
}
