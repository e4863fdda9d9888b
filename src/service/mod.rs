// Service discovery
//
// Passive cache of devkits advertising `_steamos-devkit._tcp` on the local
// network, fed by a background listener.

pub mod backend;
pub mod discovery;
pub mod record;

pub use backend::{BrowseEvent, ChannelBackend, DiscoveryBackend, MdnsBackend};
pub use discovery::DiscoveryCache;
pub use record::{DiscoveryEvent, DiscoveryRecord, Endpoint, EventKind};
