// Project-wide constants
//
// Centralised here so service names, ports and timeouts have one source of
// truth. Import via `use crate::config::constants::*;`.

use std::time::Duration;

/// DNS-SD service type advertised by devkits, without the domain.
pub const DEVKIT_SERVICE: &str = "_steamos-devkit._tcp";

/// mDNS domain.
pub const LOCAL_DOMAIN: &str = "local";

/// Fully-qualified service type, as browsed.
pub const DEVKIT_SERVICE_TYPE: &str = "_steamos-devkit._tcp.local.";

/// Port of the devkit's HTTP service when discovery did not say otherwise.
pub const DEFAULT_DEVKIT_HTTP_PORT: u16 = 32000;

/// TXT record format version this client understands.
///
/// Records advertising any other `txtvers` are ignored entirely.
pub const CURRENT_TXTVERS: &str = "1";

/// Bound on a single synchronous discovery lookup.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// LAN hosts answer quickly or not at all.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The devkit may show a confirmation prompt before answering /register.
pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);

/// Marker appended to registration requests to cut down drive-by key submissions.
pub const REGISTER_MAGIC_PHRASE: &str = "900b919520e4cf601998a71eec318fec";

/// Per-user directory (under the platform config dir) holding keys and game data.
pub const CONFIG_DIR_NAME: &str = "steamos-devkit";

/// File names of the managed keypair.
pub const PRIVATE_KEY_FILE: &str = "devkit_ed25519";
pub const PUBLIC_KEY_FILE: &str = "devkit_ed25519.pub";
