// Machine resolution
//
// User input + interpretation mode -> connection descriptor, via the
// discovery cache and/or the devkit's HTTP metadata.

pub mod descriptor;
pub mod http;
pub mod names;
pub mod resolver;

pub use descriptor::ConnectionDescriptor;
pub use http::{DevkitHttpClient, DevkitProperties, EntryPointField};
pub use names::{normalize_name, normalize_service_name};
pub use resolver::{MachineResolver, NameType, ResolveRequest};

use crate::errors::Result;
use crate::keys::KeyMaterial;

/// Authorize `key` on the devkit described by `descriptor`.
pub fn register(
    http: &DevkitHttpClient,
    descriptor: &ConnectionDescriptor,
    key: &KeyMaterial,
) -> Result<()> {
    let public_key = key.public_key_line()?;
    http.register_key(&descriptor.address, descriptor.http_port, &public_key)
}
