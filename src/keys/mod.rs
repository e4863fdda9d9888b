// Devkit authentication key
//
// One Ed25519 keypair per user profile, generated on first use and written in
// OpenSSH format so the system ssh and rsync tools can use it directly.

mod permissions;
pub mod store;

pub use store::{KeyMaterial, KeyStore};
