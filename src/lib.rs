// SteamOS devkit client
// Library exports

pub mod capture;
pub mod config;
pub mod errors;
pub mod games;
pub mod keys;
pub mod machine;
pub mod remote;
pub mod service;
pub mod transfer;

pub use errors::{DevkitError, Result};
