// Devkit HTTP service client
//
// The devkit runs a small HTTP service next to its mDNS advertisement:
//
//   GET  /properties.json  -> { settings: "<json>", devkit1: str | [str], login: str }
//   GET  /login-name       -> bare username (older devkits)
//   POST /register         -> public key + marker, text/plain

use crate::config::constants::{REGISTER_MAGIC_PHRASE, REGISTER_TIMEOUT, REQUEST_TIMEOUT};
use crate::errors::{DevkitError, Result};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Body of `/properties.json`; any subset of fields may be present.
#[derive(Debug, Default, Deserialize)]
pub struct DevkitProperties {
    /// JSON object serialized as a string
    #[serde(default)]
    pub settings: Option<String>,
    #[serde(default)]
    pub devkit1: Option<EntryPointField>,
    #[serde(default)]
    pub login: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EntryPointField {
    Single(String),
    Argv(Vec<String>),
}

impl EntryPointField {
    pub fn into_argv(self) -> Vec<String> {
        match self {
            EntryPointField::Single(program) => vec![program],
            EntryPointField::Argv(argv) => argv,
        }
    }
}

impl DevkitProperties {
    pub fn settings(&self) -> Option<Map<String, Value>> {
        let raw = self.settings.as_deref()?;
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) | Err(_) => {
                tracing::warn!("properties.json settings is not a JSON object: {:?}", raw);
                None
            }
        }
    }
}

pub struct DevkitHttpClient {
    http: Client,
}

impl DevkitHttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DevkitError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    pub fn with_default_timeout() -> Result<Self> {
        Self::new(REQUEST_TIMEOUT)
    }

    pub fn properties(&self, address: &str, port: u16) -> Result<DevkitProperties> {
        let url = format!("http://{}:{}/properties.json", address, port);
        tracing::debug!("Requesting {}", url);
        let body = self.get_text(&url)?;
        let properties: DevkitProperties =
            serde_json::from_str(&body).map_err(|e| DevkitError::Protocol {
                source_name: url.clone(),
                reason: e.to_string(),
            })?;
        tracing::debug!("-> {:?}", properties);
        Ok(properties)
    }

    pub fn login_name(&self, address: &str, port: u16) -> Result<String> {
        let url = format!("http://{}:{}/login-name", address, port);
        tracing::debug!("Requesting {}", url);
        Ok(self.get_text(&url)?.trim().to_string())
    }

    /// Submit the public key for authorization. The devkit may prompt its user
    /// first, hence the longer timeout.
    pub fn register_key(&self, address: &str, port: u16, public_key_line: &str) -> Result<()> {
        let url = format!("http://{}:{}/register", address, port);
        let body = format!("{} {}\n", public_key_line.trim_end(), REGISTER_MAGIC_PHRASE);

        tracing::info!("Registering with devkit at {}", address);
        let response = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "text/plain")
            .timeout(REGISTER_TIMEOUT)
            .body(body)
            .send()
            .map_err(|e| network_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            tracing::error!("Registration rejected with HTTP {}: {}", status, detail.trim());
            return Err(DevkitError::Registration {
                address: address.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn get_text(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).send().map_err(|e| network_error(url, e))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(DevkitError::Network {
                target: url.to_string(),
                reason: format!("HTTP {}: {}", status.as_u16(), detail.trim()),
            });
        }
        response.text().map_err(|e| network_error(url, e))
    }
}

fn network_error(url: &str, e: reqwest::Error) -> DevkitError {
    DevkitError::Network {
        target: url.to_string(),
        reason: e.to_string(),
    }
}
