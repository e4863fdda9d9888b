// Key store: load or lazily create the devkit keypair.
//
// Persists to `<config dir>/devkit_ed25519{,.pub}`. Existing devkits have the
// public half in their authorized keys, so a key that fails to parse is an
// error rather than a reason to generate a fresh one.

use crate::config::constants::{PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
use crate::config::Config;
use crate::errors::{DevkitError, Result};
use ed25519_dalek::SigningKey;
use ssh_key::private::{Ed25519Keypair, KeypairData};
use ssh_key::{LineEnding, PrivateKey};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::permissions::restrict_to_owner;

/// Serializes every provisioning attempt in the process; the load/repair/
/// generate sequence mutates files and permissions.
static PROVISION_LOCK: Mutex<()> = Mutex::new(());

/// The managed keypair and where it lives on disk
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub private_key: PrivateKey,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
}

impl KeyMaterial {
    /// `ssh-ed25519 AAAA... devkit-client:user@host`, as sent to /register
    pub fn public_key_line(&self) -> Result<String> {
        self.private_key
            .public_key()
            .to_openssh()
            .map_err(|e| DevkitError::Configuration(format!("cannot encode public key: {}", e)))
    }
}

#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

enum LoadFailure {
    Missing,
    PermissionDenied(std::io::Error),
    Fatal(DevkitError),
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.key_dir())
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }

    /// Return the keypair, creating it on first use. Idempotent.
    pub fn ensure_key(&self) -> Result<KeyMaterial> {
        let _guard = PROVISION_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let private_path = self.private_key_path();
        let public_path = self.public_key_path();

        let private_key = match load_private_key(&private_path) {
            Ok(key) => key,
            Err(LoadFailure::PermissionDenied(e)) => {
                tracing::warn!(path = %private_path.display(), "{}", e);
                tracing::warn!("Repairing key permissions and loading again");
                restrict_to_owner(&private_path, &public_path)?;
                match load_private_key(&private_path) {
                    Ok(key) => key,
                    Err(LoadFailure::Fatal(e)) => return Err(e),
                    Err(LoadFailure::Missing) | Err(LoadFailure::PermissionDenied(_)) => {
                        return Err(DevkitError::Configuration(format!(
                            "{} is still unreadable after repairing permissions",
                            private_path.display()
                        )))
                    }
                }
            }
            Err(LoadFailure::Missing) => {
                tracing::warn!(
                    path = %private_path.display(),
                    "Key not found - generating a new passwordless devkit key"
                );
                self.generate(&private_path, &public_path)?
            }
            Err(LoadFailure::Fatal(e)) => return Err(e),
        };

        if !public_path.exists() {
            tracing::warn!(path = %public_path.display(), "Public key missing, rewriting it");
            write_public_key(&private_key, &public_path)?;
        }

        restrict_to_owner(&private_path, &public_path)?;

        Ok(KeyMaterial {
            private_key,
            private_key_path: private_path,
            public_key_path: public_path,
        })
    }

    fn generate(&self, private_path: &Path, public_path: &Path) -> Result<PrivateKey> {
        fs::create_dir_all(&self.dir)?;

        // Leftovers may be read-only from an earlier permission fix
        for path in [private_path, public_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let keypair = Ed25519Keypair::from_seed(signing_key.as_bytes());
        let private_key = PrivateKey::new(KeypairData::Ed25519(keypair), key_comment())
            .map_err(|e| DevkitError::Configuration(format!("cannot build key: {}", e)))?;

        let encoded = private_key
            .to_openssh(LineEnding::LF)
            .map_err(|e| DevkitError::Configuration(format!("cannot encode key: {}", e)))?;

        // Write-then-rename so no reader ever sees a partial private key
        let staging = private_path.with_extension("tmp");
        {
            let mut file = create_private_file(&staging)?;
            file.write_all(encoded.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&staging, private_path)?;

        write_public_key(&private_key, public_path)?;

        tracing::info!(path = %private_path.display(), "Generated new devkit key");
        Ok(private_key)
    }
}

fn load_private_key(path: &Path) -> std::result::Result<PrivateKey, LoadFailure> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(LoadFailure::Missing),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return Err(LoadFailure::PermissionDenied(e))
        }
        Err(e) => return Err(LoadFailure::Fatal(e.into())),
    };

    let key = PrivateKey::from_openssh(contents.as_bytes()).map_err(|e| {
        LoadFailure::Fatal(DevkitError::Configuration(format!(
            "{} is not a valid OpenSSH private key ({}); refusing to replace it",
            path.display(),
            e
        )))
    })?;

    if key.is_encrypted() {
        return Err(LoadFailure::Fatal(DevkitError::Configuration(format!(
            "{} is passphrase protected",
            path.display()
        ))));
    }
    Ok(key)
}

fn write_public_key(private_key: &PrivateKey, path: &Path) -> Result<()> {
    let line = private_key
        .public_key()
        .to_openssh()
        .map_err(|e| DevkitError::Configuration(format!("cannot encode public key: {}", e)))?;
    fs::write(path, format!("{}\n", line))?;
    Ok(())
}

#[cfg(unix)]
fn create_private_file(path: &Path) -> Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    Ok(fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?)
}

#[cfg(not(unix))]
fn create_private_file(path: &Path) -> Result<fs::File> {
    Ok(fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

fn key_comment() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("devkit-client:{}@{}", user, host)
}
