//! Cluster-wide shared secret.
//!
//! Every node that bootstraps receives the same secret.  It is read from a
//! single file; when the file is missing a new one is generated and
//! written.  A failed write is logged and the in-memory value is still
//! used, so a restart before a successful write yields a different secret.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{info, warn};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Random bytes behind a generated secret.
const SECRET_BYTES: usize = 64;

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("failed to create {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// The shared secret handed to bootstrapping nodes.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(String);

impl SharedSecret {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short SHA-256 fingerprint, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl From<String> for SharedSecret {
    fn from(value: String) -> Self {
        SharedSecret(value)
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret({})", self.fingerprint())
    }
}

/// Load the secret at `path`, generating and persisting one if absent.
///
/// An existing file is never overwritten, even when it cannot be read.
pub fn load_or_create(path: &Path) -> SharedSecret {
    match fs::read(path) {
        Ok(bytes) => {
            let secret = SharedSecret(String::from_utf8_lossy(&bytes).trim().to_string());
            if secret.as_str().is_empty() {
                warn!(
                    "Shared key file {} is empty, nodes will receive an empty key",
                    path.display()
                );
            }
            info!(
                "Loaded existing shared key from {} (fingerprint {})",
                path.display(),
                secret.fingerprint()
            );
            return secret;
        }
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            let secret = generate();
            warn!(
                "Failed to read shared key from {}: {}, using unsaved key (fingerprint {})",
                path.display(),
                e,
                secret.fingerprint()
            );
            return secret;
        }
        Err(_) => {}
    }

    let secret = generate();
    match persist(path, &secret) {
        Ok(()) => info!(
            "Generated and saved new shared key to {} (fingerprint {})",
            path.display(),
            secret.fingerprint()
        ),
        Err(e) => warn!("Using unsaved shared key: {}", e),
    }
    secret
}

fn generate() -> SharedSecret {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    SharedSecret(BASE64.encode(bytes))
}

fn persist(path: &Path, secret: &SharedSecret) -> Result<(), SecretError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| SecretError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let write_err = |source| SecretError::Write {
        path: path.to_path_buf(),
        source,
    };

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(write_err)?;
        file.write_all(secret.as_str().as_bytes()).map_err(write_err)?;
    }

    #[cfg(not(unix))]
    fs::write(path, secret.as_str()).map_err(write_err)?;

    Ok(())
}
