//! File-backed credential store.
//!
//! One JSON record per tenant at `<dir>/<tenant_key>.json`. Writes go to a
//! unique temp file in the same directory and are renamed into place, so a
//! concurrent reader sees either the old record or the new one.

use super::{tenant_key, CredentialStore, Credentials, EncryptionKey, Sealed, StoreError};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// On-disk record. Plain records are the serialized bundle itself; sealed
/// records wrap the AES-GCM encrypted bundle.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Record {
    Sealed { sealed: Sealed },
    Plain(Credentials),
}

/// Credential store keeping one owner-only file per tenant.
pub struct FileCredentialStore {
    dir: PathBuf,
    key: Option<EncryptionKey>,
    tmp_seq: AtomicU64,
}

impl FileCredentialStore {
    /// Opens (or creates) the store directory.
    ///
    /// A new directory is created with mode `0700`. An existing directory with
    /// group or other permission bits is used as-is, with a warning.
    pub fn open<P: AsRef<Path>>(dir: P, key: Option<EncryptionKey>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        if dir.exists() {
            check_dir_permissions(&dir);
        } else {
            create_private_dir(&dir)
                .with_context(|| format!("Failed to create credential directory {}", dir.display()))?;
            debug!(dir = %dir.display(), "Created credential directory");
        }

        Ok(Self {
            dir,
            key,
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// Path of the record for `tenant`.
    pub fn record_path(&self, tenant: &str) -> PathBuf {
        self.dir.join(format!("{}.json", tenant_key(tenant)))
    }

    fn encode(&self, credentials: &Credentials) -> anyhow::Result<Vec<u8>> {
        let record = match &self.key {
            Some(key) => {
                let plaintext = serde_json::to_vec(credentials)?;
                Record::Sealed {
                    sealed: key.seal(&plaintext)?,
                }
            }
            None => Record::Plain(credentials.clone()),
        };
        Ok(serde_json::to_vec_pretty(&record)?)
    }

    fn decode(&self, tenant: &str, bytes: &[u8]) -> Result<Credentials, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            tenant: tenant.to_string(),
            reason,
        };

        let record: Record = serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
        match (record, &self.key) {
            (Record::Plain(credentials), None) => Ok(credentials),
            (Record::Plain(credentials), Some(_)) => {
                warn!(tenant = %tenant, "Loaded unencrypted credential record; it will be encrypted on next save");
                Ok(credentials)
            }
            (Record::Sealed { sealed }, Some(key)) => {
                let plaintext = key.open(&sealed).map_err(|e| corrupt(e.to_string()))?;
                serde_json::from_slice(&plaintext).map_err(|e| corrupt(e.to_string()))
            }
            (Record::Sealed { .. }, None) => Err(corrupt(
                "record is encrypted but no encryption key is configured".to_string(),
            )),
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = path.with_file_name(tmp_name);

        let result = (|| {
            let mut file = private_file_options().open(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, tenant: &str, credentials: &Credentials) -> Result<(), StoreError> {
        let bytes = self
            .encode(credentials)
            .context("Failed to encode credential record")?;
        let path = self.record_path(tenant);
        self.write_atomic(&path, &bytes)?;
        debug!(tenant = %tenant, "Saved credentials");
        Ok(())
    }

    fn load(&self, tenant: &str) -> Result<Credentials, StoreError> {
        match fs::read(self.record_path(tenant)) {
            Ok(bytes) => self.decode(tenant, &bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotAuthenticated {
                tenant: tenant.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, tenant: &str) -> Result<bool, StoreError> {
        match fs::remove_file(self.record_path(tenant)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn check_dir_permissions(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    match fs::metadata(dir) {
        Ok(meta) => {
            let mode = meta.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                warn!(
                    dir = %dir.display(),
                    mode = %format!("{:o}", mode),
                    "Credential directory is accessible by other users; expected 700"
                );
            }
        }
        Err(e) => warn!(dir = %dir.display(), error = %e, "Could not inspect credential directory"),
    }
}

#[cfg(not(unix))]
fn check_dir_permissions(_dir: &Path) {}

fn private_file_options() -> fs::OpenOptions {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(FILE_MODE);
    }
    opts
}
