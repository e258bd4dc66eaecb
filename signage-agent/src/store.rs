//! Durable storage for the paired device identity
//!
//! The identity is written as one JSON document
//! (`{ "playerId", "deviceToken", "pairedAt" }`) under a single key:
//! - [`KeyringStore`]: OS secure keyring (default)
//! - [`FileStore`]: JSON file, for headless boxes without a secret service
//! - [`MemoryStore`]: process-local, for tests and demos

use keyring::Entry;
use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::debug;

use crate::identity::DeviceIdentity;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where the paired identity lives between runs
pub trait IdentityStore: Send + Sync {
    fn load(&self) -> Result<Option<DeviceIdentity>, StoreError>;
    fn save(&self, identity: &DeviceIdentity) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// Identity stored in the OS keyring
pub struct KeyringStore {
    service: String,
    account: String,
}

impl KeyringStore {
    pub fn new(service: &str, account: &str) -> Self {
        Self {
            service: service.to_string(),
            account: account.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, StoreError> {
        Ok(Entry::new(&self.service, &self.account)?)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new("signage-agent", "device-identity")
    }
}

impl IdentityStore for KeyringStore {
    fn load(&self) -> Result<Option<DeviceIdentity>, StoreError> {
        match self.entry()?.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, identity: &DeviceIdentity) -> Result<(), StoreError> {
        let raw = serde_json::to_string(identity)?;
        self.entry()?.set_password(&raw)?;
        debug!("Identity saved to keyring ({}/{})", self.service, self.account);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Identity stored as a JSON file
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl IdentityStore for FileStore {
    fn load(&self) -> Result<Option<DeviceIdentity>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, identity: &DeviceIdentity) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write then rename so a crash never leaves half a credential behind
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(identity)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Identity saved to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Identity held in memory only
#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<DeviceIdentity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: DeviceIdentity) -> Self {
        Self {
            slot: Mutex::new(Some(identity)),
        }
    }
}

impl IdentityStore for MemoryStore {
    fn load(&self) -> Result<Option<DeviceIdentity>, StoreError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, identity: &DeviceIdentity) -> Result<(), StoreError> {
        *self.slot.lock() = Some(identity.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot.lock() = None;
        Ok(())
    }
}
