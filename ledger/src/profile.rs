use crate::storage::{Storage, StorageError};
use bonkarena_types::{backup_key, snapshot_key, Cents, PlayerSnapshot};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

/// Owner of the persisted [`PlayerSnapshot`].
///
/// Every change is staged on a copy, written whole, and only then made
/// visible in memory.
pub struct Profile {
    storage: Arc<dyn Storage>,
    key: String,
    backup_key: String,
    snapshot: Mutex<PlayerSnapshot>,
}

impl Profile {
    /// Load the snapshot for `address`.
    ///
    /// A missing or unreadable primary blob falls back to the backup token
    /// total; anything else defaults to zero.
    pub fn load(storage: Arc<dyn Storage>, address: &str) -> Self {
        let key = snapshot_key(address);
        let backup_key = backup_key(address);
        let snapshot = match read_json::<PlayerSnapshot>(storage.as_ref(), &key) {
            Ok(Some(mut snapshot)) => {
                snapshot.address = address.to_string();
                snapshot
            }
            Ok(None) => recover(storage.as_ref(), &backup_key, address),
            Err(err) => {
                warn!(address, %err, "player snapshot unreadable");
                recover(storage.as_ref(), &backup_key, address)
            }
        };
        Self {
            storage,
            key,
            backup_key,
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.lock().clone()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PlayerSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to a staged copy, persist it, then commit it in memory.
    /// If the write fails nothing changes.
    pub fn update<T>(&self, f: impl FnOnce(&mut PlayerSnapshot) -> T) -> Result<T, StorageError> {
        let mut current = self.lock();
        let mut staged = current.clone();
        let out = f(&mut staged);
        self.persist(&staged)?;
        *current = staged;
        Ok(out)
    }

    /// Write `snapshot` under the primary key and refresh the backup.
    pub(crate) fn persist(&self, snapshot: &PlayerSnapshot) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.storage.write(&self.key, &bytes).inspect_err(|err| {
            error!(key = %self.key, %err, "failed to persist player snapshot");
        })?;

        // The backup only matters when the primary is gone
        let backup = serde_json::to_vec(&snapshot.global_token_total)?;
        if let Err(err) = self.storage.write(&self.backup_key, &backup) {
            warn!(key = %self.backup_key, %err, "failed to refresh backup token total");
        }
        Ok(())
    }

    /// Re-write the in-memory snapshot.
    pub fn flush(&self) -> Result<(), StorageError> {
        let current = self.lock();
        self.persist(&current)
    }

    /// What is currently on disk, bypassing the in-memory copy.
    pub fn stored(&self) -> Result<Option<PlayerSnapshot>, StorageError> {
        read_json(self.storage.as_ref(), &self.key)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match storage.read(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn recover(storage: &dyn Storage, backup_key: &str, address: &str) -> PlayerSnapshot {
    let mut snapshot = PlayerSnapshot::new(address);
    match read_json::<Cents>(storage, backup_key) {
        Ok(Some(total)) => {
            info!(address, %total, "restored token total from backup");
            snapshot.global_token_total = total;
        }
        Ok(None) => {}
        Err(err) => warn!(address, %err, "backup token total unreadable"),
    }
    snapshot
}
