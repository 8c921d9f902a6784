//! Local key-value persistence.
//!
//! One JSON document per key inside a directory, standing in for the
//! browser's local storage. Entries that no longer parse are discarded and
//! the caller falls back to defaults.

use crate::error::{AppError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const SESSION_KEY: &str = "heatpump_session";
pub const SIMULATION_MODE_KEY: &str = "heatpump_simulation_mode";
pub const HEATING_CONTROL_KEY: &str = "heatpump_heating_control";
pub const EMAIL_CONFIG_KEY: &str = "heatpump_email_config";
pub const MONITORING_STATE_KEY: &str = "heatpump_monitoring_state";

#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read and decode the entry under `key`.
    ///
    /// Missing entries yield `None`. An entry that fails to decode is
    /// deleted and also yields `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = match self.path(key) {
            Ok(p) => p,
            Err(e) => {
                warn!(key = %key, error = %e, "rejecting storage key");
                return None;
            }
        };
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read stored entry");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "discarding unreadable stored entry");
                self.delete(key);
                None
            }
        }
    }

    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.get(key).unwrap_or_default()
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path(key)?;
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        debug!(key = %key, "stored entry");
        Ok(())
    }

    pub fn delete(&self, key: &str) {
        if let Ok(path) = self.path(key) {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(key = %key, error = %e, "failed to delete stored entry"),
            }
        }
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(AppError::Storage(format!("invalid key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_set_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        assert_eq!(store.get::<bool>(SIMULATION_MODE_KEY), None);
        store.set(SIMULATION_MODE_KEY, &true).unwrap();
        assert_eq!(store.get::<bool>(SIMULATION_MODE_KEY), Some(true));

        store.delete(SIMULATION_MODE_KEY);
        assert_eq!(store.get::<bool>(SIMULATION_MODE_KEY), None);
        // deleting twice is fine
        store.delete(SIMULATION_MODE_KEY);
    }

    #[test]
    fn test_corrupt_entry_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let path = dir.path().join(format!("{}.json", EMAIL_CONFIG_KEY));
        std::fs::write(&path, "{ not json").unwrap();

        let value: Option<BTreeMap<String, String>> = store.get(EMAIL_CONFIG_KEY);
        assert!(value.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        assert!(store.set("../escape", &1).is_err());
        assert!(store.get::<i32>("a/b").is_none());
    }
}
