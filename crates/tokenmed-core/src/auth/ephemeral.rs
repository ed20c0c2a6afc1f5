use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::ConfigLocator;

use super::AuthError;

/// Key holding the OAuth state nonce between redirect and callback.
pub const STATE_KEY: &str = "state";
/// Key holding the PKCE verifier between redirect and callback.
pub const VERIFIER_KEY: &str = "verifier";
/// Key holding the last user-facing failure message.
pub const ERROR_MESSAGE_KEY: &str = "errorMessage";

/// Short-lived key/value storage that survives the trip to the identity provider.
pub trait EphemeralStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AuthError>;
    fn remove(&self, key: &str) -> Result<(), AuthError>;

    /// Read a value and delete it in the same step.
    fn take(&self, key: &str) -> Result<Option<String>, AuthError> {
        let value = self.get(key)?;
        self.remove(key)?;
        Ok(value)
    }
}

/// In-memory store, scoped to one process.
#[derive(Debug, Default)]
pub struct MemoryEphemeralStore {
    inner: Mutex<BTreeMap<String, String>>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl EphemeralStore for MemoryEphemeralStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.entries().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AuthError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// Filesystem-backed store located in the user configuration directory.
pub struct FileEphemeralStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileEphemeralStore {
    pub fn new(locator: &ConfigLocator, profile: &str) -> Self {
        Self {
            path: locator.ephemeral_file(profile),
            lock: Mutex::new(()),
        }
    }

    pub fn with_default_locator(profile: &str) -> Result<Self, AuthError> {
        Ok(Self::new(&ConfigLocator::new()?, profile))
    }

    fn load(&self) -> Result<StoreEnvelope, AuthError> {
        if !self.path.exists() {
            return Ok(StoreEnvelope::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, envelope: &StoreEnvelope) -> Result<(), AuthError> {
        if envelope.entries.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(_) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            };
        }
        let payload = serde_json::to_string_pretty(envelope)?;
        Self::write_file(&self.path, &payload)
    }

    fn update<F>(&self, apply: F) -> Result<(), AuthError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut envelope = self.load()?;
        apply(&mut envelope.entries);
        self.save(&envelope)
    }

    fn write_file(path: &Path, payload: &str) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(payload.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perm = file.metadata()?.permissions();
            perm.set_mode(0o600);
            fs::set_permissions(path, perm)?;
        }

        Ok(())
    }
}

impl EphemeralStore for FileEphemeralStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(self.load()?.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.update(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove(&self, key: &str) -> Result<(), AuthError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreEnvelope {
    #[serde(default = "envelope_version")]
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

fn envelope_version() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_store(dir: &TempDir) -> FileEphemeralStore {
        let locator = ConfigLocator::from_root(dir.path().to_path_buf()).unwrap();
        FileEphemeralStore::new(&locator, "default")
    }

    #[test]
    fn take_reads_once() {
        let store = MemoryEphemeralStore::new();
        store.set(STATE_KEY, "nonce").unwrap();
        assert_eq!(store.take(STATE_KEY).unwrap().as_deref(), Some("nonce"));
        assert!(store.take(STATE_KEY).unwrap().is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        file_store(&temp_dir).set(VERIFIER_KEY, "v-1").unwrap();
        file_store(&temp_dir).set(STATE_KEY, "s-1").unwrap();

        let reopened = file_store(&temp_dir);
        assert_eq!(reopened.get(VERIFIER_KEY).unwrap().as_deref(), Some("v-1"));
        assert_eq!(reopened.take(STATE_KEY).unwrap().as_deref(), Some("s-1"));
        assert!(reopened.get(STATE_KEY).unwrap().is_none());
    }

    #[test]
    fn empty_store_leaves_no_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        store.set(ERROR_MESSAGE_KEY, "Failed to load profile..").unwrap();
        store.remove(ERROR_MESSAGE_KEY).unwrap();
        assert!(!temp_dir.path().join("ephemeral-default.json").exists());
        store.remove("missing").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn file_is_private_to_user() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        file_store(&temp_dir).set(VERIFIER_KEY, "v-1").unwrap();

        let path = temp_dir.path().join("ephemeral-default.json");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
