//! Secret storage backends.
//!
//! A [`SecretStore`] keeps opaque string secrets keyed by `(service,
//! account)`. Backends are expected to survive restarts, stay on this device
//! and only release secrets to the current user.
//!
//! - [`MemorySecretStore`]: process memory, for tests and ephemeral sessions
//! - [`FileSecretStore`]: owner-only files under a local data directory
//! - `KeyringSecretStore` (feature `keyring`): the OS keychain

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

/// Secret store errors.
#[derive(Debug, Error)]
pub enum SecretStoreError {
    /// Backend is unavailable (locked keychain, missing directory, ...)
    #[error("Secret store unavailable: {0}")]
    Unavailable(String),

    /// I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure
    #[error("Secret store error: {0}")]
    Backend(String),
}

/// Key-value store for secrets.
pub trait SecretStore: Send + Sync {
    /// Load a secret, `None` if nothing is stored.
    fn load(&self, service: &str, account: &str) -> Result<Option<String>, SecretStoreError>;

    /// Store a secret, replacing any previous value.
    fn store(&self, service: &str, account: &str, secret: &str) -> Result<(), SecretStoreError>;

    /// Delete a secret. Deleting a missing secret succeeds.
    fn delete(&self, service: &str, account: &str) -> Result<(), SecretStoreError>;
}

/// In-memory secret store.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<(String, String), String>>,
}

impl MemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> SecretStoreError {
        SecretStoreError::Backend("lock poisoned".to_string())
    }
}

impl SecretStore for MemorySecretStore {
    fn load(&self, service: &str, account: &str) -> Result<Option<String>, SecretStoreError> {
        let secrets = self.secrets.read().map_err(|_| Self::poisoned())?;
        Ok(secrets
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }

    fn store(&self, service: &str, account: &str, secret: &str) -> Result<(), SecretStoreError> {
        let mut secrets = self.secrets.write().map_err(|_| Self::poisoned())?;
        secrets.insert((service.to_string(), account.to_string()), secret.to_string());
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        let mut secrets = self.secrets.write().map_err(|_| Self::poisoned())?;
        secrets.remove(&(service.to_string(), account.to_string()));
        Ok(())
    }
}

/// File-backed secret store.
///
/// Each secret lives at `<root>/<service>/<account>`. Files are written to a
/// temporary sibling and renamed into place; on Unix they are created with
/// mode 0600.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SecretStoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&root, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, service: &str, account: &str) -> PathBuf {
        self.root
            .join(sanitize_component(service))
            .join(sanitize_component(account))
    }
}

impl SecretStore for FileSecretStore {
    fn load(&self, service: &str, account: &str) -> Result<Option<String>, SecretStoreError> {
        match std::fs::read_to_string(self.path_for(service, account)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, service: &str, account: &str, secret: &str) -> Result<(), SecretStoreError> {
        let path = self.path_for(service, account);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("tmp");
        write_owner_only(&tmp_path, secret.as_bytes())?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        match std::fs::remove_file(self.path_for(service, account)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn sanitize_component(component: &str) -> String {
    let sanitized: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    match sanitized.as_str() {
        "" | "." | ".." => format!("_{}", sanitized),
        _ => sanitized,
    }
}

#[cfg(unix)]
fn write_owner_only(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

#[cfg(feature = "keyring")]
pub use keychain::KeyringSecretStore;

#[cfg(feature = "keyring")]
mod keychain {
    //! OS keychain backend.

    use super::{SecretStore, SecretStoreError};

    /// Secret store backed by the OS keychain.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct KeyringSecretStore;

    impl KeyringSecretStore {
        /// Create a keychain-backed store.
        pub fn new() -> Self {
            Self
        }

        fn entry(service: &str, account: &str) -> Result<keyring::Entry, SecretStoreError> {
            keyring::Entry::new(service, account).map_err(map_error)
        }
    }

    fn map_error(e: keyring::Error) -> SecretStoreError {
        match e {
            keyring::Error::NoStorageAccess(inner) => SecretStoreError::Unavailable(inner.to_string()),
            keyring::Error::PlatformFailure(inner) => SecretStoreError::Unavailable(inner.to_string()),
            other => SecretStoreError::Backend(other.to_string()),
        }
    }

    impl SecretStore for KeyringSecretStore {
        fn load(&self, service: &str, account: &str) -> Result<Option<String>, SecretStoreError> {
            match Self::entry(service, account)?.get_password() {
                Ok(secret) => Ok(Some(secret)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(map_error(e)),
            }
        }

        fn store(&self, service: &str, account: &str, secret: &str) -> Result<(), SecretStoreError> {
            Self::entry(service, account)?
                .set_password(secret)
                .map_err(map_error)
        }

        fn delete(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
            match Self::entry(service, account)?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(map_error(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemorySecretStore::new();
        assert_eq!(store.load("svc", "acct").unwrap(), None);

        store.store("svc", "acct", "secret").unwrap();
        assert_eq!(store.load("svc", "acct").unwrap().as_deref(), Some("secret"));
        assert_eq!(store.load("svc", "other").unwrap(), None);

        store.delete("svc", "acct").unwrap();
        store.delete("svc", "acct").unwrap();
        assert_eq!(store.load("svc", "acct").unwrap(), None);
    }

    #[test]
    fn test_file_store_round_trip_and_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::open(dir.path().join("secrets")).unwrap();

        store.store("com.field.auth", "tokens", "{\"a\":1}").unwrap();

        let reopened = FileSecretStore::open(dir.path().join("secrets")).unwrap();
        assert_eq!(
            reopened.load("com.field.auth", "tokens").unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        reopened.delete("com.field.auth", "tokens").unwrap();
        reopened.delete("com.field.auth", "tokens").unwrap();
        assert_eq!(store.load("com.field.auth", "tokens").unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::open(dir.path()).unwrap();
        store.store("svc", "acct", "secret").unwrap();

        let mode = std::fs::metadata(store.path_for("svc", "acct"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("com.field.auth"), "com.field.auth");
        assert_eq!(sanitize_component("../etc"), ".._etc");
        assert_eq!(sanitize_component(".."), "_..");
        assert_eq!(sanitize_component(""), "_");
    }
}
