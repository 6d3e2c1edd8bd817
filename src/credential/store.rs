use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::storage::SessionStorage;

/// Holds the current bearer credential.
///
/// The in-memory copy is authoritative. Every change is mirrored into a
/// page-scoped [`SessionStorage`] so a reload does not sign the user out, but
/// the mirror is only *read* once, by [`CredentialStore::restore`].
pub struct CredentialStore {
    current: RwLock<Option<String>>,
    storage: Arc<dyn SessionStorage>,
    key: String,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn SessionStorage>, key: impl Into<String>) -> Self {
        CredentialStore {
            current: RwLock::new(None),
            storage,
            key: key.into(),
        }
    }

    /// Repopulates memory from the persistent mirror. Returns whether a
    /// credential was found.
    pub fn restore(&self) -> bool {
        let restored = match self.storage.get_item(&self.key) {
            Ok(value) => value.filter(|token| !token.is_empty()),
            Err(e) => {
                warn!("Could not read persisted credential '{}': {}", self.key, e);
                None
            }
        };
        let found = restored.is_some();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = restored;
        if found {
            info!("Restored credential from session storage");
        } else {
            debug!(
                persistent = self.storage.is_persistent(),
                "No persisted credential under '{}'", self.key
            );
        }
        found
    }

    pub fn get(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        if let Err(e) = self.storage.set_item(&self.key, &token) {
            warn!("Failed to mirror credential to session storage: {}", e);
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove_item(&self.key) {
            warn!("Failed to erase mirrored credential: {}", e);
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_present(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::storage::MemoryStorage;

    /// Storage whose writes always fail, to check the memory copy stays authoritative.
    struct BrokenStorage;

    impl SessionStorage for BrokenStorage {
        fn get_item(&self, _key: &str) -> Result<Option<String>, String> {
            Err("quota exceeded".into())
        }
        fn set_item(&self, _key: &str, _value: &str) -> Result<(), String> {
            Err("quota exceeded".into())
        }
        fn remove_item(&self, _key: &str) -> Result<(), String> {
            Err("quota exceeded".into())
        }
    }

    #[test]
    fn test_set_get_clear_mirrors_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CredentialStore::new(storage.clone(), "access_token");

        store.set("abc");
        assert_eq!(store.get().as_deref(), Some("abc"));
        assert_eq!(storage.get_item("access_token").unwrap().as_deref(), Some("abc"));

        store.clear();
        assert_eq!(store.get(), None);
        assert_eq!(storage.get_item("access_token").unwrap(), None);

        // idempotent
        store.clear();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_get_does_not_reread_storage() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item("access_token", "from-before-reload").unwrap();
        let store = CredentialStore::new(storage.clone(), "access_token");
        assert!(store.restore());

        // another tab rewrites the mirror; this process keeps its own copy
        storage.set_item("access_token", "other-tab").unwrap();
        assert_eq!(store.get().as_deref(), Some("from-before-reload"));
    }

    #[test]
    fn test_restore_ignores_empty_value() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item("access_token", "").unwrap();
        let store = CredentialStore::new(storage, "access_token");
        assert!(!store.restore());
        assert!(!store.is_present());
    }

    #[test]
    fn test_storage_failures_are_swallowed() {
        let store = CredentialStore::new(Arc::new(BrokenStorage), "access_token");
        assert!(!store.restore());
        store.set("abc");
        assert_eq!(store.get().as_deref(), Some("abc"));
        store.clear();
        assert_eq!(store.get(), None);
    }
}
