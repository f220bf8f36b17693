//! Bearer token storage
//!
//! The token store is the only writer of token state. Readers always see a
//! whole pair or nothing.

use std::sync::{Arc, RwLock};

use tracing::debug;

use super::storage::{KeyValueStore, StoreError};

/// Well-known key for the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Well-known key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Access token plus optional refresh token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: Option<String>,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: Option<String>) -> Self {
        Self {
            access: access.into(),
            refresh,
        }
    }
}

/// Storage for the session's token pair
pub trait TokenStore: Send + Sync {
    /// Current pair, `None` when unauthenticated
    fn get(&self) -> Option<TokenPair>;

    /// Replace both tokens
    fn set(&self, pair: &TokenPair) -> Result<(), StoreError>;

    /// Remove both tokens
    fn clear(&self) -> Result<(), StoreError>;
}

/// Token store backed by the persisted key-value file
pub struct PersistentTokenStore {
    storage: Arc<KeyValueStore>,
}

impl PersistentTokenStore {
    pub fn new(storage: Arc<KeyValueStore>) -> Self {
        Self { storage }
    }
}

impl TokenStore for PersistentTokenStore {
    fn get(&self) -> Option<TokenPair> {
        let access = self.storage.get(ACCESS_TOKEN_KEY)?;
        Some(TokenPair {
            access,
            refresh: self.storage.get(REFRESH_TOKEN_KEY),
        })
    }

    fn set(&self, pair: &TokenPair) -> Result<(), StoreError> {
        self.storage.update(&[
            (ACCESS_TOKEN_KEY, Some(pair.access.as_str())),
            (REFRESH_TOKEN_KEY, pair.refresh.as_deref()),
        ])?;
        debug!(has_refresh = pair.refresh.is_some(), "Stored token pair");
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.storage
            .update(&[(ACCESS_TOKEN_KEY, None), (REFRESH_TOKEN_KEY, None)])?;
        debug!("Cleared token pair");
        Ok(())
    }
}

/// Process-local token store
#[derive(Default)]
pub struct MemoryTokenStore {
    pair: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: TokenPair) -> Self {
        Self {
            pair: RwLock::new(Some(pair)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<TokenPair> {
        self.pair.read().unwrap().clone()
    }

    fn set(&self, pair: &TokenPair) -> Result<(), StoreError> {
        *self.pair.write().unwrap() = Some(pair.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.pair.write().unwrap() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistent_store_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = PersistentTokenStore::new(Arc::new(KeyValueStore::open(&path)));

        assert_eq!(store.get(), None);

        let pair = TokenPair::new("access-1", Some("refresh-1".to_string()));
        store.set(&pair).unwrap();

        // A fresh instance over the same file sees the pair (survives reloads)
        let reloaded = PersistentTokenStore::new(Arc::new(KeyValueStore::open(&path)));
        assert_eq!(reloaded.get(), Some(pair));

        reloaded.clear().unwrap();
        assert_eq!(reloaded.get(), None);
        assert_eq!(
            PersistentTokenStore::new(Arc::new(KeyValueStore::open(&path))).get(),
            None
        );
    }

    #[test]
    fn test_set_without_refresh_drops_old_refresh() {
        let store = PersistentTokenStore::new(Arc::new(KeyValueStore::in_memory()));
        store
            .set(&TokenPair::new("a", Some("r".to_string())))
            .unwrap();
        store.set(&TokenPair::new("b", None)).unwrap();

        assert_eq!(store.get(), Some(TokenPair::new("b", None)));
    }

    #[test]
    fn test_refresh_alone_is_unauthenticated() {
        let storage = Arc::new(KeyValueStore::in_memory());
        storage.set(REFRESH_TOKEN_KEY, "orphan").unwrap();
        let store = PersistentTokenStore::new(storage);

        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTokenStore::with_pair(TokenPair::new("a", None));
        assert_eq!(store.get().map(|p| p.access), Some("a".to_string()));
        store.clear().unwrap();
        assert!(store.get().is_none());
    }
}
