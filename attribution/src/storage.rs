use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;

use crate::time::TimeSource;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage backend unavailable")]
    Unavailable,
    #[error("storage quota exceeded ({0} bytes)")]
    QuotaExceeded(usize),
    #[error("failed to serialize state: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Durable,
    Session,
    Cookie,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Durable => write!(f, "durable"),
            StorageKind::Session => write!(f, "session"),
            StorageKind::Cookie => write!(f, "cookie"),
        }
    }
}

/// Plain string key/value backend. Durable and session scopes share this
/// shape; the lifetime difference is a property of the implementation,
/// not the trait.
pub trait StringStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Capability probe: callers skip a backend that reports unavailable
    /// instead of wrapping every access in defensive handling.
    fn available(&self) -> bool {
        true
    }
}

/// Expiring key/value backend, the cookie-jar shape: every entry carries
/// its own max-age.
pub trait CookieStore {
    fn get(&self, name: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, name: &str, value: &str, max_age: Duration) -> Result<(), StorageError>;

    fn available(&self) -> bool {
        true
    }
}

/// The three persistence scopes a pipeline writes through.
#[derive(Clone)]
pub struct Backends {
    pub durable: Arc<dyn StringStore + Send + Sync>,
    pub session: Arc<dyn StringStore + Send + Sync>,
    pub cookies: Arc<dyn CookieStore + Send + Sync>,
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StringStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Unavailable)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Unavailable)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Unavailable)?;
        entries.remove(key);
        Ok(())
    }
}

/// In-memory cookie jar with per-entry expiry, checked lazily on read
/// against the injected clock.
pub struct MemoryCookieJar {
    timesource: Arc<dyn TimeSource + Send + Sync>,
    entries: RwLock<HashMap<String, (String, i64)>>,
}

impl MemoryCookieJar {
    pub fn new(timesource: Arc<dyn TimeSource + Send + Sync>) -> MemoryCookieJar {
        MemoryCookieJar {
            timesource,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl CookieStore for MemoryCookieJar {
    fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
        let now = self.timesource.now_millis();
        let entries = self.entries.read().map_err(|_| StorageError::Unavailable)?;
        Ok(entries.get(name).and_then(|(value, expires_at)| {
            if *expires_at > now {
                Some(value.clone())
            } else {
                None
            }
        }))
    }

    fn set(&self, name: &str, value: &str, max_age: Duration) -> Result<(), StorageError> {
        let expires_at = self.timesource.now_millis() + max_age.as_millis() as i64;
        let mut entries = self.entries.write().map_err(|_| StorageError::Unavailable)?;
        entries.insert(name.to_string(), (value.to_string(), expires_at));
        Ok(())
    }
}

/// Backend that always fails, standing in for a blocked or absent storage
/// API in degradation tests.
pub struct FailingStore {}

impl StringStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable)
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable)
    }

    fn available(&self) -> bool {
        false
    }
}

impl CookieStore for FailingStore {
    fn get(&self, _name: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable)
    }

    fn set(&self, _name: &str, _value: &str, _max_age: Duration) -> Result<(), StorageError> {
        Err(StorageError::Unavailable)
    }

    fn available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::time::FixedTime;

    use super::{CookieStore, MemoryCookieJar, MemoryStore, StringStore};

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("visitor", "17000001").unwrap();
        assert_eq!(store.get("visitor").unwrap().as_deref(), Some("17000001"));

        store.remove("visitor").unwrap();
        assert_eq!(store.get("visitor").unwrap(), None);
    }

    #[test]
    fn cookie_jar_expires_entries() {
        let clock = Arc::new(FixedTime::new(1_000));
        let jar = MemoryCookieJar::new(clock.clone());

        jar.set("trk_xcod", "abc", Duration::from_secs(60)).unwrap();
        assert_eq!(jar.get("trk_xcod").unwrap().as_deref(), Some("abc"));

        clock.advance(61_000);
        assert_eq!(jar.get("trk_xcod").unwrap(), None);
    }
}
