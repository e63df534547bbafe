// In-process lock store
// Backs each key with a DashMap entry so every primitive is atomic per key

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::LockStore;
use crate::error::StoreError;

/// In-memory [`LockStore`] shared by cloning
///
/// Clients in the same process that share a `MemoryStore` contend exactly as
/// they would against a remote store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(value.to_string());
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn swap(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.insert(key.to_string(), value.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .remove_if(key, |_, current| current == expected)
            .is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        match self.entries.get_mut(key) {
            Some(mut current) if current.value() == expected => {
                *current = value.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
