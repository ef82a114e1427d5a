//! In-memory backends for tests and single-process deployments.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{AppStore, KvStore};
use crate::clock::{Clock, SystemClock};
use crate::error::GatewayResult;
use crate::types::AppInfo;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

/// Key-value map with per-entry expiry. Clones share the same map.
#[derive(Debug, Clone)]
pub struct MemoryKv {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at.map_or(true, |at| at > now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> GatewayResult<()> {
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| self.clock.now() + ttl);
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn set_if_present(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> GatewayResult<bool> {
        let now = self.clock.now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl);
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at.map_or(true, |at| at > now) => {
                *entry = Entry { value, expires_at };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> GatewayResult<Option<Vec<u8>>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at.map_or(true, |at| at > now))
            .map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Tenant metadata kept in a sorted map. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryAppStore {
    apps: Arc<RwLock<BTreeMap<String, AppInfo>>>,
}

impl MemoryAppStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppStore for MemoryAppStore {
    async fn save_app_info(&self, info: &AppInfo) -> GatewayResult<()> {
        self.apps
            .write()
            .await
            .insert(info.appid.clone(), info.clone());
        Ok(())
    }

    async fn app_info(&self, tenant: &str) -> GatewayResult<Option<AppInfo>> {
        Ok(self.apps.read().await.get(tenant).cloned())
    }

    async fn delete_app_info(&self, tenant: &str) -> GatewayResult<()> {
        self.apps.write().await.remove(tenant);
        Ok(())
    }

    async fn delete_app_info_not_in(&self, keep: &HashSet<String>) -> GatewayResult<usize> {
        let mut apps = self.apps.write().await;
        let before = apps.len();
        apps.retain(|id, _| keep.contains(id));
        Ok(before - apps.len())
    }

    async fn app_ids(&self) -> GatewayResult<Vec<String>> {
        Ok(self.apps.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_entry_expires_with_clock() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
        ));
        let kv = MemoryKv::with_clock(clock.clone());

        kv.set("short", b"v".to_vec(), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        kv.set("forever", b"v".to_vec(), None).await.unwrap();
        assert_eq!(kv.len().await, 2);

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(kv.get("short").await.unwrap(), None);
        assert_eq!(kv.get("forever").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(kv.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_not_in_reports_count() {
        let store = MemoryAppStore::new();
        for id in ["wx1", "wx2", "wx3"] {
            store
                .save_app_info(&AppInfo {
                    appid: id.to_string(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let keep: HashSet<String> = ["wx2".to_string()].into_iter().collect();
        assert_eq!(store.delete_app_info_not_in(&keep).await.unwrap(), 2);
        assert_eq!(store.app_ids().await.unwrap(), vec!["wx2".to_string()]);

        // Nothing left to delete on a second pass.
        assert_eq!(store.delete_app_info_not_in(&keep).await.unwrap(), 0);
    }
}
