//! Credential store layered on a key-value backend.
//!
//! Keys are namespaced by the integrator id so several integrators can share
//! one backend:
//!
//! ```text
//! {component}_ticket
//! {component}_access_token
//! {component}_pre_auth_code
//! {component}_app_access_token_{tenant}
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{CredentialStore, KvStore};
use crate::clock::{Clock, SystemClock};
use crate::error::{GatewayError, GatewayResult};
use crate::expiring::{AuthorizerToken, ExpiringValue};

/// [`CredentialStore`] over any [`KvStore`].
#[derive(Debug, Clone)]
pub struct KvCredentialStore<K> {
    prefix: String,
    kv: K,
    clock: Arc<dyn Clock>,
}

impl<K: KvStore> KvCredentialStore<K> {
    pub fn new(component_appid: &str, kv: K) -> Self {
        Self {
            prefix: format!("{}_", component_appid),
            kv,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` when deriving backend TTLs from expiry instants.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &K {
        &self.kv
    }

    /// Backend TTL for an expiring value: its remaining lifetime.
    fn ttl_of(&self, value: &ExpiringValue) -> Option<Duration> {
        value.remaining(self.clock.now()).to_std().ok()
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    async fn put_json<T: Serialize + Sync>(
        &self,
        name: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> GatewayResult<()> {
        let bytes = serde_json::to_vec(value).map_err(GatewayError::storage)?;
        self.kv.set(&self.key(name), bytes, ttl).await
    }

    async fn get_json<T: DeserializeOwned>(&self, name: &str) -> GatewayResult<Option<T>> {
        match self.kv.get(&self.key(name)).await? {
            Some(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(GatewayError::storage),
            _ => Ok(None),
        }
    }
}

fn app_token_key(tenant: &str) -> String {
    format!("app_access_token_{}", tenant)
}

#[async_trait]
impl<K: KvStore> CredentialStore for KvCredentialStore<K> {
    async fn save_ticket(&self, ticket: &str) -> GatewayResult<()> {
        self.kv
            .set(&self.key("ticket"), ticket.as_bytes().to_vec(), None)
            .await
    }

    async fn ticket(&self) -> GatewayResult<Option<String>> {
        match self.kv.get(&self.key("ticket")).await? {
            Some(bytes) if !bytes.is_empty() => String::from_utf8(bytes)
                .map(Some)
                .map_err(GatewayError::storage),
            _ => Ok(None),
        }
    }

    async fn save_platform_token(&self, token: &ExpiringValue) -> GatewayResult<()> {
        self.put_json("access_token", token, self.ttl_of(token)).await
    }

    async fn platform_token(&self) -> GatewayResult<Option<ExpiringValue>> {
        Ok(self
            .get_json::<ExpiringValue>("access_token")
            .await?
            .filter(|t| !t.value.is_empty()))
    }

    async fn save_pre_auth_code(&self, code: &ExpiringValue) -> GatewayResult<()> {
        self.put_json("pre_auth_code", code, self.ttl_of(code)).await
    }

    async fn pre_auth_code(&self) -> GatewayResult<Option<ExpiringValue>> {
        Ok(self
            .get_json::<ExpiringValue>("pre_auth_code")
            .await?
            .filter(|c| !c.value.is_empty()))
    }

    async fn save_authorizer_token(
        &self,
        tenant: &str,
        token: &AuthorizerToken,
    ) -> GatewayResult<()> {
        self.put_json(&app_token_key(tenant), token, None).await
    }

    async fn replace_authorizer_token(
        &self,
        tenant: &str,
        token: &AuthorizerToken,
    ) -> GatewayResult<bool> {
        let bytes = serde_json::to_vec(token).map_err(GatewayError::storage)?;
        self.kv
            .set_if_present(&self.key(&app_token_key(tenant)), bytes, None)
            .await
    }

    async fn authorizer_token(&self, tenant: &str) -> GatewayResult<Option<AuthorizerToken>> {
        // Without a refresh token the entry is as good as absent.
        Ok(self
            .get_json::<AuthorizerToken>(&app_token_key(tenant))
            .await?
            .filter(|t| !t.refresh_token.is_empty()))
    }

    async fn delete_authorizer_token(&self, tenant: &str) -> GatewayResult<()> {
        self.kv.delete(&self.key(&app_token_key(tenant))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;
    use chrono::Utc;

    fn store() -> KvCredentialStore<MemoryKv> {
        KvCredentialStore::new("wxcomp", MemoryKv::new())
    }

    #[tokio::test]
    async fn test_missing_entries_are_none() {
        let store = store();
        assert_eq!(store.ticket().await.unwrap(), None);
        assert_eq!(store.platform_token().await.unwrap(), None);
        assert_eq!(store.pre_auth_code().await.unwrap(), None);
        assert_eq!(store.authorizer_token("wx1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ticket_overwrite() {
        let store = store();
        store.save_ticket("ticket@@@1").await.unwrap();
        store.save_ticket("ticket@@@2").await.unwrap();
        assert_eq!(store.ticket().await.unwrap().as_deref(), Some("ticket@@@2"));
    }

    #[tokio::test]
    async fn test_keys_are_namespaced() {
        let store = store();
        store.save_ticket("t").await.unwrap();
        let token = AuthorizerToken::refresh_only("r");
        store.save_authorizer_token("wx1", &token).await.unwrap();

        let kv = store.backend();
        assert!(kv.get("wxcomp_ticket").await.unwrap().is_some());
        assert!(kv
            .get("wxcomp_app_access_token_wx1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_replace_skips_deleted_tenant() {
        let store = store();
        let refreshed = AuthorizerToken::issued("access", 7200, "refresh", Utc::now());
        assert!(!store
            .replace_authorizer_token("wx1", &refreshed)
            .await
            .unwrap());
        assert_eq!(store.authorizer_token("wx1").await.unwrap(), None);

        store
            .save_authorizer_token("wx1", &AuthorizerToken::refresh_only("refresh"))
            .await
            .unwrap();
        assert!(store
            .replace_authorizer_token("wx1", &refreshed)
            .await
            .unwrap());
        assert_eq!(store.authorizer_token("wx1").await.unwrap(), Some(refreshed));
    }

    #[tokio::test]
    async fn test_authorizer_token_roundtrip_and_delete() {
        let store = store();
        let token = AuthorizerToken::issued("access", 7200, "refresh", Utc::now());
        store.save_authorizer_token("wx1", &token).await.unwrap();
        assert_eq!(store.authorizer_token("wx1").await.unwrap(), Some(token));

        store.delete_authorizer_token("wx1").await.unwrap();
        assert_eq!(store.authorizer_token("wx1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_token_without_refresh_token_reads_as_absent() {
        let store = store();
        let token = AuthorizerToken::issued("access", 7200, "", Utc::now());
        store.save_authorizer_token("wx1", &token).await.unwrap();
        assert_eq!(store.authorizer_token("wx1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_storage_error() {
        let store = store();
        store
            .backend()
            .set("wxcomp_access_token", b"{not json".to_vec(), None)
            .await
            .unwrap();
        assert!(matches!(
            store.platform_token().await,
            Err(GatewayError::Storage { .. })
        ));
    }
}
