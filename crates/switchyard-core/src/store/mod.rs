//! Storage capabilities consumed by the gateway.
//!
//! Reads of missing entries return `Ok(None)`; only backend failures are errors.
//!
//! ```text
//! KvStore ──▶ KvCredentialStore ──▶ CredentialStore   (ticket, tokens)
//!                                   AppStore          (tenant metadata)
//! ```

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::expiring::{AuthorizerToken, ExpiringValue};
use crate::types::AppInfo;

mod kv;
mod memory;

pub use kv::KvCredentialStore;
pub use memory::{MemoryAppStore, MemoryKv};

/// Byte-oriented key-value backend.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store `value` under `key`; `ttl` of `None` keeps it until overwritten.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> GatewayResult<()>;

    /// Overwrite `key` only if a live entry exists, atomically with respect
    /// to `delete`. Returns whether the write happened.
    async fn set_if_present(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> GatewayResult<bool>;

    async fn get(&self, key: &str) -> GatewayResult<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> GatewayResult<()>;
}

/// Durable home of the credential hierarchy.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save_ticket(&self, ticket: &str) -> GatewayResult<()>;

    async fn ticket(&self) -> GatewayResult<Option<String>>;

    async fn save_platform_token(&self, token: &ExpiringValue) -> GatewayResult<()>;

    async fn platform_token(&self) -> GatewayResult<Option<ExpiringValue>>;

    async fn save_pre_auth_code(&self, code: &ExpiringValue) -> GatewayResult<()>;

    async fn pre_auth_code(&self) -> GatewayResult<Option<ExpiringValue>>;

    async fn save_authorizer_token(
        &self,
        tenant: &str,
        token: &AuthorizerToken,
    ) -> GatewayResult<()>;

    /// Like `save_authorizer_token`, but a no-op returning `false` once the
    /// tenant's entry has been deleted.
    async fn replace_authorizer_token(
        &self,
        tenant: &str,
        token: &AuthorizerToken,
    ) -> GatewayResult<bool>;

    async fn authorizer_token(&self, tenant: &str) -> GatewayResult<Option<AuthorizerToken>>;

    async fn delete_authorizer_token(&self, tenant: &str) -> GatewayResult<()>;
}

/// Durable home of tenant metadata.
#[async_trait]
pub trait AppStore: Send + Sync {
    async fn save_app_info(&self, info: &AppInfo) -> GatewayResult<()>;

    async fn app_info(&self, tenant: &str) -> GatewayResult<Option<AppInfo>>;

    async fn delete_app_info(&self, tenant: &str) -> GatewayResult<()>;

    /// Delete every entry whose id is not in `keep`. Returns how many were deleted.
    async fn delete_app_info_not_in(&self, keep: &HashSet<String>) -> GatewayResult<usize>;

    /// Ids of all stored tenants.
    async fn app_ids(&self) -> GatewayResult<Vec<String>>;
}
