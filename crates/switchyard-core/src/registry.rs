//! Tenant clients and reconciliation against the platform's tenant list.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::crypto::MessageCrypto;
use crate::customer::CustomerMessenger;
use crate::dispatch::{WebhookReply, WebhookRequest};
use crate::error::GatewayResult;
use crate::gateway::Shared;
use crate::stats::{
    platform_today, split_date_range, DateRange, UserStatistics, USER_STATS_MAX_DAYS,
    USER_STATS_SPLIT_DAYS,
};
use crate::types::{AppInfo, UserCumulate, UserSummary};

/// Handle bound to one authorized tenant.
///
/// Holds no credentials of its own; every call goes through the shared
/// credential hierarchy, so a tenant removed while a handle is alive fails
/// with [`crate::GatewayError::Unauthorized`] on its next token read.
#[derive(Debug, Clone)]
pub struct TenantClient {
    tenant: String,
    shared: Shared,
}

impl TenantClient {
    pub(crate) fn new(tenant: impl Into<String>, shared: Shared) -> Self {
        Self {
            tenant: tenant.into(),
            shared,
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub async fn access_token(&self) -> GatewayResult<String> {
        self.shared
            .credentials
            .authorizer_access_token(&self.tenant)
            .await
    }

    /// Stored metadata, fetched from the platform when absent.
    pub async fn app_info(&self) -> GatewayResult<AppInfo> {
        self.shared.app_info(&self.tenant).await
    }

    pub async fn refresh_app_info(&self) -> GatewayResult<AppInfo> {
        self.shared.refresh_app_info(&self.tenant).await
    }

    /// Customer-service messages sent as this tenant.
    pub fn customer(&self) -> CustomerMessenger {
        CustomerMessenger::new(
            self.tenant.clone(),
            Arc::clone(&self.shared.api),
            Arc::clone(&self.shared.credentials),
        )
    }

    /// Verify, decrypt and dispatch a push addressed to this tenant.
    pub async fn handle_message(&self, request: &WebhookRequest) -> WebhookReply {
        let dispatcher = Arc::clone(&self.shared.dispatcher);
        dispatcher.serve(self, request).await
    }

    /// Daily follower gains and losses over `[begin, end)`.
    pub async fn user_summary(
        &self,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> GatewayResult<Vec<UserSummary>> {
        let token = self.access_token().await?;
        let mut summaries = Vec::new();
        for window in self.stats_windows(begin, end) {
            summaries.extend(
                self.shared
                    .api
                    .user_summary(&token, window.begin, window.last_day())
                    .await?,
            );
        }
        Ok(summaries)
    }

    /// Daily follower totals over `[begin, end)`.
    pub async fn user_cumulate(
        &self,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> GatewayResult<Vec<UserCumulate>> {
        let token = self.access_token().await?;
        let mut cumulates = Vec::new();
        for window in self.stats_windows(begin, end) {
            cumulates.extend(
                self.shared
                    .api
                    .user_cumulate(&token, window.begin, window.last_day())
                    .await?,
            );
        }
        Ok(cumulates)
    }

    pub async fn user_statistics(
        &self,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> GatewayResult<UserStatistics> {
        let summaries = self.user_summary(begin, end).await?;
        let cumulates = self.user_cumulate(begin, end).await?;
        Ok(UserStatistics::aggregate(&summaries, &cumulates))
    }

    pub(crate) fn crypto(&self) -> Arc<dyn MessageCrypto> {
        Arc::clone(&self.shared.crypto)
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.shared.clock)
    }

    fn stats_windows(&self, begin: NaiveDate, end: NaiveDate) -> Vec<DateRange> {
        split_date_range(
            begin,
            end,
            Duration::days(USER_STATS_SPLIT_DAYS),
            Duration::days(USER_STATS_MAX_DAYS),
            platform_today(self.shared.clock.now()),
        )
    }
}

/// Live tenant clients, keyed by tenant id.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    clients: Mutex<HashMap<String, Arc<TenantClient>>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached client for `tenant`, or the one `build` produces.
    ///
    /// Lookup, build and insert happen under one lock, so concurrent callers
    /// never build two clients for the same tenant. A `None` from `build` is
    /// not cached.
    pub async fn get_or_insert_with<F, Fut>(
        &self,
        tenant: &str,
        build: F,
    ) -> GatewayResult<Option<Arc<TenantClient>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<Option<TenantClient>>>,
    {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(tenant) {
            return Ok(Some(Arc::clone(client)));
        }

        let Some(client) = build().await? else {
            return Ok(None);
        };
        let client = Arc::new(client);
        clients.insert(tenant.to_string(), Arc::clone(&client));
        debug!(tenant = %tenant, "tenant client created");
        Ok(Some(client))
    }

    pub async fn get(&self, tenant: &str) -> Option<Arc<TenantClient>> {
        self.clients.lock().await.get(tenant).cloned()
    }

    /// Drop the cached client. Returns whether one was cached.
    pub async fn remove(&self, tenant: &str) -> bool {
        self.clients.lock().await.remove(tenant).is_some()
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Tenants the platform lists as authorized.
    pub seen: usize,
    /// Refresh tokens that were new or changed.
    pub tokens_written: usize,
    /// Metadata entries that were new or changed.
    pub apps_written: usize,
    /// Local tenants the platform no longer lists.
    pub apps_deleted: usize,
}

/// Bring local tenants in line with the platform's list of authorized ones.
///
/// Every listed tenant gets its refresh token and metadata stored; every
/// local tenant not listed is dropped. Unchanged values are not rewritten.
pub(crate) async fn reconcile(
    shared: &Shared,
    registry: &TenantRegistry,
) -> GatewayResult<ReconcileReport> {
    let component_token = shared.credentials.platform_token().await?;
    let page_size = shared.page_size;

    let mut report = ReconcileReport::default();
    let mut seen = HashSet::new();
    let mut offset = 0u32;

    loop {
        let page = shared
            .api
            .authorizer_list(&component_token, offset, page_size)
            .await?;
        if page.list.is_empty() {
            break;
        }
        debug!(offset, count = page.list.len(), total = page.total_count, "authorizer page");
        offset += u32::try_from(page.list.len()).unwrap_or(page_size);

        for listing in page.list {
            let tenant = listing.authorizer_appid;
            if shared
                .credentials
                .seed_refresh_token(&tenant, &listing.refresh_token)
                .await?
            {
                report.tokens_written += 1;
            }

            let info = shared.api.authorizer_info(&component_token, &tenant).await?;
            if shared.apps.app_info(&tenant).await?.as_ref() != Some(&info) {
                shared.apps.save_app_info(&info).await?;
                report.apps_written += 1;
            }
            seen.insert(tenant);
        }
    }

    for stale in shared.apps.app_ids().await? {
        if !seen.contains(&stale) {
            registry.remove(&stale).await;
            shared.credentials.forget(&stale).await?;
        }
    }
    report.apps_deleted = shared.apps.delete_app_info_not_in(&seen).await?;
    report.seen = seen.len();

    info!(
        seen = report.seen,
        tokens_written = report.tokens_written,
        apps_written = report.apps_written,
        apps_deleted = report.apps_deleted,
        "reconciliation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_none_is_not_cached() {
        let registry = TenantRegistry::new();
        let client = registry
            .get_or_insert_with("wx123", || async { Ok(None) })
            .await
            .unwrap();
        assert!(client.is_none());
        assert!(registry.is_empty().await);
        assert!(!registry.remove("wx123").await);
    }

    #[tokio::test]
    async fn test_build_error_is_returned() {
        let registry = TenantRegistry::new();
        let result = registry
            .get_or_insert_with("wx123", || async {
                Err(crate::GatewayError::storage("backend down"))
            })
            .await;
        assert!(matches!(result, Err(crate::GatewayError::Storage { .. })));
        assert_eq!(registry.len().await, 0);
    }
}
