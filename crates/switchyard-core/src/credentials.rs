//! Credential hierarchy.
//!
//! ```text
//! verification ticket (pushed by the platform, no expiry)
//!   └─▶ platform token ("platform")
//!         ├─▶ pre-auth code ("pre_auth_code")
//!         └─▶ authorizer token per tenant ("authorizer:{tenant}")
//!               ▲ refresh token (durable, from onboarding or reconciliation)
//! ```
//!
//! Reads go to the store first. A value is handed out only while it is
//! fresh (see [`crate::expiring`]); otherwise one refresh per key runs at a
//! time and every concurrent caller for that key waits for its outcome.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{GatewayError, GatewayResult};
use crate::expiring::{AuthorizerToken, ExpiringValue};
use crate::flight::SingleFlight;
use crate::platform::PlatformApi;
use crate::store::CredentialStore;
use crate::types::AuthorizationGrant;

const PLATFORM_KEY: &str = "platform";
const PRE_AUTH_KEY: &str = "pre_auth_code";

fn authorizer_key(tenant: &str) -> String {
    format!("authorizer:{}", tenant)
}

/// Reads and refreshes the integrator's credentials.
///
/// Refreshes run detached from the caller: dropping a caller mid-refresh
/// leaves the refresh running for everyone else waiting on it.
pub struct Credentials {
    inner: Arc<Inner>,
}

struct Inner {
    component_appid: String,
    api: Arc<dyn PlatformApi>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    flights: SingleFlight<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("component_appid", &self.inner.component_appid)
            .field("in_flight", &self.inner.flights.in_flight())
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn new(
        component_appid: impl Into<String>,
        api: Arc<dyn PlatformApi>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                component_appid: component_appid.into(),
                api,
                store,
                clock,
                flights: SingleFlight::new(),
            }),
        }
    }

    pub fn component_appid(&self) -> &str {
        &self.inner.component_appid
    }

    /// Persist a verification ticket pushed by the platform. Overwrites.
    pub async fn record_ticket(&self, ticket: &str) -> GatewayResult<()> {
        self.inner.store.save_ticket(ticket).await?;
        debug!(component = %self.inner.component_appid, "verification ticket stored");
        Ok(())
    }

    /// The integrator's access token.
    pub async fn platform_token(&self) -> GatewayResult<String> {
        self.inner.platform_token().await
    }

    /// Pre-authorization code for the onboarding login page.
    pub async fn pre_auth_code(&self) -> GatewayResult<String> {
        self.inner.pre_auth_code().await
    }

    /// Access token of `tenant`.
    ///
    /// Fails with [`GatewayError::Unauthorized`] when no refresh token is
    /// stored for the tenant.
    pub async fn authorizer_access_token(&self, tenant: &str) -> GatewayResult<String> {
        self.inner.authorizer_access_token(tenant).await
    }

    /// Exchange the code handed to the onboarding redirect and persist the
    /// resulting token pair.
    pub async fn exchange_auth_code(&self, auth_code: &str) -> GatewayResult<AuthorizationGrant> {
        let component_token = self.inner.platform_token().await?;
        let grant = self.inner.api.query_auth(&component_token, auth_code).await?;
        self.store_authorization(&grant).await?;
        Ok(grant)
    }

    /// Persist the token pair carried by an authorization grant.
    pub async fn store_authorization(
        &self,
        grant: &AuthorizationGrant,
    ) -> GatewayResult<AuthorizerToken> {
        if grant.authorizer_refresh_token.is_empty() {
            return Err(GatewayError::protocol(format!(
                "authorization of {} carries no refresh token",
                grant.authorizer_appid
            )));
        }
        let token = AuthorizerToken::issued(
            grant.authorizer_access_token.clone(),
            grant.expires_in,
            grant.authorizer_refresh_token.clone(),
            self.inner.clock.now(),
        );
        self.inner
            .store
            .save_authorizer_token(&grant.authorizer_appid, &token)
            .await?;
        info!(tenant = %grant.authorizer_appid, "authorization stored");
        Ok(token)
    }

    /// Record a refresh token learned from the authorizer listing.
    ///
    /// Returns whether anything was written: a stored token with the same
    /// refresh token is left alone, together with its access token.
    pub async fn seed_refresh_token(&self, tenant: &str, refresh_token: &str) -> GatewayResult<bool> {
        if let Some(stored) = self.inner.store.authorizer_token(tenant).await? {
            if stored.refresh_token == refresh_token {
                return Ok(false);
            }
        }
        self.inner
            .store
            .save_authorizer_token(tenant, &AuthorizerToken::refresh_only(refresh_token))
            .await?;
        Ok(true)
    }

    /// Whether a refresh token is stored for `tenant`.
    pub async fn has_authorization(&self, tenant: &str) -> GatewayResult<bool> {
        Ok(self.inner.store.authorizer_token(tenant).await?.is_some())
    }

    /// Drop every credential held for `tenant`.
    pub async fn forget(&self, tenant: &str) -> GatewayResult<()> {
        self.inner.store.delete_authorizer_token(tenant).await?;
        debug!(tenant = %tenant, "authorizer token purged");
        Ok(())
    }
}

impl Inner {
    async fn platform_token(self: &Arc<Self>) -> GatewayResult<String> {
        if let Some(token) = self.store.platform_token().await? {
            if token.is_fresh(self.clock.now()) {
                return Ok(token.value);
            }
        }
        let inner = Arc::clone(self);
        self.flights
            .run(PLATFORM_KEY, move || async move {
                inner.refresh_platform_token().await
            })
            .await
    }

    async fn refresh_platform_token(&self) -> GatewayResult<String> {
        // The previous flight may have landed between our read and our join.
        let existing = self.store.platform_token().await?;
        if let Some(token) = &existing {
            if token.is_fresh(self.clock.now()) {
                return Ok(token.value.clone());
            }
        }

        let ticket = self
            .store
            .ticket()
            .await?
            .ok_or_else(|| GatewayError::TicketMissing {
                component: self.component_appid.clone(),
            })?;

        let grant = self
            .api
            .component_token(&ticket)
            .await
            .map_err(|e| refresh_error(PLATFORM_KEY, existing.is_some(), e))?;

        let token = ExpiringValue::issued(grant.value, grant.expires_in, self.clock.now());
        self.store.save_platform_token(&token).await?;
        info!(expires_in = grant.expires_in, "platform token refreshed");
        Ok(token.value)
    }

    async fn pre_auth_code(self: &Arc<Self>) -> GatewayResult<String> {
        if let Some(code) = self.store.pre_auth_code().await? {
            if code.is_fresh(self.clock.now()) {
                return Ok(code.value);
            }
        }
        let inner = Arc::clone(self);
        self.flights
            .run(PRE_AUTH_KEY, move || async move {
                inner.refresh_pre_auth_code().await
            })
            .await
    }

    async fn refresh_pre_auth_code(self: &Arc<Self>) -> GatewayResult<String> {
        let existing = self.store.pre_auth_code().await?;
        if let Some(code) = &existing {
            if code.is_fresh(self.clock.now()) {
                return Ok(code.value.clone());
            }
        }

        let component_token = self.platform_token().await?;
        let grant = self
            .api
            .create_pre_auth_code(&component_token)
            .await
            .map_err(|e| refresh_error(PRE_AUTH_KEY, existing.is_some(), e))?;

        let code = ExpiringValue::issued(grant.value, grant.expires_in, self.clock.now());
        self.store.save_pre_auth_code(&code).await?;
        debug!(expires_in = grant.expires_in, "pre-auth code created");
        Ok(code.value)
    }

    async fn authorizer_access_token(self: &Arc<Self>, tenant: &str) -> GatewayResult<String> {
        if let Some(token) = self.store.authorizer_token(tenant).await? {
            if token.is_fresh(self.clock.now()) {
                return Ok(token.access_token);
            }
        }
        let inner = Arc::clone(self);
        let owned = tenant.to_string();
        self.flights
            .run(&authorizer_key(tenant), move || async move {
                inner.refresh_authorizer_token(&owned).await
            })
            .await
    }

    async fn refresh_authorizer_token(self: &Arc<Self>, tenant: &str) -> GatewayResult<String> {
        let stored = self.stored_authorizer_token(tenant).await?;
        if stored.is_fresh(self.clock.now()) {
            return Ok(stored.access_token);
        }

        let component_token = self.platform_token().await?;
        let grant = self
            .api
            .refresh_authorizer_token(&component_token, tenant, &stored.refresh_token)
            .await
            .map_err(|e| refresh_error(&authorizer_key(tenant), true, e))?;

        // Some refresh answers omit the refresh token; the stored one stays valid.
        let refresh_token = if grant.authorizer_refresh_token.is_empty() {
            stored.refresh_token
        } else {
            grant.authorizer_refresh_token
        };
        let token = AuthorizerToken::issued(
            grant.authorizer_access_token,
            grant.expires_in,
            refresh_token,
            self.clock.now(),
        );

        // A tenant unauthorized while we refreshed stays gone.
        if !self.store.replace_authorizer_token(tenant, &token).await? {
            debug!(tenant = %tenant, "tenant removed during refresh, token discarded");
            return Err(GatewayError::Unauthorized {
                tenant: tenant.to_string(),
            });
        }
        info!(tenant = %tenant, expires_in = grant.expires_in, "authorizer token refreshed");
        Ok(token.access_token)
    }

    async fn stored_authorizer_token(&self, tenant: &str) -> GatewayResult<AuthorizerToken> {
        self.store
            .authorizer_token(tenant)
            .await?
            .ok_or_else(|| GatewayError::Unauthorized {
                tenant: tenant.to_string(),
            })
    }
}

/// A failed refresh of a credential that existed is reported as such; a
/// failed first fetch keeps the remote error as is.
fn refresh_error(credential: &str, existed: bool, err: GatewayError) -> GatewayError {
    warn!(credential = %credential, error = %err, "credential refresh failed");
    if existed {
        GatewayError::RefreshFailed {
            credential: credential.to_string(),
            reason: err.to_string(),
        }
    } else {
        err
    }
}
