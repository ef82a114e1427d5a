//! Top-level gateway.
//!
//! One [`Gateway`] per integrator, built once at startup and shared by every
//! request. It owns the credential hierarchy, the tenant registry and the
//! handler table; nothing here is global.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::credentials::Credentials;
use crate::crypto::{BizMsgCrypt, MessageCrypto};
use crate::dispatch::{open_request, Dispatcher, WebhookReply, WebhookRequest};
use crate::error::{GatewayError, GatewayResult};
use crate::notify::{self, AuthorizationNotice, ACK};
use crate::platform::{authorization_url, HttpPlatformApi, LoginOptions, PlatformApi};
use crate::registry::{reconcile, ReconcileReport, TenantClient, TenantRegistry};
use crate::store::{AppStore, CredentialStore, KvCredentialStore, MemoryAppStore, MemoryKv};
use crate::types::{AppInfo, AuthorizationGrant};

/// Collaborators shared by the gateway and every tenant client.
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) page_size: u32,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) api: Arc<dyn PlatformApi>,
    pub(crate) credentials: Arc<Credentials>,
    pub(crate) apps: Arc<dyn AppStore>,
    pub(crate) crypto: Arc<dyn MessageCrypto>,
    pub(crate) dispatcher: Arc<Dispatcher>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("component_appid", &self.credentials.component_appid())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Shared {
    /// Fetch metadata from the platform and store it.
    pub(crate) async fn refresh_app_info(&self, tenant: &str) -> GatewayResult<AppInfo> {
        let component_token = self.credentials.platform_token().await?;
        let info = self.api.authorizer_info(&component_token, tenant).await?;
        self.apps.save_app_info(&info).await?;
        debug!(tenant = %tenant, nick_name = %info.nick_name, "app info refreshed");
        Ok(info)
    }

    /// Stored metadata, fetched when absent. Only authorized tenants are fetched.
    pub(crate) async fn app_info(&self, tenant: &str) -> GatewayResult<AppInfo> {
        if let Some(info) = self.apps.app_info(tenant).await? {
            return Ok(info);
        }
        if !self.credentials.has_authorization(tenant).await? {
            return Err(GatewayError::Unauthorized {
                tenant: tenant.to_string(),
            });
        }
        self.refresh_app_info(tenant).await
    }
}

/// Multi-tenant credential and webhook gateway.
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    shared: Shared,
    registry: TenantRegistry,
}

impl Gateway {
    /// Gateway with default collaborators.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<Credentials> {
        &self.shared.credentials
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    /// Handle a push to the integrator's notice URL.
    ///
    /// Replies with [`ACK`] once the notice was applied; any failure is
    /// logged and answered with an empty body so the platform redelivers.
    pub async fn handle_authorization_notice(&self, request: &WebhookRequest) -> WebhookReply {
        let notice = open_request(&self.shared.crypto, &request.query, &request.body)
            .and_then(|opened| AuthorizationNotice::parse(&opened.plaintext));
        let notice = match notice {
            Ok(notice) => notice,
            Err(e) => {
                warn!(error = %e, "authorization notice rejected");
                return WebhookReply::empty();
            }
        };

        match self.apply_notice(&notice).await {
            Ok(()) => WebhookReply::new(ACK),
            Err(e) => {
                warn!(info_type = %notice.kind, error = %e, "authorization notice failed");
                WebhookReply::empty()
            }
        }
    }

    /// Apply a decrypted notice.
    pub async fn apply_notice(&self, notice: &AuthorizationNotice) -> GatewayResult<()> {
        debug!(info_type = %notice.kind, tenant = ?notice.authorizer_appid, "applying notice");
        notify::apply(&self.shared, &self.registry, notice).await
    }

    /// Login page URL for onboarding a tenant. The platform sends the admin
    /// back to `redirect_uri` with an `auth_code`.
    pub async fn authorization_url(
        &self,
        redirect_uri: &str,
        options: &LoginOptions,
    ) -> GatewayResult<String> {
        let pre_auth_code = self.shared.credentials.pre_auth_code().await?;
        authorization_url(
            &self.config.login_url,
            &self.config.component_appid,
            &pre_auth_code,
            redirect_uri,
            options,
        )
    }

    /// Redeem the `auth_code` from the onboarding redirect.
    pub async fn complete_authorization(
        &self,
        auth_code: &str,
    ) -> GatewayResult<(AuthorizationGrant, AppInfo)> {
        let grant = self.shared.credentials.exchange_auth_code(auth_code).await?;
        let info = self
            .shared
            .refresh_app_info(&grant.authorizer_appid)
            .await?;
        info!(tenant = %grant.authorizer_appid, scopes = grant.func_info.len(), "tenant onboarded");
        Ok((grant, info))
    }

    /// Client for `tenant`, or `None` when no metadata is stored for it.
    pub async fn client(&self, tenant: &str) -> GatewayResult<Option<Arc<TenantClient>>> {
        self.registry
            .get_or_insert_with(tenant, || async {
                Ok(self
                    .shared
                    .apps
                    .app_info(tenant)
                    .await?
                    .map(|_| TenantClient::new(tenant, self.shared.clone())))
            })
            .await
    }

    /// Handle a push to a tenant's message URL. Always produces a reply.
    pub async fn handle_message(&self, tenant: &str, request: &WebhookRequest) -> WebhookReply {
        match self.client(tenant).await {
            Ok(Some(client)) => client.handle_message(request).await,
            Ok(None) => {
                warn!(tenant = %tenant, "push for unknown tenant");
                WebhookReply::empty()
            }
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "tenant lookup failed");
                WebhookReply::empty()
            }
        }
    }

    pub async fn app_info(&self, tenant: &str) -> GatewayResult<AppInfo> {
        self.shared.app_info(tenant).await
    }

    pub async fn refresh_app_info(&self, tenant: &str) -> GatewayResult<AppInfo> {
        self.shared.refresh_app_info(tenant).await
    }

    /// Reconcile local tenants with the platform's list of authorized ones.
    pub async fn migrate_apps(&self) -> GatewayResult<ReconcileReport> {
        reconcile(&self.shared, &self.registry).await
    }

    /// Create an open account and bind `tenant` to it.
    pub async fn create_open_account(&self, tenant: &str) -> GatewayResult<String> {
        let token = self.shared.credentials.authorizer_access_token(tenant).await?;
        self.shared.api.create_open_account(&token, tenant).await
    }

    pub async fn bind_open_account(&self, tenant: &str, open_appid: &str) -> GatewayResult<()> {
        let token = self.shared.credentials.authorizer_access_token(tenant).await?;
        self.shared
            .api
            .bind_open_account(&token, tenant, open_appid)
            .await
    }

    pub async fn get_open_account(&self, tenant: &str) -> GatewayResult<String> {
        let token = self.shared.credentials.authorizer_access_token(tenant).await?;
        self.shared.api.get_open_account(&token, tenant).await
    }

    pub async fn unbind_open_account(&self, tenant: &str, open_appid: &str) -> GatewayResult<()> {
        let token = self.shared.credentials.authorizer_access_token(tenant).await?;
        self.shared
            .api
            .unbind_open_account(&token, tenant, open_appid)
            .await
    }
}

/// Wires a [`Gateway`]. Unset collaborators get defaults built from the config.
pub struct GatewayBuilder {
    config: GatewayConfig,
    clock: Option<Arc<dyn Clock>>,
    api: Option<Arc<dyn PlatformApi>>,
    crypto: Option<Arc<dyn MessageCrypto>>,
    credential_store: Option<Arc<dyn CredentialStore>>,
    app_store: Option<Arc<dyn AppStore>>,
    dispatcher: Dispatcher,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            clock: None,
            api: None,
            crypto: None,
            credential_store: None,
            app_store: None,
            dispatcher: Dispatcher::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_platform_api(mut self, api: Arc<dyn PlatformApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_crypto(mut self, crypto: Arc<dyn MessageCrypto>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    pub fn with_app_store(mut self, store: Arc<dyn AppStore>) -> Self {
        self.app_store = Some(store);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn build(self) -> GatewayResult<Gateway> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let api: Arc<dyn PlatformApi> = match self.api {
            Some(api) => api,
            None => Arc::new(HttpPlatformApi::new(&config)?),
        };
        let crypto: Arc<dyn MessageCrypto> = match self.crypto {
            Some(crypto) => crypto,
            None => Arc::new(BizMsgCrypt::new(
                config.message_token.clone(),
                &config.aes_key,
                config.component_appid.clone(),
            )?),
        };
        let credential_store = self.credential_store.unwrap_or_else(|| {
            debug!("using in-memory credential store");
            Arc::new(
                KvCredentialStore::new(
                    &config.component_appid,
                    MemoryKv::with_clock(Arc::clone(&clock)),
                )
                .with_clock(Arc::clone(&clock)),
            )
        });
        let apps = self.app_store.unwrap_or_else(|| {
            debug!("using in-memory app store");
            Arc::new(MemoryAppStore::new())
        });

        let credentials = Arc::new(Credentials::new(
            config.component_appid.clone(),
            Arc::clone(&api),
            credential_store,
            Arc::clone(&clock),
        ));

        info!(
            component = %config.component_appid,
            handlers = self.dispatcher.handler_count(),
            "gateway ready"
        );
        Ok(Gateway {
            shared: Shared {
                page_size: config.page_size,
                clock,
                api,
                credentials,
                apps,
                crypto,
                dispatcher: Arc::new(self.dispatcher),
            },
            config,
            registry: TenantRegistry::new(),
        })
    }
}
