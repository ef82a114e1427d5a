//! Remote platform API.
//!
//! Endpoint shapes live here; error mapping lives in `http.rs`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::types::{
    AppInfo, AuthorizationGrant, AuthorizerList, AuthorizerTokenGrant, CustomerMessage, Grant,
    UserCumulate, UserSummary,
};

mod http;
mod login;

use http::{Ack, Credential, HttpBackend};
pub use login::{authorization_url, AuthType, LoginOptions};

const USER_AGENT_VALUE: &str = concat!("switchyard/", env!("CARGO_PKG_VERSION"));

/// Calls the gateway makes against the remote platform.
///
/// Every method is a single request; nothing here retries or caches.
#[async_trait]
pub trait PlatformApi: Send + Sync + std::fmt::Debug {
    /// Mint the integrator's own access token from a verification ticket.
    async fn component_token(&self, ticket: &str) -> GatewayResult<Grant>;

    async fn create_pre_auth_code(&self, component_token: &str) -> GatewayResult<Grant>;

    /// Exchange the code handed to the onboarding redirect.
    async fn query_auth(
        &self,
        component_token: &str,
        auth_code: &str,
    ) -> GatewayResult<AuthorizationGrant>;

    async fn refresh_authorizer_token(
        &self,
        component_token: &str,
        tenant: &str,
        refresh_token: &str,
    ) -> GatewayResult<AuthorizerTokenGrant>;

    /// Tenant metadata; the returned `appid` is always `tenant`.
    async fn authorizer_info(&self, component_token: &str, tenant: &str)
        -> GatewayResult<AppInfo>;

    async fn authorizer_list(
        &self,
        component_token: &str,
        offset: u32,
        count: u32,
    ) -> GatewayResult<AuthorizerList>;

    /// Send an out-of-band customer-service message to one user.
    async fn send_custom_message(
        &self,
        access_token: &str,
        touser: &str,
        message: &CustomerMessage,
    ) -> GatewayResult<()>;

    async fn user_summary(
        &self,
        access_token: &str,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> GatewayResult<Vec<UserSummary>>;

    async fn user_cumulate(
        &self,
        access_token: &str,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> GatewayResult<Vec<UserCumulate>>;

    /// Create an open account and bind `tenant` to it. Returns the open account id.
    async fn create_open_account(&self, access_token: &str, tenant: &str)
        -> GatewayResult<String>;

    async fn bind_open_account(
        &self,
        access_token: &str,
        tenant: &str,
        open_appid: &str,
    ) -> GatewayResult<()>;

    /// Open account `tenant` is bound to.
    async fn get_open_account(&self, access_token: &str, tenant: &str) -> GatewayResult<String>;

    async fn unbind_open_account(
        &self,
        access_token: &str,
        tenant: &str,
        open_appid: &str,
    ) -> GatewayResult<()>;
}

/// [`PlatformApi`] over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpPlatformApi {
    http: HttpBackend,
    component_appid: String,
    component_secret: String,
}

#[derive(Debug, Deserialize)]
struct ComponentToken {
    component_access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct PreAuthCode {
    pre_auth_code: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct QueryAuth {
    authorization_info: AuthorizationGrant,
}

#[derive(Debug, Deserialize)]
struct AuthorizerInfo {
    authorizer_info: AppInfo,
}

#[derive(Debug, Deserialize)]
struct DataList<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct OpenAccount {
    open_appid: String,
}

#[derive(Serialize)]
struct Outbound<'a> {
    touser: &'a str,
    #[serde(flatten)]
    message: &'a CustomerMessage,
}

fn date_range(begin: NaiveDate, end: NaiveDate) -> serde_json::Value {
    json!({
        "begin_date": begin.format("%Y-%m-%d").to_string(),
        "end_date": end.format("%Y-%m-%d").to_string(),
    })
}

impl HttpPlatformApi {
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| GatewayError::Network {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http: HttpBackend {
                client,
                base_url: config.api_url.trim_end_matches('/').to_string(),
            },
            component_appid: config.component_appid.clone(),
            component_secret: config.component_secret.clone(),
        })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(&GatewayConfig::from_env())
    }

    pub fn base_url(&self) -> &str {
        &self.http.base_url
    }
}

#[async_trait]
impl PlatformApi for HttpPlatformApi {
    async fn component_token(&self, ticket: &str) -> GatewayResult<Grant> {
        let body = json!({
            "component_appid": self.component_appid,
            "component_appsecret": self.component_secret,
            "component_verify_ticket": ticket,
        });
        let token: ComponentToken = self
            .http
            .post_json(
                "/cgi-bin/component/api_component_token",
                Credential::None,
                &body,
            )
            .await?;
        debug!(expires_in = token.expires_in, "minted component token");
        Ok(Grant {
            value: token.component_access_token,
            expires_in: token.expires_in,
        })
    }

    async fn create_pre_auth_code(&self, component_token: &str) -> GatewayResult<Grant> {
        let body = json!({ "component_appid": self.component_appid });
        let code: PreAuthCode = self
            .http
            .post_json(
                "/cgi-bin/component/api_create_preauthcode",
                Credential::Component(component_token),
                &body,
            )
            .await?;
        Ok(Grant {
            value: code.pre_auth_code,
            expires_in: code.expires_in,
        })
    }

    async fn query_auth(
        &self,
        component_token: &str,
        auth_code: &str,
    ) -> GatewayResult<AuthorizationGrant> {
        let body = json!({
            "component_appid": self.component_appid,
            "authorization_code": auth_code,
        });
        let res: QueryAuth = self
            .http
            .post_json(
                "/cgi-bin/component/api_query_auth",
                Credential::Component(component_token),
                &body,
            )
            .await?;
        Ok(res.authorization_info)
    }

    async fn refresh_authorizer_token(
        &self,
        component_token: &str,
        tenant: &str,
        refresh_token: &str,
    ) -> GatewayResult<AuthorizerTokenGrant> {
        let body = json!({
            "component_appid": self.component_appid,
            "authorizer_appid": tenant,
            "authorizer_refresh_token": refresh_token,
        });
        self.http
            .post_json(
                "/cgi-bin/component/api_authorizer_token",
                Credential::Component(component_token),
                &body,
            )
            .await
    }

    async fn authorizer_info(
        &self,
        component_token: &str,
        tenant: &str,
    ) -> GatewayResult<AppInfo> {
        let body = json!({
            "component_appid": self.component_appid,
            "authorizer_appid": tenant,
        });
        let res: AuthorizerInfo = self
            .http
            .post_json(
                "/cgi-bin/component/api_get_authorizer_info",
                Credential::Component(component_token),
                &body,
            )
            .await?;
        let mut info = res.authorizer_info;
        info.appid = tenant.to_string();
        Ok(info)
    }

    async fn authorizer_list(
        &self,
        component_token: &str,
        offset: u32,
        count: u32,
    ) -> GatewayResult<AuthorizerList> {
        let body = json!({
            "component_appid": self.component_appid,
            "offset": offset,
            "count": count,
        });
        self.http
            .post_json(
                "/cgi-bin/component/api_get_authorizer_list",
                Credential::Component(component_token),
                &body,
            )
            .await
    }

    async fn send_custom_message(
        &self,
        access_token: &str,
        touser: &str,
        message: &CustomerMessage,
    ) -> GatewayResult<()> {
        let body = Outbound { touser, message };
        let _: Ack = self
            .http
            .post_json(
                "/cgi-bin/message/custom/send",
                Credential::Access(access_token),
                &body,
            )
            .await?;
        Ok(())
    }

    async fn user_summary(
        &self,
        access_token: &str,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> GatewayResult<Vec<UserSummary>> {
        let res: DataList<UserSummary> = self
            .http
            .post_json(
                "/datacube/getusersummary",
                Credential::Access(access_token),
                &date_range(begin, end),
            )
            .await?;
        Ok(res.list)
    }

    async fn user_cumulate(
        &self,
        access_token: &str,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> GatewayResult<Vec<UserCumulate>> {
        let res: DataList<UserCumulate> = self
            .http
            .post_json(
                "/datacube/getusercumulate",
                Credential::Access(access_token),
                &date_range(begin, end),
            )
            .await?;
        Ok(res.list)
    }

    async fn create_open_account(
        &self,
        access_token: &str,
        tenant: &str,
    ) -> GatewayResult<String> {
        let res: OpenAccount = self
            .http
            .post_json(
                "/cgi-bin/open/create",
                Credential::Access(access_token),
                &json!({ "appid": tenant }),
            )
            .await?;
        Ok(res.open_appid)
    }

    async fn bind_open_account(
        &self,
        access_token: &str,
        tenant: &str,
        open_appid: &str,
    ) -> GatewayResult<()> {
        let _: Ack = self
            .http
            .post_json(
                "/cgi-bin/open/bind",
                Credential::Access(access_token),
                &json!({ "appid": tenant, "open_appid": open_appid }),
            )
            .await?;
        Ok(())
    }

    async fn get_open_account(&self, access_token: &str, tenant: &str) -> GatewayResult<String> {
        let res: OpenAccount = self
            .http
            .post_json(
                "/cgi-bin/open/get",
                Credential::Access(access_token),
                &json!({ "appid": tenant }),
            )
            .await?;
        Ok(res.open_appid)
    }

    async fn unbind_open_account(
        &self,
        access_token: &str,
        tenant: &str,
        open_appid: &str,
    ) -> GatewayResult<()> {
        let _: Ack = self
            .http
            .post_json(
                "/cgi-bin/open/unbind",
                Credential::Access(access_token),
                &json!({ "appid": tenant, "open_appid": open_appid }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn api(server: &MockServer) -> HttpPlatformApi {
        let config = GatewayConfig::default()
            .with_component("wxcomp", "secret")
            .with_api_url(server.uri());
        HttpPlatformApi::new(&config).expect("client")
    }

    #[tokio::test]
    async fn test_component_token_sends_ticket() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/component/api_component_token"))
            .and(body_partial_json(serde_json::json!({
                "component_appid": "wxcomp",
                "component_appsecret": "secret",
                "component_verify_ticket": "ticket@@@1",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "component_access_token": "ctok",
                "expires_in": 7200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = api(&server).await.component_token("ticket@@@1").await.unwrap();
        assert_eq!(grant.value, "ctok");
        assert_eq!(grant.expires_in, 7200);
    }

    #[tokio::test]
    async fn test_authorizer_info_fills_appid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/component/api_get_authorizer_info"))
            .and(query_param("component_access_token", "ctok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "authorizer_info": {
                    "nick_name": "Coffee Lab",
                    "service_type_info": {"id": 2},
                    "verify_type_info": {"id": 0}
                },
                "authorization_info": {"authorizer_appid": "wx123"}
            })))
            .mount(&server)
            .await;

        let info = api(&server).await.authorizer_info("ctok", "wx123").await.unwrap();
        assert_eq!(info.appid, "wx123");
        assert_eq!(info.nick_name, "Coffee Lab");
        assert!(info.is_verified());
    }

    #[tokio::test]
    async fn test_errcode_becomes_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/component/api_authorizer_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errcode": 61023,
                "errmsg": "refresh_token is invalid"
            })))
            .mount(&server)
            .await;

        let err = api(&server)
            .await
            .refresh_authorizer_token("ctok", "wx123", "stale")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Remote {
                code: 61023,
                message: "refresh_token is invalid".into()
            }
        );
        assert!(err.is_credential_rejection());
    }

    #[tokio::test]
    async fn test_http_failure_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/component/api_create_preauthcode"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = api(&server)
            .await
            .create_pre_auth_code("ctok")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Network { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_custom_message_carries_recipient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/message/custom/send"))
            .and(query_param("access_token", "atok"))
            .and(body_partial_json(serde_json::json!({
                "touser": "openid-1",
                "msgtype": "text",
                "text": {"content": "hello"}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"errcode": 0, "errmsg": "ok"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        api(&server)
            .await
            .send_custom_message("atok", "openid-1", &CustomerMessage::text("hello"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_user_summary_dates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/datacube/getusersummary"))
            .and(body_partial_json(serde_json::json!({
                "begin_date": "2020-11-01",
                "end_date": "2020-11-08"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "list": [
                    {"ref_date": "2020-11-01", "user_source": 0, "new_user": 3, "cancel_user": 1}
                ]
            })))
            .mount(&server)
            .await;

        let begin = NaiveDate::from_ymd_opt(2020, 11, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2020, 11, 8).unwrap();
        let list = api(&server)
            .await
            .user_summary("atok", begin, end)
            .await
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].new_user, 3);
    }
}
