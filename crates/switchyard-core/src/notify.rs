//! Authorization notices pushed to the integrator.
//!
//! | InfoType | Effect |
//! |----------|--------|
//! | `component_verify_ticket` | store the ticket (overwrite) |
//! | `authorized`, `updateauthorized` | store the grant if a code is attached, refresh metadata |
//! | `unauthorized` | drop the client, metadata and tokens of the tenant |
//! | anything else | ignored |
//!
//! Every effect is an idempotent overwrite or delete, so duplicate or
//! reordered deliveries converge.

use std::fmt;

use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::Shared;
use crate::registry::TenantRegistry;
use crate::xml::parse_flat;

/// Acknowledgement the platform expects after a notice was handled.
pub const ACK: &str = "success";

/// `InfoType` of a notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    VerifyTicket,
    Authorized,
    UpdateAuthorized,
    Unauthorized,
    Unknown(String),
}

impl NoticeKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "component_verify_ticket" => Self::VerifyTicket,
            "authorized" => Self::Authorized,
            "updateauthorized" => Self::UpdateAuthorized,
            "unauthorized" => Self::Unauthorized,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::VerifyTicket => "component_verify_ticket",
            Self::Authorized => "authorized",
            Self::UpdateAuthorized => "updateauthorized",
            Self::Unauthorized => "unauthorized",
            Self::Unknown(other) => other,
        }
    }
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decrypted authorization notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationNotice {
    /// Integrator the notice is for.
    pub app_id: String,
    pub create_time: i64,
    pub kind: NoticeKind,
    pub verify_ticket: Option<String>,
    pub authorizer_appid: Option<String>,
    pub authorization_code: Option<String>,
    pub authorization_code_expired_time: Option<i64>,
    pub pre_auth_code: Option<String>,
}

impl AuthorizationNotice {
    pub fn parse(xml: &str) -> GatewayResult<Self> {
        let mut fields = parse_flat(xml)?;
        let mut take = |name: &str| fields.remove(name).filter(|v| !v.is_empty());

        let kind = take("InfoType")
            .map(|raw| NoticeKind::parse(&raw))
            .ok_or_else(|| GatewayError::protocol("notice has no InfoType"))?;

        Ok(Self {
            app_id: take("AppId").unwrap_or_default(),
            create_time: take("CreateTime")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or_default(),
            kind,
            verify_ticket: take("ComponentVerifyTicket"),
            authorizer_appid: take("AuthorizerAppid"),
            authorization_code: take("AuthorizationCode"),
            authorization_code_expired_time: take("AuthorizationCodeExpiredTime")
                .and_then(|v| v.trim().parse().ok()),
            pre_auth_code: take("PreAuthCode"),
        })
    }

    fn tenant(&self) -> GatewayResult<&str> {
        self.authorizer_appid
            .as_deref()
            .ok_or_else(|| GatewayError::protocol(format!("{} notice has no AuthorizerAppid", self.kind)))
    }
}

/// Apply the effect of `notice`.
pub(crate) async fn apply(
    shared: &Shared,
    registry: &TenantRegistry,
    notice: &AuthorizationNotice,
) -> GatewayResult<()> {
    match &notice.kind {
        NoticeKind::VerifyTicket => {
            let ticket = notice
                .verify_ticket
                .as_deref()
                .ok_or_else(|| GatewayError::protocol("ticket notice has no ComponentVerifyTicket"))?;
            shared.credentials.record_ticket(ticket).await
        }
        NoticeKind::Authorized | NoticeKind::UpdateAuthorized => {
            let tenant = notice.tenant()?;
            if let Some(code) = notice.authorization_code.as_deref() {
                if let Err(e) = shared.credentials.exchange_auth_code(code).await {
                    // The redirect callback may have redeemed the code first.
                    let redeemed = matches!(e, GatewayError::Remote { .. })
                        && shared.credentials.has_authorization(tenant).await?;
                    if !redeemed {
                        return Err(e);
                    }
                    debug!(tenant = %tenant, error = %e, "authorization code already redeemed");
                }
            }
            shared.refresh_app_info(tenant).await?;
            info!(tenant = %tenant, info_type = %notice.kind, "tenant authorization updated");
            Ok(())
        }
        NoticeKind::Unauthorized => {
            let tenant = notice.tenant()?;
            registry.remove(tenant).await;
            shared.apps.delete_app_info(tenant).await?;
            shared.credentials.forget(tenant).await?;
            info!(tenant = %tenant, "tenant unauthorized");
            Ok(())
        }
        NoticeKind::Unknown(kind) => {
            warn!(info_type = %kind, "ignoring unknown notice");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ticket_notice() {
        let notice = AuthorizationNotice::parse(
            "<xml><AppId>wxcomp</AppId><CreateTime>1413192605</CreateTime><InfoType>component_verify_ticket</InfoType><ComponentVerifyTicket>ticket@@@abc</ComponentVerifyTicket></xml>",
        )
        .unwrap();
        assert_eq!(notice.kind, NoticeKind::VerifyTicket);
        assert_eq!(notice.app_id, "wxcomp");
        assert_eq!(notice.create_time, 1413192605);
        assert_eq!(notice.verify_ticket.as_deref(), Some("ticket@@@abc"));
        assert!(notice.authorizer_appid.is_none());
    }

    #[test]
    fn test_parse_authorized_notice() {
        let notice = AuthorizationNotice::parse(
            "<xml><AppId><![CDATA[wxcomp]]></AppId><CreateTime>1413192760</CreateTime><InfoType><![CDATA[authorized]]></InfoType><AuthorizerAppid><![CDATA[wx123]]></AuthorizerAppid><AuthorizationCode><![CDATA[code-1]]></AuthorizationCode><AuthorizationCodeExpiredTime>1413196360</AuthorizationCodeExpiredTime><PreAuthCode><![CDATA[preauth-1]]></PreAuthCode></xml>",
        )
        .unwrap();
        assert_eq!(notice.kind, NoticeKind::Authorized);
        assert_eq!(notice.tenant().unwrap(), "wx123");
        assert_eq!(notice.authorization_code.as_deref(), Some("code-1"));
        assert_eq!(notice.authorization_code_expired_time, Some(1413196360));
        assert_eq!(notice.pre_auth_code.as_deref(), Some("preauth-1"));
    }

    #[test]
    fn test_unknown_kind_is_kept() {
        let notice = AuthorizationNotice::parse(
            "<xml><AppId>wxcomp</AppId><InfoType>notify_third_fasteregister</InfoType></xml>",
        )
        .unwrap();
        assert_eq!(
            notice.kind,
            NoticeKind::Unknown("notify_third_fasteregister".into())
        );
    }

    #[test]
    fn test_missing_info_type() {
        assert!(matches!(
            AuthorizationNotice::parse("<xml><AppId>wxcomp</AppId></xml>"),
            Err(GatewayError::Protocol { .. })
        ));
    }

    #[test]
    fn test_unauthorized_without_tenant() {
        let notice =
            AuthorizationNotice::parse("<xml><InfoType>unauthorized</InfoType></xml>").unwrap();
        assert!(notice.tenant().is_err());
    }
}
