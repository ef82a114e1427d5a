//! API payload types for the platform protocol.

use serde::{Deserialize, Serialize};

/// Numeric id wrapper used by several platform fields (`{"id": 2}`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdInfo {
    pub id: i64,
}

/// Feature switches reported for a tenant account (0 off, 1 on).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessInfo {
    #[serde(default)]
    pub open_store: i32,
    #[serde(default)]
    pub open_scan: i32,
    #[serde(default)]
    pub open_pay: i32,
    #[serde(default)]
    pub open_card: i32,
    #[serde(default)]
    pub open_shake: i32,
}

/// Descriptive metadata for an authorized tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    /// Tenant id. Filled in locally; the platform omits it from the info body.
    #[serde(default)]
    pub appid: String,

    /// Display name.
    #[serde(default)]
    pub nick_name: String,

    /// Avatar URL.
    #[serde(default)]
    pub head_img: String,

    /// Account type: 0 subscription, 1 upgraded legacy subscription, 2 service.
    #[serde(default)]
    pub service_type_info: Option<IdInfo>,

    /// Verification status: -1 unverified, 0 platform verified, other values
    /// are partner verifications.
    #[serde(default)]
    pub verify_type_info: Option<IdInfo>,

    /// Original account id.
    #[serde(default)]
    pub user_name: String,

    /// Legal entity name.
    #[serde(default)]
    pub principal_name: String,

    /// Public alias, may be empty.
    #[serde(default)]
    pub alias: String,

    #[serde(default)]
    pub business_info: Option<BusinessInfo>,

    /// QR code image URL.
    #[serde(default)]
    pub qrcode_url: String,

    #[serde(default)]
    pub idc: i64,

    /// Account description.
    #[serde(default)]
    pub signature: String,
}

impl AppInfo {
    /// Whether the account passed the platform's own verification.
    pub fn is_verified(&self) -> bool {
        self.verify_type_info.is_some_and(|v| v.id >= 0)
    }
}

/// A short-lived value minted by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub value: String,
    pub expires_in: i64,
}

/// One permission set granted by a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncScope {
    pub funcscope_category: IdInfo,
}

/// Result of exchanging an authorization code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    pub authorizer_appid: String,
    #[serde(default)]
    pub authorizer_access_token: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub authorizer_refresh_token: String,
    #[serde(default)]
    pub func_info: Vec<FuncScope>,
}

/// Result of refreshing a tenant's access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizerTokenGrant {
    pub authorizer_access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub authorizer_refresh_token: String,
}

/// One entry of the paged list of authorized tenants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizerListing {
    pub authorizer_appid: String,
    pub refresh_token: String,
    #[serde(default)]
    pub auth_time: i64,
}

/// A page of authorized tenants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizerList {
    #[serde(default)]
    pub total_count: i64,
    #[serde(default)]
    pub list: Vec<AuthorizerListing>,
}

/// Mini program card sent through the customer-service channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniProgramPage {
    pub title: String,
    pub appid: String,
    pub pagepath: String,
    pub thumb_media_id: String,
}

/// Out-of-band customer-service message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "msgtype", rename_all = "lowercase")]
pub enum CustomerMessage {
    Text { text: TextBody },
    #[serde(rename = "miniprogrampage")]
    MiniProgramPage { miniprogrampage: MiniProgramPage },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextBody {
    pub content: String,
}

impl CustomerMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            text: TextBody {
                content: content.into(),
            },
        }
    }

    pub fn mini_program_page(page: MiniProgramPage) -> Self {
        Self::MiniProgramPage {
            miniprogrampage: page,
        }
    }
}

/// Daily follower gains and losses per acquisition channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub ref_date: String,
    #[serde(default)]
    pub user_source: i64,
    #[serde(default)]
    pub new_user: i64,
    #[serde(default)]
    pub cancel_user: i64,
}

/// Daily total follower count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCumulate {
    pub ref_date: String,
    #[serde(default)]
    pub cumulate_user: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_info_tolerates_sparse_body() {
        let info: AppInfo = serde_json::from_value(serde_json::json!({
            "nick_name": "Coffee Lab",
            "verify_type_info": {"id": 0},
            "qrcode_url": "https://example.test/qr.png"
        }))
        .unwrap();

        assert_eq!(info.nick_name, "Coffee Lab");
        assert!(info.is_verified());
        assert!(info.appid.is_empty());
        assert!(info.business_info.is_none());
    }

    #[test]
    fn test_unverified_app() {
        let info = AppInfo {
            verify_type_info: Some(IdInfo { id: -1 }),
            ..Default::default()
        };
        assert!(!info.is_verified());
    }

    #[test]
    fn test_customer_message_wire_shape() {
        let msg = CustomerMessage::mini_program_page(MiniProgramPage {
            title: "Menu".into(),
            appid: "wxmini".into(),
            pagepath: "pages/index".into(),
            thumb_media_id: "media-1".into(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["msgtype"], "miniprogrampage");
        assert_eq!(json["miniprogrampage"]["pagepath"], "pages/index");

        let text = serde_json::to_value(CustomerMessage::text("hi")).unwrap();
        assert_eq!(text["msgtype"], "text");
        assert_eq!(text["text"]["content"], "hi");
    }
}
