//! Gateway configuration.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// Identity and endpoints of the integrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Integrator (component) app id.
    #[serde(default)]
    pub component_appid: String,

    /// Integrator app secret.
    #[serde(default)]
    pub component_secret: String,

    /// Token used in request signatures.
    #[serde(default)]
    pub message_token: String,

    /// 43-character message encryption key.
    #[serde(default)]
    pub aes_key: String,

    /// Base URL of the platform API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Login page tenants are redirected to during onboarding.
    #[serde(default = "default_login_url")]
    pub login_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Page size used when listing authorized tenants.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_api_url() -> String {
    "https://api.weixin.qq.com".to_string()
}

fn default_login_url() -> String {
    "https://mp.weixin.qq.com/cgi-bin/componentloginpage".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_page_size() -> u32 {
    100
}

/// The platform refuses pages larger than this.
pub const MAX_PAGE_SIZE: u32 = 500;

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            component_appid: String::new(),
            component_secret: String::new(),
            message_token: String::new(),
            aes_key: String::new(),
            api_url: default_api_url(),
            login_url: default_login_url(),
            timeout_secs: default_timeout(),
            page_size: default_page_size(),
        }
    }
}

impl GatewayConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `SWITCHYARD_COMPONENT_APPID` | Integrator app id |
    /// | `SWITCHYARD_COMPONENT_SECRET` | Integrator app secret |
    /// | `SWITCHYARD_MESSAGE_TOKEN` | Signature token |
    /// | `SWITCHYARD_AES_KEY` | Message encryption key |
    /// | `SWITCHYARD_API_URL` | Platform API base URL |
    /// | `SWITCHYARD_LOGIN_URL` | Onboarding login page |
    /// | `SWITCHYARD_TIMEOUT` | Request timeout in seconds (default: 10) |
    /// | `SWITCHYARD_PAGE_SIZE` | Reconciliation page size (default: 100) |
    pub fn from_env() -> Self {
        Self::default().merge_env()
    }

    /// Overlay any set environment variables on top of `self`.
    pub fn merge_env(mut self) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(v) = var("SWITCHYARD_COMPONENT_APPID") {
            self.component_appid = v;
        }
        if let Some(v) = var("SWITCHYARD_COMPONENT_SECRET") {
            self.component_secret = v;
        }
        if let Some(v) = var("SWITCHYARD_MESSAGE_TOKEN") {
            self.message_token = v;
        }
        if let Some(v) = var("SWITCHYARD_AES_KEY") {
            self.aes_key = v;
        }
        if let Some(v) = var("SWITCHYARD_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = var("SWITCHYARD_LOGIN_URL") {
            self.login_url = v;
        }
        if let Some(v) = var("SWITCHYARD_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.timeout_secs = v;
        }
        if let Some(v) = var("SWITCHYARD_PAGE_SIZE").and_then(|v| v.parse().ok()) {
            self.page_size = v;
        }
        self
    }

    /// Check that the identity fields are present and sane.
    pub fn validate(&self) -> GatewayResult<()> {
        let missing = [
            ("component_appid", &self.component_appid),
            ("component_secret", &self.component_secret),
            ("message_token", &self.message_token),
            ("aes_key", &self.aes_key),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect::<Vec<_>>();

        if !missing.is_empty() {
            return Err(GatewayError::Config {
                message: format!("missing {}", missing.join(", ")),
            });
        }
        if self.aes_key.len() != 43 {
            return Err(GatewayError::Config {
                message: format!("aes_key must be 43 characters, got {}", self.aes_key.len()),
            });
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(GatewayError::Config {
                message: format!("page_size must be within 1..={}", MAX_PAGE_SIZE),
            });
        }
        Ok(())
    }

    pub fn with_component(mut self, appid: impl Into<String>, secret: impl Into<String>) -> Self {
        self.component_appid = appid.into();
        self.component_secret = secret.into();
        self
    }

    pub fn with_message_keys(mut self, token: impl Into<String>, aes_key: impl Into<String>) -> Self {
        self.message_token = token.into();
        self.aes_key = aes_key.into();
        self
    }

    /// Set the platform API base URL.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }
}
