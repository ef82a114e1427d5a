//! Server configuration: an optional YAML file overlaid by environment variables.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use switchyard_core::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub log_json: bool,

    /// Text sent back to new followers, if any.
    #[serde(default)]
    pub welcome: Option<String>,

    /// Bearer token guarding the management routes. Without one they
    /// answer 401 to everyone.
    #[serde(default)]
    pub admin_token: Option<String>,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_json: false,
            welcome: None,
            admin_token: None,
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read `path` when given, then overlay `SWITCHYARD_*` variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::from_yaml(&raw)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config.merge_env())
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    fn merge_env(mut self) -> Self {
        self.gateway = self.gateway.merge_env();
        if let Some(welcome) = std::env::var("SWITCHYARD_WELCOME")
            .ok()
            .filter(|v| !v.is_empty())
        {
            self.welcome = Some(welcome);
        }
        if let Some(token) = std::env::var("SWITCHYARD_ADMIN_TOKEN")
            .ok()
            .filter(|v| !v.is_empty())
        {
            self.admin_token = Some(token);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_overrides_defaults() {
        let config = ServerConfig::from_yaml(
            r#"
bind: "127.0.0.1:9000"
welcome: "Thanks for following!"
admin_token: s3cret
gateway:
  component_appid: wxcomp
  component_secret: secret
  page_size: 50
"#,
        )
        .unwrap();

        assert_eq!(config.bind, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.welcome.as_deref(), Some("Thanks for following!"));
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(config.gateway.component_appid, "wxcomp");
        assert_eq!(config.gateway.page_size, 50);
        // Unset gateway fields keep their defaults.
        assert_eq!(config.gateway.api_url, "https://api.weixin.qq.com");
        assert!(!config.log_json);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = ServerConfig::from_yaml("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_unknown_bind_is_rejected() {
        assert!(ServerConfig::from_yaml("bind: nowhere").is_err());
    }
}
