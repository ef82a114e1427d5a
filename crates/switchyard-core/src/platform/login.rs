//! Onboarding login page URL.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{GatewayError, GatewayResult};

/// Which account kinds the login page offers for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    OfficialAccount,
    MiniProgram,
    Both,
}

impl AuthType {
    fn code(self) -> &'static str {
        match self {
            Self::OfficialAccount => "1",
            Self::MiniProgram => "2",
            Self::Both => "3",
        }
    }
}

/// Optional login page parameters. `auth_type` and `biz_appid` are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginOptions {
    #[serde(default)]
    pub auth_type: Option<AuthType>,
    /// Restrict the page to one specific account.
    #[serde(default)]
    pub biz_appid: Option<String>,
}

/// Build the login page URL a tenant admin is sent to.
pub fn authorization_url(
    login_url: &str,
    component_appid: &str,
    pre_auth_code: &str,
    redirect_uri: &str,
    options: &LoginOptions,
) -> GatewayResult<String> {
    if options.auth_type.is_some() && options.biz_appid.is_some() {
        return Err(GatewayError::Config {
            message: "auth_type and biz_appid are mutually exclusive".to_string(),
        });
    }

    let mut url = Url::parse(login_url).map_err(|e| GatewayError::Config {
        message: format!("invalid login url '{}': {}", login_url, e),
    })?;

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("component_appid", component_appid)
            .append_pair("pre_auth_code", pre_auth_code)
            .append_pair("redirect_uri", redirect_uri);
        if let Some(auth_type) = options.auth_type {
            query.append_pair("auth_type", auth_type.code());
        }
        if let Some(biz_appid) = &options.biz_appid {
            query.append_pair("biz_appid", biz_appid);
        }
    }

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN: &str = "https://mp.weixin.qq.com/cgi-bin/componentloginpage";

    fn pairs(url: &str) -> Vec<(String, String)> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_required_parameters_are_encoded() {
        let url = authorization_url(
            LOGIN,
            "wxcomp",
            "preauthcode@@@abc",
            "https://integrator.example/authorize/callback?state=1",
            &LoginOptions::default(),
        )
        .unwrap();

        assert!(url.starts_with(LOGIN));
        assert_eq!(
            pairs(&url),
            vec![
                ("component_appid".into(), "wxcomp".into()),
                ("pre_auth_code".into(), "preauthcode@@@abc".into()),
                (
                    "redirect_uri".into(),
                    "https://integrator.example/authorize/callback?state=1".into()
                ),
            ]
        );
    }

    #[test]
    fn test_auth_type_is_numeric() {
        let url = authorization_url(
            LOGIN,
            "wxcomp",
            "code",
            "https://integrator.example/cb",
            &LoginOptions {
                auth_type: Some(AuthType::MiniProgram),
                biz_appid: None,
            },
        )
        .unwrap();
        assert!(pairs(&url).contains(&("auth_type".into(), "2".into())));
    }

    #[test]
    fn test_exclusive_options_rejected() {
        let result = authorization_url(
            LOGIN,
            "wxcomp",
            "code",
            "https://integrator.example/cb",
            &LoginOptions {
                auth_type: Some(AuthType::Both),
                biz_appid: Some("wx123".into()),
            },
        );
        assert!(matches!(result, Err(GatewayError::Config { .. })));
    }
}
