//! Transport for platform calls.
//!
//! Transport status codes and the platform's `{errcode, errmsg}` bodies are
//! interpreted here and nowhere else.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};

/// Body of calls that only acknowledge (`{"errcode": 0, "errmsg": "ok"}`).
#[derive(Debug, Deserialize)]
pub(crate) struct Ack {}

/// Token passed as a query parameter.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Credential<'a> {
    None,
    Component(&'a str),
    Access(&'a str),
}

impl Credential<'_> {
    fn as_query(&self) -> Option<(&'static str, &str)> {
        match *self {
            Self::None => None,
            Self::Component(token) => Some(("component_access_token", token)),
            Self::Access(token) => Some(("access_token", token)),
        }
    }
}

/// Shared reqwest client bound to the platform base URL.
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    pub(crate) client: reqwest::Client,
    pub(crate) base_url: String,
}

impl HttpBackend {
    /// POST `body` as JSON to `path` and decode the answer into `T`.
    pub(crate) async fn post_json<B, T>(
        &self,
        path: &str,
        credential: Credential<'_>,
        body: &B,
    ) -> GatewayResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(path = %path, "platform request");

        let mut request = self.client.post(&url).json(body);
        if let Some((name, token)) = credential.as_query() {
            request = request.query(&[(name, token)]);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| GatewayError::Network {
            message: format!("failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            warn!(path = %path, status = status.as_u16(), "platform returned HTTP error");
            return Err(GatewayError::Network {
                message: format!("HTTP {} from {}", status.as_u16(), path),
            });
        }

        decode(&bytes)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Decode a platform answer, turning a non-zero `errcode` into `Remote`.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> GatewayResult<T> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| GatewayError::InvalidResponse {
            message: format!("body is not JSON: {}", e),
        })?;

    if value.get("errcode").is_some() {
        let err: ErrorBody = serde_json::from_value(value.clone())?;
        if err.errcode != 0 {
            return Err(GatewayError::Remote {
                code: err.errcode,
                message: err.errmsg,
            });
        }
    }

    serde_json::from_value(value).map_err(|e| GatewayError::InvalidResponse {
        message: format!("unexpected body shape: {}", e),
    })
}
