//! Error types for the gateway.

/// Gateway errors.
///
/// Cloneable so that a single in-flight refresh can hand the same outcome to
/// every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The platform has not pushed a verification ticket yet.
    #[error("verification ticket not yet provisioned for component {component}")]
    TicketMissing { component: String },

    /// No refresh token is stored for the tenant.
    #[error("tenant {tenant} is not authorized")]
    Unauthorized { tenant: String },

    /// An expired credential could not be refreshed.
    #[error("credential {credential} expired and refresh failed: {reason}")]
    RefreshFailed { credential: String, reason: String },

    /// The platform answered with a non-zero error code.
    #[error("remote rejected request: code [{code}] {message}")]
    Remote { code: i64, message: String },

    /// Network error.
    #[error("network error: {message}")]
    Network { message: String },

    /// Invalid response from the platform.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Credential or metadata store failure.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// Request signature did not match.
    #[error("signature mismatch: {message}")]
    Signature { message: String },

    /// Decryption or encryption failed.
    #[error("crypto error: {message}")]
    Crypto { message: String },

    /// Malformed envelope or reply.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A reply was already written for this request.
    #[error("already responded with {previous} reply")]
    AlreadyResponded { previous: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl GatewayError {
    /// Errors the caller can act on without retrying (re-authorize, wait for a ticket).
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::TicketMissing { .. } | Self::Unauthorized { .. }
        )
    }

    /// Whether the error may succeed when the caller tries again later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Remote { .. } | Self::RefreshFailed { .. }
        )
    }

    /// Whether the error rejects the authenticity or shape of an inbound request.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Signature { .. } | Self::Crypto { .. } | Self::Protocol { .. }
        )
    }

    /// Platform error codes that mean the access token itself is bad.
    pub fn is_credential_rejection(&self) -> bool {
        match self {
            Self::Remote { code, .. } => matches!(code, 40001 | 40014 | 42001 | 61023),
            Self::Unauthorized { .. } | Self::TicketMissing { .. } => true,
            Self::RefreshFailed { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse {
            message: err.to_string(),
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_kinds() {
        let missing = GatewayError::TicketMissing {
            component: "wxcomp".into(),
        };
        let unauthorized = GatewayError::Unauthorized {
            tenant: "wx123".into(),
        };
        assert!(missing.is_precondition());
        assert!(unauthorized.is_precondition());
        assert!(!missing.is_transient());

        let network = GatewayError::Network {
            message: "timeout".into(),
        };
        assert!(!network.is_precondition());
        assert!(network.is_transient());
    }

    #[test]
    fn test_display_distinguishes_kinds() {
        let unauthorized = GatewayError::Unauthorized {
            tenant: "wx123".into(),
        };
        let refresh = GatewayError::RefreshFailed {
            credential: "authorizer:wx123".into(),
            reason: "code [61023] invalid refresh token".into(),
        };
        let remote = GatewayError::Remote {
            code: 40013,
            message: "invalid appid".into(),
        };

        assert_eq!(unauthorized.to_string(), "tenant wx123 is not authorized");
        assert!(refresh.to_string().contains("expired and refresh failed"));
        assert_eq!(
            remote.to_string(),
            "remote rejected request: code [40013] invalid appid"
        );
    }

    #[test]
    fn test_credential_rejection_codes() {
        let expired = GatewayError::Remote {
            code: 42001,
            message: "access_token expired".into(),
        };
        let out_of_window = GatewayError::Remote {
            code: 45015,
            message: "response out of time limit".into(),
        };
        assert!(expired.is_credential_rejection());
        assert!(!out_of_window.is_credential_rejection());
    }
}
