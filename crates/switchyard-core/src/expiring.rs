//! Expiring credential values.
//!
//! Every value is stamped with two instants: `expires_at`, when the platform
//! stops honoring it, and `refresh_at`, when this crate stops handing it out.
//! The gap is one eighth of the lifetime granted by the platform, so a token
//! with a two hour lifetime is refreshed after 105 minutes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Early-refresh margin for a lifetime of `expires_in` seconds.
pub fn refresh_margin(expires_in: i64) -> Duration {
    Duration::seconds(expires_in.max(0) / 8)
}

/// A value with an absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiringValue {
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_at: DateTime<Utc>,
}

impl ExpiringValue {
    /// Stamp a value issued at `now` for `expires_in` seconds.
    pub fn issued(value: impl Into<String>, expires_in: i64, now: DateTime<Utc>) -> Self {
        let expires_at = now + Duration::seconds(expires_in.max(0));
        Self {
            value: value.into(),
            expires_at,
            refresh_at: expires_at - refresh_margin(expires_in),
        }
    }

    /// Whether the value can still be handed out at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.value.is_empty() && now < self.refresh_at
    }

    /// Time left until the platform stops honoring the value.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

/// Per-tenant token pair.
///
/// The refresh token is the durable credential; the access token is derived
/// from it and may be empty (seeded by reconciliation, not refreshed yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizerToken {
    #[serde(default)]
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_at: DateTime<Utc>,
    pub refresh_token: String,
}

impl AuthorizerToken {
    pub fn issued(
        access_token: impl Into<String>,
        expires_in: i64,
        refresh_token: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let access = ExpiringValue::issued(access_token, expires_in, now);
        Self {
            access_token: access.value,
            expires_at: access.expires_at,
            refresh_at: access.refresh_at,
            refresh_token: refresh_token.into(),
        }
    }

    /// Token that carries only a refresh token and must be refreshed before use.
    pub fn refresh_only(refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: String::new(),
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
            refresh_at: DateTime::<Utc>::UNIX_EPOCH,
            refresh_token: refresh_token.into(),
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && now < self.refresh_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_margin_is_one_eighth_of_lifetime() {
        assert_eq!(refresh_margin(7200), Duration::seconds(900));
        assert_eq!(refresh_margin(600), Duration::seconds(75));
        assert_eq!(refresh_margin(-5), Duration::zero());
    }

    #[test]
    fn test_fresh_until_refresh_threshold() {
        let value = ExpiringValue::issued("tok", 7200, t0());
        assert_eq!(value.expires_at, t0() + Duration::seconds(7200));
        assert_eq!(value.refresh_at, t0() + Duration::seconds(6300));

        assert!(value.is_fresh(t0()));
        assert!(value.is_fresh(t0() + Duration::seconds(6299)));
        // At the threshold the value is already stale.
        assert!(!value.is_fresh(t0() + Duration::seconds(6300)));
        assert!(!value.is_fresh(t0() + Duration::seconds(7200)));
    }

    #[test]
    fn test_empty_value_is_never_fresh() {
        let value = ExpiringValue::issued("", 7200, t0());
        assert!(!value.is_fresh(t0()));
    }

    #[test]
    fn test_refresh_only_token_is_stale() {
        let token = AuthorizerToken::refresh_only("refresh@@@abc");
        assert!(!token.is_fresh(t0()));
        assert_eq!(token.refresh_token, "refresh@@@abc");
    }

    #[test]
    fn test_authorizer_token_margin() {
        let token = AuthorizerToken::issued("access", 7200, "refresh", t0());
        assert!(token.is_fresh(t0() + Duration::seconds(6000)));
        assert!(!token.is_fresh(t0() + Duration::seconds(6300)));
    }

    #[test]
    fn test_serde_keeps_both_instants() {
        let value = ExpiringValue::issued("tok", 7200, t0());
        let json = serde_json::to_string(&value).unwrap();
        let back: ExpiringValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
