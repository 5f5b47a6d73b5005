//! Signed-in session state.
//!
//! The access token is kept in a [`SecureString`] so it is zeroized when the
//! session is dropped and never shows up in `Debug` output or logs.

use chrono::{DateTime, Duration, Utc};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A secure string wrapper that zeroizes its contents on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// An authenticated identity against the directory service.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    access_token: SecureString,
    expires_at: DateTime<Utc>,
    tenant: String,
}

impl Session {
    pub fn new(
        access_token: impl Into<SecureString>,
        expires_at: DateTime<Utc>,
        tenant: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
            tenant: tenant.into(),
        }
    }

    /// Build a session from a token lifetime in seconds, as returned by the token endpoint.
    pub fn from_expires_in(
        access_token: impl Into<SecureString>,
        expires_in: u64,
        tenant: impl Into<String>,
    ) -> Self {
        let lifetime = i64::try_from(expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(access_token, expires_at, tenant)
    }

    /// Bearer token for directory API calls.
    pub fn access_token(&self) -> &str {
        self.access_token.as_str()
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// True once `now + skew` has reached the token expiry.
    pub fn is_expired(&self, skew: Duration) -> bool {
        Utc::now() + skew >= self.expires_at
    }

    /// Remaining lifetime, or `None` if already expired.
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let now = Utc::now();

        if self.expires_at > now {
            Some(self.expires_at - now)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_string_debug() {
        let secret = SecureString::new("super_secret_token".to_string());
        let debug_output = format!("{:?}", secret);
        assert_eq!(debug_output, "[REDACTED]");
        assert!(!debug_output.contains("super_secret"));
    }

    #[test]
    fn test_session_debug_hides_token() {
        let session = Session::from_expires_in("eyJ0eXAi.secret", 3600, "contoso");
        let debug_output = format!("{:?}", session);
        assert!(!debug_output.contains("eyJ0eXAi"));
        assert!(debug_output.contains("contoso"));
        assert_eq!(session.access_token(), "eyJ0eXAi.secret");
    }

    #[test]
    fn test_session_expiry() {
        let session = Session::from_expires_in("token", 3600, "contoso");
        assert!(!session.is_expired(Duration::seconds(60)));
        assert!(session.time_until_expiry().unwrap().num_minutes() > 55);

        // Skew larger than the remaining lifetime counts as expired
        assert!(session.is_expired(Duration::hours(2)));

        let past = Session::new("token", Utc::now() - Duration::hours(1), "contoso");
        assert!(past.is_expired(Duration::zero()));
        assert!(past.time_until_expiry().is_none());
    }

    #[test]
    fn test_huge_lifetime_does_not_overflow() {
        let session = Session::from_expires_in("token", u64::MAX, "contoso");
        assert!(!session.is_expired(Duration::hours(1)));
        assert_eq!(session.tenant(), "contoso");
    }
}
