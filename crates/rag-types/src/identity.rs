//! Resolved caller identities.

use serde::{Deserialize, Serialize};

/// How a caller proved who it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum IdentityKind {
    /// Holder of a configured API key (long-lived)
    ApiKey,
    /// Bearer of a session token
    Session {
        session_id: String,
        /// Expiry in Unix milliseconds
        expires_at_ms: i64,
    },
}

/// A resolved principal. Every admitted request carries exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Key fingerprint for API-key holders, subject for sessions
    pub principal: String,
    pub kind: IdentityKind,
}

impl Identity {
    /// Identity for an API-key holder, named by the key's fingerprint.
    pub fn api_key(fingerprint: impl Into<String>) -> Self {
        Self {
            principal: fingerprint.into(),
            kind: IdentityKind::ApiKey,
        }
    }

    /// Identity for a session bearer.
    pub fn session(
        subject: impl Into<String>,
        session_id: impl Into<String>,
        expires_at_ms: i64,
    ) -> Self {
        Self {
            principal: subject.into(),
            kind: IdentityKind::Session {
                session_id: session_id.into(),
                expires_at_ms,
            },
        }
    }

    pub fn is_api_key(&self) -> bool {
        matches!(self.kind, IdentityKind::ApiKey)
    }

    /// Key under which the rate limiter tracks this identity.
    ///
    /// API-key holders and session subjects live in separate namespaces so a
    /// subject can never collide with a key fingerprint.
    pub fn rate_key(&self) -> String {
        match self.kind {
            IdentityKind::ApiKey => format!("key:{}", self.principal),
            IdentityKind::Session { .. } => format!("user:{}", self.principal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_key_namespaces() {
        let key = Identity::api_key("abc123");
        let user = Identity::session("abc123", "sid-1", 0);

        assert_eq!(key.rate_key(), "key:abc123");
        assert_eq!(user.rate_key(), "user:abc123");
        assert_ne!(key.rate_key(), user.rate_key());
    }

    #[test]
    fn test_sessions_of_same_subject_share_rate_key() {
        let a = Identity::session("alice", "sid-1", 10);
        let b = Identity::session("alice", "sid-2", 20);
        assert_eq!(a.rate_key(), b.rate_key());
        assert!(!a.is_api_key());
    }
}
