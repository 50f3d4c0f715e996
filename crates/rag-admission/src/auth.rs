//! Credential resolution.
//!
//! Two credential forms are accepted in the `Authorization` header:
//!
//! - `ApiKey <key>`, or a `Bearer` value that is not shaped like a JWT:
//!   compared against the configured keys in constant time
//! - `Bearer <jwt>`: an HS256 session token minted by [`SessionAuthenticator::issue_session`].
//!   A JWT-shaped value that is not a valid session is still tried as an API key.
//!
//! Every failure resolves to the same [`AuthError::Unauthenticated`] so
//! callers cannot tell which check rejected them.

use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rag_types::{Identity, SharedClock};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

/// Token type claim for session tokens
pub const SESSION_TOKEN_TYPE: &str = "session";

/// Hex characters of the key digest used to name API-key identities
const FINGERPRINT_LEN: usize = 12;

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing, malformed, expired, revoked or unknown credential
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Sessions cannot be issued without a signing secret
    #[error("Session tokens are disabled: no signing secret configured")]
    SessionsDisabled,

    /// Token signing failed
    #[error("Failed to issue session: {0}")]
    Issue(String),
}

/// A parsed `Authorization` header value.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    SessionToken(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiKey(_) => write!(f, "ApiKey(..)"),
            Credential::SessionToken(_) => write!(f, "SessionToken(..)"),
        }
    }
}

impl Credential {
    /// Parse a header value. Scheme names are case-insensitive.
    pub fn parse(header: &str) -> Result<Self, AuthError> {
        let (scheme, value) = header
            .trim()
            .split_once(char::is_whitespace)
            .ok_or(AuthError::Unauthenticated)?;
        let value = value.trim();
        if value.is_empty() {
            return Err(AuthError::Unauthenticated);
        }

        if scheme.eq_ignore_ascii_case("apikey") {
            Ok(Credential::ApiKey(value.to_string()))
        } else if scheme.eq_ignore_ascii_case("bearer") {
            if looks_like_jwt(value) {
                Ok(Credential::SessionToken(value.to_string()))
            } else {
                Ok(Credential::ApiKey(value.to_string()))
            }
        } else {
            Err(AuthError::Unauthenticated)
        }
    }
}

fn looks_like_jwt(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    parts.len() == 3
        && parts.iter().all(|p| {
            !p.is_empty()
                && p.bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        })
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Compare digests without early exit.
fn digests_equal(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Short stable name for an API key; the key itself never leaves this module.
pub fn key_fingerprint(key: &str) -> String {
    let mut hex = hex::encode(digest(key));
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Session token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject
    pub sub: String,
    /// Session id
    pub sid: String,
    /// Issued at, Unix seconds
    pub iat: i64,
    /// Expiry, Unix seconds
    pub exp: i64,
    /// Token type
    pub typ: String,
}

/// A freshly minted session.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session_id: String,
    pub expires_at_ms: i64,
}

/// Credential material.
pub struct AuthConfig {
    pub api_keys: Vec<SecretString>,
    /// Unset disables session tokens
    pub jwt_secret: Option<SecretString>,
    pub session_expiry: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            jwt_secret: None,
            session_expiry: Duration::from_secs(86_400),
        }
    }
}

struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

/// Resolves credentials to identities and issues session tokens.
pub struct SessionAuthenticator {
    key_digests: Vec<[u8; 32]>,
    sessions: Option<SessionKeys>,
    session_expiry: Duration,
    /// Revoked session id -> token expiry (ms), kept until the token would expire anyway
    revoked: DashMap<String, i64>,
    clock: SharedClock,
}

impl SessionAuthenticator {
    pub fn new(config: AuthConfig, clock: SharedClock) -> Self {
        let key_digests = config
            .api_keys
            .iter()
            .map(|k| k.expose_secret().trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| digest(&k))
            .collect();

        let sessions = config.jwt_secret.as_ref().map(|secret| SessionKeys {
            encoding: EncodingKey::from_secret(secret.expose_secret().as_bytes()),
            decoding: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        });

        Self {
            key_digests,
            sessions,
            session_expiry: config.session_expiry,
            revoked: DashMap::new(),
            clock,
        }
    }

    pub fn sessions_enabled(&self) -> bool {
        self.sessions.is_some()
    }

    /// Resolve an optional `Authorization` header value.
    pub fn resolve_header(&self, header: Option<&str>) -> Result<Identity, AuthError> {
        let credential = Credential::parse(header.ok_or(AuthError::Unauthenticated)?)?;
        self.resolve(&credential)
    }

    /// Resolve a credential to the identity it proves.
    pub fn resolve(&self, credential: &Credential) -> Result<Identity, AuthError> {
        let result = match credential {
            Credential::ApiKey(key) => self.resolve_api_key(key),
            Credential::SessionToken(token) => self
                .resolve_session(token)
                .or_else(|_| self.resolve_api_key(token)),
        };
        if result.is_err() {
            debug!(?credential, "Credential rejected");
        }
        result
    }

    fn resolve_api_key(&self, key: &str) -> Result<Identity, AuthError> {
        let presented = digest(key);
        // Visit every configured key regardless of where the match is.
        let matched = self
            .key_digests
            .iter()
            .fold(false, |found, known| found | digests_equal(known, &presented));

        if matched {
            Ok(Identity::api_key(key_fingerprint(key)))
        } else {
            Err(AuthError::Unauthenticated)
        }
    }

    fn resolve_session(&self, token: &str) -> Result<Identity, AuthError> {
        let keys = self.sessions.as_ref().ok_or(AuthError::Unauthenticated)?;

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock below.
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::from(["exp".to_string(), "sub".to_string()]);

        let claims = decode::<SessionClaims>(token, &keys.decoding, &validation)
            .map_err(|_| AuthError::Unauthenticated)?
            .claims;

        let now_secs = self.clock.now_ms().div_euclid(1000);
        let max_lifetime = self.session_expiry.as_secs() as i64;

        let valid = claims.typ == SESSION_TOKEN_TYPE
            && !claims.sub.is_empty()
            && claims.iat <= now_secs
            && claims.exp > now_secs
            && claims.exp <= claims.iat.saturating_add(max_lifetime)
            && !self.revoked.contains_key(&claims.sid);

        if !valid {
            return Err(AuthError::Unauthenticated);
        }

        Ok(Identity::session(claims.sub, claims.sid, claims.exp.saturating_mul(1000)))
    }

    /// Mint a session token for `subject`, valid for the session expiry.
    pub fn issue_session(&self, subject: &str) -> Result<IssuedSession, AuthError> {
        let keys = self.sessions.as_ref().ok_or(AuthError::SessionsDisabled)?;
        if subject.trim().is_empty() {
            return Err(AuthError::Issue("empty subject".to_string()));
        }

        let iat = self.clock.now_ms().div_euclid(1000);
        let exp = iat + self.session_expiry.as_secs() as i64;
        let session_id = ulid::Ulid::new().to_string();

        let claims = SessionClaims {
            sub: subject.to_string(),
            sid: session_id.clone(),
            iat,
            exp,
            typ: SESSION_TOKEN_TYPE.to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(|e| AuthError::Issue(e.to_string()))?;

        info!(session_id = %session_id, "Issued session");
        Ok(IssuedSession {
            token,
            session_id,
            expires_at_ms: exp * 1000,
        })
    }

    /// Revoke a session by id. Returns false if it was already revoked.
    pub fn revoke(&self, session_id: &str) -> bool {
        // Keep the entry for the longest possible remaining token lifetime.
        let until = self.clock.now_ms() + self.session_expiry.as_millis() as i64;
        let newly = self.revoked.insert(session_id.to_string(), until).is_none();
        if newly {
            info!(session_id, "Revoked session");
        }
        newly
    }

    /// Forget revocations whose tokens have expired. Returns how many.
    pub fn purge_revoked(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.revoked.len();
        self.revoked.retain(|_, until| *until > now);
        before.saturating_sub(self.revoked.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_types::{Clock, IdentityKind, ManualClock};
    use std::sync::Arc;

    const KEY: &str = "admin-key-123";

    fn authenticator(clock: Arc<ManualClock>) -> SessionAuthenticator {
        SessionAuthenticator::new(
            AuthConfig {
                api_keys: vec![SecretString::from(KEY.to_string()), SecretString::from("second".to_string())],
                jwt_secret: Some(SecretString::from("test-secret".to_string())),
                session_expiry: Duration::from_secs(3600),
            },
            clock,
        )
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(1_700_000_000_000))
    }

    #[test]
    fn test_parse_schemes() {
        assert_eq!(Credential::parse("ApiKey abc").unwrap(), Credential::ApiKey("abc".into()));
        assert_eq!(Credential::parse("bearer abc").unwrap(), Credential::ApiKey("abc".into()));
        assert_eq!(
            Credential::parse("Bearer aaa.bbb.ccc").unwrap(),
            Credential::SessionToken("aaa.bbb.ccc".into())
        );
        assert!(Credential::parse("Basic abc").is_err());
        assert!(Credential::parse("Bearer").is_err());
        assert!(Credential::parse("Bearer   ").is_err());
    }

    #[test]
    fn test_api_key_resolves_to_fingerprint() {
        let auth = authenticator(clock());
        let identity = auth.resolve_header(Some("ApiKey admin-key-123")).unwrap();
        assert!(identity.is_api_key());
        assert_eq!(identity.principal, key_fingerprint(KEY));
        assert!(!identity.principal.contains(KEY));

        assert!(auth.resolve_header(Some("Bearer second")).is_ok());
    }

    #[test]
    fn test_unknown_key_and_missing_header_rejected() {
        let auth = authenticator(clock());
        assert!(matches!(
            auth.resolve_header(Some("ApiKey wrong")),
            Err(AuthError::Unauthenticated)
        ));
        assert!(matches!(auth.resolve_header(None), Err(AuthError::Unauthenticated)));
    }

    #[test]
    fn test_dotted_api_key_accepted_as_bearer() {
        let auth = SessionAuthenticator::new(
            AuthConfig {
                api_keys: vec![SecretString::from("aaa.bbb.ccc".to_string())],
                jwt_secret: Some(SecretString::from("test-secret".to_string())),
                session_expiry: Duration::from_secs(3600),
            },
            clock(),
        );

        let identity = auth.resolve_header(Some("Bearer aaa.bbb.ccc")).unwrap();
        assert!(identity.is_api_key());
        assert_eq!(identity.principal, key_fingerprint("aaa.bbb.ccc"));

        assert!(matches!(
            auth.resolve_header(Some("Bearer aaa.bbb.ccd")),
            Err(AuthError::Unauthenticated)
        ));
    }

    #[test]
    fn test_session_round_trip() {
        let clock = clock();
        let auth = authenticator(clock.clone());
        let issued = auth.issue_session("alice").unwrap();

        let identity = auth
            .resolve_header(Some(&format!("Bearer {}", issued.token)))
            .unwrap();
        assert_eq!(identity.principal, "alice");
        match identity.kind {
            IdentityKind::Session { session_id, expires_at_ms } => {
                assert_eq!(session_id, issued.session_id);
                assert_eq!(expires_at_ms, clock.now_ms() + 3_600_000);
            }
            other => panic!("expected session, got {other:?}"),
        }
    }

    #[test]
    fn test_expired_session_rejected() {
        let clock = clock();
        let auth = authenticator(clock.clone());
        let issued = auth.issue_session("alice").unwrap();

        clock.advance(Duration::from_secs(3601));
        assert!(matches!(
            auth.resolve(&Credential::SessionToken(issued.token)),
            Err(AuthError::Unauthenticated)
        ));
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let clock = clock();
        let other = SessionAuthenticator::new(
            AuthConfig {
                jwt_secret: Some(SecretString::from("another-secret".to_string())),
                ..AuthConfig::default()
            },
            clock.clone(),
        );
        let forged = other.issue_session("mallory").unwrap();

        let auth = authenticator(clock);
        assert!(auth.resolve(&Credential::SessionToken(forged.token)).is_err());
    }

    #[test]
    fn test_overlong_lifetime_rejected() {
        let clock = clock();
        let auth = authenticator(clock.clone());
        let iat = clock.now_ms() / 1000;
        let claims = SessionClaims {
            sub: "alice".into(),
            sid: "s1".into(),
            iat,
            exp: iat + 3600 * 24 * 365,
            typ: SESSION_TOKEN_TYPE.into(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(auth.resolve(&Credential::SessionToken(token)).is_err());
    }

    #[test]
    fn test_revoked_session_rejected() {
        let clock = clock();
        let auth = authenticator(clock.clone());
        let issued = auth.issue_session("alice").unwrap();

        assert!(auth.revoke(&issued.session_id));
        assert!(!auth.revoke(&issued.session_id));
        assert!(auth.resolve(&Credential::SessionToken(issued.token)).is_err());

        clock.advance(Duration::from_secs(3601));
        assert_eq!(auth.purge_revoked(), 1);
    }

    #[test]
    fn test_sessions_disabled_without_secret() {
        let auth = SessionAuthenticator::new(AuthConfig::default(), clock());
        assert!(!auth.sessions_enabled());
        assert!(matches!(auth.issue_session("alice"), Err(AuthError::SessionsDisabled)));
        assert!(auth
            .resolve(&Credential::SessionToken("aaa.bbb.ccc".into()))
            .is_err());
    }

    #[test]
    fn test_credential_debug_hides_secret() {
        let rendered = format!("{:?}", Credential::ApiKey("super-secret".into()));
        assert!(!rendered.contains("super-secret"));
    }
}
