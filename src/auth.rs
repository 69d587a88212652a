//! Session tokens and role resolution.
//!
//! Sign-in is handled by an external identity provider; this module only
//! consumes its result as a signed session token:
//!
//! ```text
//! base64url(claims JSON) "." hex(HMAC-SHA256(secret, base64url part))
//! ```
//!
//! Claims are `{ sub, email?, role?, exp }`. Tokens arrive as
//! `Authorization: Bearer <token>`.
//!
//! # Role resolution
//!
//! Roles are resolved by an ordered list of [`RoleStrategy`] values; the
//! first one returning `Some` wins and `end-user` is the fallback:
//!
//! 1. the token's `role` claim, when it names a known role
//! 2. the admin email allowlist (`auth.admin_emails`)
//! 3. per-user metadata (`[auth.roles]`)

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Admin,
    Nutritionist,
    EndUser,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s.trim() {
            "admin" => Some(Role::Admin),
            "nutritionist" => Some(Role::Nutritionist),
            "end-user" => Some(Role::EndUser),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Nutritionist => "nutritionist",
            Role::EndUser => "end-user",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Expiry as a Unix timestamp (seconds).
    pub exp: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("malformed session token")]
    Malformed,
    #[error("invalid session token signature")]
    BadSignature,
    #[error("session token expired")]
    Expired,
}

fn mac_for(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size")
}

/// Encode and sign `claims`.
pub fn sign_token(secret: &str, claims: &SessionClaims) -> String {
    let json = serde_json::to_vec(claims).unwrap_or_default();
    let payload = URL_SAFE_NO_PAD.encode(json);
    let mut mac = mac_for(secret);
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("{}.{}", payload, signature)
}

/// Check the signature and expiry of `token` at Unix time `now`.
pub fn verify_token(secret: &str, token: &str, now: i64) -> Result<SessionClaims, AuthError> {
    let (payload, signature) = token.trim().split_once('.').ok_or(AuthError::Malformed)?;
    let signature = hex::decode(signature).map_err(|_| AuthError::Malformed)?;

    let mut mac = mac_for(secret);
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AuthError::BadSignature)?;

    let json = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthError::Malformed)?;
    let claims: SessionClaims = serde_json::from_slice(&json).map_err(|_| AuthError::Malformed)?;
    if claims.sub.trim().is_empty() {
        return Err(AuthError::Malformed);
    }
    if claims.exp <= now {
        return Err(AuthError::Expired);
    }
    Ok(claims)
}

/// One source of role information.
#[derive(Debug, Clone)]
pub enum RoleStrategy {
    /// The token's `role` claim, ignored unless it names a known role.
    TokenClaim,
    /// Emails granted `admin`, compared case-insensitively.
    AdminEmails(Vec<String>),
    /// Roles keyed by user id.
    Metadata(BTreeMap<String, Role>),
}

impl RoleStrategy {
    pub fn resolve(&self, claims: &SessionClaims) -> Option<Role> {
        match self {
            RoleStrategy::TokenClaim => claims.role.as_deref().and_then(Role::parse),
            RoleStrategy::AdminEmails(emails) => {
                let email = claims.email.as_deref()?.trim();
                emails
                    .iter()
                    .any(|e| e.trim().eq_ignore_ascii_case(email))
                    .then_some(Role::Admin)
            }
            RoleStrategy::Metadata(roles) => roles.get(&claims.sub).copied(),
        }
    }
}

/// First strategy with an answer wins; otherwise `end-user`.
pub fn resolve_role(strategies: &[RoleStrategy], claims: &SessionClaims) -> Role {
    strategies
        .iter()
        .find_map(|s| s.resolve(claims))
        .unwrap_or(Role::EndUser)
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: String,
    pub email: Option<String>,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Verifies bearer tokens and resolves roles.
pub struct Authenticator {
    secret: String,
    ttl_secs: i64,
    strategies: Vec<RoleStrategy>,
}

impl Authenticator {
    pub fn new(secret: impl Into<String>, ttl_secs: i64, strategies: Vec<RoleStrategy>) -> Self {
        Self {
            secret: secret.into(),
            ttl_secs,
            strategies,
        }
    }

    /// Claim → admin allowlist → `[auth.roles]`.
    pub fn from_config(config: &AuthConfig) -> Self {
        let metadata = config
            .roles
            .iter()
            .filter_map(|(user, role)| Role::parse(role).map(|r| (user.clone(), r)))
            .collect();
        Self::new(
            config.session_secret.clone(),
            config.session_ttl_secs,
            vec![
                RoleStrategy::TokenClaim,
                RoleStrategy::AdminEmails(config.admin_emails.clone()),
                RoleStrategy::Metadata(metadata),
            ],
        )
    }

    /// Authenticate an `Authorization` header value.
    pub fn authenticate(&self, header: Option<&str>) -> Result<Principal, AuthError> {
        let token = header
            .and_then(|h| h.trim().strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Missing)?;
        let claims = verify_token(&self.secret, token, chrono::Utc::now().timestamp())?;
        let role = resolve_role(&self.strategies, &claims);
        Ok(Principal {
            user_id: claims.sub,
            email: claims.email,
            role,
        })
    }

    /// Mint a token for `user_id`, valid for `ttl_secs` (or the configured
    /// session TTL).
    pub fn issue(
        &self,
        user_id: &str,
        email: Option<&str>,
        role: Option<Role>,
        ttl_secs: Option<i64>,
    ) -> String {
        let claims = SessionClaims {
            sub: user_id.to_string(),
            email: email.map(str::to_string),
            role: role.map(|r| r.as_str().to_string()),
            exp: chrono::Utc::now().timestamp() + ttl_secs.unwrap_or(self.ttl_secs),
        };
        sign_token(&self.secret, &claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, email: Option<&str>, role: Option<&str>) -> SessionClaims {
        SessionClaims {
            sub: sub.into(),
            email: email.map(Into::into),
            role: role.map(Into::into),
            exp: 2_000_000_000,
        }
    }

    fn strategies() -> Vec<RoleStrategy> {
        let mut meta = BTreeMap::new();
        meta.insert("user_n".to_string(), Role::Nutritionist);
        meta.insert("user_a".to_string(), Role::EndUser);
        vec![
            RoleStrategy::TokenClaim,
            RoleStrategy::AdminEmails(vec!["Boss@Example.org".into()]),
            RoleStrategy::Metadata(meta),
        ]
    }

    #[test]
    fn test_claim_role_wins() {
        let c = claims("user_a", Some("boss@example.org"), Some("nutritionist"));
        assert_eq!(resolve_role(&strategies(), &c), Role::Nutritionist);
    }

    #[test]
    fn test_invalid_claim_falls_through_to_admin_email() {
        let c = claims("user_a", Some("boss@example.org"), Some("superuser"));
        assert_eq!(resolve_role(&strategies(), &c), Role::Admin);
    }

    #[test]
    fn test_metadata_then_default() {
        assert_eq!(
            resolve_role(&strategies(), &claims("user_n", None, None)),
            Role::Nutritionist
        );
        assert_eq!(
            resolve_role(&strategies(), &claims("stranger", Some("x@y.z"), None)),
            Role::EndUser
        );
        assert_eq!(resolve_role(&[], &claims("anyone", None, None)), Role::EndUser);
    }

    #[test]
    fn test_token_roundtrip() {
        let c = claims("user_1", Some("a@b.c"), Some("admin"));
        let token = sign_token("secret", &c);
        assert_eq!(verify_token("secret", &token, 1_000).unwrap(), c);
    }

    #[test]
    fn test_token_rejections() {
        let c = claims("user_1", None, None);
        let token = sign_token("secret", &c);

        assert_eq!(
            verify_token("other", &token, 1_000),
            Err(AuthError::BadSignature)
        );
        assert_eq!(
            verify_token("secret", &token, 2_000_000_000),
            Err(AuthError::Expired)
        );
        assert_eq!(verify_token("secret", "garbage", 0), Err(AuthError::Malformed));

        // Tampered payload with the original signature.
        let (_, sig) = token.split_once('.').unwrap();
        let forged = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(br#"{"sub":"root","role":"admin","exp":2000000000}"#),
            sig
        );
        assert_eq!(
            verify_token("secret", &forged, 1_000),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn test_authenticator_header_parsing() {
        let auth = Authenticator::new("s", 60, strategies());
        assert_eq!(auth.authenticate(None), Err(AuthError::Missing));
        assert_eq!(auth.authenticate(Some("Basic abc")), Err(AuthError::Missing));

        let token = auth.issue("user_n", None, None, None);
        let principal = auth
            .authenticate(Some(&format!("Bearer {}", token)))
            .unwrap();
        assert_eq!(principal.user_id, "user_n");
        assert_eq!(principal.role, Role::Nutritionist);
        assert!(!principal.is_admin());
    }
}
