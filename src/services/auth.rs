//! Identity Resolution
//!
//! Resolves the rate-limit identity for a request: the authenticated
//! principal when a valid bearer token is attached, otherwise the caller's
//! network address. A request carrying a malformed or expired token is
//! rejected outright instead of silently falling back to the IP bucket, so
//! a client sending garbage cannot starve the address-based budget.

use actix_web::dev::ServiceRequest;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Malformed Authorization header")]
    MalformedHeader,

    #[error("Invalid bearer token: {0}")]
    InvalidToken(String),
}

/// Bearer token claims (standard signed-claims payload)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Stable principal identifier (username)
    pub sub: String,
    /// Expiry as a unix timestamp
    pub exp: usize,
}

/// Verifies bearer tokens and derives rate-limit identities
#[derive(Clone)]
pub struct IdentityResolver {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver").finish()
    }
}

impl IdentityResolver {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Decode a bearer token into its claims
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    /// Resolve the identity string keyed by the rate limiter.
    ///
    /// No Authorization header falls through to the peer address; a header
    /// that is present but unusable is an error. The fallback is the socket
    /// peer, never a forwarded-for header: anything client-supplied would
    /// let a caller mint a fresh budget per request.
    pub fn resolve(&self, req: &ServiceRequest) -> Result<String, AuthError> {
        let header = match req.headers().get("Authorization") {
            Some(value) => value,
            None => {
                let ip = req
                    .peer_addr()
                    .map(|addr| addr.ip().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                return Ok(format!("ip:{ip}"));
            }
        };

        let header = header.to_str().map_err(|_| AuthError::MalformedHeader)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MalformedHeader)?;

        let claims = self.verify(token)?;
        Ok(format!("user:{}", claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token_for(sub: &str, exp_offset_secs: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset_secs) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .expect("token encoding failed")
    }

    #[test]
    fn test_valid_token_resolves_to_username() {
        let resolver = IdentityResolver::new(SECRET);
        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Bearer {}", token_for("alice", 3600))))
            .to_srv_request();

        assert_eq!(resolver.resolve(&req).unwrap(), "user:alice");
    }

    #[test]
    fn test_missing_header_falls_back_to_peer_address() {
        let resolver = IdentityResolver::new(SECRET);
        let req = TestRequest::default()
            .peer_addr("10.0.0.9:51234".parse().unwrap())
            .to_srv_request();

        assert_eq!(resolver.resolve(&req).unwrap(), "ip:10.0.0.9");
    }

    #[test]
    fn test_forwarded_header_does_not_change_identity() {
        let resolver = IdentityResolver::new(SECRET);

        for spoofed in ["1.2.3.4", "5.6.7.8"] {
            let req = TestRequest::default()
                .peer_addr("10.0.0.9:51234".parse().unwrap())
                .insert_header(("X-Forwarded-For", spoofed))
                .to_srv_request();

            assert_eq!(resolver.resolve(&req).unwrap(), "ip:10.0.0.9");
        }
    }

    #[test]
    fn test_ipv6_peers_resolve_to_distinct_identities() {
        let resolver = IdentityResolver::new(SECRET);

        let req = TestRequest::default()
            .peer_addr("[2001:db8::1]:443".parse().unwrap())
            .to_srv_request();
        assert_eq!(resolver.resolve(&req).unwrap(), "ip:2001:db8::1");

        let req = TestRequest::default()
            .peer_addr("[2001:db8::2]:443".parse().unwrap())
            .to_srv_request();
        assert_eq!(resolver.resolve(&req).unwrap(), "ip:2001:db8::2");
    }

    #[test]
    fn test_garbage_token_is_rejected_not_downgraded() {
        let resolver = IdentityResolver::new(SECRET);
        let req = TestRequest::default()
            .peer_addr("10.0.0.9:51234".parse().unwrap())
            .insert_header(("Authorization", "Bearer not-a-token"))
            .to_srv_request();

        assert!(matches!(
            resolver.resolve(&req),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let resolver = IdentityResolver::new(SECRET);
        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Bearer {}", token_for("alice", -3600))))
            .to_srv_request();

        assert!(matches!(
            resolver.resolve(&req),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_non_bearer_scheme_is_malformed() {
        let resolver = IdentityResolver::new(SECRET);
        let req = TestRequest::default()
            .insert_header(("Authorization", "Basic dXNlcjpwYXNz"))
            .to_srv_request();

        assert!(matches!(
            resolver.resolve(&req),
            Err(AuthError::MalformedHeader)
        ));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let resolver = IdentityResolver::new("other-secret");
        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Bearer {}", token_for("alice", 3600))))
            .to_srv_request();

        assert!(resolver.resolve(&req).is_err());
    }
}
