//! Bearer token validation.
//!
//! The pipeline only consumes [`Claims`]; how a token proves them is behind
//! the [`TokenValidator`] trait. [`JwtTokenValidator`] verifies HS256 JWTs
//! signed with a shared secret.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use crate::types::Claims;
use crate::{AccessError, AccessResult};

/// Turns a bearer token into validated claims.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validates `token` and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` for malformed, forged or expired tokens.
    async fn validate(&self, token: &str) -> AccessResult<Claims>;
}

/// HS256 JWT validator.
pub struct JwtTokenValidator {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
}

impl JwtTokenValidator {
    /// Creates a validator for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Signs `claims` with the configured secret.
    ///
    /// Token issuance belongs to the identity provider; this exists for
    /// local tooling and tests.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if encoding fails.
    pub fn sign(&self, claims: &Claims) -> AccessResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|err| AccessError::internal(format!("Failed to sign token: {err}")))
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate(&self, token: &str) -> AccessResult<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;

            tracing::debug!(error = %err, "Token rejected");
            match err.kind() {
                ErrorKind::ExpiredSignature => AccessError::unauthenticated("Token has expired"),
                ErrorKind::InvalidSignature => {
                    AccessError::unauthenticated("Token signature is invalid")
                }
                _ => AccessError::unauthenticated("Token is malformed"),
            }
        })?;

        let claims = data.claims;
        if claims.sub.trim().is_empty() || claims.org_id.trim().is_empty() {
            return Err(AccessError::unauthenticated(
                "Token lacks a principal or organization",
            ));
        }
        Ok(claims)
    }
}

impl std::fmt::Debug for JwtTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtTokenValidator")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}
