//! Bearer token verification.
//!
//! Keys are static (shared secret or PEM public key) and loaded once at
//! startup. Key-set discovery is left to whatever fronts this service.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use insight_core::config::AuthConfig;

use crate::claims::Claims;
use crate::error::AuthError;

/// Turns a raw bearer token into verified claims.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

/// `jsonwebtoken`-backed verifier.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// HS256 with a shared secret.
    pub fn hs256(secret: &[u8]) -> Self {
        Self::with_key(DecodingKey::from_secret(secret), Algorithm::HS256)
    }

    /// RS256 with a PEM-encoded public key.
    pub fn rs256_pem(pem: &[u8]) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(pem).map_err(|e| AuthError::Key(e.to_string()))?;
        Ok(Self::with_key(key, Algorithm::RS256))
    }

    /// Build from the `[auth]` config section.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let verifier = match (&config.hs256_secret, &config.public_key_file) {
            (Some(secret), _) => Self::hs256(secret.as_bytes()),
            (None, Some(path)) => {
                let pem = std::fs::read(path)
                    .map_err(|e| AuthError::Key(format!("{}: {e}", path.display())))?;
                Self::rs256_pem(&pem)?
            }
            (None, None) => return Err(AuthError::Key("no verification key configured".into())),
        };
        Ok(match &config.issuer {
            Some(issuer) => verifier.with_issuer(issuer),
            None => verifier,
        })
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    fn with_key(key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        // Tokens are minted for several services; the audience is not ours to pin.
        validation.validate_aud = false;
        Self { key, validation }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::Malformed(e.to_string()),
            }
        })?;
        Ok(data.claims)
    }
}
