use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Agent user id.
    pub sub: String,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// RS256-only verification of agent bearer tokens. The signing side lives in
/// the platform's auth service; this service only ever validates.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn from_rsa_pem(pem: &[u8]) -> AppResult<Self> {
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| AppError::Config(format!("invalid JWT public key: {e}")))?;
        Ok(Self {
            key,
            validation: Validation::new(Algorithm::RS256),
        })
    }

    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| AppError::Unauthorized)
    }
}
