use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::AuthError;
use crate::models::{Principal, Role};

/// JWT service for access-token signing and verification (HS256).
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_token_ttl: Duration,
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (identity ID)
    pub sub: String,
    pub role: Role,
    /// Refresh session the token was minted under
    pub sid: String,
    /// JWT ID
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    pub token: String,
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl JwtService {
    pub fn new(secret: &SecretString, issuer: &str, access_token_ttl: Duration) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(bytes),
            decoding_key: DecodingKey::from_secret(bytes),
            issuer: issuer.to_string(),
            access_token_ttl,
        }
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    /// Sign an access token for `identity_id` under `session_id`.
    pub fn generate_access_token(
        &self,
        identity_id: Uuid,
        role: Role,
        session_id: Uuid,
    ) -> Result<SignedAccessToken, anyhow::Error> {
        let now = Utc::now();
        let expires_at = now + self.access_token_ttl;
        let token_id = Uuid::new_v4();

        let claims = AccessTokenClaims {
            sub: identity_id.to_string(),
            role,
            sid: session_id.to_string(),
            jti: token_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        Ok(SignedAccessToken {
            token,
            token_id,
            expires_at,
        })
    }

    /// Verify signature, issuer and expiry, and map the claims to a principal.
    pub fn validate_access_token(&self, token: &str) -> Result<Principal, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.leeway = 0;

        let data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Malformed,
            },
        )?;
        let claims = data.claims;

        let identity_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::Malformed)?;
        let session_id = Uuid::parse_str(&claims.sid).map_err(|_| AuthError::Malformed)?;
        let token_id = Uuid::parse_str(&claims.jti).map_err(|_| AuthError::Malformed)?;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(AuthError::Malformed)?;

        Ok(Principal {
            identity_id,
            role: claims.role,
            session_id,
            token_id,
            expires_at,
        })
    }
}
