//! Authentication seam and the bundled JWT provider

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

const ISSUER: &str = "rolodex-api";

/// Identity the note handlers act on behalf of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

/// Turns a bearer token into a user. Registration, login and token refresh
/// live outside this service.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<AuthUser, ApiError>;
}

/// JWT claims for API authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    /// Create new claims for a user
    pub fn for_user(user_id: &str, expires_in: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id.to_string(),
            exp: (now + expires_in).timestamp(),
            iat: now.timestamp(),
            iss: ISSUER.to_string(),
        }
    }
}

/// JWT authentication handler
#[derive(Clone)]
pub struct JwtAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    /// Create new JWT auth with secret
    pub fn new(secret: &str) -> Self {
        let encoding_key = EncodingKey::from_secret(secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(secret.as_bytes());

        // Notes are attributed to `sub`, so a token without one is useless
        let mut validation = Validation::default();
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Self {
            encoding_key,
            decoding_key,
            validation,
        }
    }

    /// Create from environment variable (required in production)
    pub fn from_env() -> Result<Self, ApiError> {
        let secret = std::env::var("ROLODEX_JWT_SECRET").map_err(|_| {
            ApiError::Internal(
                "ROLODEX_JWT_SECRET environment variable is required. \
                     Generate with: openssl rand -base64 32"
                    .to_string(),
            )
        })?;

        if secret.len() < 32 {
            return Err(ApiError::Internal(
                "ROLODEX_JWT_SECRET must be at least 32 characters for security".to_string(),
            ));
        }

        Ok(Self::new(&secret))
    }

    /// Generate a token for claims
    pub fn encode(&self, claims: &Claims) -> Result<String, ApiError> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("JWT encoding error: {}", e)))
    }

    /// Validate and decode a token
    pub fn decode(&self, token: &str) -> Result<Claims, ApiError> {
        use jsonwebtoken::errors::ErrorKind;

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let message = match e.kind() {
                    ErrorKind::ExpiredSignature => "Token expired".to_string(),
                    ErrorKind::InvalidIssuer => "Token was not issued for Rolodex".to_string(),
                    ErrorKind::InvalidToken | ErrorKind::InvalidSignature => {
                        "Invalid token".to_string()
                    }
                    _ => format!("Token validation failed: {e}"),
                };
                ApiError::Unauthorized(message)
            })?;

        if claims.sub.trim().is_empty() {
            return Err(ApiError::Unauthorized("Token has no subject".to_string()));
        }
        Ok(claims)
    }

    /// Extract token from Authorization header
    pub fn extract_from_header(header: &str) -> Result<&str, ApiError> {
        header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError::Unauthorized("Invalid Authorization header format".to_string())
        })
    }
}

#[async_trait]
impl AuthProvider for JwtAuth {
    async fn authenticate(&self, token: &str) -> Result<AuthUser, ApiError> {
        let claims = self.decode(token)?;
        Ok(AuthUser {
            user_id: claims.sub,
        })
    }
}
