//! VAPID application server identification (RFC 8292).

use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use p256::SecretKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use rand_core::OsRng;
use serde::Serialize;
use thiserror::Error;

use crate::encrypt::B64_URL;

/// Push services reject VAPID tokens valid for more than 24h.
const TOKEN_LIFETIME_HOURS: i64 = 12;

#[derive(Debug, Error)]
pub enum VapidError {
    #[error("VAPID private key must be a base64url P-256 scalar")]
    BadPrivateKey,
    #[error("push endpoint is not a valid URL: {0}")]
    BadEndpoint(String),
    #[error("failed to sign VAPID token: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

#[derive(Serialize)]
struct VapidClaims<'a> {
    aud: String,
    exp: i64,
    sub: &'a str,
}

/// The server's P-256 signing key and its public half in the
/// base64url form browsers pass to `pushManager.subscribe`.
pub struct VapidKey {
    encoding: EncodingKey,
    public_key: String,
}

impl VapidKey {
    pub fn generate() -> Result<Self, VapidError> {
        Self::from_secret(SecretKey::random(&mut OsRng))
    }

    pub fn from_base64(raw: &str) -> Result<Self, VapidError> {
        let bytes = B64_URL
            .decode(raw.trim())
            .map_err(|_| VapidError::BadPrivateKey)?;
        let secret = SecretKey::from_slice(&bytes).map_err(|_| VapidError::BadPrivateKey)?;
        Self::from_secret(secret)
    }

    fn from_secret(secret: SecretKey) -> Result<Self, VapidError> {
        let public_key = B64_URL.encode(secret.public_key().to_encoded_point(false).as_bytes());
        let der = secret
            .to_pkcs8_der()
            .map_err(|_| VapidError::BadPrivateKey)?;

        Ok(Self {
            encoding: EncodingKey::from_ec_der(der.as_bytes()),
            public_key,
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// `Authorization` header value for a request to `endpoint`.
    pub fn authorization(&self, endpoint: &str, subject: &str) -> Result<String, VapidError> {
        let url = reqwest::Url::parse(endpoint)
            .map_err(|e| VapidError::BadEndpoint(e.to_string()))?;
        if !url.has_host() {
            return Err(VapidError::BadEndpoint("missing host".into()));
        }

        let claims = VapidClaims {
            aud: url.origin().ascii_serialization(),
            exp: (Utc::now() + Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp(),
            sub: subject,
        };
        let token = encode(&Header::new(Algorithm::ES256), &claims, &self.encoding)?;

        Ok(format!("vapid t={}, k={}", token, self.public_key))
    }
}
