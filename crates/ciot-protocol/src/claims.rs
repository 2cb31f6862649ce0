use serde::{Deserialize, Serialize};

/// Compact JWS header for device tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

impl JwtHeader {
    /// ECDSA P-256 / SHA-256.
    pub fn es256() -> Self {
        Self {
            alg: "ES256".into(),
            typ: "JWT".into(),
        }
    }
}

/// Claims carried by a device authentication token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
    /// Audience: the project id the device belongs to.
    pub aud: String,
}
