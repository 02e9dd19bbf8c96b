//! APNs provider authentication tokens
//!
//! Provider tokens are ES256 JWS values carrying only the team id (`iss`) and the issue
//! time (`iat`); the signing key is identified by `kid` in the header. APNs rejects
//! tokens older than one hour.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use tracing::debug;

use crate::error::{ApnsError, Result};

/// JWT algorithm - APNs only accepts ES256
const PROVIDER_TOKEN_ALGORITHM: Algorithm = Algorithm::ES256;

/// Produces signed provider tokens.
///
/// Implementations must be cheap to share between threads; the credential store calls
/// `sign` from whichever request finds the cached token stale.
pub trait TokenSigner: Send + Sync {
    /// Sign a token issued at `issued_at` (epoch seconds)
    fn sign(&self, issued_at: i64) -> Result<String>;
}

/// JWT claims for APNs provider tokens
#[derive(Debug, Serialize)]
struct ProviderClaims<'a> {
    iss: &'a str,
    iat: i64,
}

/// ECDSA P-256 / SHA-256 signer over a PKCS#8 key
pub struct Es256Signer {
    team_id: String,
    key_id: String,
    encoding_key: EncodingKey,
}

impl std::fmt::Debug for Es256Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Es256Signer")
            .field("team_id", &self.team_id)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl Es256Signer {
    /// Create a signer from a base64 PKCS#8 key (PEM armour is tolerated).
    ///
    /// The key is exercised once with a throwaway signature so unusable key material is
    /// reported here rather than on the first push.
    pub fn new(team_id: &str, key_id: &str, private_key: &str) -> Result<Self> {
        let der = decode_pkcs8(private_key)?;

        let signer = Self {
            team_id: team_id.to_string(),
            key_id: key_id.to_string(),
            encoding_key: EncodingKey::from_ec_der(&der),
        };

        signer
            .sign(Utc::now().timestamp())
            .map_err(|e| ApnsError::KeyMaterial(e.to_string()))?;

        Ok(signer)
    }
}

impl TokenSigner for Es256Signer {
    fn sign(&self, issued_at: i64) -> Result<String> {
        let mut header = Header::new(PROVIDER_TOKEN_ALGORITHM);
        header.typ = None;
        header.kid = Some(self.key_id.clone());

        let claims = ProviderClaims {
            iss: &self.team_id,
            iat: issued_at,
        };

        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| ApnsError::Signing(e.to_string()))?;

        debug!(key_id = %self.key_id, iat = issued_at, "Signed APNs provider token");
        Ok(token)
    }
}

/// Strip optional PEM armour and whitespace, then base64-decode the PKCS#8 body
fn decode_pkcs8(private_key: &str) -> Result<Vec<u8>> {
    let body: String = private_key
        .lines()
        .filter(|line| !line.trim_start().starts_with("-----"))
        .flat_map(|line| line.chars())
        .filter(|c| !c.is_whitespace())
        .collect();

    if body.is_empty() {
        return Err(ApnsError::KeyMaterial("private key is empty".to_string()));
    }

    STANDARD
        .decode(body.as_bytes())
        .map_err(|e| ApnsError::KeyMaterial(format!("private key is not valid base64: {e}")))
}
