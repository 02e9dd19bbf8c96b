//! APNs credentials: TLS client certificates and provider tokens
//!
//! Exactly one credential is active per client. Certificate credentials authenticate
//! during the TLS handshake and contribute no request header; token credentials add
//! `authorization: bearer <jwt>` to every request, re-signing the JWT lazily once the
//! cached one is older than [`TOKEN_STALENESS_MINUTES`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use openssl::pkcs12::Pkcs12;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use x509_parser::prelude::*;

use crate::error::{ApnsError, Result};
use crate::jwt::{Es256Signer, TokenSigner};

/// APNs refuses tokens older than an hour; refresh with five minutes to spare.
pub const TOKEN_STALENESS_MINUTES: i64 = 55;

const DEVELOPMENT_CN_MARKER: &str = "apple development ios push services";
const PRODUCTION_CN_MARKER: &str = "apple production ios push services";

/// Credential material supplied by the caller
#[derive(Clone)]
pub enum Credential {
    /// PKCS#12 keystore holding the client certificate and its private key
    Certificate {
        pkcs12: Vec<u8>,
        password: Option<String>,
    },
    /// Team id, key id and a PKCS#8 P-256 key for provider tokens
    Token {
        team_id: String,
        key_id: String,
        signing_key: String,
    },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Certificate { pkcs12, .. } => f
                .debug_struct("Certificate")
                .field("pkcs12_len", &pkcs12.len())
                .finish_non_exhaustive(),
            Credential::Token {
                team_id, key_id, ..
            } => f
                .debug_struct("Token")
                .field("team_id", team_id)
                .field("key_id", key_id)
                .finish_non_exhaustive(),
        }
    }
}

impl Credential {
    /// Reject credentials with missing pieces
    pub fn validate(&self) -> Result<()> {
        match self {
            Credential::Certificate { pkcs12, .. } => {
                if pkcs12.is_empty() {
                    return Err(ApnsError::Config("certificate keystore is empty".into()));
                }
            }
            Credential::Token {
                team_id,
                key_id,
                signing_key,
            } => {
                let missing: Vec<&str> = [
                    ("team_id", team_id),
                    ("key_id", key_id),
                    ("signing_key", signing_key),
                ]
                .iter()
                .filter(|(_, value)| value.trim().is_empty())
                .map(|(name, _)| *name)
                .collect();

                if !missing.is_empty() {
                    return Err(ApnsError::Config(format!(
                        "token credential is missing: {}",
                        missing.join(", ")
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A validated client certificate ready to hand to the transport
#[derive(Clone)]
pub struct CertificateIdentity {
    subject: String,
    common_name: String,
    identity: reqwest::Identity,
}

impl std::fmt::Debug for CertificateIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateIdentity")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl CertificateIdentity {
    /// Load the end-entity certificate from a PKCS#12 keystore and validate it for the
    /// given environment.
    pub fn load(pkcs12: &[u8], password: Option<&str>, production: bool) -> Result<Self> {
        let password = password.unwrap_or("");

        let parsed = Pkcs12::from_der(pkcs12)?.parse2(password)?;
        let cert = parsed
            .cert
            .ok_or_else(|| ApnsError::Certificate("keystore holds no certificate".into()))?;
        let der = cert.to_der()?;

        let (subject, common_name) = validate_certificate(production, &der)?;

        let identity = reqwest::Identity::from_pkcs12_der(pkcs12, password)
            .map_err(|e| ApnsError::Certificate(format!("unusable TLS identity: {e}")))?;

        let fields = split_subject(&subject);
        info!(
            common_name = %common_name,
            uid = fields.get("UID").map(String::as_str).unwrap_or("-"),
            production,
            "Loaded APNs client certificate"
        );

        Ok(Self {
            subject,
            common_name,
            identity,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// VoIP certificates may only deliver `voip` pushes to the `.voip` topic
    pub fn is_voip(&self) -> bool {
        self.common_name.to_lowercase().contains("voip")
    }

    pub(crate) fn identity(&self) -> &reqwest::Identity {
        &self.identity
    }
}

/// Check validity period, push-ness and environment of a DER certificate.
///
/// Returns the rendered subject and its common name.
pub fn validate_certificate(production: bool, der: &[u8]) -> Result<(String, String)> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| ApnsError::Certificate(format!("X.509 parse failed: {e}")))?;

    let validity = cert.validity();
    if !validity.is_valid() {
        return Err(ApnsError::Certificate(format!(
            "certificate is outside its validity period ({} - {})",
            validity.not_before, validity.not_after
        )));
    }

    let subject = cert.subject().to_string();
    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ApnsError::Certificate("certificate subject has no common name".into()))?;

    let lowered = common_name.to_lowercase();
    if !lowered.contains("push") {
        return Err(ApnsError::Certificate(format!(
            "not a push certificate - {common_name}"
        )));
    }

    if production && lowered.contains(DEVELOPMENT_CN_MARKER) {
        return Err(ApnsError::EnvironmentMismatch(format!(
            "development certificate used against the production gateway ({common_name})"
        )));
    }
    if !production && lowered.contains(PRODUCTION_CN_MARKER) {
        return Err(ApnsError::EnvironmentMismatch(format!(
            "production certificate used against the sandbox gateway ({common_name})"
        )));
    }

    Ok((subject, common_name))
}

/// Split an RFC 4514 style subject (`C=US, O=Apple, CN=...`) into its attributes.
///
/// Components that are not a single `key=value` pair are skipped.
pub fn split_subject(subject: &str) -> HashMap<String, String> {
    subject
        .split(',')
        .filter_map(|part| {
            let mut kv = part.split('=');
            match (kv.next(), kv.next(), kv.next()) {
                (Some(key), Some(value), None) => {
                    Some((key.trim().to_string(), value.trim().to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

/// A signed provider token and when it was issued
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.issued_at) > Duration::minutes(TOKEN_STALENESS_MINUTES)
    }
}

/// Lazily refreshed provider token
struct TokenCache {
    signer: Arc<dyn TokenSigner>,
    cached: RwLock<Option<CachedToken>>,
    refresh_lock: Mutex<()>,
    refreshes: AtomicU64,
}

impl TokenCache {
    fn new(signer: Arc<dyn TokenSigner>) -> Self {
        Self {
            signer,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            refreshes: AtomicU64::new(0),
        }
    }

    fn fresh(&self, now: DateTime<Utc>) -> Option<String> {
        self.cached
            .read()
            .as_ref()
            .filter(|token| !token.is_stale(now))
            .map(|token| token.value.clone())
    }

    fn token(&self, now: DateTime<Utc>) -> Result<String> {
        if let Some(value) = self.fresh(now) {
            return Ok(value);
        }

        let _guard = self.refresh_lock.lock();

        // Another caller may have refreshed while we waited for the lock
        if let Some(value) = self.fresh(now) {
            return Ok(value);
        }

        let value = self.signer.sign(now.timestamp())?;
        *self.cached.write() = Some(CachedToken {
            value: value.clone(),
            issued_at: now,
        });

        let count = self.refreshes.fetch_add(1, Ordering::Relaxed) + 1;
        info!(refreshes = count, "Refreshed APNs provider token");

        Ok(value)
    }
}

enum StoreKind {
    Certificate(CertificateIdentity),
    Token(TokenCache),
}

/// Produces the `authorization` header value for each request
pub struct CredentialStore {
    kind: StoreKind,
}

impl CredentialStore {
    /// Validate a credential and load it for the given environment
    pub fn from_credential(credential: &Credential, production: bool) -> Result<Self> {
        credential.validate()?;

        match credential {
            Credential::Certificate { pkcs12, password } => Ok(Self::certificate(
                CertificateIdentity::load(pkcs12, password.as_deref(), production)?,
            )),
            Credential::Token {
                team_id,
                key_id,
                signing_key,
            } => {
                let signer = Es256Signer::new(team_id, key_id, signing_key)?;
                debug!(team_id = %team_id, key_id = %key_id, "Loaded APNs token signing key");
                Ok(Self::token(Arc::new(signer)))
            }
        }
    }

    pub fn certificate(identity: CertificateIdentity) -> Self {
        Self {
            kind: StoreKind::Certificate(identity),
        }
    }

    /// Token-mode store around any signer
    pub fn token(signer: Arc<dyn TokenSigner>) -> Self {
        Self {
            kind: StoreKind::Token(TokenCache::new(signer)),
        }
    }

    /// Current header value: `None` for certificates, `bearer <jwt>` for tokens
    pub fn authorization(&self) -> Result<Option<String>> {
        self.authorization_at(Utc::now())
    }

    /// [`authorization`](Self::authorization) evaluated at an explicit instant
    pub fn authorization_at(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        match &self.kind {
            StoreKind::Certificate(_) => Ok(None),
            StoreKind::Token(cache) => Ok(Some(format!("bearer {}", cache.token(now)?))),
        }
    }

    pub fn certificate_identity(&self) -> Option<&CertificateIdentity> {
        match &self.kind {
            StoreKind::Certificate(identity) => Some(identity),
            StoreKind::Token(_) => None,
        }
    }

    pub fn is_token_based(&self) -> bool {
        matches!(self.kind, StoreKind::Token(_))
    }

    /// Snapshot of the cached provider token, if any
    pub fn cached_token(&self) -> Option<CachedToken> {
        match &self.kind {
            StoreKind::Token(cache) => cache.cached.read().clone(),
            StoreKind::Certificate(_) => None,
        }
    }

    /// Number of provider tokens signed by this store
    pub fn token_refreshes(&self) -> u64 {
        match &self.kind {
            StoreKind::Token(cache) => cache.refreshes.load(Ordering::Relaxed),
            StoreKind::Certificate(_) => 0,
        }
    }
}
