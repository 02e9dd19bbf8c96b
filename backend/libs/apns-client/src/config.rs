use std::fs;
use std::time::Duration;

use serde::Deserialize;

use crate::client::{ExecutionMode, PushClientBuilder};
use crate::credentials::Credential;
use crate::error::{ApnsError, Result};

pub const PRODUCTION_HOST: &str = "api.push.apple.com";
pub const SANDBOX_HOST: &str = "api.sandbox.push.apple.com";

/// Ports APNs listens on
pub const ALLOWED_PORTS: [u16; 2] = [443, 2197];

/// Resolved APNs endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    base_url: String,
}

impl Gateway {
    /// Resolve the gateway for an environment.
    ///
    /// An explicit `override_url` (e.g. a local mock server) wins over the well-known
    /// hosts; `port` must be 443 or 2197 when given.
    pub fn resolve(production: bool, port: Option<u16>, override_url: Option<&str>) -> Result<Self> {
        if let Some(port) = port {
            if !ALLOWED_PORTS.contains(&port) {
                return Err(ApnsError::Config(format!(
                    "APNs port must be 443 or 2197, got {port}"
                )));
            }
        }

        if let Some(url) = override_url {
            let url = url.trim_end_matches('/');
            if url.is_empty() {
                return Err(ApnsError::Config("gateway override URL is empty".into()));
            }
            return Ok(Self {
                base_url: url.to_string(),
            });
        }

        let host = if production { PRODUCTION_HOST } else { SANDBOX_HOST };
        let base_url = match port {
            Some(port) => format!("https://{host}:{port}"),
            None => format!("https://{host}"),
        };

        Ok(Self { base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.base_url)
    }
}

/// APNs Configuration
///
/// Loaded from `APNS_*` environment variables. Either the certificate fields or the
/// token fields must be set, never both.
#[derive(Debug, Clone, Deserialize)]
pub struct ApnsConfig {
    #[serde(default)]
    pub production: bool,
    pub default_topic: Option<String>,
    pub port: Option<u16>,
    pub gateway_url: Option<String>,
    #[serde(default)]
    pub mode: ExecutionMode,

    pub certificate_path: Option<String>,
    pub certificate_passphrase: Option<String>,

    pub team_id: Option<String>,
    pub key_id: Option<String>,
    /// PKCS#8 key body, PEM armour optional
    pub private_key: Option<String>,
    pub private_key_path: Option<String>,

    pub connect_timeout_secs: Option<u64>,
    pub pool_idle_timeout_secs: Option<u64>,
}

impl ApnsConfig {
    /// Read `APNS_*` variables, honouring a `.env` file when present
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        envy::prefixed("APNS_")
            .from_env()
            .map_err(|e| ApnsError::Config(format!("invalid APNS_* environment: {e}")))
    }

    /// Get APNs API host based on environment
    pub fn endpoint(&self) -> &str {
        if self.production {
            PRODUCTION_HOST
        } else {
            SANDBOX_HOST
        }
    }

    /// Load credential material from disk and produce a client builder
    pub fn into_builder(self) -> Result<PushClientBuilder> {
        let credential = self.credential()?;

        let mut builder = PushClientBuilder::new()
            .production(self.production)
            .mode(self.mode)
            .credential(credential);

        if let Some(topic) = self.default_topic {
            builder = builder.default_topic(topic);
        }
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(url) = self.gateway_url {
            builder = builder.gateway_url(url);
        }
        if let Some(secs) = self.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.pool_idle_timeout_secs {
            builder = builder.pool_idle_timeout(Duration::from_secs(secs));
        }

        Ok(builder)
    }

    fn credential(&self) -> Result<Credential> {
        let has_token_fields =
            self.team_id.is_some() || self.key_id.is_some() || self.has_private_key();

        match (&self.certificate_path, has_token_fields) {
            (Some(_), true) => Err(ApnsError::Config(
                "both certificate and token credentials are configured".into(),
            )),
            (Some(path), false) => {
                let pkcs12 = fs::read(path).map_err(|e| {
                    ApnsError::Config(format!("failed to read certificate {path}: {e}"))
                })?;
                Ok(Credential::Certificate {
                    pkcs12,
                    password: self.certificate_passphrase.clone(),
                })
            }
            (None, true) => Ok(Credential::Token {
                team_id: self.team_id.clone().unwrap_or_default(),
                key_id: self.key_id.clone().unwrap_or_default(),
                signing_key: self.private_key()?,
            }),
            (None, false) => Err(ApnsError::Config(
                "either APNS_CERTIFICATE_PATH or APNS_TEAM_ID/APNS_KEY_ID/APNS_PRIVATE_KEY must be set"
                    .into(),
            )),
        }
    }

    fn has_private_key(&self) -> bool {
        self.private_key.is_some() || self.private_key_path.is_some()
    }

    fn private_key(&self) -> Result<String> {
        match (&self.private_key, &self.private_key_path) {
            (Some(key), _) => Ok(key.clone()),
            (None, Some(path)) => fs::read_to_string(path)
                .map_err(|e| ApnsError::Config(format!("failed to read private key {path}: {e}"))),
            (None, None) => Ok(String::new()),
        }
    }
}
