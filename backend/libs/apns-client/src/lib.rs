//! APNs HTTP/2 Client Library
//!
//! This library provides an Apple Push Notification Service (APNs) client speaking the
//! HTTP/2 provider API.
//!
//! It handles:
//! - Certificate loading and validation (expiry, push certificate, environment)
//! - Provider token (ES256 JWT) signing with lazy, single-flight refresh
//! - Encoding notifications into APNs request headers and body
//! - Classifying gateway responses into typed results
//! - Blocking and callback-based delivery over a pooled transport
//!
//! # Example: token authentication, blocking delivery
//!
//! ```rust,no_run
//! use apns_client::{Notification, Priority, PushClient};
//!
//! let client = PushClient::builder()
//!     .token("TEAMID1234", "KEYID12345", std::env::var("APNS_PRIVATE_KEY").unwrap())
//!     .default_topic("com.example.app")
//!     .production(true)
//!     .build()?;
//!
//! let notification = Notification::builder("device-token", r#"{"aps":{"alert":"hi"}}"#)
//!     .priority(Priority::Immediate)
//!     .build();
//!
//! let result = client.push(&notification)?;
//! if !result.success {
//!     eprintln!("rejected: {:?}", result.error_reason);
//! }
//! # Ok::<(), apns_client::ApnsError>(())
//! ```

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod jwt;
pub mod models;
pub mod request;
pub mod response;

pub use client::{ExecutionMode, PushClient, PushClientBuilder, PushProvider};
pub use config::{ApnsConfig, Gateway};
pub use credentials::{CertificateIdentity, Credential, CredentialStore};
pub use error::{ApnsError, Result};
pub use jwt::{Es256Signer, TokenSigner};
pub use models::{Notification, NotificationBuilder, Priority, PushResult};
pub use request::{ApnsRequest, RequestBuilder};
pub use response::{classify, ErrorReason};
