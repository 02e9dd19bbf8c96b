//! Certificate-authenticated client construction
//!
//! Keystores are generated per test: rcgen issues a self-signed certificate with the
//! requested common name and openssl packs it with its key into PKCS#12.

use apns_client::{ApnsError, Credential, CredentialStore, ExecutionMode, Notification, PushClient};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::x509::X509;

const PASSWORD: &str = "cert-password";

fn pkcs12_with_common_name(common_name: &str) -> Vec<u8> {
    let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();

    let x509 = X509::from_der(cert.der()).unwrap();
    let pkey = PKey::private_key_from_pem(key.serialize_pem().as_bytes()).unwrap();

    Pkcs12::builder()
        .name("apns")
        .pkey(&pkey)
        .cert(&x509)
        .build2(PASSWORD)
        .unwrap()
        .to_der()
        .unwrap()
}

fn certificate_client(common_name: &str, production: bool) -> Result<PushClient, ApnsError> {
    PushClient::builder()
        .certificate(pkcs12_with_common_name(common_name), Some(PASSWORD.to_string()))
        .production(production)
        .default_topic("com.example.app")
        .build()
}

#[test]
fn test_development_certificate_on_sandbox() {
    let client =
        certificate_client("Apple Development IOS Push Services: com.example.app", false).unwrap();

    assert_eq!(client.mode(), ExecutionMode::Synchronous);
    assert_eq!(
        client.gateway().base_url(),
        "https://api.sandbox.push.apple.com"
    );
    assert!(!client.credentials().is_token_based());
    assert!(client.credentials().authorization().unwrap().is_none());
}

#[test]
fn test_certificate_request_has_no_authorization() {
    let client =
        certificate_client("Apple Production IOS Push Services: com.example.app", true).unwrap();

    let request = client
        .build_request(&Notification::builder("abc", "{}").push_type("alert").build())
        .unwrap();

    assert!(request.headers.get("authorization").is_none());
    assert_eq!(request.headers.get("apns-topic").unwrap(), "com.example.app");
    assert_eq!(request.headers.get("apns-push-type").unwrap(), "alert");
}

#[test]
fn test_development_certificate_on_production_is_environment_mismatch() {
    let err =
        certificate_client("Apple Development iOS Push Services: com.example.app", true)
            .unwrap_err();

    assert!(matches!(err, ApnsError::EnvironmentMismatch(_)));
    assert!(err.is_configuration());
}

#[test]
fn test_production_certificate_on_sandbox_is_environment_mismatch() {
    let err = certificate_client("Apple Production IOS Push Services: com.example.app", false)
        .unwrap_err();

    assert!(matches!(err, ApnsError::EnvironmentMismatch(_)));
}

#[test]
fn test_non_push_certificate_is_generic_certificate_error() {
    let err = certificate_client("localhost", true).unwrap_err();
    assert!(matches!(err, ApnsError::Certificate(_)));
}

#[test]
fn test_wrong_keystore_password() {
    let err = PushClient::builder()
        .certificate(
            pkcs12_with_common_name("Apple Push Services: com.example.app"),
            Some("not-the-password".to_string()),
        )
        .build()
        .unwrap_err();

    assert!(matches!(err, ApnsError::Certificate(_)));
}

#[test]
fn test_voip_certificate_forces_voip_overlay() {
    let client = certificate_client("Apple VoIP Push Services: com.example.app", true).unwrap();
    assert!(client
        .credentials()
        .certificate_identity()
        .unwrap()
        .is_voip());

    let notification = Notification::builder("abc", "{}")
        .topic("com.example.other")
        .push_type("alert")
        .build();
    let request = client.build_request(&notification).unwrap();

    assert_eq!(request.headers.get("apns-push-type").unwrap(), "voip");
    assert_eq!(
        request.headers.get("apns-topic").unwrap(),
        "com.example.other.voip"
    );
}

#[test]
fn test_credential_store_from_certificate() {
    let credential = Credential::Certificate {
        pkcs12: pkcs12_with_common_name("Apple Push Services: com.example.app"),
        password: Some(PASSWORD.to_string()),
    };

    let store = CredentialStore::from_credential(&credential, true).unwrap();
    let identity = store.certificate_identity().unwrap();

    assert_eq!(identity.common_name(), "Apple Push Services: com.example.app");
    assert!(identity.subject().contains("CN=Apple Push Services"));
    assert!(!identity.is_voip());
    assert_eq!(store.token_refreshes(), 0);
}
