use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

use crate::config::Gateway;
use crate::credentials::{Credential, CredentialStore};
use crate::error::{ApnsError, Result};
use crate::jwt::TokenSigner;
use crate::models::{Notification, PushResult};
use crate::request::{ApnsRequest, RequestBuilder};
use crate::response::{classify, ErrorReason};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_WORKER_THREADS: usize = 2;

/// How a client delivers results; fixed when the client is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// `push` blocks the calling thread for one round trip
    #[default]
    Synchronous,
    /// `push_with` returns immediately and reports through a callback
    Asynchronous,
}

/// Trait for push notification providers
#[async_trait::async_trait]
pub trait PushProvider: Send + Sync {
    /// Sends a notification and waits for the gateway's verdict
    ///
    /// # Returns
    /// `Ok(PushResult)` for every attempt that reached the transport (including
    /// rejected and failed ones), `Err(ApnsError)` when the provider cannot serve the
    /// call at all
    async fn send(&self, notification: Notification) -> Result<PushResult>;
}

/// Tokio runtime created by the client when none was running at build time
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

enum Transport {
    Blocking(reqwest::blocking::Client),
    Async {
        client: reqwest::Client,
        handle: Handle,
        _runtime: Option<OwnedRuntime>,
    },
}

impl Transport {
    fn mode(&self) -> ExecutionMode {
        match self {
            Transport::Blocking(_) => ExecutionMode::Synchronous,
            Transport::Async { .. } => ExecutionMode::Asynchronous,
        }
    }
}

struct ClientInner {
    requests: RequestBuilder,
    credentials: CredentialStore,
    transport: Transport,
    closed: AtomicBool,
}

/// Apple Push Notification Service (APNs) client
///
/// Cheap to clone; all clones share one transport and one provider-token cache.
#[derive(Clone)]
pub struct PushClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for PushClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushClient")
            .field("mode", &self.mode())
            .field("gateway", self.inner.requests.gateway())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl PushClient {
    pub fn builder() -> PushClientBuilder {
        PushClientBuilder::new()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.inner.transport.mode()
    }

    pub fn gateway(&self) -> &Gateway {
        self.inner.requests.gateway()
    }

    pub fn default_topic(&self) -> Option<&str> {
        self.inner.requests.default_topic()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    /// Build the request a push of `notification` would send right now
    pub fn build_request(&self, notification: &Notification) -> Result<ApnsRequest> {
        self.inner
            .requests
            .build(notification, &self.inner.credentials)
    }

    /// Send one notification, blocking until APNs answers or the request fails.
    ///
    /// Gateway rejections and transport failures are reported in the returned
    /// [`PushResult`]; `Err` is reserved for calling this on an asynchronous client or
    /// on a closed one.
    ///
    /// # Panics
    /// The blocking transport panics when driven from an async context, so call this
    /// from a plain thread (or `tokio::task::spawn_blocking`), never from inside a
    /// Tokio task. The same holds for dropping the last clone of a synchronous client.
    pub fn push(&self, notification: &Notification) -> Result<PushResult> {
        let client = match &self.inner.transport {
            Transport::Blocking(client) => client,
            Transport::Async { .. } => {
                return Err(ApnsError::Capability {
                    expected: ExecutionMode::Synchronous,
                    actual: ExecutionMode::Asynchronous,
                })
            }
        };
        self.ensure_open()?;

        let result = match self.build_request(notification) {
            Ok(request) => send_blocking(client, request),
            Err(e) => PushResult::transport_failure(e),
        };

        Ok(log_result(notification, result))
    }

    /// Queue one notification and return immediately.
    ///
    /// `on_complete` runs exactly once with the notification and the outcome of this
    /// push, failures included. It normally runs on a transport worker; if the runtime
    /// shuts down before the push finishes it runs wherever the task is dropped, with a
    /// [`ApnsError::Closed`] transport failure. `Err` means the push was not queued and
    /// `on_complete` will not run.
    pub fn push_with<F>(&self, notification: Notification, on_complete: F) -> Result<()>
    where
        F: FnOnce(Notification, PushResult) + Send + 'static,
    {
        let (client, handle) = self.async_transport()?;
        self.ensure_open()?;

        let client = client.clone();
        let this = self.clone();
        let completion = Completion::new(notification, on_complete);
        handle.spawn(async move {
            let Some(notification) = completion.notification() else {
                return;
            };
            let result = this.dispatch(&client, notification).await;
            completion.complete(result);
        });

        Ok(())
    }

    /// Stop accepting pushes. Connections are released once the last clone drops;
    /// pushes already in flight may or may not complete.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            info!(gateway = %self.gateway(), "APNs client closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ApnsError::Closed);
        }
        Ok(())
    }

    fn async_transport(&self) -> Result<(&reqwest::Client, &Handle)> {
        match &self.inner.transport {
            Transport::Async { client, handle, .. } => Ok((client, handle)),
            Transport::Blocking(_) => Err(ApnsError::Capability {
                expected: ExecutionMode::Asynchronous,
                actual: ExecutionMode::Synchronous,
            }),
        }
    }

    async fn dispatch(&self, client: &reqwest::Client, notification: &Notification) -> PushResult {
        let result = match self.build_request(notification) {
            Ok(request) => send_async(client, request).await,
            Err(e) => PushResult::transport_failure(e),
        };

        log_result(notification, result)
    }
}

/// Hands a push outcome to its callback exactly once.
///
/// A completion dropped before `complete` (its task was cancelled, or never ran because
/// the runtime had shut down) reports a `Closed` transport failure instead.
struct Completion<F>
where
    F: FnOnce(Notification, PushResult),
{
    pending: Option<(Notification, F)>,
}

impl<F> Completion<F>
where
    F: FnOnce(Notification, PushResult),
{
    fn new(notification: Notification, on_complete: F) -> Self {
        Self {
            pending: Some((notification, on_complete)),
        }
    }

    fn notification(&self) -> Option<&Notification> {
        self.pending.as_ref().map(|(notification, _)| notification)
    }

    fn complete(mut self, result: PushResult) {
        if let Some((notification, on_complete)) = self.pending.take() {
            on_complete(notification, result);
        }
    }
}

impl<F> Drop for Completion<F>
where
    F: FnOnce(Notification, PushResult),
{
    fn drop(&mut self) {
        if let Some((notification, on_complete)) = self.pending.take() {
            warn!(
                token = %token_prefix(&notification),
                "APNs push abandoned before completion"
            );
            on_complete(notification, PushResult::transport_failure(ApnsError::Closed));
        }
    }
}

#[async_trait::async_trait]
impl PushProvider for PushClient {
    async fn send(&self, notification: Notification) -> Result<PushResult> {
        let (client, _) = self.async_transport()?;
        self.ensure_open()?;

        let client = client.clone();
        Ok(self.dispatch(&client, &notification).await)
    }
}

fn send_blocking(client: &reqwest::blocking::Client, request: ApnsRequest) -> PushResult {
    let response = client
        .request(request.method, &request.url)
        .headers(request.headers)
        .body(request.body)
        .timeout(request.timeout)
        .send();

    let response = match response {
        Ok(response) => response,
        Err(e) => return PushResult::transport_failure(e.into()),
    };

    let status = response.status().as_u16();
    let apns_id = response_apns_id(response.headers());

    if status == 200 {
        // Drain so the connection can be reused
        let _ = response.bytes();
        classify(status, None, apns_id)
    } else {
        classify(status, response.text().ok(), apns_id)
    }
}

async fn send_async(client: &reqwest::Client, request: ApnsRequest) -> PushResult {
    let response = client
        .request(request.method, &request.url)
        .headers(request.headers)
        .body(request.body)
        .timeout(request.timeout)
        .send()
        .await;

    let response = match response {
        Ok(response) => response,
        Err(e) => return PushResult::transport_failure(e.into()),
    };

    let status = response.status().as_u16();
    let apns_id = response_apns_id(response.headers());

    if status == 200 {
        let _ = response.bytes().await;
        classify(status, None, apns_id)
    } else {
        classify(status, response.text().await.ok(), apns_id)
    }
}

fn response_apns_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get(crate::request::APNS_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn token_prefix(notification: &Notification) -> String {
    notification.token().chars().take(8).collect()
}

fn log_result(notification: &Notification, result: PushResult) -> PushResult {
    let device_token_prefix = token_prefix(notification);

    if result.success {
        debug!(
            token = %device_token_prefix,
            apns_id = ?result.apns_id,
            "APNs notification accepted"
        );
    } else if let Some(error) = &result.transport_error {
        warn!(token = %device_token_prefix, error = %error, "APNs push failed before a response");
    } else {
        warn!(
            token = %device_token_prefix,
            status = result.http_status,
            reason = ?result.error_reason,
            token_invalid = result
                .error_reason
                .as_ref()
                .map_or(false, ErrorReason::is_token_invalid),
            "APNs notification rejected"
        );
    }

    result
}

/// Where a client's authorization comes from
enum CredentialSource {
    Material(Credential),
    Signer(Arc<dyn TokenSigner>),
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::Material(credential) => credential.fmt(f),
            CredentialSource::Signer(_) => f.write_str("Signer(..)"),
        }
    }
}

/// Builder for [`PushClient`]
///
/// Exactly one credential must be supplied, either through [`certificate`](Self::certificate),
/// [`token`](Self::token), [`token_signer`](Self::token_signer) or
/// [`credential`](Self::credential).
#[derive(Debug, Default)]
pub struct PushClientBuilder {
    production: bool,
    mode: ExecutionMode,
    credentials: Vec<CredentialSource>,
    default_topic: Option<String>,
    port: Option<u16>,
    gateway_url: Option<String>,
    connect_timeout: Option<Duration>,
    pool_idle_timeout: Option<Duration>,
    worker_threads: Option<usize>,
}

impl PushClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Blocking client; see [`PushClient::push`] for where it may be used
    pub fn synchronous(self) -> Self {
        self.mode(ExecutionMode::Synchronous)
    }

    pub fn asynchronous(self) -> Self {
        self.mode(ExecutionMode::Asynchronous)
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credentials.push(CredentialSource::Material(credential));
        self
    }

    /// Authenticate with provider tokens produced by `signer`
    pub fn token_signer(mut self, signer: Arc<dyn TokenSigner>) -> Self {
        self.credentials.push(CredentialSource::Signer(signer));
        self
    }

    /// Authenticate with a PKCS#12 client certificate
    pub fn certificate(self, pkcs12: impl Into<Vec<u8>>, password: Option<String>) -> Self {
        self.credential(Credential::Certificate {
            pkcs12: pkcs12.into(),
            password,
        })
    }

    /// Authenticate with provider tokens signed by a PKCS#8 P-256 key
    pub fn token(
        self,
        team_id: impl Into<String>,
        key_id: impl Into<String>,
        signing_key: impl Into<String>,
    ) -> Self {
        self.credential(Credential::Token {
            team_id: team_id.into(),
            key_id: key_id.into(),
            signing_key: signing_key.into(),
        })
    }

    pub fn default_topic(mut self, topic: impl Into<String>) -> Self {
        self.default_topic = Some(topic.into());
        self
    }

    /// 443 or 2197
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Send to this base URL instead of the Apple gateways
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// Worker threads for the runtime an asynchronous client creates when built
    /// outside of a Tokio runtime
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Validate credentials, resolve the gateway and set up the transport
    pub fn build(self) -> Result<PushClient> {
        let source = match self.credentials.as_slice() {
            [source] => source,
            [] => {
                return Err(ApnsError::Config(
                    "either the token credentials (team id, key id and private key) or a certificate must be provided"
                        .into(),
                ))
            }
            _ => {
                return Err(ApnsError::Config(
                    "only one credential may be configured per client".into(),
                ))
            }
        };

        let gateway = Gateway::resolve(self.production, self.port, self.gateway_url.as_deref())?;
        let credentials = match source {
            CredentialSource::Material(credential) => {
                CredentialStore::from_credential(credential, self.production)?
            }
            CredentialSource::Signer(signer) => CredentialStore::token(Arc::clone(signer)),
        };

        let transport = match self.mode {
            ExecutionMode::Synchronous => Transport::Blocking(self.blocking_client(&credentials)?),
            ExecutionMode::Asynchronous => {
                let client = self.async_client(&credentials)?;
                let (handle, runtime) = match Handle::try_current() {
                    Ok(handle) => (handle, None),
                    Err(_) => {
                        let runtime = tokio::runtime::Builder::new_multi_thread()
                            .worker_threads(self.worker_threads.unwrap_or(DEFAULT_WORKER_THREADS))
                            .thread_name("apns-worker")
                            .enable_all()
                            .build()
                            .map_err(|e| {
                                ApnsError::Config(format!("failed to start APNs runtime: {e}"))
                            })?;
                        (runtime.handle().clone(), Some(OwnedRuntime(Some(runtime))))
                    }
                };
                Transport::Async {
                    client,
                    handle,
                    _runtime: runtime,
                }
            }
        };

        info!(
            gateway = %gateway,
            mode = ?self.mode,
            auth = if credentials.is_token_based() { "token" } else { "certificate" },
            default_topic = ?self.default_topic,
            "Initialized APNs client"
        );

        Ok(PushClient {
            inner: Arc::new(ClientInner {
                requests: RequestBuilder::new(gateway, self.default_topic),
                credentials,
                transport,
                closed: AtomicBool::new(false),
            }),
        })
    }

    fn blocking_client(&self, credentials: &CredentialStore) -> Result<reqwest::blocking::Client> {
        let mut builder = reqwest::blocking::Client::builder()
            .use_native_tls()
            .connect_timeout(self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
            .pool_idle_timeout(self.pool_idle_timeout.unwrap_or(DEFAULT_POOL_IDLE_TIMEOUT));

        if let Some(identity) = credentials.certificate_identity() {
            builder = builder.identity(identity.identity().clone());
        }

        builder
            .build()
            .map_err(|e| ApnsError::Config(format!("failed to build HTTP client: {e}")))
    }

    fn async_client(&self, credentials: &CredentialStore) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .use_native_tls()
            .connect_timeout(self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
            .pool_idle_timeout(self.pool_idle_timeout.unwrap_or(DEFAULT_POOL_IDLE_TIMEOUT));

        if let Some(identity) = credentials.certificate_identity() {
            builder = builder.identity(identity.identity().clone());
        }

        builder
            .build()
            .map_err(|e| ApnsError::Config(format!("failed to build HTTP client: {e}")))
    }
}
