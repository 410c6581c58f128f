//! Remote signing through a key-vault REST API.
//!
//! The private key never leaves the vault. Signing sends the message digest:
//!
//! ```text
//! POST {vault}/keys/{name}[/{version}]/sign?api-version=7.4
//!      {"alg": "RS256", "value": base64url(digest)}   ->   {"kid": "...", "value": base64url(signature)}
//! GET  {vault}/keys/{name}[/{version}]?api-version=7.4 ->   {"key": <JWK>}
//! ```
//!
//! Every call is retried with backoff and guarded by a circuit breaker. The
//! public key is fetched on first use and cached until
//! [`RemoteSigningBackend::evict_public_key_cache`] or process restart.

use crate::algorithm::SigningAlgorithm;
use crate::backend::SigningBackend;
use crate::circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::errors::{Result, SigningError};
use crate::jwk::Jwk;
use crate::public_key::PublicKey;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::utils::{base64_url_decode_lenient, base64_url_encode};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

pub const KEY_VAULT_API_VERSION: &str = "7.4";

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Supplies bearer tokens for the key-vault API.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<Zeroizing<String>>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Fixed access token, e.g. injected by the deployment environment.
pub struct StaticCredential {
    token: parking_lot::RwLock<Option<Zeroizing<String>>>,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: parking_lot::RwLock::new(Some(Zeroizing::new(token.into()))),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn bearer_token(&self) -> Result<Zeroizing<String>> {
        self.token
            .read()
            .clone()
            .ok_or_else(|| SigningError::Credential("credential has been closed".to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.token.write().take();
        Ok(())
    }
}

/// Location of a key inside the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteKeyRef {
    pub vault_url: String,
    pub key_name: String,
    pub key_version: Option<String>,
}

impl RemoteKeyRef {
    pub fn new(
        vault_url: impl Into<String>,
        key_name: impl Into<String>,
        key_version: Option<String>,
    ) -> Self {
        Self {
            vault_url: vault_url.into(),
            key_name: key_name.into(),
            key_version: key_version.filter(|v| !v.is_empty()),
        }
    }

    /// `name` or `name/version`
    pub fn describe(&self) -> String {
        match &self.key_version {
            Some(version) => format!("{}/{}", self.key_name, version),
            None => self.key_name.clone(),
        }
    }

    fn key_url(&self) -> String {
        format!(
            "{}/keys/{}",
            self.vault_url.trim_end_matches('/'),
            self.describe()
        )
    }

    fn sign_url(&self) -> String {
        format!("{}/sign", self.key_url())
    }
}

#[derive(Debug, Clone)]
pub struct RemoteSignerConfig {
    pub key: RemoteKeyRef,
    pub algorithm: SigningAlgorithm,
    /// Overrides the `kid`, which otherwise is the key's `name[/version]`.
    pub key_id: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
}

impl RemoteSignerConfig {
    pub fn new(key: RemoteKeyRef, algorithm: SigningAlgorithm) -> Self {
        Self {
            key,
            algorithm,
            key_id: None,
            timeout: DEFAULT_REMOTE_TIMEOUT,
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Serialize)]
struct SignRequest<'a> {
    alg: &'a str,
    value: String,
}

#[derive(Deserialize)]
struct SignResponse {
    value: String,
}

#[derive(Deserialize)]
struct KeyBundle {
    key: Jwk,
}

/// Signs by delegating to a remote key vault.
pub struct RemoteSigningBackend {
    config: RemoteSignerConfig,
    key_id: String,
    http: reqwest::Client,
    credential: Arc<dyn CredentialProvider>,
    breaker: CircuitBreaker,
    public_key: RwLock<Option<Arc<PublicKey>>>,
    closed: AtomicBool,
}

impl RemoteSigningBackend {
    /// Build the backend. No network traffic happens until first use.
    pub fn new(config: RemoteSignerConfig, credential: Arc<dyn CredentialProvider>) -> Result<Self> {
        if config.algorithm.is_symmetric() {
            return Err(SigningError::UnsupportedAlgorithm(format!(
                "{} cannot be used with a remote signer",
                config.algorithm
            )));
        }
        if config.key.vault_url.is_empty() || config.key.key_name.is_empty() {
            return Err(SigningError::MissingKeyMaterial(
                "remote signer needs a vault URL and key name".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SigningError::RemoteUnavailable(format!("HTTP client: {}", e)))?;

        let key_id = config
            .key_id
            .clone()
            .filter(|kid| !kid.is_empty())
            .unwrap_or_else(|| config.key.describe());
        let breaker = CircuitBreaker::new(
            format!("remote-signer:{}", config.key.describe()),
            config.breaker.clone(),
        );

        tracing::info!(
            vault = %config.key.vault_url,
            key = %config.key.describe(),
            algorithm = %config.algorithm,
            "Configured remote signing backend"
        );

        Ok(Self {
            config,
            key_id,
            http,
            credential,
            breaker,
            public_key: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Drop the cached public key so the next use refetches it, e.g. after rotation.
    pub async fn evict_public_key_cache(&self) {
        self.public_key.write().await.take();
        tracing::info!(key = %self.config.key.describe(), "Evicted cached remote public key");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SigningError::Closed);
        }
        Ok(())
    }

    async fn guarded<T, F, Fut>(&self, operation_name: &'static str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retry = &self.config.retry;
        let result = self
            .breaker
            .call_counting(
                || retry_with_backoff(retry, operation_name, operation),
                SigningError::is_transient,
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(BreakerError::Open { retry_after }) => {
                tracing::warn!(
                    operation = operation_name,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Remote signer circuit open, failing fast"
                );
                Err(SigningError::CircuitOpen { retry_after })
            }
            Err(BreakerError::Inner(e)) => Err(e),
        }
    }

    async fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>> {
        let token = self.credential.bearer_token().await?;
        let response = self
            .http
            .post(self.config.key.sign_url())
            .query(&[("api-version", KEY_VAULT_API_VERSION)])
            .bearer_auth(token.as_str())
            .json(&SignRequest {
                alg: self.config.algorithm.as_str(),
                value: base64_url_encode(digest),
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body: SignResponse = response
            .json()
            .await
            .map_err(|e| SigningError::RemoteResponseInvalid(e.to_string()))?;
        let signature = base64_url_decode_lenient(&body.value).map_err(|e| {
            SigningError::RemoteResponseInvalid(format!("signature is not base64url: {}", e))
        })?;
        if signature.is_empty() {
            return Err(SigningError::RemoteResponseInvalid(
                "empty signature".to_string(),
            ));
        }
        Ok(signature)
    }

    async fn fetch_public_key(&self) -> Result<PublicKey> {
        let token = self.credential.bearer_token().await?;
        let response = self
            .http
            .get(self.config.key.key_url())
            .query(&[("api-version", KEY_VAULT_API_VERSION)])
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let bundle: KeyBundle = response
            .json()
            .await
            .map_err(|e| SigningError::RemoteResponseInvalid(e.to_string()))?;
        let key = PublicKey::from_jwk(&bundle.key)?;
        key.ensure_compatible(self.config.algorithm)?;
        Ok(key)
    }

    async fn cached_public_key(&self) -> Result<Arc<PublicKey>> {
        if let Some(key) = self.public_key.read().await.as_ref() {
            return Ok(key.clone());
        }

        let fetched = Arc::new(
            self.guarded("remote_get_key", || self.fetch_public_key())
                .await?,
        );
        tracing::info!(key = %self.config.key.describe(), "Fetched remote public key");

        let mut slot = self.public_key.write().await;
        Ok(slot.get_or_insert(fetched).clone())
    }
}

#[async_trait]
impl SigningBackend for RemoteSigningBackend {
    fn algorithm(&self) -> SigningAlgorithm {
        self.config.algorithm
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let digest = self.config.algorithm.digest(message);
        self.guarded("remote_sign", || self.sign_digest(&digest))
            .await
    }

    async fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        let key = self.cached_public_key().await?;
        key.verify(self.config.algorithm, message, signature)
    }

    async fn public_key_jwk(&self) -> Result<Option<Jwk>> {
        self.ensure_open()?;
        let key = self.cached_public_key().await?;
        key.to_jwk(self.config.algorithm, &self.key_id).map(Some)
    }

    async fn public_key_pem(&self) -> Result<Option<String>> {
        self.ensure_open()?;
        let key = self.cached_public_key().await?;
        key.to_pem().map(Some)
    }

    fn circuit_state(&self) -> Option<CircuitState> {
        Some(self.breaker.state())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.credential.close().await {
            tracing::warn!(error = %e, "Failed to close remote signer credential");
        }
        self.public_key.write().await.take();
        tracing::info!(key = %self.config.key.describe(), "Remote signing backend closed");
    }
}

impl fmt::Debug for RemoteSigningBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSigningBackend")
            .field("key", &self.config.key)
            .field("algorithm", &self.config.algorithm)
            .field("key_id", &self.key_id)
            .field("circuit", &self.breaker.state())
            .finish_non_exhaustive()
    }
}

fn transport_error(e: reqwest::Error) -> SigningError {
    if e.is_timeout() {
        SigningError::RemoteUnavailable("request timed out".to_string())
    } else if e.is_connect() {
        SigningError::RemoteUnavailable(format!("connection failed: {}", e))
    } else {
        SigningError::RemoteUnavailable(e.to_string())
    }
}

// 429 and 5xx may clear up; other statuses will not.
fn status_error(status: StatusCode, body: &str) -> SigningError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SigningError::RemoteUnavailable(format!("remote signer returned {}", status))
    } else {
        SigningError::RemoteRejected {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        }
    }
}
