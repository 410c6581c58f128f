use anyhow::{bail, Context, Result};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokengate_federation::{DiscoverySource, ProviderConfig, ProviderKind, DEFAULT_MICROSOFT_TENANT};
use tokengate_signing::{
    CircuitBreakerConfig, KeyMaterial, RemoteKeyRef, RemoteSignerConfig, RetryPolicy,
    SigningAlgorithm,
};

/// Upper bound for `TOKEN_EXPIRY_SECONDS` (one year).
pub const MAX_TOKEN_EXPIRY_SECONDS: u64 = 365 * 24 * 60 * 60;
/// Upper bound for `LOGIN_SESSION_TTL_SECONDS` (one day).
pub const MAX_SESSION_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Where the local signing key comes from.
#[derive(Debug, Clone)]
pub enum LocalKeySource {
    File(PathBuf),
    Inline(KeyMaterial),
}

#[derive(Clone)]
pub enum SigningConfig {
    Local {
        algorithm: SigningAlgorithm,
        key_id: Option<String>,
        source: LocalKeySource,
    },
    Remote {
        signer: RemoteSignerConfig,
        access_token: String,
    },
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningConfig::Local {
                algorithm,
                key_id,
                source,
            } => f
                .debug_struct("Local")
                .field("algorithm", algorithm)
                .field("key_id", key_id)
                .field("source", source)
                .finish(),
            SigningConfig::Remote { signer, .. } => f
                .debug_struct("Remote")
                .field("signer", signer)
                .finish_non_exhaustive(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: SocketAddr,

    /// `iss` of minted tokens
    pub issuer: String,

    /// Audiences logins may request and `/userinfo` accepts
    pub audiences: Vec<String>,

    /// Lifetime of minted tokens (seconds)
    pub token_expiry: u64,

    /// Clock skew tolerated when validating tokens (seconds)
    pub validation_skew: u64,

    pub cookie_name: String,
    pub cookie_secure: bool,

    pub signing: SigningConfig,

    /// Enabled upstream providers
    pub providers: Vec<ProviderConfig>,

    /// Role directory entries, `id=role|role@affiliation;...`
    pub role_assignments: Option<String>,

    pub session_ttl: Duration,
    pub session_sweep_interval: Duration,
    pub id_token_leeway: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_address = parse_or(&var, "BIND_ADDRESS", "127.0.0.1:8080".parse()?)?;

        let issuer = var("TOKEN_ISSUER").context("TOKEN_ISSUER environment variable required")?;

        let audiences: Vec<String> = var("TOKEN_AUDIENCES")
            .map(|v| split_list(&v, ','))
            .unwrap_or_default();
        if audiences.is_empty() {
            bail!("TOKEN_AUDIENCES must list at least one audience");
        }

        let token_expiry = parse_or(&var, "TOKEN_EXPIRY_SECONDS", 1800)?;
        if token_expiry == 0 || token_expiry > MAX_TOKEN_EXPIRY_SECONDS {
            bail!(
                "TOKEN_EXPIRY_SECONDS must be between 1 and {}",
                MAX_TOKEN_EXPIRY_SECONDS
            );
        }
        let validation_skew = parse_or(&var, "TOKEN_VALIDATION_SKEW_SECONDS", 30)?;

        let cookie_name = var("AUTH_COOKIE_NAME").unwrap_or_else(|| "auth_token".to_string());
        let cookie_secure = match var("COOKIE_SECURE") {
            Some(v) => parse_bool(&v).context("COOKIE_SECURE must be true or false")?,
            None => true,
        };

        let signing = signing_config(&var)?;

        let http_timeout = Duration::from_secs(parse_or(&var, "HTTP_TIMEOUT_SECONDS", 10)?);
        let tenant = var("MICROSOFT_TENANT").unwrap_or_else(|| DEFAULT_MICROSOFT_TENANT.to_string());
        let mut providers = Vec::new();
        for kind in ProviderKind::ALL {
            if let Some(provider) = provider_config(&var, kind, &tenant, http_timeout)? {
                providers.push(provider);
            }
        }

        let session_ttl = parse_or(&var, "LOGIN_SESSION_TTL_SECONDS", 600)?;
        let session_sweep = parse_or(&var, "LOGIN_SESSION_SWEEP_SECONDS", 60)?;
        if session_ttl == 0 || session_sweep == 0 {
            bail!("LOGIN_SESSION_TTL_SECONDS and LOGIN_SESSION_SWEEP_SECONDS must be positive");
        }
        if session_ttl > MAX_SESSION_TTL_SECONDS {
            bail!(
                "LOGIN_SESSION_TTL_SECONDS must not exceed {}",
                MAX_SESSION_TTL_SECONDS
            );
        }

        Ok(Config {
            bind_address,
            issuer,
            audiences,
            token_expiry,
            validation_skew,
            cookie_name,
            cookie_secure,
            signing,
            providers,
            role_assignments: var("ROLE_ASSIGNMENTS"),
            session_ttl: Duration::from_secs(session_ttl),
            session_sweep_interval: Duration::from_secs(session_sweep),
            id_token_leeway: parse_or(&var, "ID_TOKEN_LEEWAY_SECONDS", 60)?,
        })
    }
}

fn signing_config(var: &impl Fn(&str) -> Option<String>) -> Result<SigningConfig> {
    let algorithm: SigningAlgorithm = parse_or(var, "SIGNING_ALGORITHM", SigningAlgorithm::RS256)?;
    let key_id = var("SIGNING_KEY_ID");

    match var("SIGNING_BACKEND").as_deref().unwrap_or("local") {
        "local" => {
            let source = if algorithm.is_symmetric() {
                let secret = var("SIGNING_SECRET")
                    .with_context(|| format!("SIGNING_SECRET required for {}", algorithm))?;
                LocalKeySource::Inline(KeyMaterial::secret(secret.into_bytes()))
            } else if let Some(path) = var("SIGNING_KEY_PATH") {
                LocalKeySource::File(PathBuf::from(path))
            } else if let Some(pem) = lookup_raw_pem(var) {
                LocalKeySource::Inline(KeyMaterial::pem(pem))
            } else {
                bail!("SIGNING_KEY_PATH or SIGNING_KEY_PEM required for {}", algorithm);
            };
            Ok(SigningConfig::Local {
                algorithm,
                key_id,
                source,
            })
        }
        "remote" => {
            if algorithm.is_symmetric() {
                bail!("remote signing does not support {}", algorithm);
            }
            let key = RemoteKeyRef::new(
                var("REMOTE_SIGNER_URL").context("REMOTE_SIGNER_URL required")?,
                var("REMOTE_SIGNER_KEY_NAME").context("REMOTE_SIGNER_KEY_NAME required")?,
                var("REMOTE_SIGNER_KEY_VERSION"),
            );
            let mut signer = RemoteSignerConfig::new(key, algorithm);
            signer.key_id = key_id;
            signer.retry = RetryPolicy {
                max_retries: parse_or(var, "REMOTE_SIGNER_MAX_RETRIES", signer.retry.max_retries)?,
                base_delay: Duration::from_millis(parse_or(
                    var,
                    "REMOTE_SIGNER_BASE_DELAY_MS",
                    signer.retry.base_delay.as_millis() as u64,
                )?),
                ..signer.retry
            };
            signer.breaker = CircuitBreakerConfig {
                failure_threshold: parse_or(
                    var,
                    "REMOTE_SIGNER_FAILURE_THRESHOLD",
                    signer.breaker.failure_threshold,
                )?,
                open_timeout: Duration::from_secs(parse_or(
                    var,
                    "REMOTE_SIGNER_OPEN_TIMEOUT_SECONDS",
                    signer.breaker.open_timeout.as_secs(),
                )?),
            };
            let access_token = var("REMOTE_SIGNER_ACCESS_TOKEN")
                .context("REMOTE_SIGNER_ACCESS_TOKEN required")?;
            Ok(SigningConfig::Remote {
                signer,
                access_token,
            })
        }
        other => bail!("SIGNING_BACKEND must be local or remote, got {:?}", other),
    }
}

// PEM bodies are multi-line; `\n` escapes are accepted for single-line env files.
fn lookup_raw_pem(var: &impl Fn(&str) -> Option<String>) -> Option<String> {
    var("SIGNING_KEY_PEM").map(|pem| pem.replace("\\n", "\n"))
}

fn provider_config(
    var: &impl Fn(&str) -> Option<String>,
    kind: ProviderKind,
    tenant: &str,
    http_timeout: Duration,
) -> Result<Option<ProviderConfig>> {
    let prefix = kind.as_str().to_uppercase();
    let key = |suffix: &str| format!("{}_{}", prefix, suffix);

    let Some(client_id) = var(&key("CLIENT_ID")) else {
        return Ok(None);
    };
    let client_secret = var(&key("CLIENT_SECRET"))
        .with_context(|| format!("{} required when {} is set", key("CLIENT_SECRET"), key("CLIENT_ID")))?;
    let redirect_uri = var(&key("REDIRECT_URI"))
        .with_context(|| format!("{} required when {} is set", key("REDIRECT_URI"), key("CLIENT_ID")))?;

    let discovery = match var(&key("DISCOVERY_URL")) {
        Some(url) => DiscoverySource::WellKnown(url),
        None => kind.default_discovery(tenant),
    };
    let scopes = var(&key("SCOPES"))
        .map(|v| split_list(&v.replace(',', " "), ' '))
        .unwrap_or_default();

    let config = ProviderConfig::new(kind, client_id, client_secret, redirect_uri)
        .with_scopes(scopes)
        .with_discovery(discovery)
        .with_http_timeout(http_timeout);
    config
        .validate()
        .with_context(|| format!("invalid {} provider configuration", kind))?;
    Ok(Some(config))
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", key, e)),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(value: &str, separator: char) -> Vec<String> {
    value
        .split(separator)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}
