use anyhow::{Context, Result};
use std::sync::Arc;
use tokengate_federation::{
    AuthFlowOrchestrator, InMemoryRoleDirectory, InMemorySessionStore, OidcClient,
    OrchestratorConfig, PendingSessionStore,
};
use tokengate_signing::{
    LocalSigningBackend, RemoteSigningBackend, SigningBackend, StaticCredential,
};
use tokengate_tokens::TokenService;

use crate::config::{Config, LocalKeySource, SigningConfig};

/// Application state shared across all handlers
pub struct AppState {
    pub config: Config,
    pub tokens: Arc<TokenService>,
    pub flow: Arc<AuthFlowOrchestrator>,
    pub sessions: Arc<dyn PendingSessionStore>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let backend = build_signing_backend(&config.signing).await?;
        Self::with_backend(config, backend)
    }

    /// Wire services around an already constructed signing backend.
    pub fn with_backend(config: Config, backend: Arc<dyn SigningBackend>) -> Result<Self> {
        let tokens = Arc::new(TokenService::new(
            backend,
            config.issuer.clone(),
            config.token_expiry,
        ));

        let clients = config
            .providers
            .iter()
            .cloned()
            .map(|provider| OidcClient::new(provider).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()
            .context("failed to build provider clients")?;
        if clients.is_empty() {
            tracing::warn!("No identity providers configured; /login will reject every provider");
        }

        let roles = match &config.role_assignments {
            Some(entries) => InMemoryRoleDirectory::parse(entries).context("invalid ROLE_ASSIGNMENTS")?,
            None => InMemoryRoleDirectory::new(),
        };
        tracing::info!(assignments = roles.len(), "Loaded role directory");

        let sessions: Arc<dyn PendingSessionStore> = Arc::new(InMemorySessionStore::new());
        let flow = Arc::new(AuthFlowOrchestrator::new(
            clients,
            sessions.clone(),
            tokens.clone(),
            Arc::new(roles),
            OrchestratorConfig {
                audiences: config.audiences.clone(),
                session_ttl: config.session_ttl,
                id_token_leeway: config.id_token_leeway,
            },
        ));

        Ok(AppState {
            config,
            tokens,
            flow,
            sessions,
        })
    }

    pub fn backend(&self) -> &Arc<dyn SigningBackend> {
        self.tokens.backend()
    }
}

async fn build_signing_backend(signing: &SigningConfig) -> Result<Arc<dyn SigningBackend>> {
    match signing {
        SigningConfig::Local {
            algorithm,
            key_id,
            source,
        } => {
            let backend = match source {
                LocalKeySource::File(path) => {
                    LocalSigningBackend::from_pem_file(*algorithm, key_id.clone(), path)
                }
                LocalKeySource::Inline(material) => {
                    LocalSigningBackend::new(*algorithm, key_id.clone(), material.clone())
                }
            }
            .context("failed to load local signing key")?;
            Ok(Arc::new(backend))
        }
        SigningConfig::Remote {
            signer,
            access_token,
        } => {
            let backend = RemoteSigningBackend::new(
                signer.clone(),
                Arc::new(StaticCredential::new(access_token.clone())),
            )
            .context("failed to configure remote signer")?;

            // A key that cannot serve the configured algorithm is fatal; an
            // unreachable vault is not, the breaker handles it at request time.
            match backend.public_key_jwk().await {
                Ok(_) => tracing::info!(key = %signer.key.describe(), "Remote signing key verified"),
                Err(e) if e.is_configuration() => {
                    return Err(anyhow::Error::new(e).context("remote signing key mismatch"))
                }
                Err(e) => tracing::warn!(
                    key = %signer.key.describe(),
                    error = %e,
                    "Remote signer unreachable at startup"
                ),
            }
            Ok(Arc::new(backend))
        }
    }
}
