//! Browser login flow: `/login` -> provider -> `/callback` -> service token.

use crate::client::{AuthorizationRequest, OidcClient, Prompt};
use crate::errors::*;
use crate::hash_for_log;
use crate::identity::map_identity;
use crate::oidc::pkce::build_pkce_pair;
use crate::provider::ProviderKind;
use crate::roles::RoleDirectory;
use crate::session::{PendingAuthSession, PendingSessionStore, DEFAULT_SESSION_TTL};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokengate_tokens::{Identity, TokenService};

/// Provider errors that mean "show the login page", as opposed to a denial.
const INTERACTION_ERRORS: &[&str] = &[
    "login_required",
    "interaction_required",
    "consent_required",
    "account_selection_required",
];

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Audiences a login may request.
    pub audiences: Vec<String>,
    pub session_ttl: Duration,
    /// Clock tolerance for upstream ID tokens, in seconds.
    pub id_token_leeway: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            audiences: Vec::new(),
            session_ttl: DEFAULT_SESSION_TTL,
            id_token_leeway: 60,
        }
    }
}

/// Where to send the browser, and the state that will come back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    pub url: String,
    pub state: String,
}

/// A freshly minted service token.
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub token: String,
    pub expires_in: u64,
    pub audience: String,
    pub identity: Identity,
}

pub struct AuthFlowOrchestrator {
    providers: HashMap<ProviderKind, Arc<OidcClient>>,
    sessions: Arc<dyn PendingSessionStore>,
    tokens: Arc<TokenService>,
    roles: Arc<dyn RoleDirectory>,
    config: OrchestratorConfig,
}

impl AuthFlowOrchestrator {
    pub fn new(
        providers: Vec<Arc<OidcClient>>,
        sessions: Arc<dyn PendingSessionStore>,
        tokens: Arc<TokenService>,
        roles: Arc<dyn RoleDirectory>,
        config: OrchestratorConfig,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|client| (client.kind(), client))
            .collect();
        Self {
            providers,
            sessions,
            tokens,
            roles,
            config,
        }
    }

    pub fn provider(&self, kind: ProviderKind) -> Result<&Arc<OidcClient>> {
        self.providers
            .get(&kind)
            .ok_or_else(|| FederationError::ProviderNotConfigured(kind.to_string()))
    }

    pub fn configured_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.providers.contains_key(kind))
            .collect()
    }

    pub fn audiences(&self) -> &[String] {
        &self.config.audiences
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    pub fn sessions(&self) -> &Arc<dyn PendingSessionStore> {
        &self.sessions
    }

    /// Start a login: store a pending session and build the provider URL.
    pub async fn initiate_login(
        &self,
        provider: ProviderKind,
        audience: &str,
        prompt: Option<Prompt>,
    ) -> Result<LoginRedirect> {
        if !self.config.audiences.iter().any(|a| a == audience) {
            return Err(FederationError::AudienceNotAllowed(audience.to_string()));
        }
        let client = self.provider(provider)?;

        let pkce = build_pkce_pair();
        let authorization = client
            .build_authorization_url(AuthorizationRequest {
                state: None,
                nonce: None,
                prompt,
                pkce: Some(&pkce),
            })
            .await?;

        self.sessions
            .put(PendingAuthSession::new(
                authorization.state.clone(),
                authorization.nonce,
                provider,
                audience.to_string(),
                pkce.verifier,
                self.config.session_ttl,
            ))
            .await?;

        tracing::info!(
            provider = %provider,
            audience,
            prompt = prompt.map(|p| p.as_str()),
            state_hash = %hash_for_log(&authorization.state),
            "Login initiated"
        );

        Ok(LoginRedirect {
            url: authorization.url,
            state: authorization.state,
        })
    }

    /// Finish a login. The pending session is consumed before any network
    /// call, so a replayed state fails even if this attempt fails later.
    pub async fn handle_callback(&self, code: &str, state: &str) -> Result<MintedToken> {
        let session = self.sessions.take(state).await.map_err(|e| {
            tracing::warn!(
                state_hash = %hash_for_log(state),
                error = %e,
                "Callback with unusable state"
            );
            e
        })?;
        let client = self.provider(session.provider)?;

        let tokens = client
            .exchange_code(code, Some(&session.pkce_verifier))
            .await?;

        let metadata = client.discover().await?;
        let id_claims = match (&tokens.id_token, metadata.jwks_uri.is_some()) {
            (Some(id_token), true) => Some(
                client
                    .verify_id_token(id_token, &session.nonce, self.config.id_token_leeway)
                    .await?,
            ),
            (None, true) => return Err(FederationError::MissingIdToken),
            (_, false) => None,
        };

        let userinfo = client.fetch_userinfo(&tokens.access_token).await?;
        let mut identity = map_identity(session.provider, &userinfo)?;

        if let Some(claims) = &id_claims {
            let expected = Identity::federated(session.provider.as_str(), &claims.sub);
            if expected.id() != identity.id() {
                tracing::warn!(
                    provider = %session.provider,
                    "ID token subject does not match userinfo"
                );
                return Err(FederationError::SubjectMismatch);
            }
            if identity.email().is_none() {
                identity = identity.with_email(claims.email.clone());
            }
            if identity.name().is_none() {
                identity = identity.with_name(claims.name.clone());
            }
        }

        let assignment = self.roles.lookup(&identity).await?;
        let identity = identity
            .with_roles(assignment.roles)
            .with_affiliations(assignment.affiliations);

        let expires_in = self.tokens.default_expires_in();
        let token = self
            .tokens
            .mint(&identity, &session.audience, Some(expires_in), None)
            .await?;

        tracing::info!(
            provider = %session.provider,
            sub = %identity.id(),
            audience = %session.audience,
            "Login completed"
        );

        Ok(MintedToken {
            token,
            expires_in,
            audience: session.audience,
            identity,
        })
    }

    /// Handle `error=...` on the callback. The pending session, if any, is
    /// consumed. Returns the error to report.
    pub async fn handle_provider_error(
        &self,
        state: Option<&str>,
        error: &str,
        description: Option<&str>,
    ) -> FederationError {
        if let Some(state) = state {
            if let Err(e) = self.sessions.take(state).await {
                tracing::debug!(
                    state_hash = %hash_for_log(state),
                    error = %e,
                    "No pending session for provider error"
                );
            }
        }

        tracing::info!(error, description, "Provider returned an error");

        if INTERACTION_ERRORS.contains(&error) {
            FederationError::LoginRequired(error.to_string())
        } else {
            FederationError::ProviderDenied {
                error: error.to_string(),
                description: description.map(str::to_string),
            }
        }
    }

    /// Restart the login without user interaction, keeping the audience of
    /// `current_token`. The provider is taken from the token subject unless
    /// overridden. The token is only decoded, not validated: it may have expired.
    pub async fn initiate_silent_refresh(
        &self,
        current_token: &str,
        provider_override: Option<ProviderKind>,
    ) -> Result<LoginRedirect> {
        let claims = TokenService::peek_claims(current_token)?;
        let provider = match provider_override {
            Some(provider) => provider,
            None => claims
                .provider()
                .ok_or_else(|| FederationError::UnknownProvider(claims.sub.clone()))?
                .parse()?,
        };

        self.initiate_login(provider, &claims.aud, Some(Prompt::None))
            .await
    }
}
