//! OIDC federation for tokengate.
//!
//! [`OidcClient`] talks to one upstream provider. [`AuthFlowOrchestrator`]
//! drives the browser login: it stores a [`PendingAuthSession`] keyed by the
//! OAuth `state`, consumes it exactly once on callback, verifies what the
//! provider returns and mints a service token.

pub mod client;
pub mod errors;
pub mod identity;
pub mod oidc;
pub mod orchestrator;
pub mod provider;
pub mod roles;
pub mod session;

pub use client::{AuthorizationRequest, AuthorizationUrl, OidcClient, Prompt};
pub use errors::*;
pub use identity::{map_identity, provider_user_id};
pub use oidc::pkce::{build_pkce_pair, generate_nonce, generate_state, pkce_challenge, PkcePair};
pub use oidc::types::{IdTokenClaims, ProviderMetadata, TokenResponse};
pub use orchestrator::{AuthFlowOrchestrator, LoginRedirect, MintedToken, OrchestratorConfig};
pub use provider::{DiscoverySource, ProviderConfig, ProviderKind, DEFAULT_MICROSOFT_TENANT};
pub use roles::{InMemoryRoleDirectory, RoleAssignment, RoleDirectory};
pub use session::{
    spawn_session_sweeper, InMemorySessionStore, PendingAuthSession, PendingSessionStore,
};

/// Short SHA-256 prefix of a secret-bearing value, safe to log.
pub fn hash_for_log(value: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(&Sha256::digest(value.as_bytes())[..8])
}
