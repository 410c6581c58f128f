#![allow(dead_code)]

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tokengate_federation::*;
use tokengate_signing::{Jwk, JwkSet, LocalSigningBackend, SigningAlgorithm, SigningBackend};
use tokengate_tokens::{current_timestamp, TokenService};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PROVIDER_KEY_PEM: &str =
    include_str!("../../../tokengate-signing/tests/fixtures/rsa_private_pkcs1.pem");
pub const OTHER_KEY_PEM: &str =
    include_str!("../../../tokengate-signing/tests/fixtures/rsa_other_private.pem");
pub const EC_KEY_PEM: &str =
    include_str!("../../../tokengate-signing/tests/fixtures/ec_p256_private.pem");

pub const CLIENT_ID: &str = "client-123";
pub const REDIRECT_URI: &str = "https://gate.example.com/callback";
pub const AUDIENCE: &str = "api.example.com";
pub const ISSUER: &str = "https://gate.example.com";

/// Public JWK of a PEM key, as a provider would publish it.
pub async fn provider_jwk(algorithm: SigningAlgorithm, pem: &str, kid: &str) -> Jwk {
    LocalSigningBackend::from_pem(algorithm, Some(kid.to_string()), pem)
        .unwrap()
        .public_key_jwk()
        .await
        .unwrap()
        .unwrap()
}

/// RS256 ID token signed with `pem`.
pub fn sign_id_token(pem: &str, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

pub fn id_claims(issuer: &str, sub: &str, nonce: &str) -> Value {
    let now = current_timestamp();
    json!({
        "iss": issuer,
        "sub": sub,
        "aud": CLIENT_ID,
        "exp": now + 300,
        "iat": now,
        "nonce": nonce,
        "email": "ada@example.com",
        "name": "Ada Lovelace",
    })
}

/// Provider advertising discovery, token, userinfo and JWKS endpoints.
pub async fn mount_discovery(server: &MockServer) {
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": base,
            "authorization_endpoint": format!("{}/authorize", base),
            "token_endpoint": format!("{}/token", base),
            "userinfo_endpoint": format!("{}/userinfo", base),
            "jwks_uri": format!("{}/jwks", base),
            "id_token_signing_alg_values_supported": ["RS256"],
        })))
        .mount(server)
        .await;
}

pub async fn mount_jwks(server: &MockServer, keys: Vec<Jwk>, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(JwkSet::new(keys)))
        .expect(expected_calls)
        .mount(server)
        .await;
}

pub async fn mount_userinfo(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub fn google_config(server: &MockServer) -> ProviderConfig {
    ProviderConfig::new(ProviderKind::Google, CLIENT_ID, "google-secret", REDIRECT_URI).with_discovery(
        DiscoverySource::WellKnown(format!("{}/.well-known/openid-configuration", server.uri())),
    )
}

/// GitHub-style provider: static endpoints, no ID tokens.
pub fn github_config(server: &MockServer) -> ProviderConfig {
    let base = server.uri();
    ProviderConfig::new(ProviderKind::Github, CLIENT_ID, "github-secret", REDIRECT_URI)
        .with_discovery(DiscoverySource::Static(ProviderMetadata {
            authorization_endpoint: Some(format!("{}/login/oauth/authorize", base)),
            token_endpoint: Some(format!("{}/login/oauth/access_token", base)),
            userinfo_endpoint: Some(format!("{}/user", base)),
            ..Default::default()
        }))
}

pub fn token_service() -> Arc<TokenService> {
    let backend = LocalSigningBackend::from_secret(
        SigningAlgorithm::HS256,
        None,
        b"an-hmac-secret-that-is-long-enough!!".to_vec(),
    )
    .unwrap();
    Arc::new(TokenService::new(Arc::new(backend), ISSUER, 3600))
}

pub fn orchestrator(clients: Vec<OidcClient>, roles: InMemoryRoleDirectory) -> AuthFlowOrchestrator {
    AuthFlowOrchestrator::new(
        clients.into_iter().map(Arc::new).collect(),
        Arc::new(InMemorySessionStore::new()),
        token_service(),
        Arc::new(roles),
        OrchestratorConfig {
            audiences: vec![AUDIENCE.to_string()],
            ..Default::default()
        },
    )
}

/// Query parameter `name` of an absolute URL.
pub fn query_value(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
