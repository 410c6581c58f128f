mod common;

use common::*;
use serde_json::json;
use tokengate_federation::*;
use tokengate_signing::SigningAlgorithm;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_github_token(server: &MockServer, verifier_check: bool) {
    let mut mock = Mock::given(method("POST")).and(path("/login/oauth/access_token"));
    if verifier_check {
        mock = mock.and(body_string_contains("code_verifier="));
    }
    mock.respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "access_token": "gh-token",
        "token_type": "bearer",
        "scope": "read:user,user:email",
    })))
    .mount(server)
    .await;
}

#[tokio::test]
async fn test_github_login_end_to_end() {
    let server = MockServer::start().await;
    mount_github_token(&server, true).await;
    mount_userinfo(
        &server,
        "/user",
        json!({ "id": 42, "login": "ada", "email": "ada@example.com", "name": "Ada" }),
    )
    .await;

    let roles = InMemoryRoleDirectory::parse("github:42=admin|dev@acme").unwrap();
    let flow = orchestrator(vec![OidcClient::new(github_config(&server)).unwrap()], roles);

    let redirect = flow
        .initiate_login(ProviderKind::Github, AUDIENCE, None)
        .await
        .unwrap();
    assert_eq!(query_value(&redirect.url, "state"), Some(redirect.state.clone()));
    assert!(query_value(&redirect.url, "code_challenge").is_some());
    assert_eq!(flow.sessions().len().await, 1);

    let minted = flow.handle_callback("code-1", &redirect.state).await.unwrap();
    assert_eq!(minted.audience, AUDIENCE);
    assert_eq!(minted.expires_in, 3600);
    assert_eq!(minted.identity.id(), "github:42");
    assert_eq!(flow.sessions().len().await, 0);

    let claims = flow
        .tokens()
        .validate(&minted.token, AUDIENCE, 0)
        .await
        .unwrap();
    assert_eq!(claims.sub, "github:42");
    assert_eq!(claims.iss, ISSUER);
    assert_eq!(claims.email.as_deref(), Some("ada@example.com"));
    assert_eq!(claims.roles(), ["admin".to_string(), "dev".to_string()]);
    assert_eq!(claims.affiliations(), ["acme".to_string()]);
}

#[tokio::test]
async fn test_state_is_consumed_once() {
    let server = MockServer::start().await;
    mount_github_token(&server, false).await;
    mount_userinfo(&server, "/user", json!({ "id": 42, "login": "ada" })).await;

    let flow = orchestrator(
        vec![OidcClient::new(github_config(&server)).unwrap()],
        InMemoryRoleDirectory::new(),
    );
    let redirect = flow
        .initiate_login(ProviderKind::Github, AUDIENCE, None)
        .await
        .unwrap();

    flow.handle_callback("code-1", &redirect.state).await.unwrap();
    let replay = flow.handle_callback("code-1", &redirect.state).await.unwrap_err();
    assert!(matches!(
        replay,
        FederationError::Session(SessionError::UnknownState)
    ));
}

#[tokio::test]
async fn test_unknown_state_rejected_without_provider_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let flow = orchestrator(
        vec![OidcClient::new(github_config(&server)).unwrap()],
        InMemoryRoleDirectory::new(),
    );
    let err = flow.handle_callback("code", "forged").await.unwrap_err();
    assert!(err.is_authentication());
}

#[tokio::test]
async fn test_failed_exchange_still_consumes_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "bad_verification_code" })))
        .mount(&server)
        .await;

    let flow = orchestrator(
        vec![OidcClient::new(github_config(&server)).unwrap()],
        InMemoryRoleDirectory::new(),
    );
    let redirect = flow
        .initiate_login(ProviderKind::Github, AUDIENCE, None)
        .await
        .unwrap();

    let err = flow.handle_callback("bad", &redirect.state).await.unwrap_err();
    assert!(matches!(err, FederationError::CodeRejected(_)));
    assert_eq!(flow.sessions().len().await, 0);
}

#[tokio::test]
async fn test_disallowed_audience() {
    let server = MockServer::start().await;
    let flow = orchestrator(
        vec![OidcClient::new(github_config(&server)).unwrap()],
        InMemoryRoleDirectory::new(),
    );

    let err = flow
        .initiate_login(ProviderKind::Github, "evil.example.com", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::AudienceNotAllowed(_)));
    assert!(err.is_bad_request());
    assert_eq!(flow.sessions().len().await, 0);
}

#[tokio::test]
async fn test_unconfigured_provider() {
    let server = MockServer::start().await;
    let flow = orchestrator(
        vec![OidcClient::new(github_config(&server)).unwrap()],
        InMemoryRoleDirectory::new(),
    );

    let err = flow
        .initiate_login(ProviderKind::Microsoft, AUDIENCE, None)
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::ProviderNotConfigured(_)));
    assert_eq!(flow.configured_providers(), vec![ProviderKind::Github]);
}

async fn google_flow(server: &MockServer) -> AuthFlowOrchestrator {
    mount_discovery(server).await;
    let jwk = provider_jwk(SigningAlgorithm::RS256, PROVIDER_KEY_PEM, "g-1").await;
    mount_jwks(server, vec![jwk], 1).await;
    orchestrator(
        vec![OidcClient::new(google_config(server)).unwrap()],
        InMemoryRoleDirectory::new(),
    )
}

async fn mount_google_token(server: &MockServer, id_token: Option<String>) {
    let mut body = json!({ "access_token": "google-token", "token_type": "Bearer", "expires_in": 3599 });
    if let Some(id_token) = id_token {
        body["id_token"] = json!(id_token);
    }
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Nonce that the provider would echo back, read from the login redirect.
fn nonce_of(redirect: &LoginRedirect) -> String {
    query_value(&redirect.url, "nonce").unwrap()
}

#[tokio::test]
async fn test_google_login_verifies_id_token() {
    let server = MockServer::start().await;
    let flow = google_flow(&server).await;
    mount_userinfo(&server, "/userinfo", json!({ "sub": "g-7", "name": "Grace" })).await;

    let redirect = flow
        .initiate_login(ProviderKind::Google, AUDIENCE, Some(Prompt::SelectAccount))
        .await
        .unwrap();
    assert_eq!(query_value(&redirect.url, "prompt").as_deref(), Some("select_account"));

    let id_token = sign_id_token(
        PROVIDER_KEY_PEM,
        "g-1",
        &id_claims(&server.uri(), "g-7", &nonce_of(&redirect)),
    );
    mount_google_token(&server, Some(id_token)).await;

    let minted = flow.handle_callback("code", &redirect.state).await.unwrap();
    assert_eq!(minted.identity.id(), "google:g-7");
    assert_eq!(minted.identity.name(), Some("Grace"));
    // Email only present in the ID token
    assert_eq!(minted.identity.email(), Some("ada@example.com"));
}

#[tokio::test]
async fn test_google_nonce_mismatch() {
    let server = MockServer::start().await;
    let flow = google_flow(&server).await;
    mount_userinfo(&server, "/userinfo", json!({ "sub": "g-7" })).await;

    let redirect = flow
        .initiate_login(ProviderKind::Google, AUDIENCE, None)
        .await
        .unwrap();
    let id_token = sign_id_token(
        PROVIDER_KEY_PEM,
        "g-1",
        &id_claims(&server.uri(), "g-7", "replayed-nonce"),
    );
    mount_google_token(&server, Some(id_token)).await;

    let err = flow.handle_callback("code", &redirect.state).await.unwrap_err();
    assert!(matches!(err, FederationError::NonceMismatch));
}

#[tokio::test]
async fn test_google_subject_mismatch() {
    let server = MockServer::start().await;
    let flow = google_flow(&server).await;
    mount_userinfo(&server, "/userinfo", json!({ "sub": "someone-else" })).await;

    let redirect = flow
        .initiate_login(ProviderKind::Google, AUDIENCE, None)
        .await
        .unwrap();
    let id_token = sign_id_token(
        PROVIDER_KEY_PEM,
        "g-1",
        &id_claims(&server.uri(), "g-7", &nonce_of(&redirect)),
    );
    mount_google_token(&server, Some(id_token)).await;

    let err = flow.handle_callback("code", &redirect.state).await.unwrap_err();
    assert!(matches!(err, FederationError::SubjectMismatch));
}

#[tokio::test]
async fn test_oidc_provider_must_return_id_token() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_google_token(&server, None).await;
    let flow = orchestrator(
        vec![OidcClient::new(google_config(&server)).unwrap()],
        InMemoryRoleDirectory::new(),
    );

    let redirect = flow
        .initiate_login(ProviderKind::Google, AUDIENCE, None)
        .await
        .unwrap();
    let err = flow.handle_callback("code", &redirect.state).await.unwrap_err();
    assert!(matches!(err, FederationError::MissingIdToken));
}

#[tokio::test]
async fn test_provider_error_login_required() {
    let server = MockServer::start().await;
    let flow = orchestrator(
        vec![OidcClient::new(github_config(&server)).unwrap()],
        InMemoryRoleDirectory::new(),
    );
    let redirect = flow
        .initiate_login(ProviderKind::Github, AUDIENCE, Some(Prompt::None))
        .await
        .unwrap();

    let err = flow
        .handle_provider_error(Some(&redirect.state), "login_required", None)
        .await;
    assert!(err.is_login_required());
    assert_eq!(flow.sessions().len().await, 0);

    let err = flow
        .handle_provider_error(None, "access_denied", Some("user cancelled"))
        .await;
    assert!(matches!(
        err,
        FederationError::ProviderDenied { ref error, .. } if error == "access_denied"
    ));
}

#[tokio::test]
async fn test_silent_refresh_uses_prompt_none() {
    let server = MockServer::start().await;
    mount_github_token(&server, false).await;
    mount_userinfo(&server, "/user", json!({ "id": 42, "login": "ada" })).await;
    let flow = orchestrator(
        vec![OidcClient::new(github_config(&server)).unwrap()],
        InMemoryRoleDirectory::new(),
    );

    let first = flow
        .initiate_login(ProviderKind::Github, AUDIENCE, None)
        .await
        .unwrap();
    let minted = flow.handle_callback("code", &first.state).await.unwrap();

    let refresh = flow
        .initiate_silent_refresh(&minted.token, None)
        .await
        .unwrap();
    assert_eq!(query_value(&refresh.url, "prompt").as_deref(), Some("none"));
    assert_ne!(refresh.state, first.state);
    assert_eq!(flow.sessions().len().await, 1);

    let again = flow.handle_callback("code", &refresh.state).await.unwrap();
    assert_eq!(again.audience, AUDIENCE);
    assert_eq!(again.identity.id(), "github:42");
}

#[tokio::test]
async fn test_silent_refresh_rejects_garbage() {
    let server = MockServer::start().await;
    let flow = orchestrator(
        vec![OidcClient::new(github_config(&server)).unwrap()],
        InMemoryRoleDirectory::new(),
    );

    let err = flow
        .initiate_silent_refresh("not-a-token", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::Token(_)));
}
