//! OpenID Connect building blocks: discovery, JWKS, PKCE and ID token checks.

pub mod discovery;
pub mod jwks;
pub mod pkce;
pub mod types;
pub mod validation;
