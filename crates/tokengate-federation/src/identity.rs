//! Per-provider mapping of userinfo documents onto [`Identity`].

use crate::errors::*;
use crate::provider::ProviderKind;
use serde_json::Value;
use tokengate_tokens::Identity;

/// The provider's stable user id from a userinfo document.
///
/// GitHub returns a numeric `id`; OIDC providers return `sub`. Microsoft
/// falls back to `oid`.
pub fn provider_user_id(kind: ProviderKind, userinfo: &Value) -> Option<String> {
    let candidates: &[&str] = match kind {
        ProviderKind::Github => &["id", "sub"],
        ProviderKind::Google => &["sub", "id"],
        ProviderKind::Microsoft => &["sub", "oid"],
    };
    candidates
        .iter()
        .find_map(|field| string_or_number(&userinfo[*field]))
}

/// Build an [`Identity`] without roles; those come from the role directory.
pub fn map_identity(kind: ProviderKind, userinfo: &Value) -> Result<Identity> {
    let user_id = provider_user_id(kind, userinfo)
        .ok_or_else(|| FederationError::InvalidUserinfo("missing user id".to_string()))?;

    let email = match kind {
        ProviderKind::Microsoft => first_str(userinfo, &["email", "preferred_username", "upn"])
            .filter(|v| v.contains('@')),
        _ => first_str(userinfo, &["email"]),
    };
    let name = match kind {
        ProviderKind::Github => first_str(userinfo, &["name", "login"]),
        _ => first_str(userinfo, &["name", "given_name"]),
    };

    Ok(Identity::federated(kind.as_str(), &user_id)
        .with_email(email)
        .with_name(name))
}

fn first_str(value: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .find_map(|field| value[*field].as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_or_number(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
