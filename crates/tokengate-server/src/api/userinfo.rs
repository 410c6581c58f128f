use axum::response::Json;
use tokengate_tokens::ClaimSet;

use crate::extractors::AuthenticatedUser;

/// GET /userinfo
pub async fn userinfo(user: AuthenticatedUser) -> Json<ClaimSet> {
    Json(user.claims)
}
