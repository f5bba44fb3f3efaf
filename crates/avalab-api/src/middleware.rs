use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use tracing::warn;

use avalab_gateway::AuthError;
use avalab_gateway::auth::resolve_identity;

use crate::auth::AppState;
use crate::error::ApiError;

/// Resolve the bearer token to the caller's current profile and attach it as
/// a `ProfileRef` extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or(ApiError::Unauthorized)?
        .token()
        .to_string();

    let st = state.clone();
    let profile = tokio::task::spawn_blocking(move || {
        resolve_identity(&st.db, &st.jwt_secret, &token)
    })
    .await?
    .map_err(|e| match e {
        AuthError::Storage(e) => ApiError::Db(e),
        other => {
            warn!("Rejected bearer token: {}", other);
            ApiError::Unauthorized
        }
    })?;

    req.extensions_mut().insert(profile);
    Ok(next.run(req).await)
}
