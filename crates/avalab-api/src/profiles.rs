use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;

use avalab_types::api::{LinkRequest, ProfilePatch, RenameRequest};
use avalab_types::models::ProfileRef;

use crate::auth::{AppState, blocking};
use crate::error::ApiError;

/// 5 MB upload limit for avatars, enforced as the route's body limit
pub const MAX_AVATAR_SIZE: usize = 5 * 1024 * 1024;

pub async fn get_me(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = blocking(move || state.db.profile(me.internal_id)).await?;
    Ok(Json(profile))
}

#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    pub do_search: Option<bool>,
}

/// GET /profiles?do_search=true: the people directory, optionally only
/// those open to team offers.
pub async fn list_profiles(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let profiles = blocking(move || state.db.list_profiles(query.do_search)).await?;
    Ok(Json(profiles))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = blocking(move || state.db.resolve_profile(&app_id)).await?;
    Ok(Json(profile))
}

pub async fn patch_me(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Json(patch): Json<ProfilePatch>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = blocking(move || state.db.update_profile(me.internal_id, &patch)).await?;
    Ok(Json(profile))
}

/// PUT /profiles/me/app_id: change the caller's public id everywhere.
pub async fn rename_me(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Json(req): Json<RenameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let st = state.clone();
    let renamed = blocking(move || {
        st.db
            .rename_profile(me.internal_id, &req.app_id, &st.avatars)
    })
    .await?;

    if renamed.old_app_id != renamed.profile.app_id {
        let sessions = state
            .dispatcher
            .rename_member(&renamed.old_app_id, &renamed.profile.app_id)
            .await;
        info!(
            "'{}' is now '{}' ({} live sessions)",
            renamed.old_app_id, renamed.profile.app_id, sessions
        );
    }

    Ok(Json(renamed.profile))
}

pub async fn add_link(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Json(req): Json<LinkRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = blocking(move || state.db.add_link(me.internal_id, &req.link)).await?;
    Ok(Json(profile))
}

pub async fn remove_link(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Json(req): Json<LinkRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = blocking(move || state.db.remove_link(me.internal_id, &req.link)).await?;
    Ok(Json(profile))
}

fn avatar_extension(headers: &HeaderMap) -> Option<&'static str> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    match content_type.split(';').next()?.trim() {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// PUT /profiles/me/avatar: raw image bytes, type taken from Content-Type.
pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::bad_request("avatar is empty"));
    }
    let ext = avatar_extension(&headers)
        .ok_or_else(|| ApiError::bad_request("avatar must be png, jpeg, gif or webp"))?;

    let st = state.clone();
    let profile =
        blocking(move || st.db.set_avatar(me.internal_id, ext, &bytes, &st.avatars)).await?;
    Ok(Json(profile))
}

pub async fn delete_avatar(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
) -> Result<impl IntoResponse, ApiError> {
    let st = state.clone();
    let profile = blocking(move || st.db.clear_avatar(me.internal_id, &st.avatars)).await?;
    Ok(Json(profile))
}
