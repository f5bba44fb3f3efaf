use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use avalab_db::{AvatarStore, Database};
use avalab_gateway::Dispatcher;
use avalab_gateway::auth::issue_token;
use avalab_gateway::connection::SessionContext;
use avalab_types::api::{
    DeleteAccountRequest, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
};
use avalab_types::models::ProfileRef;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: Arc<str>,
    pub avatars: AvatarStore,
}

impl AppStateInner {
    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            db: self.db.clone(),
            dispatcher: self.dispatcher.clone(),
            jwt_secret: self.jwt_secret.clone(),
        }
    }
}

/// Run a database call on the blocking pool.
pub async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> avalab_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(ApiError::internal)
}

fn verify_password(password: &str, hash: &str) -> Result<(), ApiError> {
    let parsed = PasswordHash::new(hash).map_err(ApiError::internal)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| ApiError::Unauthorized)
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::bad_request("username must be 3-32 characters"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::bad_request("password must be at least 8 characters"));
    }

    // Hash password with Argon2id
    let password_hash = hash_password(&req.password)?;

    let st = state.clone();
    let profile = blocking(move || {
        st.db
            .create_profile(&req.username, &password_hash, req.app_id.as_deref())
    })
    .await?;

    let token = issue_token(&state.jwt_secret, profile.internal_id).map_err(ApiError::internal)?;
    info!("Registered '{}' as '{}'", profile.username, profile.app_id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: profile.internal_id,
            app_id: profile.app_id,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let st = state.clone();
    let username = req.username.clone();
    let (user_id, hash) = blocking(move || st.db.credentials(&username))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    verify_password(&req.password, &hash)?;

    let st = state.clone();
    let profile = blocking(move || st.db.profile(user_id)).await?;
    let token = issue_token(&state.jwt_secret, user_id).map_err(ApiError::internal)?;

    Ok(Json(LoginResponse {
        user_id,
        app_id: profile.app_id,
        token,
    }))
}

/// Delete the caller's account after re-checking the password.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Json(req): Json<DeleteAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = me.internal_id;
    let st = state.clone();
    let hash = blocking(move || st.db.password_hash(id)).await?;
    verify_password(&req.password, &hash)?;

    let st = state.clone();
    let deleted = blocking(move || st.db.delete_profile(id, &st.avatars)).await?;
    state.dispatcher.disconnect(&deleted.app_id).await;
    for chat_id in deleted.deleted_chats {
        state.dispatcher.close_chat(chat_id).await;
    }

    Ok(StatusCode::NO_CONTENT)
}
