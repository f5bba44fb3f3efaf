use axum::{
    Extension, Json,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::StreamExt;
use serde::Deserialize;
use uuid::Uuid;

use avalab_gateway::connection::run_session;
use avalab_types::api::DirectChatRequest;
use avalab_types::models::ProfileRef;

use crate::auth::{AppState, blocking};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "first_page")]
    pub page: u32,
}

fn first_page() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn my_chats(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
) -> Result<impl IntoResponse, ApiError> {
    let chats = blocking(move || state.db.chats_of(&me.app_id)).await?;
    Ok(Json(chats))
}

pub async fn create_direct_chat(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Json(req): Json<DirectChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = blocking(move || state.db.create_direct_chat(&me.app_id, &req.with)).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

/// GET /chats/{chat_id}/messages?page=N, newest first, members only.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = blocking(move || {
        state.db.chat_for_member(chat_id, &me.app_id)?;
        state.db.page(chat_id, query.page)
    })
    .await?;
    Ok(Json(messages))
}

/// GET /chats/{chat_id}/ws?token=...: the token travels in the query since
/// browsers cannot set headers on a WebSocket handshake.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let ctx = state.session_context();
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        let _ = run_session(sink, stream, ctx, chat_id, query.token).await;
    })
}
