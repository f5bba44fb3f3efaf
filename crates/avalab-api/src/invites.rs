use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use avalab_types::api::{CreateInviteRequest, InviteStatusRequest};
use avalab_types::events::ChatEvent;
use avalab_types::models::{Invite, Message, ProfileRef};

use crate::auth::{AppState, blocking};
use crate::error::ApiError;

/// POST /chats/{chat_id}/invites: the carrier message is broadcast to the
/// chat once the invite is stored.
pub async fn create_invite(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Path(chat_id): Path<Uuid>,
    Json(req): Json<CreateInviteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let (invite, _) = state
        .dispatcher
        .commit_then_broadcast(
            chat_id,
            move || {
                db.create_invite(
                    chat_id,
                    &me.app_id,
                    &req.receiver,
                    &req.team,
                    req.content.as_deref(),
                )
            },
            |created: &(Invite, Message)| ChatEvent::from(&created.1),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(invite)))
}

pub async fn my_invites(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
) -> Result<impl IntoResponse, ApiError> {
    let invites = blocking(move || state.db.pending_invites_for(&me.app_id)).await?;
    Ok(Json(invites))
}

/// PUT /invites/{id}/status: accept or reject, receiver only.
pub async fn set_status(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Path(id): Path<Uuid>,
    Json(req): Json<InviteStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let invite = blocking(move || state.db.set_invite_status(id, &me.app_id, req.status)).await?;
    Ok(Json(invite))
}

/// DELETE /invites/{id}: withdraw a pending invite, sender only.
pub async fn cancel(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(move || state.db.cancel_invite(id, &me.app_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
