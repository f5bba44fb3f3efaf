use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;

use avalab_types::api::{CreateTeamRequest, MemberRequest, MissingRolesRequest};
use avalab_types::models::{ProfileRef, Team};

use crate::auth::{AppState, blocking};
use crate::error::ApiError;

#[derive(Serialize)]
pub struct MyTeams {
    pub owned: Vec<Team>,
    pub member_of: Vec<Team>,
}

pub async fn create_team(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Json(req): Json<CreateTeamRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let team = blocking(move || {
        state
            .db
            .create_team(&me.app_id, &req.app_id, &req.title, req.description.as_deref())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(team)))
}

pub async fn my_teams(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
) -> Result<impl IntoResponse, ApiError> {
    let teams = blocking(move || {
        Ok(MyTeams {
            owned: state.db.teams_owned_by(&me.app_id)?,
            member_of: state.db.teams_of(&me.app_id)?,
        })
    })
    .await?;
    Ok(Json(teams))
}

pub async fn get_team(
    State(state): State<AppState>,
    Path(team): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let team = blocking(move || state.db.team(&team)).await?;
    Ok(Json(team))
}

pub async fn delete_team(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Path(team): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let st = state.clone();
    let bound_chat = blocking(move || st.db.delete_team(&me.app_id, &team)).await?;
    if let Some(chat_id) = bound_chat {
        state.dispatcher.close_chat(chat_id).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_missing_roles(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Path(team): Path<String>,
    Json(req): Json<MissingRolesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let team =
        blocking(move || state.db.set_missing_roles(&me.app_id, &team, &req.roles)).await?;
    Ok(Json(team))
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Path(team): Path<String>,
    Json(req): Json<MemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let team = blocking(move || state.db.add_member(&me.app_id, &team, &req.app_id)).await?;
    Ok(Json(team))
}

/// DELETE /teams/{team}/members/{member}: also closes the removed member's
/// live sessions on the team chat.
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Path((team, member)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let st = state.clone();
    let removed = member.clone();
    let (team, chat) = blocking(move || {
        let team = st.db.remove_member(&me.app_id, &team, &removed)?;
        let chat = st.db.group_chat(&team.app_id)?;
        Ok((team, chat))
    })
    .await?;

    if let Some(chat) = chat {
        state.dispatcher.evict(chat.id, &member).await;
    }
    Ok(Json(team))
}

pub async fn transfer_ownership(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Path(team): Path<String>,
    Json(req): Json<MemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let team =
        blocking(move || state.db.transfer_ownership(&me.app_id, &team, &req.app_id)).await?;
    Ok(Json(team))
}

pub async fn create_group_chat(
    State(state): State<AppState>,
    Extension(me): Extension<ProfileRef>,
    Path(team): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = blocking(move || state.db.create_group_chat(&me.app_id, &team)).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}
