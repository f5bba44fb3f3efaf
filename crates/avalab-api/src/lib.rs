pub mod auth;
pub mod chats;
pub mod error;
pub mod invites;
pub mod middleware;
pub mod profiles;
pub mod teams;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{delete, get, post, put},
};

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;

use crate::middleware::require_auth;

/// Every REST route plus the live chat endpoint.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        // token checked by the session itself, from the query string
        .route("/chats/{chat_id}/ws", get(chats::ws_upgrade));

    let protected = Router::new()
        .route("/auth/account", delete(auth::delete_account))
        .route("/profiles", get(profiles::list_profiles))
        .route("/profiles/me", get(profiles::get_me).patch(profiles::patch_me))
        .route("/profiles/me/app_id", put(profiles::rename_me))
        .route(
            "/profiles/me/links",
            post(profiles::add_link).delete(profiles::remove_link),
        )
        .route(
            "/profiles/me/avatar",
            put(profiles::upload_avatar)
                .delete(profiles::delete_avatar)
                .layer(DefaultBodyLimit::max(profiles::MAX_AVATAR_SIZE)),
        )
        .route("/profiles/{app_id}", get(profiles::get_profile))
        .route("/teams", post(teams::create_team))
        .route("/teams/mine", get(teams::my_teams))
        .route("/teams/{team}", get(teams::get_team).delete(teams::delete_team))
        .route("/teams/{team}/missing_roles", put(teams::set_missing_roles))
        .route("/teams/{team}/members", post(teams::add_member))
        .route("/teams/{team}/members/{member}", delete(teams::remove_member))
        .route("/teams/{team}/owner", put(teams::transfer_ownership))
        .route("/teams/{team}/chat", post(teams::create_group_chat))
        .route("/chats", get(chats::my_chats))
        .route("/chats/direct", post(chats::create_direct_chat))
        .route("/chats/{chat_id}/messages", get(chats::get_messages))
        .route("/chats/{chat_id}/invites", post(invites::create_invite))
        .route("/invites", get(invites::my_invites))
        .route("/invites/{id}", delete(invites::cancel))
        .route("/invites/{id}/status", put(invites::set_status))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    public.merge(protected).with_state(state)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use avalab_db::{AvatarStore, Database};
    use avalab_gateway::Dispatcher;

    use super::*;

    /// Avatar directory removed when the test ends, pass or fail.
    struct Scratch(PathBuf);

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn test_state() -> (AppState, Scratch) {
        let avatars = std::env::temp_dir().join(format!("avalab-api-test-{}", Uuid::new_v4()));
        let state = Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            dispatcher: Dispatcher::new(),
            jwt_secret: "test-secret".into(),
            avatars: AvatarStore::new(avatars.clone()).unwrap(),
        });
        (state, Scratch(avatars))
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn register(app: &Router, name: &str) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "username": name, "password": "correct horse", "app_id": name })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn register_login_and_me() {
        let (state, _scratch) = test_state();
        let app = router(state);
        let token = register(&app, "alice").await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "username": "alice", "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(
            &app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "username": "bob", "password": "short" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "wrong horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["app_id"], "alice");

        let (status, body) = call(&app, Method::GET, "/profiles/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["app_id"], "alice");

        let (status, _) = call(&app, Method::GET, "/profiles/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, Method::GET, "/profiles/me", Some("nope"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invite_accept_joins_team() {
        let (state, _scratch) = test_state();
        let app = router(state);
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/teams",
            Some(&alice),
            Some(json!({ "app_id": "rustaceans", "title": "Rustaceans" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, chat) = call(
            &app,
            Method::POST,
            "/chats/direct",
            Some(&alice),
            Some(json!({ "with": "bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let chat_id = chat["id"].as_str().unwrap().to_string();

        let (status, invite) = call(
            &app,
            Method::POST,
            &format!("/chats/{chat_id}/invites"),
            Some(&alice),
            Some(json!({ "receiver": "bob", "team": "rustaceans" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let invite_id = invite["id"].as_str().unwrap().to_string();

        let (_, pending) = call(&app, Method::GET, "/invites", Some(&bob), None).await;
        assert_eq!(pending.as_array().unwrap().len(), 1);

        let status_uri = format!("/invites/{invite_id}/status");
        let (status, body) = call(
            &app,
            Method::PUT,
            &status_uri,
            Some(&bob),
            Some(json!({ "status": "accepted" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "accepted");

        let (status, _) = call(
            &app,
            Method::PUT,
            &status_uri,
            Some(&bob),
            Some(json!({ "status": "rejected" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, team) = call(&app, Method::GET, "/teams/rustaceans", Some(&bob), None).await;
        assert_eq!(team["members"], json!(["alice", "bob"]));

        let (status, _) = call(
            &app,
            Method::DELETE,
            "/teams/rustaceans/members/alice",
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // the invite message is part of the chat history
        let (_, history) = call(
            &app,
            Method::GET,
            &format!("/chats/{chat_id}/messages"),
            Some(&bob),
            None,
        )
        .await;
        assert_eq!(history[0]["is_invite"], true);
    }

    #[tokio::test]
    async fn rename_rewrites_history() {
        let (state, _scratch) = test_state();
        let app = router(state.clone());
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;
        let carol = register(&app, "carol").await;

        let (_, chat) = call(
            &app,
            Method::POST,
            "/chats/direct",
            Some(&bob),
            Some(json!({ "with": "alice" })),
        )
        .await;
        let chat_id: Uuid = chat["id"].as_str().unwrap().parse().unwrap();
        state.db.append(chat_id, "alice", "hi", false).unwrap();
        state.db.append(chat_id, "bob", "yo", false).unwrap();

        let (status, body) = call(
            &app,
            Method::PUT,
            "/profiles/me/app_id",
            Some(&alice),
            Some(json!({ "app_id": "al" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["app_id"], "al");

        let uri = format!("/chats/{chat_id}/messages?page=1");
        let (status, history) = call(&app, Method::GET, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        let history: Vec<(String, String)> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|m| {
                (
                    m["sender_app_id"].as_str().unwrap().to_string(),
                    m["content"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            history,
            [("bob".to_string(), "yo".to_string()), ("al".to_string(), "hi".to_string())]
        );

        let (status, _) = call(
            &app,
            Method::PUT,
            "/profiles/me/app_id",
            Some(&bob),
            Some(json!({ "app_id": "al" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, Method::GET, &uri, Some(&carol), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let missing = format!("/chats/{}/messages", Uuid::new_v4());
        let (status, _) = call(&app, Method::GET, &missing, Some(&carol), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_account_requires_password() {
        let (state, _scratch) = test_state();
        let app = router(state);
        let alice = register(&app, "alice").await;

        let (status, _) = call(
            &app,
            Method::DELETE,
            "/auth/account",
            Some(&alice),
            Some(json!({ "password": "wrong horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            &app,
            Method::DELETE,
            "/auth/account",
            Some(&alice),
            Some(json!({ "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // the token outlives the profile but resolves to nothing
        let (status, _) = call(&app, Method::GET, "/profiles/me", Some(&alice), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    async fn put_avatar(app: &Router, token: &str, size: usize) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(Method::PUT)
            .uri("/profiles/me/avatar")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from(vec![0u8; size]))
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn avatar_limit_is_five_megabytes() {
        let (state, _scratch) = test_state();
        let app = router(state);
        let alice = register(&app, "alice").await;

        let (status, body) = put_avatar(&app, &alice, 3 * 1024 * 1024).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["avatar_path"].as_str().unwrap().ends_with("avatar.png"));

        let (status, _) = put_avatar(&app, &alice, profiles::MAX_AVATAR_SIZE + 1).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn directory_lists_profiles_open_to_offers() {
        let (state, _scratch) = test_state();
        let app = router(state);
        let alice = register(&app, "alice").await;
        register(&app, "bob").await;

        let (status, _) = call(
            &app,
            Method::PATCH,
            "/profiles/me",
            Some(&alice),
            Some(json!({ "do_search": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, everyone) = call(&app, Method::GET, "/profiles", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(everyone.as_array().unwrap().len(), 2);

        let (_, searching) =
            call(&app, Method::GET, "/profiles?do_search=true", Some(&alice), None).await;
        let searching: Vec<&str> = searching
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["app_id"].as_str().unwrap())
            .collect();
        assert_eq!(searching, ["alice"]);
    }

    #[tokio::test]
    async fn deleted_account_closes_its_chats_for_everyone() {
        let (state, _scratch) = test_state();
        let app = router(state.clone());
        let alice = register(&app, "alice").await;
        register(&app, "bob").await;

        let (_, chat) = call(
            &app,
            Method::POST,
            "/chats/direct",
            Some(&alice),
            Some(json!({ "with": "bob" })),
        )
        .await;
        let chat_id: Uuid = chat["id"].as_str().unwrap().parse().unwrap();
        let (_, mut bob_events) = state.dispatcher.register(chat_id, "bob").await;

        let (status, _) = call(
            &app,
            Method::DELETE,
            "/auth/account",
            Some(&alice),
            Some(json!({ "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        assert_eq!(state.dispatcher.session_count(chat_id).await, 0);
        assert!(bob_events.recv().await.is_none());
    }
}
