use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use avalab_db::Database;
use avalab_types::events::ChatEvent;
use avalab_types::models::{Message as ChatMessage, ProfileRef};

use crate::auth::resolve_identity;
use crate::dispatcher::{Dispatcher, SessionId};
use crate::error::{AuthError, GatewayError};

/// Lifecycle of one live session on one chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authorized,
    Active,
    Closed,
}

impl SessionState {
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authorized) | (Authorized, Active) | (_, Closed)
        ) && self != Closed
    }
}

/// Why the server closed a session. Each maps to a distinct close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    InvalidToken,
    NotAMember,
    ChatNotFound,
    /// Removed from the chat while connected
    Evicted,
    Internal,
}

impl CloseReason {
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidToken => 4001,
            Self::NotAMember | Self::Evicted => 4003,
            Self::ChatNotFound => 4004,
            Self::Internal => 1011,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid or missing token",
            Self::NotAMember => "not a member of this chat",
            Self::ChatNotFound => "chat not found",
            Self::Evicted => "removed from this chat",
            Self::Internal => "internal error",
        }
    }

    pub fn frame(self) -> Message {
        Message::Close(Some(CloseFrame {
            code: self.code(),
            reason: self.reason().into(),
        }))
    }
}

/// What a session needs from the rest of the server.
#[derive(Clone)]
pub struct SessionContext {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: Arc<str>,
}

struct Session {
    chat_id: Uuid,
    profile: ProfileRef,
    state: SessionState,
}

impl Session {
    fn advance(&mut self, next: SessionState) {
        debug_assert!(self.state.can_advance_to(next));
        debug!(
            "Session '{}' on chat {}: {:?} -> {:?}",
            self.profile.app_id, self.chat_id, self.state, next
        );
        self.state = next;
    }
}

/// Check the token and the caller's current membership of `chat_id`.
pub async fn authorize(
    ctx: &SessionContext,
    chat_id: Uuid,
    token: Option<String>,
) -> Result<ProfileRef, CloseReason> {
    let db = ctx.db.clone();
    let secret = ctx.jwt_secret.clone();

    let checked = tokio::task::spawn_blocking(move || {
        let profile = resolve_identity(&db, &secret, token.as_deref().unwrap_or_default())
            .map_err(|e| match e {
                AuthError::Storage(e) => {
                    warn!("Identity lookup failed: {}", e);
                    CloseReason::Internal
                }
                _ => CloseReason::InvalidToken,
            })?;
        check_membership(&db, chat_id, profile)
    })
    .await;

    checked.unwrap_or(Err(CloseReason::Internal))
}

fn check_membership(
    db: &Database,
    chat_id: Uuid,
    profile: ProfileRef,
) -> Result<ProfileRef, CloseReason> {
    match db.chat_for_member(chat_id, &profile.app_id) {
        Ok(_) => Ok(profile),
        Err(avalab_db::Error::NotFound(_)) => Err(CloseReason::ChatNotFound),
        Err(avalab_db::Error::Forbidden(_)) => Err(CloseReason::NotAMember),
        Err(e) => {
            warn!("Membership check for chat {} failed: {}", chat_id, e);
            Err(CloseReason::Internal)
        }
    }
}

/// Register an authorized session, then check membership again.
///
/// A removal or rename that commits between `authorize` and `register`
/// finds no session to evict or relabel, so the second check catches it:
/// a lost membership deregisters the session, a new app_id relabels it.
async fn enter(
    ctx: &SessionContext,
    chat_id: Uuid,
    profile: &ProfileRef,
) -> Result<(SessionId, mpsc::UnboundedReceiver<ChatEvent>, ProfileRef), CloseReason> {
    let (session_id, events) = ctx.dispatcher.register(chat_id, &profile.app_id).await;

    let db = ctx.db.clone();
    let id = profile.internal_id;
    let rechecked = tokio::task::spawn_blocking(move || {
        let current = match db.profile(id) {
            Ok(current) => current.to_ref(),
            Err(avalab_db::Error::NotFound(_)) => return Err(CloseReason::InvalidToken),
            Err(e) => {
                warn!("Identity lookup failed: {}", e);
                return Err(CloseReason::Internal);
            }
        };
        check_membership(&db, chat_id, current)
    })
    .await
    .unwrap_or(Err(CloseReason::Internal));

    match rechecked {
        Ok(current) => {
            if current.app_id != profile.app_id {
                ctx.dispatcher
                    .relabel(chat_id, session_id, &current.app_id)
                    .await;
            }
            Ok((session_id, events, current))
        }
        Err(reason) => {
            ctx.dispatcher.deregister(chat_id, session_id).await;
            Err(reason)
        }
    }
}

/// Persist a message from `author` and fan it out to the chat.
pub async fn send_message(
    ctx: &SessionContext,
    chat_id: Uuid,
    author: Uuid,
    content: String,
) -> Result<ChatMessage, GatewayError> {
    let db = ctx.db.clone();
    ctx.dispatcher
        .commit_then_broadcast(
            chat_id,
            move || db.append_as(chat_id, author, &content),
            |message: &ChatMessage| ChatEvent::from(message),
        )
        .await
}

/// Drive one live session over a split transport until either side ends it.
///
/// Inbound text frames are message content; outbound frames are JSON
/// [`ChatEvent`]s. Returns the reason if the session was refused.
pub async fn run_session<S, R, E>(
    mut sink: S,
    stream: R,
    ctx: SessionContext,
    chat_id: Uuid,
    token: Option<String>,
) -> Result<(), CloseReason>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let profile = match authorize(&ctx, chat_id, token).await {
        Ok(profile) => profile,
        Err(reason) => {
            info!("Refused session on chat {}: {}", chat_id, reason.reason());
            let _ = sink.send(reason.frame()).await;
            return Err(reason);
        }
    };

    let mut session = Session {
        chat_id,
        profile,
        state: SessionState::Connecting,
    };
    session.advance(SessionState::Authorized);

    let (session_id, mut events, current) = match enter(&ctx, chat_id, &session.profile).await {
        Ok(entered) => entered,
        Err(reason) => {
            info!("Session on chat {} lost access before it started", chat_id);
            session.advance(SessionState::Closed);
            let _ = sink.send(reason.frame()).await;
            return Err(reason);
        }
    };
    session.profile = current;
    session.advance(SessionState::Active);
    info!("'{}' joined chat {}", session.profile.app_id, chat_id);

    // Registry events -> client
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize {:?}: {}", event, e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!("Session transport closed: {}", e);
                return;
            }
        }
        // Sender dropped by the registry
        let _ = sink.send(CloseReason::Evicted.frame()).await;
    });

    // Client frames -> chat store
    let recv_ctx = ctx.clone();
    let author = session.profile.internal_id;
    let mut recv_task = tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Session transport error: {}", e);
                    break;
                }
            };

            match send_message(&recv_ctx, chat_id, author, text.as_str().to_owned()).await {
                Ok(_) => {}
                Err(GatewayError::Db(avalab_db::Error::Invalid(reason))) => {
                    debug!("Dropped message on chat {}: {}", chat_id, reason);
                }
                Err(GatewayError::Db(
                    avalab_db::Error::Forbidden(_) | avalab_db::Error::NotFound(_),
                )) => {
                    info!("Session on chat {} lost access, closing", chat_id);
                    break;
                }
                Err(e) => warn!("Failed to store message on chat {}: {}", chat_id, e),
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    ctx.dispatcher.deregister(chat_id, session_id).await;
    session.advance(SessionState::Closed);
    info!("'{}' left chat {}", session.profile.app_id, chat_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::stream;
    use tokio::sync::mpsc;
    use tokio_util::sync::PollSender;

    use super::*;
    use crate::auth::issue_token;

    const SECRET: &str = "test-secret";

    struct Client {
        outbound: mpsc::UnboundedSender<Result<Message, String>>,
        inbound: mpsc::Receiver<Message>,
        session: tokio::task::JoinHandle<Result<(), CloseReason>>,
    }

    impl Client {
        fn connect(ctx: &SessionContext, chat_id: Uuid, token: Option<String>) -> Self {
            let (server_tx, inbound) = mpsc::channel(64);
            let (outbound, client_rx) = mpsc::unbounded_channel();
            let frames = stream::unfold(client_rx, |mut rx| async move {
                rx.recv().await.map(|frame| (frame, rx))
            });
            let session = tokio::spawn(run_session(
                PollSender::new(server_tx),
                frames,
                ctx.clone(),
                chat_id,
                token,
            ));
            Self {
                outbound,
                inbound,
                session,
            }
        }

        fn say(&self, text: &str) {
            self.outbound
                .send(Ok(Message::Text(text.to_string().into())))
                .unwrap();
        }

        async fn frame(&mut self) -> Message {
            tokio::time::timeout(Duration::from_secs(5), self.inbound.recv())
                .await
                .expect("timed out waiting for a frame")
                .expect("session closed")
        }

        async fn event(&mut self) -> ChatEvent {
            match self.frame().await {
                Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
                other => panic!("expected an event, got {other:?}"),
            }
        }

        async fn close_code(&mut self) -> u16 {
            match self.frame().await {
                Message::Close(Some(frame)) => frame.code,
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    }

    struct Fixture {
        ctx: SessionContext,
        chat_id: Uuid,
        alice: String,
        bob: String,
        carol: String,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_profile("alice", "hash", Some("alice")).unwrap().internal_id;
        let bob = db.create_profile("bob", "hash", Some("bob")).unwrap().internal_id;
        let carol = db.create_profile("carol", "hash", Some("carol")).unwrap().internal_id;
        let chat_id = db.create_direct_chat("alice", "bob").unwrap().id;

        Fixture {
            ctx: SessionContext {
                db: Arc::new(db),
                dispatcher: Dispatcher::new(),
                jwt_secret: SECRET.into(),
            },
            chat_id,
            alice: issue_token(SECRET, alice).unwrap(),
            bob: issue_token(SECRET, bob).unwrap(),
            carol: issue_token(SECRET, carol).unwrap(),
        }
    }

    async fn wait_for_sessions(dispatcher: &Dispatcher, chat_id: Uuid, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.session_count(chat_id).await != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sessions never settled");
    }

    #[test]
    fn state_machine_only_moves_forward() {
        use SessionState::*;
        assert!(Connecting.can_advance_to(Authorized));
        assert!(Authorized.can_advance_to(Active));
        assert!(Active.can_advance_to(Closed));
        assert!(Connecting.can_advance_to(Closed));
        assert!(!Connecting.can_advance_to(Active));
        assert!(!Active.can_advance_to(Authorized));
        assert!(!Closed.can_advance_to(Closed));
    }

    #[tokio::test]
    async fn refused_sessions_get_distinct_codes() {
        let f = fixture();

        let mut anonymous = Client::connect(&f.ctx, f.chat_id, None);
        assert_eq!(anonymous.close_code().await, 4001);
        assert_eq!(anonymous.session.await.unwrap(), Err(CloseReason::InvalidToken));

        let mut forged = Client::connect(&f.ctx, f.chat_id, Some("nope".into()));
        assert_eq!(forged.close_code().await, 4001);

        let mut outsider = Client::connect(&f.ctx, f.chat_id, Some(f.carol.clone()));
        assert_eq!(outsider.close_code().await, 4003);

        let mut lost = Client::connect(&f.ctx, Uuid::new_v4(), Some(f.alice.clone()));
        assert_eq!(lost.close_code().await, 4004);

        assert_eq!(f.ctx.dispatcher.active_chats().await, 0);
    }

    #[tokio::test]
    async fn messages_are_stored_then_fanned_out() {
        let f = fixture();

        let mut alice = Client::connect(&f.ctx, f.chat_id, Some(f.alice.clone()));
        wait_for_sessions(&f.ctx.dispatcher, f.chat_id, 1).await;
        let mut bob = Client::connect(&f.ctx, f.chat_id, Some(f.bob.clone()));

        assert_eq!(
            alice.event().await,
            ChatEvent::Join {
                chat_id: f.chat_id,
                user_id: "bob".into()
            }
        );

        alice.say("hi");
        let seen_by_bob = bob.event().await;
        let seen_by_alice = alice.event().await;
        assert_eq!(seen_by_bob, seen_by_alice);

        let stored = f.ctx.db.latest(f.chat_id).unwrap().unwrap();
        assert_eq!(seen_by_bob, ChatEvent::from(&stored));
        assert_eq!(stored.sender_app_id, "alice");
        assert_eq!(stored.content, "hi");

        // whitespace is dropped, the session stays up
        bob.say("   ");
        bob.say("yo");
        match alice.event().await {
            ChatEvent::Message { content, sender_id, .. } => {
                assert_eq!(content, "yo");
                assert_eq!(sender_id, "bob");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn closing_announces_leave_and_prunes() {
        let f = fixture();

        let mut alice = Client::connect(&f.ctx, f.chat_id, Some(f.alice.clone()));
        wait_for_sessions(&f.ctx.dispatcher, f.chat_id, 1).await;
        let bob = Client::connect(&f.ctx, f.chat_id, Some(f.bob.clone()));
        alice.event().await;

        bob.outbound.send(Ok(Message::Close(None))).unwrap();
        assert_eq!(bob.session.await.unwrap(), Ok(()));
        assert_eq!(
            alice.event().await,
            ChatEvent::Leave {
                chat_id: f.chat_id,
                user_id: "bob".into()
            }
        );

        drop(alice.outbound);
        assert_eq!(alice.session.await.unwrap(), Ok(()));
        assert_eq!(f.ctx.dispatcher.active_chats().await, 0);
    }

    #[tokio::test]
    async fn evicted_session_is_closed() {
        let f = fixture();

        let mut bob = Client::connect(&f.ctx, f.chat_id, Some(f.bob.clone()));
        wait_for_sessions(&f.ctx.dispatcher, f.chat_id, 1).await;

        f.ctx.dispatcher.evict(f.chat_id, "bob").await;
        assert_eq!(bob.close_code().await, 4003);
        assert_eq!(bob.session.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn removal_between_check_and_register_is_caught() {
        let f = fixture();
        let db = &f.ctx.db;
        db.create_team("alice", "crew", "Crew", None).unwrap();
        db.add_member("alice", "crew", "bob").unwrap();
        let chat_id = db.create_group_chat("alice", "crew").unwrap().id;

        let bob = authorize(&f.ctx, chat_id, Some(f.bob.clone())).await.unwrap();

        // the owner removes bob before his session is registered
        db.remove_member("alice", "crew", "bob").unwrap();
        assert_eq!(f.ctx.dispatcher.evict(chat_id, "bob").await, 0);

        let entered = enter(&f.ctx, chat_id, &bob).await;
        assert!(matches!(entered, Err(CloseReason::NotAMember)));
        assert_eq!(f.ctx.dispatcher.session_count(chat_id).await, 0);
    }

    #[tokio::test]
    async fn rename_between_check_and_register_relabels() {
        let f = fixture();
        let avatars_dir = std::env::temp_dir().join(format!("avalab-gateway-{}", Uuid::new_v4()));
        let avatars = avalab_db::AvatarStore::new(avatars_dir.clone()).unwrap();

        let bob = authorize(&f.ctx, f.chat_id, Some(f.bob.clone())).await.unwrap();

        f.ctx.db.rename_profile(bob.internal_id, "bobby", &avatars).unwrap();
        assert_eq!(f.ctx.dispatcher.rename_member("bob", "bobby").await, 0);

        let (_, _events, current) = enter(&f.ctx, f.chat_id, &bob).await.unwrap();
        assert_eq!(current.app_id, "bobby");
        assert_eq!(f.ctx.dispatcher.online(f.chat_id).await, ["bobby"]);
        assert_eq!(f.ctx.dispatcher.evict(f.chat_id, "bobby").await, 1);

        std::fs::remove_dir_all(avatars_dir).unwrap();
    }
}
