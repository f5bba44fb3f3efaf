use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use avalab_types::events::ChatEvent;

use crate::error::GatewayError;

pub type SessionId = Uuid;

/// A live session as the registry sees it.
struct LiveSession {
    app_id: String,
    tx: mpsc::UnboundedSender<ChatEvent>,
}

/// Registry of live chat sessions and per-chat fan-out.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// chat_id -> (session_id -> session). Chats with no sessions are pruned.
    chats: RwLock<HashMap<Uuid, HashMap<SessionId, LiveSession>>>,

    /// Held across commit + broadcast so events leave in commit order
    order_locks: Mutex<HashMap<Uuid, Weak<tokio::sync::Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to `chat_id` and announce it to everyone already there.
    pub async fn register(
        &self,
        chat_id: Uuid,
        app_id: &str,
    ) -> (SessionId, mpsc::UnboundedReceiver<ChatEvent>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner
            .chats
            .write()
            .await
            .entry(chat_id)
            .or_default()
            .insert(
                session_id,
                LiveSession {
                    app_id: app_id.to_string(),
                    tx,
                },
            );

        let join = ChatEvent::Join {
            chat_id,
            user_id: app_id.to_string(),
        };
        self.deliver(chat_id, join, Some(session_id)).await;

        (session_id, rx)
    }

    /// Remove a session and tell the rest of the chat it left.
    /// Returns false if the session was already gone.
    pub async fn deregister(&self, chat_id: Uuid, session_id: SessionId) -> bool {
        let Some(app_id) = self.remove(chat_id, session_id).await else {
            return false;
        };
        self.deliver(chat_id, ChatEvent::Leave { chat_id, user_id: app_id }, None)
            .await;
        true
    }

    /// Send `event` to every session currently on the chat.
    pub async fn broadcast(&self, chat_id: Uuid, event: ChatEvent) {
        self.deliver(chat_id, event, None).await;
    }

    /// Run `commit` on the blocking pool, then broadcast the event it
    /// produced. Commits on the same chat are serialized with their
    /// broadcasts, so sessions see events in commit order. Nothing is sent
    /// when the commit fails.
    ///
    /// Both halves run on their own task: cancelling the caller never leaves
    /// a committed write unannounced.
    pub async fn commit_then_broadcast<T, F, E>(
        &self,
        chat_id: Uuid,
        commit: F,
        event: E,
    ) -> Result<T, GatewayError>
    where
        F: FnOnce() -> avalab_db::Result<T> + Send + 'static,
        T: Send + 'static,
        E: FnOnce(&T) -> ChatEvent + Send + 'static,
    {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let lock = dispatcher.order_lock(chat_id);
            let _guard = lock.lock().await;

            let committed = tokio::task::spawn_blocking(commit).await??;
            dispatcher.broadcast(chat_id, event(&committed)).await;
            Ok::<T, GatewayError>(committed)
        })
        .await?
    }

    /// Relabel live sessions after a committed rename.
    pub async fn rename_member(&self, old: &str, new: &str) -> usize {
        let mut chats = self.inner.chats.write().await;
        let mut renamed = 0;
        for session in chats.values_mut().flat_map(|sessions| sessions.values_mut()) {
            if session.app_id == old {
                session.app_id = new.to_string();
                renamed += 1;
            }
        }
        if renamed > 0 {
            debug!("Relabelled {} sessions '{}' -> '{}'", renamed, old, new);
        }
        renamed
    }

    /// Relabel one session, for a rename that committed before it registered.
    pub async fn relabel(&self, chat_id: Uuid, session_id: SessionId, app_id: &str) -> bool {
        let mut chats = self.inner.chats.write().await;
        match chats.get_mut(&chat_id).and_then(|s| s.get_mut(&session_id)) {
            Some(session) => {
                session.app_id = app_id.to_string();
                true
            }
            None => false,
        }
    }

    /// Close every session `app_id` holds on `chat_id`, announcing each.
    pub async fn evict(&self, chat_id: Uuid, app_id: &str) -> usize {
        let removed = {
            let mut chats = self.inner.chats.write().await;
            let Some(sessions) = chats.get_mut(&chat_id) else {
                return 0;
            };
            let before = sessions.len();
            sessions.retain(|_, s| s.app_id != app_id);
            let removed = before - sessions.len();
            if sessions.is_empty() {
                chats.remove(&chat_id);
            }
            removed
        };

        for _ in 0..removed {
            let leave = ChatEvent::Leave {
                chat_id,
                user_id: app_id.to_string(),
            };
            self.deliver(chat_id, leave, None).await;
        }
        if removed > 0 {
            info!("Evicted '{}' from chat {} ({} sessions)", app_id, chat_id, removed);
        }
        removed
    }

    /// Close every session `app_id` holds, on any chat.
    pub async fn disconnect(&self, app_id: &str) -> usize {
        let chat_ids: Vec<Uuid> = {
            let chats = self.inner.chats.read().await;
            chats
                .iter()
                .filter(|(_, sessions)| sessions.values().any(|s| s.app_id == app_id))
                .map(|(id, _)| *id)
                .collect()
        };

        let mut closed = 0;
        for chat_id in chat_ids {
            closed += self.evict(chat_id, app_id).await;
        }
        closed
    }

    /// Drop a chat's sessions without announcing anything, for chats that
    /// no longer exist.
    pub async fn close_chat(&self, chat_id: Uuid) -> usize {
        let removed = self.inner.chats.write().await.remove(&chat_id);
        removed.map_or(0, |sessions| sessions.len())
    }

    pub async fn session_count(&self, chat_id: Uuid) -> usize {
        self.inner
            .chats
            .read()
            .await
            .get(&chat_id)
            .map_or(0, HashMap::len)
    }

    /// Number of chats with at least one live session.
    pub async fn active_chats(&self) -> usize {
        self.inner.chats.read().await.len()
    }

    /// Distinct app_ids with a live session on the chat.
    pub async fn online(&self, chat_id: Uuid) -> Vec<String> {
        let chats = self.inner.chats.read().await;
        let mut online: Vec<String> = chats
            .get(&chat_id)
            .map(|sessions| sessions.values().map(|s| s.app_id.clone()).collect())
            .unwrap_or_default();
        online.sort();
        online.dedup();
        online
    }

    async fn remove(&self, chat_id: Uuid, session_id: SessionId) -> Option<String> {
        let mut chats = self.inner.chats.write().await;
        let sessions = chats.get_mut(&chat_id)?;
        let removed = sessions.remove(&session_id)?;
        if sessions.is_empty() {
            chats.remove(&chat_id);
        }
        Some(removed.app_id)
    }

    /// Deliver to a snapshot of the chat's sessions. A failed send closes
    /// that session, and its `leave` goes out in turn.
    async fn deliver(&self, chat_id: Uuid, event: ChatEvent, skip: Option<SessionId>) {
        let mut queue = VecDeque::from([(event, skip)]);

        while let Some((event, skip)) = queue.pop_front() {
            let dead: Vec<SessionId> = {
                let chats = self.inner.chats.read().await;
                let Some(sessions) = chats.get(&chat_id) else {
                    return;
                };
                sessions
                    .iter()
                    .filter(|(id, _)| Some(**id) != skip)
                    .filter(|(_, s)| s.tx.send(event.clone()).is_err())
                    .map(|(id, _)| *id)
                    .collect()
            };

            for session_id in dead {
                if let Some(app_id) = self.remove(chat_id, session_id).await {
                    debug!("Dropped dead session {} ('{}') on chat {}", session_id, app_id, chat_id);
                    queue.push_back((ChatEvent::Leave { chat_id, user_id: app_id }, None));
                }
            }
        }
    }

    fn order_lock(&self, chat_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .order_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(lock) = locks.get(&chat_id).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(chat_id, Arc::downgrade(&lock));
        lock
    }
}
