//! Observer lists for session events.
//!
//! The lists are shared between the client handles and the session task, so
//! registering or removing a listener takes effect before the call returns.
//! Listeners run on the session task. A panicking listener is logged and
//! skipped; the others still run.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use duet_session_models::{ChatMessage, Envelope};

use crate::SessionError;

/// Identifies one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

pub type ConnectListener = Arc<dyn Fn() + Send + Sync>;
pub type DisconnectListener = Arc<dyn Fn() + Send + Sync>;
pub type ErrorListener = Arc<dyn Fn(&SessionError) + Send + Sync>;
pub type MessageListener = Arc<dyn Fn(&Envelope) + Send + Sync>;
pub type ChatListener = Arc<dyn Fn(&ChatMessage) + Send + Sync>;

pub enum Listener {
    Connect(ConnectListener),
    Disconnect(DisconnectListener),
    Error(ErrorListener),
    Message(MessageListener),
    Chat(ChatListener),
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Connect(_) => "Connect",
            Self::Disconnect(_) => "Disconnect",
            Self::Error(_) => "Error",
            Self::Message(_) => "Message",
            Self::Chat(_) => "Chat",
        };
        write!(f, "Listener::{kind}")
    }
}

type Entries<T> = Vec<(ListenerId, T)>;

#[derive(Default)]
struct Lists {
    connect: Entries<ConnectListener>,
    disconnect: Entries<DisconnectListener>,
    error: Entries<ErrorListener>,
    message: Entries<MessageListener>,
    chat: Entries<ChatListener>,
}

#[derive(Clone, Default)]
pub struct Listeners {
    lists: Arc<RwLock<Lists>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Listeners")
            .field("connect", &lists.connect.len())
            .field("disconnect", &lists.disconnect.len())
            .field("error", &lists.error.len())
            .field("message", &lists.message.len())
            .field("chat", &lists.chat.len())
            .finish()
    }
}

impl Listeners {
    pub fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        match listener {
            Listener::Connect(listener) => lists.connect.push((id, listener)),
            Listener::Disconnect(listener) => lists.disconnect.push((id, listener)),
            Listener::Error(listener) => lists.error.push((id, listener)),
            Listener::Message(listener) => lists.message.push((id, listener)),
            Listener::Chat(listener) => lists.chat.push((id, listener)),
        }
        id
    }

    /// Unregisters `id`. Returns whether it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        fn retain<T>(listeners: &mut Entries<T>, id: ListenerId) -> bool {
            let before = listeners.len();
            listeners.retain(|(listener_id, _)| *listener_id != id);
            listeners.len() != before
        }

        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        retain(&mut lists.connect, id)
            | retain(&mut lists.disconnect, id)
            | retain(&mut lists.error, id)
            | retain(&mut lists.message, id)
            | retain(&mut lists.chat, id)
    }

    /// Clones one list out so no lock is held while listeners run.
    fn snapshot<T: Clone>(&self, list: impl FnOnce(&Lists) -> &Entries<T>) -> Entries<T> {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        list(&lists).clone()
    }

    pub fn notify_connect(&self) {
        for (id, listener) in self.snapshot(|lists| &lists.connect) {
            invoke("connect", id, || listener());
        }
    }

    pub fn notify_disconnect(&self) {
        for (id, listener) in self.snapshot(|lists| &lists.disconnect) {
            invoke("disconnect", id, || listener());
        }
    }

    pub fn notify_error(&self, error: &SessionError) {
        log::debug!("notify_error: {error}");
        for (id, listener) in self.snapshot(|lists| &lists.error) {
            invoke("error", id, || listener(error));
        }
    }

    pub fn notify_message(&self, envelope: &Envelope) {
        for (id, listener) in self.snapshot(|lists| &lists.message) {
            invoke("message", id, || listener(envelope));
        }
    }

    pub fn notify_chat(&self, message: &ChatMessage) {
        for (id, listener) in self.snapshot(|lists| &lists.chat) {
            invoke("chat", id, || listener(message));
        }
    }
}

fn invoke(kind: &str, id: ListenerId, call: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(call)) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        log::error!("{kind} listener {id} panicked: {reason}");
    }
}
