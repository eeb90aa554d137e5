//! Streaming sessions and the registry that owns them
//!
//! A session binds one viewer's peer connection to its own renderer. Its
//! lifecycle is `New -> Connected -> Failed`; `Failed` is terminal and is the
//! only way a session ends.

use crate::peer::PeerLink;
use splatcast_media::Renderer;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, signaling in progress
    New,
    /// Peer connection established, frames flowing
    Connected,
    /// Terminal
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::New => "new",
            SessionState::Connected => "connected",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

pub struct Session {
    id: String,
    renderer: Box<dyn Renderer>,
    peer: Arc<dyn PeerLink>,
    state: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(id: impl Into<String>, renderer: Box<dyn Renderer>, peer: Arc<dyn PeerLink>) -> Self {
        let (state, _) = watch::channel(SessionState::New);
        Self {
            id: id.into(),
            renderer,
            peer,
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    pub fn peer(&self) -> &Arc<dyn PeerLink> {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Failed
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Resolves once the session has failed
    pub async fn closed(&self) {
        let mut state = self.subscribe();
        // The sender lives in `self`, so the channel stays open while we wait
        let _ = state.wait_for(|s| *s == SessionState::Failed).await;
    }

    /// Wait until the session is connected. Returns false if it fails first.
    pub async fn connected(&self) -> bool {
        let mut state = self.subscribe();
        match state.wait_for(|s| *s != SessionState::New).await {
            Ok(current) => *current == SessionState::Connected,
            Err(_) => false,
        }
    }

    /// `New -> Connected`. Returns false if the session was not `New`.
    pub fn mark_connected(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SessionState::New {
                *state = SessionState::Connected;
                true
            } else {
                false
            }
        })
    }

    /// Enter the terminal state. Returns false if already failed.
    pub fn mark_failed(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Failed {
                false
            } else {
                *state = SessionState::Failed;
                true
            }
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session {0} already exists")]
    AlreadyExists(String),
}

/// Owns the id -> session mapping. At most one live session per id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session, failing if its id is already taken
    pub async fn insert(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;

        if sessions.contains_key(session.id()) {
            return Err(RegistryError::AlreadyExists(session.id().to_string()));
        }

        tracing::info!("Registered session {}", session.id());
        sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Remove `session` if the registry still maps its id to this exact session
    pub async fn remove(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;

        match sessions.get(session.id()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(session.id());
                tracing::info!("Removed session {}", session.id());
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Take every session out of the registry (shutdown)
    pub async fn drain(&self) -> Vec<Arc<Session>> {
        self.sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
