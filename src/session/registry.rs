use crate::session::Session;
use std::{collections::HashMap, sync::Arc, sync::RwLock};

/// Process-wide mapping from a player's XUID to their session.
#[derive(Default)]
pub struct Registry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&self, xuid: String, session: Arc<Session>) {
        self.sessions.write().unwrap().insert(xuid, session);
    }

    pub fn get_session(&self, xuid: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(xuid).cloned()
    }

    /// Looks a session up by display name, case-insensitively.
    pub fn get_session_by_username(&self, username: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap()
            .values()
            .find(|session| {
                session
                    .client()
                    .identity()
                    .display_name
                    .eq_ignore_ascii_case(username)
            })
            .cloned()
    }

    pub fn remove_session(&self, xuid: &str) {
        self.sessions.write().unwrap().remove(xuid);
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }
}
