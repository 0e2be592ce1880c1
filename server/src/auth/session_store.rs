use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use base64::Engine;
use chrono::Utc;
use rand::RngCore;

use crate::server_config::cfg;

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub email: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AuthSessionStore {
    inner: Arc<RwLock<HashMap<String, AuthSession>>>,
}

impl AuthSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_session(&self, session_id: &str) -> Option<AuthSession> {
        self.inner.read().unwrap().get(session_id).cloned()
    }

    /// Issue a fresh session id for the given account.
    pub fn create_session(&self, email: String) -> String {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let session_id = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw);

        let session = AuthSession {
            email,
            expires_at: Utc::now().timestamp() + cfg.dashboard.session_ttl_seconds,
        };
        self.inner
            .write()
            .unwrap()
            .insert(session_id.clone(), session);
        session_id
    }

    pub fn destroy_session(&self, session_id: &str) {
        self.inner.write().unwrap().remove(session_id);
    }

    pub fn clean_store(&self) {
        let now = Utc::now().timestamp();
        self.inner
            .write()
            .unwrap()
            .retain(|_, session| session.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let store = AuthSessionStore::new();
        let id = store.create_session("me@example.com".to_string());
        let session = store.load_session(&id).unwrap();
        assert_eq!(session.email, "me@example.com");
        assert!(session.expires_at > Utc::now().timestamp());

        store.destroy_session(&id);
        assert!(store.load_session(&id).is_none());
    }

    #[test]
    fn test_clean_store_drops_expired() {
        let store = AuthSessionStore::new();
        let id = store.create_session("me@example.com".to_string());
        store
            .inner
            .write()
            .unwrap()
            .get_mut(&id)
            .unwrap()
            .expires_at = Utc::now().timestamp() - 10;
        store.clean_store();
        assert!(store.load_session(&id).is_none());
    }
}
