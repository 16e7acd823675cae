use std::{net::SocketAddrV4, sync::Arc};

use ahash::AHashMap;
use parking_lot::RwLock;

use service::{ServiceHandler, session::RoomId};

use crate::config::Config;

/// Runtime user records.
///
/// The second credential source behind the static configuration table:
/// a shared record store queried on every admission that the static
/// table misses. Records can be added and removed while the server
/// runs.
///
/// # Example
///
/// ```
/// use relay_server::observer::UserStore;
///
/// let users = UserStore::default();
/// assert_eq!(users.get("user1"), None);
///
/// users.insert("user1", "password1");
/// assert_eq!(users.get("user1"), Some("password1".to_string()));
///
/// assert!(users.remove("user1"));
/// assert!(!users.remove("user1"));
/// assert_eq!(users.get("user1"), None);
/// ```
#[derive(Clone, Default)]
pub struct UserStore(Arc<RwLock<AHashMap<String, String>>>);

impl UserStore {
    pub fn insert(&self, username: &str, secret: &str) {
        self.0.write().insert(username.to_string(), secret.to_string());
    }

    pub fn remove(&self, username: &str) -> bool {
        self.0.write().remove(username).is_some()
    }

    pub fn get(&self, username: &str) -> Option<String> {
        self.0.read().get(username).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

/// The service's view of the outside world: credential lookup plus
/// lifecycle logging.
#[derive(Clone)]
pub struct Observer {
    config: Arc<Config>,
    users: UserStore,
}

impl Observer {
    pub fn new(config: Arc<Config>, users: UserStore) -> Self {
        Self { config, users }
    }
}

impl ServiceHandler for Observer {
    fn get_secret(&self, username: &str) -> Option<String> {
        // Match the static credentials first.
        if let Some(it) = self.config.auth.static_credentials.get(username) {
            return Some(it.clone());
        }

        // Fall through to the runtime record store.
        self.users.get(username)
    }

    fn on_room_created(&self, addr: &SocketAddrV4, room: &RoomId) {
        log::info!("room created: addr={addr}, room={room}");
    }

    fn on_room_joined(&self, addr: &SocketAddrV4, room: &RoomId) {
        log::info!("room joined: addr={addr}, room={room}");
    }

    fn on_session_closed(&self, room: &RoomId) {
        log::info!("session closed: room={room}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_credentials_shadow_the_store() {
        let mut config = Config::default();
        config
            .auth
            .static_credentials
            .insert("user1".to_string(), "static".to_string());

        let users = UserStore::default();
        users.insert("user1", "runtime");
        users.insert("user2", "runtime");

        let observer = Observer::new(Arc::new(config), users);
        assert_eq!(observer.get_secret("user1"), Some("static".to_string()));
        assert_eq!(observer.get_secret("user2"), Some("runtime".to_string()));
        assert_eq!(observer.get_secret("user3"), None);
    }
}
