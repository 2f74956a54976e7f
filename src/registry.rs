/*!
 # Session registry

 Keeps at most one live [`Session`] per device address. Addresses are
 compared case-insensitively. Registering a session for an address that
 already has one closes the previous session before the new one is stored,
 so two sessions never hold a connection to the same device.
*/

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::session::Session;

fn key(address: &str) -> String {
    address.to_uppercase()
}

/// Address-keyed table of sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, address: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(&key(address)).cloned()
    }

    /// Stores `session`, closing whatever session held its address before.
    ///
    /// Returns the superseded session, already closed.
    pub async fn insert(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock().await;
        let previous = sessions.insert(key(session.address()), Arc::clone(&session));

        match previous {
            Some(previous) if !Arc::ptr_eq(&previous, &session) => {
                info!(address = %session.address(), "Closing superseded session");
                previous.close().await;
                Some(previous)
            }
            _ => None,
        }
    }

    /// Removes the entry for `session`'s address if it still points at `session`
    pub async fn remove(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.lock().await;
        let address = key(session.address());
        match sessions.get(&address) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(&address);
                debug!(%address, "Session removed from registry");
                true
            }
            _ => false,
        }
    }

    /// Closes and forgets the session for `address`
    pub async fn close(&self, address: &str) -> bool {
        let removed = self.sessions.lock().await.remove(&key(address));
        match removed {
            Some(session) => {
                session.close().await;
                true
            }
            None => false,
        }
    }

    /// Closes every registered session
    pub async fn clear(&self) {
        let drained: Vec<_> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in drained {
            session.close().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Registered addresses, normalized to upper case and sorted
    pub async fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        addresses.sort();
        addresses
    }
}
