//! In-memory presence registry
//!
//! Bidirectional map between logical users and their live connections.
//! Written only by connect/disconnect handling; everything else reads it
//! to resolve "which connections belong to user X".

use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

use crate::types::{ConnectionId, UserId};

/// Result of removing a connection from the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnection {
    pub user_id: UserId,
    /// True when this was the user's last live connection
    pub last_connection: bool,
}

/// Process-wide presence map, multi-device aware
pub struct PresenceRegistry {
    by_connection: DashMap<ConnectionId, UserId>,
    by_user: DashMap<UserId, HashSet<ConnectionId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            by_connection: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    /// Register a connection under its authenticated user
    pub fn register(&self, user_id: &UserId, connection_id: &ConnectionId) {
        self.by_connection
            .insert(connection_id.clone(), user_id.clone());
        self.by_user
            .entry(user_id.clone())
            .or_default()
            .insert(connection_id.clone());
        debug!(user = %user_id, connection = %connection_id, "connection registered");
    }

    /// Remove a connection; reports whether the user just went offline
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<Disconnection> {
        let (_, user_id) = self.by_connection.remove(connection_id)?;

        let mut last_connection = false;
        if let Some(mut entry) = self.by_user.get_mut(&user_id) {
            entry.remove(connection_id);
            last_connection = entry.is_empty();
        }
        if last_connection {
            self.by_user.remove(&user_id);
        }

        debug!(
            user = %user_id,
            connection = %connection_id,
            offline = last_connection,
            "connection unregistered"
        );
        Some(Disconnection {
            user_id,
            last_connection,
        })
    }

    /// All live connections of a user (empty when offline)
    pub fn connections_of(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.by_user
            .get(user_id)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Resolve a connection back to its user
    pub fn user_of(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.by_connection
            .get(connection_id)
            .map(|entry| entry.clone())
    }

    /// Whether the user has at least one live connection
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.by_user
            .get(user_id)
            .map(|entry| !entry.is_empty())
            .unwrap_or(false)
    }

    /// Number of live connections across all users
    pub fn connection_count(&self) -> usize {
        self.by_connection.len()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_resolve() {
        let registry = PresenceRegistry::new();
        let alice = UserId::from("alice");
        let conn = ConnectionId::from("c1");

        registry.register(&alice, &conn);

        assert!(registry.is_online(&alice));
        assert_eq!(registry.user_of(&conn), Some(alice.clone()));
        assert_eq!(registry.connections_of(&alice), vec![conn]);
    }

    #[test]
    fn multi_device_goes_offline_on_last_disconnect() {
        let registry = PresenceRegistry::new();
        let alice = UserId::from("alice");
        let phone = ConnectionId::from("phone");
        let laptop = ConnectionId::from("laptop");

        registry.register(&alice, &phone);
        registry.register(&alice, &laptop);
        assert_eq!(registry.connections_of(&alice).len(), 2);

        let first = registry.unregister(&phone).unwrap();
        assert!(!first.last_connection);
        assert!(registry.is_online(&alice));

        let second = registry.unregister(&laptop).unwrap();
        assert!(second.last_connection);
        assert!(!registry.is_online(&alice));
        assert!(registry.connections_of(&alice).is_empty());
    }

    #[test]
    fn unregister_unknown_connection_is_none() {
        let registry = PresenceRegistry::new();
        assert_eq!(registry.unregister(&ConnectionId::from("ghost")), None);
    }
}
