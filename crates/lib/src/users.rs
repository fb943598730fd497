//! User directory: resolves a flex identity to a user, creating the user on first contact.
//!
//! The identity index is the uniqueness constraint. Resolution re-checks the index under the
//! write lock, so concurrent first contacts from one identity agree on a single user.

use crate::types::{FlexIdentity, User};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no user for identity {0}")]
    MissingUser(String),
}

#[derive(Default)]
struct UserTable {
    by_identity: HashMap<FlexIdentity, u64>,
    users: HashMap<u64, User>,
    last_id: u64,
}

/// In-memory user directory keyed by id and by flex identity.
pub struct UserStore {
    inner: Arc<RwLock<UserTable>>,
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(UserTable::default())),
        }
    }

    /// Look up the user for `identity`, creating one with default attributes if none exists.
    /// An identity with an empty flex id cannot be resolved.
    pub async fn resolve_user(&self, identity: &FlexIdentity) -> Result<User, StoreError> {
        if identity.flex_id.trim().is_empty() {
            return Err(StoreError::MissingUser(identity.to_string()));
        }
        {
            let g = self.inner.read().await;
            if let Some(user) = g.by_identity.get(identity).and_then(|id| g.users.get(id)) {
                return Ok(user.clone());
            }
        }

        let mut g = self.inner.write().await;
        // Another request may have created the user between the read and write locks.
        if let Some(user) = g.by_identity.get(identity).and_then(|id| g.users.get(id)) {
            return Ok(user.clone());
        }
        g.last_id += 1;
        let user = User {
            id: g.last_id,
            display_name: String::new(),
            created_at: Utc::now(),
        };
        g.by_identity.insert(identity.clone(), user.id);
        g.users.insert(user.id, user.clone());
        log::info!("users: created user {} for {}", user.id, identity);
        Ok(user)
    }

    pub async fn get_user(&self, id: u64) -> Option<User> {
        self.inner.read().await.users.get(&id).cloned()
    }

    /// Attach another identity to an existing user (same human, another channel).
    /// Overwrites any previous owner of the identity.
    pub async fn link_identity(&self, user_id: u64, identity: FlexIdentity) -> Result<(), StoreError> {
        let mut g = self.inner.write().await;
        if !g.users.contains_key(&user_id) {
            return Err(StoreError::MissingUser(format!("user {}", user_id)));
        }
        g.by_identity.insert(identity, user_id);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.users.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
