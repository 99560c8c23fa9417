//! Saved user-profile lookups.
//!
//! The gateway performs exactly one persistence query: the Last.fm username
//! a Telegram user registered through the bot. The backing store is a
//! collaborator behind [`UserStore`], so handlers and tests are independent
//! of the concrete database.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Query(String),
}

/// Lookup of saved profile data by Telegram user id.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// The saved Last.fm username for this user, if any.
    async fn lastfm_username(&self, user_id: i64) -> Result<Option<String>, StoreError>;
}

/// In-memory [`UserStore`], used in tests and as the default backend when
/// no external database is wired in.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<HashMap<i64, String>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: i64, lastfm_username: impl Into<String>) {
        self.inner
            .write()
            .await
            .insert(user_id, lastfm_username.into());
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn lastfm_username(&self, user_id: i64) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().await.get(&user_id).cloned())
    }
}
