//! Cached user directory
//!
//! Users are looked up by id (counterparty names) and by username
//! (transfer recipients). Both lookups share one tiered cache; inserts write
//! through to both keys so a previously cached "not found" is replaced.

use crate::cache::TieredCache;
use crate::coalesce::Coalesce;
use crate::enrichment::CounterpartyLookup;
use crate::keys;
use crate::metrics::Metrics;
use crate::store::UserStore;
use crate::types::User;
use crate::{LedgerError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct Directory {
    store: Arc<dyn UserStore>,
    users: TieredCache<Option<User>>,
    flights: Arc<dyn Coalesce<Option<User>>>,
    metrics: Metrics,
}

impl Directory {
    pub fn new(
        store: Arc<dyn UserStore>,
        users: TieredCache<Option<User>>,
        flights: Arc<dyn Coalesce<Option<User>>>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            users,
            flights,
            metrics,
        }
    }

    /// Register `user` and write it through to both cache keys
    pub async fn insert_user(&self, user: &User) -> Result<()> {
        if user.id.is_empty() || user.username.is_empty() {
            return Err(LedgerError::Invariant(
                "user id and username must not be empty".to_string(),
            ));
        }

        self.store.insert_user(user).await?;

        let cached = Some(user.clone());
        self.users.prime(&keys::user_by_id(&user.id), &cached).await?;
        self.users
            .prime(&keys::user_by_username(&user.username), &cached)
            .await?;

        info!(user_id = %user.id, username = %user.username, "user registered");
        Ok(())
    }

    pub async fn get_user_by_id(&self, id: &str) -> Result<User> {
        let key = keys::user_by_id(id);
        let flight = keys::flight(&key);

        let user = self
            .flights
            .once(
                &flight,
                Box::pin(self.users.resolve(&key, async {
                    self.metrics.record_store_load();
                    self.store.get_user_by_id(id).await
                })),
            )
            .await?;

        user.ok_or_else(|| LedgerError::NotFound(format!("user {}", id)))
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<User> {
        let key = keys::user_by_username(username);
        let flight = keys::flight(&key);

        let user = self
            .flights
            .once(
                &flight,
                Box::pin(self.users.resolve(&key, async {
                    self.metrics.record_store_load();
                    self.store.get_user_by_username(username).await
                })),
            )
            .await?;

        user.ok_or_else(|| LedgerError::NotFound(format!("user {}", username)))
    }
}

#[async_trait]
impl CounterpartyLookup for Directory {
    async fn display_name(&self, user_id: &str) -> Result<String> {
        Ok(self.get_user_by_id(user_id).await?.username)
    }
}
