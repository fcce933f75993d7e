//! Per-user OAuth2 credential lifecycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheConfig, CachedValue, KeyedCache};
use crate::client::RepositoryClient;
use crate::error::{RepositoryError, Result};
use crate::metrics;
use crate::user::{OAuth2Credentials, User};

/// Caches one user's Oura access token per registry entry and rotates it on demand.
///
/// Entries are created on first use. An entry is evicted when the repository
/// reports that its user is no longer authorized, or when the user leaves the
/// directory.
#[derive(Debug)]
pub struct CredentialManager {
    client: RepositoryClient,
    registry: KeyedCache<String, OAuth2Credentials>,
    expiry_margin: Duration,
}

impl CredentialManager {
    /// # Arguments
    /// * `config` - Freshness policy of every per-user entry
    /// * `expiry_margin` - Tokens expiring within this window are fetched again
    pub fn new(client: RepositoryClient, config: CacheConfig, expiry_margin: Duration) -> Self {
        let fetch_client = client.clone();
        let registry = KeyedCache::new(move |user_id: &String| {
            let client = fetch_client.clone();
            let user_id = user_id.clone();
            CachedValue::new("credentials", config, move || {
                let client = client.clone();
                let user_id = user_id.clone();
                async move { client.current_token(&user_id).await }
            })
        });

        Self {
            client,
            registry,
            expiry_margin,
        }
    }

    /// A token for `user` that does not expire within the margin.
    pub async fn get_access_token(&self, user: &User) -> Result<OAuth2Credentials> {
        ensure_authorized(user)?;
        let entry = self.entry(&user.id);
        let margin = self.expiry_margin;
        let result = entry
            .get_matching(|credentials| !credentials.expires_within(margin))
            .await;
        self.settle(&user.id, &entry, result)
    }

    /// Have the repository issue a new token for `user` and cache it.
    pub async fn refresh_access_token(&self, user: &User) -> Result<OAuth2Credentials> {
        ensure_authorized(user)?;
        let entry = self.entry(&user.id);
        tracing::debug!(user = %user.id, "Refreshing access token");
        let result = entry
            .replace_with(|| self.client.new_token(&user.id))
            .await;
        self.settle(&user.id, &entry, result)
    }

    /// Drop the cached credentials of `user_id`, if any.
    pub fn invalidate(&self, user_id: &str) -> bool {
        let removed = self.registry.remove(user_id);
        if removed {
            metrics::set_credential_entries(self.registry.len());
        }
        removed
    }

    /// Drop the credentials of every user not in `user_ids`. Returns how many were dropped.
    pub fn retain_users(&self, user_ids: &HashSet<String>) -> usize {
        let removed = self.registry.retain(|id| user_ids.contains(id));
        if removed > 0 {
            tracing::info!(removed, "Dropped credentials of users no longer in the directory");
            metrics::set_credential_entries(self.registry.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    fn entry(&self, user_id: &str) -> Arc<CachedValue<OAuth2Credentials>> {
        let entry = self.registry.get_or_create(user_id);
        metrics::set_credential_entries(self.registry.len());
        entry
    }

    fn settle(
        &self,
        user_id: &str,
        entry: &Arc<CachedValue<OAuth2Credentials>>,
        result: Result<OAuth2Credentials>,
    ) -> Result<OAuth2Credentials> {
        if let Err(err @ RepositoryError::UnauthorizedUser(_)) = &result {
            if self.registry.remove_entry(user_id, entry) {
                metrics::record_credential_eviction("unauthorized");
                metrics::set_credential_entries(self.registry.len());
            }
            tracing::warn!(
                user = %user_id,
                error = %err,
                "User is not authorized, dropped cached credentials"
            );
        }
        result
    }
}

fn ensure_authorized(user: &User) -> Result<()> {
    if user.is_authorized {
        Ok(())
    } else {
        Err(RepositoryError::UnauthorizedUser(format!(
            "user {} has not authorized Oura access",
            user.id
        )))
    }
}
