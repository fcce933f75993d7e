//! The user repository as seen by the ingestion pipeline.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use oura_source_config::{parse_duration, ConnectorConfig};

use crate::cache::{CacheConfig, CachedSet, EntityStream};
use crate::client::RepositoryClient;
use crate::credentials::CredentialManager;
use crate::error::{RepositoryError, Result};
use crate::user::{OAuth2Credentials, User};

pub type UserStream = EntityStream<User>;

/// Users to ingest and their Oura credentials.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fetch one user directly from the repository, bypassing the directory cache.
    async fn lookup(&self, id: &str) -> Result<User>;

    /// Iterate the known users. A stale directory is served as is.
    async fn stream(&self) -> Result<UserStream>;

    async fn get_access_token(&self, user: &User) -> Result<OAuth2Credentials>;

    async fn refresh_access_token(&self, user: &User) -> Result<OAuth2Credentials>;

    /// Whether the directory is due for a refresh.
    async fn has_pending_updates(&self) -> bool;

    /// Refresh the directory now.
    async fn apply_pending_updates(&self) -> Result<()>;
}

/// Tunables of [`ServiceUserRepository`].
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    pub source_type: String,
    pub users_cache: CacheConfig,
    pub credentials_cache: CacheConfig,
    pub token_expiry_margin: Duration,
    /// Versioned or plain user ids to keep. Empty keeps every user.
    pub allowed_users: HashSet<String>,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            source_type: "Oura".to_string(),
            users_cache: CacheConfig {
                refresh_interval: Duration::from_secs(60 * 60),
                retry_interval: Duration::from_secs(60),
            },
            credentials_cache: CacheConfig {
                refresh_interval: Duration::from_secs(24 * 60 * 60),
                retry_interval: Duration::from_secs(60),
            },
            token_expiry_margin: OAuth2Credentials::DEFAULT_EXPIRY_MARGIN,
            allowed_users: HashSet::new(),
        }
    }
}

impl RepositoryOptions {
    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        let (users_refresh, users_retry) = config
            .cache
            .users
            .intervals("cache.users")
            .map_err(invalid_config)?;
        let (credentials_refresh, credentials_retry) = config
            .cache
            .credentials
            .intervals("cache.credentials")
            .map_err(invalid_config)?;

        Ok(Self {
            source_type: config.repository.source_type.clone(),
            users_cache: CacheConfig::new(users_refresh, users_retry)?,
            credentials_cache: CacheConfig::new(credentials_refresh, credentials_retry)?,
            token_expiry_margin: parse_duration(&config.cache.token_expiry_margin)
                .map_err(invalid_config)?,
            allowed_users: config.users.iter().cloned().collect(),
        })
    }
}

fn invalid_config(err: oura_source_config::ConfigError) -> RepositoryError {
    RepositoryError::InvalidArgument(err.to_string())
}

/// [`UserRepository`] backed by the repository REST service.
#[derive(Debug)]
pub struct ServiceUserRepository {
    client: RepositoryClient,
    users: CachedSet<User>,
    credentials: Arc<CredentialManager>,
}

impl ServiceUserRepository {
    pub fn new(client: RepositoryClient, options: RepositoryOptions) -> Self {
        let credentials = Arc::new(CredentialManager::new(
            client.clone(),
            options.credentials_cache,
            options.token_expiry_margin,
        ));

        let fetch_client = client.clone();
        let fetch_credentials = Arc::clone(&credentials);
        let source_type = options.source_type;
        let allowed = Arc::new(options.allowed_users);
        let users = CachedSet::new("users", options.users_cache, move || {
            let client = fetch_client.clone();
            let credentials = Arc::clone(&fetch_credentials);
            let source_type = source_type.clone();
            let allowed = Arc::clone(&allowed);
            async move {
                tracing::info!("Requesting user information from webservice");
                let users: Vec<User> = client
                    .users(&source_type)
                    .await?
                    .into_iter()
                    .filter(|user| is_allowed(&allowed, user))
                    .collect();

                let ids: HashSet<String> = users.iter().map(|user| user.id.clone()).collect();
                credentials.retain_users(&ids);
                tracing::debug!(count = users.len(), "Fetched user directory");
                Ok(users)
            }
        });

        Self {
            client,
            users,
            credentials,
        }
    }

    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        let client = RepositoryClient::from_config(&config.repository)?;
        Ok(Self::new(client, RepositoryOptions::from_config(config)?))
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }
}

fn is_allowed(allowed: &HashSet<String>, user: &User) -> bool {
    allowed.is_empty() || allowed.contains(&user.versioned_id()) || allowed.contains(&user.id)
}

#[async_trait]
impl UserRepository for ServiceUserRepository {
    async fn lookup(&self, id: &str) -> Result<User> {
        self.client.user(id).await
    }

    async fn stream(&self) -> Result<UserStream> {
        self.users.stream().await
    }

    async fn get_access_token(&self, user: &User) -> Result<OAuth2Credentials> {
        self.credentials.get_access_token(user).await
    }

    async fn refresh_access_token(&self, user: &User) -> Result<OAuth2Credentials> {
        self.credentials.refresh_access_token(user).await
    }

    async fn has_pending_updates(&self) -> bool {
        self.users.is_stale().await
    }

    async fn apply_pending_updates(&self) -> Result<()> {
        self.users.get().await.map(|_| ())
    }
}
